//! 聚合：把一轮检索的成功结果并入会话
//!
//! 按规范化引用去重；同一引用冲突时保留 precedence 更小者，合并是交换且幂等的，
//! 结果集合与到达顺序无关。

use std::cmp::Ordering;
use std::collections::btree_map::Entry;

use serde::Serialize;

use crate::research::{ResearchSession, SourceRecord};

/// 一次合并的统计
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    /// 新增的唯一引用数
    pub added: usize,
    /// 与已有引用重复而被忽略的记录数
    pub duplicates: usize,
    /// 与已有引用冲突且按 precedence 替换的记录数
    pub replaced: usize,
}

impl MergeStats {
    /// 本轮合并的记录总数（含重复）
    pub fn received(&self) -> usize {
        self.added + self.duplicates + self.replaced
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn merge<I>(&self, session: &mut ResearchSession, records: I) -> MergeStats
    where
        I: IntoIterator<Item = SourceRecord>,
    {
        let mut stats = MergeStats::default();
        let sources = session.sources_mut();
        for record in records {
            let key = record.canonical_reference();
            if key.is_empty() {
                tracing::debug!(origin = %record.origin, "dropping source without reference");
                continue;
            }
            match sources.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                    stats.added += 1;
                }
                Entry::Occupied(mut slot) => {
                    if record.precedence(slot.get()) == Ordering::Less {
                        slot.insert(record);
                        stats.replaced += 1;
                    } else {
                        stats.duplicates += 1;
                    }
                }
            }
        }
        stats
    }
}
