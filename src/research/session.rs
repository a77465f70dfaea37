//! 研究会话与证据记录
//!
//! ResearchSession 由 Loop Controller 独占持有，贯穿整个状态机；SourceRecord 一经加入即不可变，
//! 按规范化引用（canonical reference）去重。

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::SessionPhase;

/// 跟踪参数：规范化时剔除
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "msclkid", "ref", "ref_src", "spm"];

/// 一条带出处的检索证据
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    /// 产出该记录的工具名
    pub origin: String,
    pub title: String,
    /// URL 或稳定 id
    pub reference: String,
    pub excerpt: String,
    pub retrieved_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(
        origin: impl Into<String>,
        title: impl Into<String>,
        reference: impl Into<String>,
        excerpt: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            title: title.into(),
            reference: reference.into(),
            excerpt: excerpt.into(),
            retrieved_at: Utc::now(),
        }
    }

    pub fn with_retrieved_at(mut self, at: DateTime<Utc>) -> Self {
        self.retrieved_at = at;
        self
    }

    pub fn canonical_reference(&self) -> String {
        canonical_reference(&self.reference)
    }

    /// 同一引用冲突时的全序：更早检索者优先，其次按 origin / title / excerpt 字典序。
    /// 合并结果因此与到达顺序无关。
    pub fn precedence(&self, other: &SourceRecord) -> Ordering {
        self.retrieved_at
            .cmp(&other.retrieved_at)
            .then_with(|| self.origin.cmp(&other.origin))
            .then_with(|| self.title.cmp(&other.title))
            .then_with(|| self.excerpt.cmp(&other.excerpt))
            .then_with(|| self.reference.cmp(&other.reference))
    }
}

/// 引用规范化：URL 统一 scheme/host 大小写、去 www.、默认端口、片段、尾部斜杠与跟踪参数，
/// 并对 query 排序；非 URL 的 id 区分大小写，只去空白并把 `doi:` 这类前缀转小写。
pub fn canonical_reference(reference: &str) -> String {
    let trimmed = reference.trim();
    let parsed = match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => url,
        _ => return canonical_id(trimmed),
    };

    let host = parsed
        .host_str()
        .unwrap_or_default()
        .trim_start_matches("www.")
        .to_lowercase();

    let mut out = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        out.push_str(&format!(":{port}"));
    }

    let path = parsed.path().trim_end_matches('/');
    out.push_str(path);

    let mut pairs: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| {
            let key = k.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !pairs.is_empty() {
        pairs.sort();
        let query = pairs
            .iter()
            .map(|(k, v)| if v.is_empty() { k.clone() } else { format!("{k}={v}") })
            .collect::<Vec<_>>()
            .join("&");
        out.push('?');
        out.push_str(&query);
    }
    out
}

fn canonical_id(id: &str) -> String {
    match id.split_once(':') {
        Some((prefix, rest))
            if !prefix.is_empty()
                && prefix
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
        {
            format!("{}:{}", prefix.to_ascii_lowercase(), rest)
        }
        _ => id.to_string(),
    }
}

/// 话题规范化：用于持久化索引与按话题检索
pub fn normalize_topic(topic: &str) -> String {
    topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// 单个话题的研究工作状态；从不持久化
#[derive(Clone, Debug)]
pub struct ResearchSession {
    pub id: Uuid,
    pub topic: String,
    pub loop_count: u32,
    pub max_loops: u32,
    /// 按规范化引用排序存放，迭代顺序确定
    collected_sources: BTreeMap<String, SourceRecord>,
    /// 反思阶段维护的草稿摘要（不透明文本）
    pub draft_summary: String,
    pub status: SessionPhase,
    /// CONTINUE 附带的细化子话题，作为下一轮规划焦点
    pub focus: Option<String>,
    pub insufficient_sources: bool,
    /// 因超时 / 取消提前收尾
    pub partial: bool,
}

impl ResearchSession {
    pub fn new(topic: impl Into<String>, max_loops: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            loop_count: 0,
            max_loops,
            collected_sources: BTreeMap::new(),
            draft_summary: String::new(),
            status: SessionPhase::Planning,
            focus: None,
            insufficient_sources: false,
            partial: false,
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceRecord> {
        self.collected_sources.values()
    }

    pub fn source_count(&self) -> usize {
        self.collected_sources.len()
    }

    pub fn contains_reference(&self, reference: &str) -> bool {
        self.collected_sources
            .contains_key(&canonical_reference(reference))
    }

    pub(crate) fn sources_mut(&mut self) -> &mut BTreeMap<String, SourceRecord> {
        &mut self.collected_sources
    }

    /// 当前规划焦点：细化子话题优先，否则为原话题
    pub fn planning_focus(&self) -> &str {
        self.focus.as_deref().unwrap_or(&self.topic)
    }

    /// 供 Planner 使用的会话摘要
    pub fn summary_for_planning(&self) -> String {
        let mut out = format!(
            "Research topic: {}\nRound {} of {}. {} unique sources collected.",
            self.topic,
            self.loop_count + 1,
            self.max_loops,
            self.source_count()
        );
        if let Some(focus) = &self.focus {
            out.push_str(&format!("\nCurrent focus: {focus}"));
        }
        if !self.draft_summary.is_empty() {
            out.push_str(&format!("\nDraft summary so far:\n{}", self.draft_summary));
        }
        let titles: Vec<String> = self
            .sources()
            .take(20)
            .map(|s| format!("- {} ({})", s.title, s.reference))
            .collect();
        if !titles.is_empty() {
            out.push_str("\nKnown sources:\n");
            out.push_str(&titles.join("\n"));
        }
        out
    }
}
