//! 研究报告：仅由终止态会话生成，是被持久化的单元

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::research::SourceRecord;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResearchReport {
    pub id: Uuid,
    pub topic: String,
    pub title: String,
    pub executive_summary: String,
    pub key_findings: Vec<String>,
    pub sources_formatted: String,
    /// 会话收集到的去重来源
    pub sources: Vec<SourceRecord>,
    /// 等于终止态会话的 loop_count
    pub loop_count: u32,
    pub insufficient_sources: bool,
    /// 会话因超时或取消提前收尾
    pub partial: bool,
    /// 叙述合成失败，仅列出原始来源
    pub narrative_fallback: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchReport {
    /// Markdown 渲染（导出 / 终端展示）
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n", self.title);
        let mut flags = Vec::new();
        if self.insufficient_sources {
            flags.push("insufficient sources");
        }
        if self.partial {
            flags.push("partial (session ended early)");
        }
        if self.narrative_fallback {
            flags.push("raw sources only");
        }
        out.push_str(&format!(
            "_Topic: {} | Rounds: {} | Sources: {} | Generated: {}_\n\n",
            self.topic,
            self.loop_count,
            self.sources.len(),
            self.created_at.to_rfc3339()
        ));
        if !flags.is_empty() {
            out.push_str(&format!("> Note: {}\n\n", flags.join(", ")));
        }
        out.push_str("## Executive Summary\n\n");
        out.push_str(&self.executive_summary);
        out.push_str("\n\n");
        if !self.key_findings.is_empty() {
            out.push_str("## Key Findings\n\n");
            for finding in &self.key_findings {
                out.push_str(&format!("- {finding}\n"));
            }
            out.push('\n');
        }
        out.push_str("## Sources\n\n");
        if self.sources_formatted.is_empty() {
            out.push_str("(none)\n");
        } else {
            out.push_str(&self.sources_formatted);
            out.push('\n');
        }
        out
    }
}
