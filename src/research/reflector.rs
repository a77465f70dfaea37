//! Reflector：每轮检索后的反思与决策（每个完整分发轮一次）
//!
//! 在新证据并入会话后，判断继续（可带细化子话题）还是已足够，并更新草稿摘要。
//! LlmReflector 走生成式模型；HeuristicReflector 是固定策略回退。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::{Decision, ResearchError};
use crate::llm::{LlmClient, Message};
use crate::research::parse::parse_json;
use crate::research::{ResearchSession, SourceRecord};

/// 反思结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reflection {
    pub decision: Decision,
    /// 更新后的草稿摘要；None 表示保留原摘要
    pub summary: Option<String>,
}

impl Reflection {
    pub fn sufficient() -> Self {
        Self {
            decision: Decision::Sufficient,
            summary: None,
        }
    }

    pub fn continue_with(refined_topic: Option<String>) -> Self {
        Self {
            decision: Decision::Continue { refined_topic },
            summary: None,
        }
    }
}

#[async_trait]
pub trait Reflector: Send + Sync {
    /// session 已包含本轮合并结果；new_records 为本轮成功返回的记录
    async fn reflect(
        &self,
        session: &ResearchSession,
        new_records: &[SourceRecord],
    ) -> Result<Reflection, ResearchError>;
}

/// 固定策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// 一直继续，直到达到 max_loops
    #[default]
    ContinueUntilCap,
    AlwaysSufficient,
}

impl FallbackPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "continue" | "continue_until_cap" => Some(Self::ContinueUntilCap),
            "sufficient" | "always_sufficient" => Some(Self::AlwaysSufficient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicReflector {
    policy: FallbackPolicy,
}

impl HeuristicReflector {
    pub fn new(policy: FallbackPolicy) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Reflector for HeuristicReflector {
    async fn reflect(
        &self,
        _session: &ResearchSession,
        _new_records: &[SourceRecord],
    ) -> Result<Reflection, ResearchError> {
        Ok(match self.policy {
            FallbackPolicy::ContinueUntilCap => Reflection::continue_with(None),
            FallbackPolicy::AlwaysSufficient => Reflection::sufficient(),
        })
    }
}

#[derive(Deserialize)]
struct RawReflection {
    decision: String,
    #[serde(default)]
    refined_topic: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// 解析模型输出：优先 JSON；否则接受以 CONTINUE / SUFFICIENT 开头的纯文本
pub fn parse_reflection(output: &str) -> Result<Reflection, ResearchError> {
    let raw = match parse_json::<RawReflection>(output) {
        Ok(raw) => raw,
        Err(parse_err) => {
            let upper = output.trim().to_uppercase();
            if upper.starts_with("SUFFICIENT") {
                return Ok(Reflection::sufficient());
            }
            if upper.starts_with("CONTINUE") {
                return Ok(Reflection::continue_with(None));
            }
            return Err(ResearchError::Reflection(parse_err));
        }
    };

    let decision = match raw.decision.trim().to_lowercase().as_str() {
        "continue" => Decision::Continue {
            refined_topic: raw
                .refined_topic
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
        },
        "sufficient" => Decision::Sufficient,
        other => {
            return Err(ResearchError::Reflection(format!(
                "unknown decision: {other}"
            )))
        }
    };
    Ok(Reflection {
        decision,
        summary: raw.summary.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
    })
}

/// 生成式反思器
pub struct LlmReflector {
    llm: Arc<dyn LlmClient>,
    excerpt_chars: usize,
}

impl LlmReflector {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            llm,
            excerpt_chars: 300,
        }
    }

    fn prompt(&self, session: &ResearchSession, new_records: &[SourceRecord]) -> String {
        let findings = new_records
            .iter()
            .map(|r| {
                format!(
                    "- [{}] {} ({})\n  {}",
                    r.origin,
                    r.title,
                    r.reference,
                    r.excerpt.chars().take(self.excerpt_chars).collect::<String>()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"You review the progress of an iterative research session.

Topic: {topic}
Completed rounds: {done} of at most {max}
Unique sources so far: {count}

Draft summary so far:
{draft}

New evidence from the latest round:
{findings}

Decide whether more research is needed. Output JSON:
{{"decision": "continue" | "sufficient", "refined_topic": "optional narrower sub-topic for the next round", "summary": "updated draft summary"}}"#,
            topic = session.topic,
            done = session.loop_count,
            max = session.max_loops,
            count = session.source_count(),
            draft = if session.draft_summary.is_empty() { "(none)" } else { session.draft_summary.as_str() },
        )
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(
        &self,
        session: &ResearchSession,
        new_records: &[SourceRecord],
    ) -> Result<Reflection, ResearchError> {
        let messages = vec![Message::user(self.prompt(session, new_records))];
        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| ResearchError::Reflection(format!("LLM error: {e}")))?;
        parse_reflection(&response)
    }
}
