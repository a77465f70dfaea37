//! Report Synthesizer：把终止态会话整理为结构化报告
//!
//! 叙述生成失败时同步重试一次；仍失败则退化为只列出原始来源的最小报告，绝不向调用方返回错误。

use std::cmp::Reverse;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::{RecoveryAction, RecoveryEngine, ResearchError};
use crate::llm::{LlmClient, Message};
use crate::observability::{self, TraceSink};
use crate::research::credibility::credibility;
use crate::research::parse::parse_json;
use crate::research::{ResearchEvent, ResearchReport, ResearchSession, SourceRecord};

/// 模型生成的叙述部分
#[derive(Debug, Clone, Deserialize, PartialEq)]
struct Narrative {
    title: String,
    executive_summary: String,
    #[serde(default)]
    key_findings: Vec<String>,
}

pub struct ReportSynthesizer {
    llm: Arc<dyn LlmClient>,
    recovery: RecoveryEngine,
    timeout: Duration,
    trusted_domains: Vec<String>,
    excerpt_chars: usize,
}

impl ReportSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self {
            llm,
            recovery: RecoveryEngine::new(),
            timeout,
            trusted_domains: Vec::new(),
            excerpt_chars: 500,
        }
    }

    pub fn with_trusted_domains(mut self, domains: Vec<String>) -> Self {
        self.trusted_domains = domains.into_iter().map(|d| d.to_lowercase()).collect();
        self
    }

    pub async fn synthesize(
        &self,
        session: &ResearchSession,
        sink: Option<&dyn TraceSink>,
    ) -> ResearchReport {
        let sources: Vec<SourceRecord> = session.sources().cloned().collect();
        if sources.is_empty() {
            return self.assemble(session, sources, None);
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.generate(session, &sources).await {
                Ok(narrative) => return self.assemble(session, sources, Some(narrative)),
                Err(err) => err,
            };
            match self.recovery.handle(&err, attempt) {
                RecoveryAction::Retry => {
                    tracing::warn!(attempt, error = %err, "report synthesis failed, retrying");
                    observability::emit(
                        sink,
                        ResearchEvent::Recovery {
                            stage: "synthesis".to_string(),
                            action: "retry".to_string(),
                            detail: err.to_string(),
                        },
                    );
                }
                _ => {
                    tracing::warn!(attempt, error = %err, "report synthesis failed, using raw-source report");
                    observability::emit(
                        sink,
                        ResearchEvent::SynthesisFallback {
                            reason: err.to_string(),
                        },
                    );
                    return self.assemble(session, sources, None);
                }
            }
        }
    }

    async fn generate(
        &self,
        session: &ResearchSession,
        sources: &[SourceRecord],
    ) -> Result<Narrative, ResearchError> {
        let findings = sources
            .iter()
            .map(|r| {
                format!(
                    "Source: {} ({})\n{}",
                    r.title,
                    r.reference,
                    r.excerpt.chars().take(self.excerpt_chars).collect::<String>()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let prompt = format!(
            r#"Synthesize the following research findings into a structured report.

Topic: {topic}

Working summary:
{draft}

Research findings:
{findings}

Output format (JSON):
{{
    "title": "report title",
    "executive_summary": "200-300 word summary",
    "key_findings": ["finding 1", "finding 2", "finding 3"]
}}"#,
            topic = session.topic,
            draft = session.draft_summary,
        );

        let messages = vec![Message::user(prompt)];
        let response = tokio::time::timeout(self.timeout, self.llm.complete(&messages))
            .await
            .map_err(|_| ResearchError::Synthesis(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| ResearchError::Synthesis(format!("LLM error: {e}")))?;

        let narrative: Narrative = parse_json(&response).map_err(ResearchError::Synthesis)?;
        if narrative.executive_summary.trim().is_empty() {
            return Err(ResearchError::Synthesis("empty executive summary".to_string()));
        }
        Ok(narrative)
    }

    /// narrative 为 None 时生成最小报告
    fn assemble(
        &self,
        session: &ResearchSession,
        sources: Vec<SourceRecord>,
        narrative: Option<Narrative>,
    ) -> ResearchReport {
        let now = Utc::now();
        let narrative_fallback = narrative.is_none() && !sources.is_empty();
        let (title, executive_summary, key_findings) = match narrative {
            Some(n) => {
                let title = if n.title.trim().is_empty() {
                    default_title(&session.topic)
                } else {
                    n.title.trim().to_string()
                };
                let findings = n
                    .key_findings
                    .into_iter()
                    .map(|f| f.trim().to_string())
                    .filter(|f| !f.is_empty())
                    .collect();
                (title, n.executive_summary.trim().to_string(), findings)
            }
            None => (
                default_title(&session.topic),
                minimal_summary(session, sources.len()),
                Vec::new(),
            ),
        };

        ResearchReport {
            id: Uuid::new_v4(),
            topic: session.topic.clone(),
            title,
            executive_summary,
            key_findings,
            sources_formatted: self.format_sources(&sources),
            sources,
            loop_count: session.loop_count,
            insufficient_sources: session.insufficient_sources,
            partial: session.partial,
            narrative_fallback,
            created_at: now,
            updated_at: now,
        }
    }

    /// 编号来源列表，按可信度从高到低（同级保持原顺序）
    pub fn format_sources(&self, sources: &[SourceRecord]) -> String {
        let mut ranked: Vec<_> = sources
            .iter()
            .map(|s| (credibility(&s.reference, &self.trusted_domains), s))
            .collect();
        ranked.sort_by_key(|(c, _)| Reverse(*c));
        ranked
            .iter()
            .enumerate()
            .map(|(i, (c, s))| {
                format!(
                    "[{}] {} - {} ({}; credibility: {})",
                    i + 1,
                    s.title,
                    s.reference,
                    s.origin,
                    c.as_str()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn default_title(topic: &str) -> String {
    format!("Research: {}", topic.trim())
}

fn minimal_summary(session: &ResearchSession, count: usize) -> String {
    if count == 0 {
        return format!(
            "No sources could be collected for \"{}\" after {} round(s).",
            session.topic, session.loop_count
        );
    }
    let mut out = format!(
        "Collected {count} source(s) for \"{}\" across {} round(s). Narrative synthesis was unavailable; the raw sources are listed below.",
        session.topic, session.loop_count
    );
    if !session.draft_summary.is_empty() {
        out.push_str("\n\nWorking notes: ");
        out.push_str(&session.draft_summary);
    }
    out
}
