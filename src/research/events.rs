//! 研究过程事件：供可选的 TraceSink 消费（日志、SSE、测试断言）

use serde::Serialize;

use crate::core::SessionPhase;

/// 单个事件（可序列化为 JSON）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResearchEvent {
    SessionStarted {
        session_id: String,
        topic: String,
        max_loops: u32,
        tools: Vec<String>,
    },
    /// 注册表绑定阶段被排除的工具
    ToolUnavailable { tool: String, reason: String },
    PhaseChanged {
        from: SessionPhase,
        to: SessionPhase,
        loop_count: u32,
        max_loops: u32,
    },
    RoundPlanned { loop_count: u32, queries: usize },
    ToolFailed {
        tool: String,
        query: String,
        reason: String,
    },
    RoundMerged {
        loop_count: u32,
        added: usize,
        duplicates: usize,
        failures: usize,
    },
    RoundDecision {
        loop_count: u32,
        decision: String,
        refined_topic: Option<String>,
    },
    /// 错误恢复动作（Retry / Fallback）
    Recovery { stage: String, action: String, detail: String },
    SessionTimedOut { loop_count: u32, reason: String },
    SynthesisFallback { reason: String },
    PersistenceOutcome {
        report_id: String,
        ok: bool,
        attempts: u32,
        error: Option<String>,
    },
    SessionFinished {
        report_id: String,
        loop_count: u32,
        sources: usize,
        insufficient_sources: bool,
        partial: bool,
    },
}

impl ResearchEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchEvent::SessionStarted { .. } => "session_started",
            ResearchEvent::ToolUnavailable { .. } => "tool_unavailable",
            ResearchEvent::PhaseChanged { .. } => "phase_changed",
            ResearchEvent::RoundPlanned { .. } => "round_planned",
            ResearchEvent::ToolFailed { .. } => "tool_failed",
            ResearchEvent::RoundMerged { .. } => "round_merged",
            ResearchEvent::RoundDecision { .. } => "round_decision",
            ResearchEvent::Recovery { .. } => "recovery",
            ResearchEvent::SessionTimedOut { .. } => "session_timed_out",
            ResearchEvent::SynthesisFallback { .. } => "synthesis_fallback",
            ResearchEvent::PersistenceOutcome { .. } => "persistence_outcome",
            ResearchEvent::SessionFinished { .. } => "session_finished",
        }
    }
}
