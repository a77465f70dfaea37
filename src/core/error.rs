//! 研究编排错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据 ResearchError 决定 Retry / Fallback / ExcludeTool / Degrade / Finalize 等。
//! 除 InvalidRequest 外，任何错误都不会越过 Orchestrator 边界。

use thiserror::Error;

/// 研究会话中可能出现的错误（工具、规划、反思、合成、持久化、超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResearchError {
    /// 注册表绑定阶段失败，该工具本会话内被排除
    #[error("Tool unavailable: {tool}: {reason}")]
    ToolUnavailable { tool: String, reason: String },

    #[error("Tool invocation failed: {tool}: {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error("Tool timeout: {tool}")]
    ToolTimeout { tool: String },

    #[error("Planning error: {0}")]
    Planning(String),

    #[error("Reflection error: {0}")]
    Reflection(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Session timeout")]
    SessionTimeout,

    #[error("Cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl ResearchError {
    /// 工具级错误（绑定失败 / 调用失败 / 超时）对应的工具名
    pub fn tool(&self) -> Option<&str> {
        match self {
            ResearchError::ToolUnavailable { tool, .. }
            | ResearchError::ToolInvocation { tool, .. }
            | ResearchError::ToolTimeout { tool } => Some(tool),
            _ => None,
        }
    }
}

/// 恢复引擎根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 同步重试一次（规划 / 反思 / 合成的首次失败）
    Retry,
    /// 改用固定启发式或最小报告
    Fallback,
    /// 排除该工具的结果，其余调用照常聚合
    ExcludeTool(String),
    /// 记录告警后继续（持久化失败不影响返回报告）
    Degrade,
    /// 立即进入 FINALIZING（会话超时 / 取消）
    Finalize,
    /// 请求本身非法，直接拒绝
    Reject,
}
