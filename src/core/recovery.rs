//! 错误恢复引擎
//!
//! 根据 ResearchError 类型与已尝试次数返回 RecoveryAction，供 Loop Controller 与 Synthesizer
//! 决定是重试、降级为启发式、排除工具、记录告警还是直接收尾。

use crate::core::{RecoveryAction, ResearchError};

/// 生成类步骤（规划 / 反思 / 合成）的最大尝试次数：首次 + 同步重试一次
pub const MAX_GENERATION_ATTEMPTS: u32 = 2;

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// attempt 为已经失败的次数（从 1 开始）
    pub fn handle(&self, err: &ResearchError, attempt: u32) -> RecoveryAction {
        match err {
            ResearchError::Planning(_)
            | ResearchError::Reflection(_)
            | ResearchError::Synthesis(_) => {
                if attempt < MAX_GENERATION_ATTEMPTS {
                    RecoveryAction::Retry
                } else {
                    RecoveryAction::Fallback
                }
            }
            ResearchError::ToolUnavailable { tool, .. }
            | ResearchError::ToolInvocation { tool, .. }
            | ResearchError::ToolTimeout { tool } => RecoveryAction::ExcludeTool(tool.clone()),
            ResearchError::Persistence(_) => RecoveryAction::Degrade,
            ResearchError::SessionTimeout | ResearchError::Cancelled => RecoveryAction::Finalize,
            ResearchError::InvalidRequest(_) | ResearchError::Config(_) => RecoveryAction::Reject,
        }
    }
}
