//! 状态定义：Loop Controller 的有限状态机
//!
//! PLANNING → DISPATCHING → REFLECTING → {PLANNING | FINALIZING} → DONE；
//! 任意非终止状态都可因超时 / 零绑定 / 零结果直接跳到 FINALIZING。

use serde::Serialize;

/// 会话阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Planning,
    Dispatching,
    Reflecting,
    Finalizing,
    Done,
}

impl SessionPhase {
    /// 状态机允许的迁移
    pub fn can_transition_to(self, next: SessionPhase) -> bool {
        use SessionPhase::*;
        matches!(
            (self, next),
            (Planning, Dispatching)
                | (Dispatching, Reflecting)
                | (Reflecting, Planning)
                | (Planning | Dispatching | Reflecting, Finalizing)
                | (Finalizing, Done)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == SessionPhase::Done
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Planning => "planning",
            SessionPhase::Dispatching => "dispatching",
            SessionPhase::Reflecting => "reflecting",
            SessionPhase::Finalizing => "finalizing",
            SessionPhase::Done => "done",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 反思阶段的决策
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// 继续下一轮，可选带一个细化后的子话题
    Continue { refined_topic: Option<String> },
    /// 证据已足够
    Sufficient,
}

impl Decision {
    pub fn is_continue(&self) -> bool {
        matches!(self, Decision::Continue { .. })
    }
}

/// REFLECTING 之后的下一状态：仅当 CONTINUE 且 loop_count < max_loops 时回到 PLANNING
pub fn next_after_reflection(decision: &Decision, loop_count: u32, max_loops: u32) -> SessionPhase {
    if decision.is_continue() && loop_count < max_loops {
        SessionPhase::Planning
    } else {
        SessionPhase::Finalizing
    }
}
