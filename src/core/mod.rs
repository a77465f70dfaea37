//! 核心编排层：错误与恢复、会话状态机、会话监管、Orchestrator 与构建器

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use builder::{
    build_tool_registry, create_llm_from_config, create_orchestrator_builder, OrchestratorBuilder,
};
pub use error::{RecoveryAction, ResearchError};
pub use orchestrator::{Orchestrator, ResearchLimits, ResearchRequest, MAX_TOPIC_CHARS};
pub use recovery::{RecoveryEngine, MAX_GENERATION_ATTEMPTS};
pub use session_supervisor::{SessionGuard, SessionSupervisor};
pub use state::{next_after_reflection, Decision, SessionPhase};
