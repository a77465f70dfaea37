//! Forager - 迭代式研究编排引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与恢复、会话状态机、会话监管、Orchestrator
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock）
//! - **observability**: 日志初始化与结构化事件接收端
//! - **research**: 会话、聚合、规划、反思、合成与 Loop Controller
//! - **storage**: 报告持久化（SQLite / 内存）、退避连接与导出
//! - **tools**: 能力契约、注册表、扇出分发器与具体能力

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;
pub mod research;
pub mod storage;
pub mod tools;

pub use crate::core::{Orchestrator, OrchestratorBuilder, ResearchError, ResearchRequest};
pub use crate::research::{ResearchEvent, ResearchReport, SourceRecord};
