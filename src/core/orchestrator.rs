//! Orchestrator：研究请求入口与报告检索
//!
//! 每个请求：按会话绑定工具 → Loop Controller 跑到 DONE → 尽力持久化 → 返回报告。
//! 只有非法请求会返回错误；工具、规划、合成、持久化失败都体现在报告标记与事件里。

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{ResearchError, SessionGuard, SessionSupervisor};
use crate::observability;
use crate::research::{LoopController, ResearchEvent, ResearchReport, ResearchSession};
use crate::storage::PersistenceGateway;
use crate::tools::{CapabilitySet, ToolRegistry};

/// 话题最大字符数
pub const MAX_TOPIC_CHARS: usize = 2_000;

/// 入站请求
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ResearchRequest {
    pub topic: String,
    #[serde(default)]
    pub max_loops: Option<u32>,
}

impl ResearchRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            max_loops: None,
        }
    }

    pub fn with_max_loops(mut self, max_loops: u32) -> Self {
        self.max_loops = Some(max_loops);
        self
    }
}

/// 会话级限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResearchLimits {
    pub default_max_loops: u32,
    pub max_loops_limit: u32,
    pub session_timeout: Duration,
}

impl Default for ResearchLimits {
    fn default() -> Self {
        Self {
            default_max_loops: 3,
            max_loops_limit: 10,
            session_timeout: Duration::from_secs(300),
        }
    }
}

impl ResearchLimits {
    /// 缺省取默认值，并夹紧到 [0, max_loops_limit]
    pub fn resolve_max_loops(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_max_loops)
            .min(self.max_loops_limit)
    }
}

pub struct Orchestrator {
    registry: ToolRegistry,
    controller: LoopController,
    gateway: Arc<PersistenceGateway>,
    supervisor: SessionSupervisor,
    limits: ResearchLimits,
}

impl Orchestrator {
    pub fn new(
        registry: ToolRegistry,
        controller: LoopController,
        gateway: Arc<PersistenceGateway>,
        limits: ResearchLimits,
    ) -> Self {
        Self {
            registry,
            controller,
            gateway,
            supervisor: SessionSupervisor::new(),
            limits,
        }
    }

    pub fn limits(&self) -> &ResearchLimits {
        &self.limits
    }

    /// 取消所有进行中的会话（进程退出时调用）
    pub fn supervisor(&self) -> &SessionSupervisor {
        &self.supervisor
    }

    pub fn gateway(&self) -> &Arc<PersistenceGateway> {
        &self.gateway
    }

    /// 阻塞直到会话 DONE 或整体超时
    pub async fn research(&self, request: ResearchRequest) -> Result<ResearchReport, ResearchError> {
        let guard = self.supervisor.guard(self.limits.session_timeout);
        self.run(request, guard).await
    }

    /// 与 research 相同，另外可由调用方通过 cancel 提前收尾
    pub async fn research_with_cancel(
        &self,
        request: ResearchRequest,
        cancel: &CancellationToken,
    ) -> Result<ResearchReport, ResearchError> {
        let parent = self.supervisor.cancel_token();
        let token = cancel.child_token();
        let guard = SessionGuard::new(token.clone(), self.limits.session_timeout);
        // 监管器取消时一并取消本会话
        let forward = tokio::spawn(async move {
            parent.cancelled().await;
            token.cancel();
        });
        let result = self.run(request, guard).await;
        forward.abort();
        result
    }

    fn validate(&self, request: &ResearchRequest) -> Result<(String, u32), ResearchError> {
        let topic = request.topic.trim();
        if topic.is_empty() {
            return Err(ResearchError::InvalidRequest("topic must not be empty".to_string()));
        }
        if topic.chars().count() > MAX_TOPIC_CHARS {
            return Err(ResearchError::InvalidRequest(format!(
                "topic exceeds {MAX_TOPIC_CHARS} characters"
            )));
        }
        Ok((topic.to_string(), self.limits.resolve_max_loops(request.max_loops)))
    }

    async fn run(
        &self,
        request: ResearchRequest,
        guard: SessionGuard,
    ) -> Result<ResearchReport, ResearchError> {
        let (topic, max_loops) = self.validate(&request).inspect_err(|e| {
            tracing::warn!(error = %e, "research request rejected");
        })?;
        if request.max_loops.is_some_and(|n| n > max_loops) {
            tracing::info!(requested = ?request.max_loops, max_loops, "max_loops clamped");
        }

        let capabilities = self.registry.build().await;
        let session = ResearchSession::new(topic, max_loops);
        let report = self.controller.run(session, &capabilities, &guard).await;

        let outcome = self.gateway.save(&report).await;
        let sink = self.controller.sink();
        observability::emit(
            sink,
            ResearchEvent::PersistenceOutcome {
                report_id: report.id.to_string(),
                ok: outcome.ok,
                attempts: outcome.attempts,
                error: outcome.error,
            },
        );
        observability::emit(
            sink,
            ResearchEvent::SessionFinished {
                report_id: report.id.to_string(),
                loop_count: report.loop_count,
                sources: report.sources.len(),
                insufficient_sources: report.insufficient_sources,
                partial: report.partial,
            },
        );
        Ok(report)
    }

    /// 绑定诊断：按当前配置尝试绑定所有工具
    pub async fn bindings(&self) -> CapabilitySet {
        self.registry.build().await
    }

    pub async fn fetch_report(&self, id: Uuid) -> Result<Option<ResearchReport>, ResearchError> {
        self.gateway.get(id).await
    }

    pub async fn list_recent(
        &self,
        topic: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResearchReport>, ResearchError> {
        self.gateway.list_recent(topic, limit, offset).await
    }
}
