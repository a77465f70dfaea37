//! 集成测试共用的桩工具与构建辅助

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forager::config::AppConfig;
use forager::core::{Orchestrator, OrchestratorBuilder};
use forager::llm::{LlmClient, MockLlmClient};
use forager::observability::ChannelSink;
use forager::storage::{InMemoryReportStore, ReportStore, StoreConnector};
use forager::tools::{Tool, ToolRegistry};
use forager::{ResearchEvent, SourceRecord};
use tokio::sync::mpsc::UnboundedReceiver;

/// 每次调用返回一条新的唯一来源
pub struct UniqueSourceTool {
    pub name: String,
    pub calls: AtomicUsize,
}

impl UniqueSourceTool {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for UniqueSourceTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "returns one new source per call"
    }

    async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![SourceRecord::new(
            self.name.clone(),
            format!("{query} ({n})"),
            format!("https://{}.example.org/doc/{n}", self.name),
            format!("evidence {n} for {query}"),
        )])
    }
}

/// 调用总是失败
pub struct FailingTool(pub &'static str);

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "always errors"
    }

    async fn invoke(&self, _query: &str) -> Result<Vec<SourceRecord>, String> {
        Err("HTTP 503".to_string())
    }
}

/// 绑定阶段即失败
pub struct UnbindableTool(pub &'static str);

#[async_trait]
impl Tool for UnbindableTool {
    fn name(&self) -> &str {
        self.0
    }

    fn description(&self) -> &str {
        "cannot connect"
    }

    async fn connect(&self) -> Result<(), String> {
        Err("missing credential".to_string())
    }

    async fn invoke(&self, _query: &str) -> Result<Vec<SourceRecord>, String> {
        Ok(Vec::new())
    }
}

/// 先快速返回 fast_records 条，其后的调用阻塞 delay
pub struct SlowTool {
    pub name: &'static str,
    pub delay: Duration,
    pub calls: AtomicUsize,
}

#[async_trait]
impl Tool for SlowTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "slow"
    }

    async fn invoke(&self, _query: &str) -> Result<Vec<SourceRecord>, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![SourceRecord::new(self.name, "late", "https://slow.example.org/late", "")])
    }
}

/// 前 fail_first 次连接失败，之后连到共享的内存存储
pub struct FlakyConnector {
    pub fail_first: u32,
    pub calls: AtomicU32,
    pub store: Arc<InMemoryReportStore>,
}

impl FlakyConnector {
    pub fn new(fail_first: u32) -> Self {
        Self {
            fail_first,
            calls: AtomicU32::new(0),
            store: Arc::new(InMemoryReportStore::new()),
        }
    }
}

#[async_trait]
impl StoreConnector for FlakyConnector {
    fn describe(&self) -> String {
        "flaky".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn ReportStore>, String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.fail_first {
            Err(format!("connection refused ({n})"))
        } else {
            Ok(self.store.clone())
        }
    }
}

/// 测试配置：快速退避，会话超时较短
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.research.session_timeout_secs = 10;
    cfg.research.synthesis_timeout_secs = 2;
    cfg.tools.tool_timeout_secs = 5;
    cfg.tools.bind_timeout_secs = 2;
    cfg.storage.initial_backoff_ms = 1;
    cfg.storage.max_backoff_ms = 2;
    cfg
}

pub fn registry(tools: Vec<Arc<dyn Tool>>, call_timeout: Duration) -> ToolRegistry {
    let mut registry = ToolRegistry::new(call_timeout, Duration::from_secs(2));
    for tool in tools {
        registry.register_arc(tool, None);
    }
    registry
}

/// 构建带事件通道的 Orchestrator；默认使用空脚本的 Mock LLM（全部走启发式回退）
pub fn orchestrator(
    cfg: AppConfig,
    registry: ToolRegistry,
    connector: Arc<dyn StoreConnector>,
    llm: Option<Arc<dyn LlmClient>>,
) -> (Orchestrator, UnboundedReceiver<ResearchEvent>) {
    let (sink, rx) = ChannelSink::channel();
    let llm = llm.unwrap_or_else(|| Arc::new(MockLlmClient::new()));
    let orch = OrchestratorBuilder::new(cfg)
        .with_llm(llm)
        .with_registry(registry)
        .with_store_connector(connector)
        .with_sink(Arc::new(sink))
        .build();
    (orch, rx)
}

pub fn drain(rx: &mut UnboundedReceiver<ResearchEvent>) -> Vec<ResearchEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}
