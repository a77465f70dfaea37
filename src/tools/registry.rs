//! 能力注册表
//!
//! 所有外部检索能力实现 Tool trait（name / description / connect / invoke），由 ToolRegistry 按名登记；
//! 每个会话开始时 build() 并发绑定所有能力，各自受绑定超时约束。绑定失败只排除该能力并记录日志，
//! 绝不让注册表构建失败；得到的 CapabilitySet 在会话期间只读。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde::Serialize;
use tokio::time::timeout;

use crate::research::SourceRecord;

/// 能力契约：一次查询返回若干条证据或错误
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（规划输出中的 "tool" 字段）
    fn name(&self) -> &str;

    /// 工具描述（供规划器理解用途）
    fn description(&self) -> &str;

    /// 绑定阶段的可用性探测（凭据、健康检查）；默认总是可用
    async fn connect(&self) -> Result<(), String> {
        Ok(())
    }

    async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String>;
}

/// 规划器看到的工具摘要
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
}

/// 一次会话内已解析的能力句柄；构建后不可变
#[derive(Clone)]
pub struct ToolBinding {
    pub name: String,
    pub description: String,
    tool: Arc<dyn Tool>,
    /// 单次调用超时（可按工具配置）
    pub timeout: Duration,
    pub available: bool,
    pub last_error: Option<String>,
}

impl ToolBinding {
    pub fn tool(&self) -> &Arc<dyn Tool> {
        &self.tool
    }

    pub fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
        }
    }
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBinding")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("available", &self.available)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// build() 的结果：全部绑定（含不可用者，用于诊断），只读
#[derive(Clone, Debug, Default)]
pub struct CapabilitySet {
    bindings: Vec<ToolBinding>,
}

impl CapabilitySet {
    pub fn new(bindings: Vec<ToolBinding>) -> Self {
        Self { bindings }
    }

    pub fn available(&self) -> impl Iterator<Item = &ToolBinding> {
        self.bindings.iter().filter(|b| b.available)
    }

    pub fn unavailable(&self) -> impl Iterator<Item = &ToolBinding> {
        self.bindings.iter().filter(|b| !b.available)
    }

    pub fn all(&self) -> &[ToolBinding] {
        &self.bindings
    }

    /// 仅返回可用绑定
    pub fn get(&self, name: &str) -> Option<&ToolBinding> {
        self.available().find(|b| b.name == name)
    }

    /// 没有任何可用绑定；这是合法的降级输入，不是错误
    pub fn is_empty(&self) -> bool {
        self.available().next().is_none()
    }

    pub fn available_names(&self) -> Vec<String> {
        self.available().map(|b| b.name.clone()).collect()
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.available().map(ToolBinding::spec).collect()
    }
}

struct Registration {
    tool: Arc<dyn Tool>,
    timeout: Duration,
}

/// 已配置（尚未绑定）的能力列表，按登记顺序保存；同名登记会替换
pub struct ToolRegistry {
    tools: Vec<Registration>,
    default_timeout: Duration,
    bind_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30), Duration::from_secs(30))
    }
}

impl ToolRegistry {
    pub fn new(default_timeout: Duration, bind_timeout: Duration) -> Self {
        Self {
            tools: Vec::new(),
            default_timeout,
            bind_timeout,
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool), None);
    }

    pub fn register_with_timeout(&mut self, tool: impl Tool + 'static, timeout: Duration) {
        self.register_arc(Arc::new(tool), Some(timeout));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let name = tool.name().to_string();
        self.tools.retain(|r| r.tool.name() != name);
        self.tools.push(Registration { tool, timeout });
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|r| r.tool.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// 并发绑定全部能力；每个绑定独立受 bind_timeout 约束，失败的能力被标记为不可用
    pub async fn build(&self) -> CapabilitySet {
        let attempts = self.tools.iter().map(|reg| self.bind(reg));
        CapabilitySet::new(join_all(attempts).await)
    }

    async fn bind(&self, reg: &Registration) -> ToolBinding {
        let tool = Arc::clone(&reg.tool);
        let name = tool.name().to_string();
        let start = Instant::now();
        let outcome = match timeout(self.bind_timeout, tool.connect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(format!("bind timed out after {:?}", self.bind_timeout)),
        };
        let duration_ms = start.elapsed().as_millis() as u64;
        match &outcome {
            Ok(()) => tracing::info!(tool = %name, duration_ms, "tool bound"),
            Err(e) => tracing::warn!(tool = %name, duration_ms, error = %e, "tool unavailable, excluded"),
        }
        ToolBinding {
            description: tool.description().to_string(),
            name,
            tool,
            timeout: reg.timeout,
            available: outcome.is_ok(),
            last_error: outcome.err(),
        }
    }
}
