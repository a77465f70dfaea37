//! Orchestrator 构建器：从 AppConfig 组装 LLM、工具注册表、规划 / 反思 / 合成与持久化

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{AppConfig, EndpointConfig, EndpointKind, ToolsSection};
use crate::core::{Orchestrator, ResearchLimits};
use crate::llm::{create_deepseek_client, LlmClient, MockLlmClient, OpenAiClient, DEEPSEEK_CHAT};
use crate::observability::TraceSink;
use crate::research::{
    FallbackPolicy, HeuristicReflector, LlmQueryPlanner, LlmReflector, LoopController,
    ReportSynthesizer,
};
use crate::storage::{
    BackoffPolicy, InMemoryConnector, PersistenceGateway, SqliteConnector, StoreConnector,
};
use crate::tools::{EchoTool, HttpSearchTool, ResultFields, Tool, ToolRegistry, WebFetchTool};

const DEFAULT_EXCERPT_CHARS: usize = 4_000;

/// 按 provider 与 API Key 选择 LLM 后端；均不可用时退回 Mock（规划 / 反思 / 合成走启发式回退）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    let timeout = Duration::from_secs(cfg.llm.timeouts.request);
    if provider == "mock" {
        tracing::info!("Using Mock LLM (configured)");
        return Arc::new(MockLlmClient::new());
    }

    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek && provider != "openai" {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        let model = if model.trim().is_empty() {
            DEEPSEEK_CHAT.to_string()
        } else {
            model
        };
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model), timeout))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(
            OpenAiClient::new(
                cfg.llm.base_url.as_deref(),
                &model,
                std::env::var("OPENAI_API_KEY").ok().as_deref(),
            )
            .with_request_timeout(timeout),
        )
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(MockLlmClient::new())
    }
}

/// 把一条端点配置实例化为能力；配置不完整时返回 None
fn endpoint_tool(ep: &EndpointConfig, call_timeout: Duration) -> Option<Arc<dyn Tool>> {
    let tool: Arc<dyn Tool> = match ep.kind {
        EndpointKind::WebFetch => {
            let mut tool = WebFetchTool::new(
                ep.name.clone(),
                ep.url.clone(),
                ep.allowed_domains.clone(),
                call_timeout,
                ep.max_excerpt_chars.unwrap_or(DEFAULT_EXCERPT_CHARS),
            );
            if let Some(desc) = &ep.description {
                tool = tool.with_description(desc.clone());
            }
            Arc::new(tool)
        }
        EndpointKind::HttpSearch => {
            let Some(url) = ep.url.as_deref() else {
                tracing::warn!(tool = %ep.name, "http_search endpoint has no url, skipped");
                return None;
            };
            let defaults = ResultFields::default();
            let fields = ResultFields {
                results_pointer: ep.results_pointer.clone().unwrap_or(defaults.results_pointer),
                title: ep.title_field.clone().unwrap_or(defaults.title),
                url: ep.url_field.clone().unwrap_or(defaults.url),
                snippet: ep.snippet_field.clone().unwrap_or(defaults.snippet),
            };
            let mut tool = HttpSearchTool::new(ep.name.clone(), url, call_timeout).with_fields(fields);
            if let Some(desc) = &ep.description {
                tool = tool.with_description(desc.clone());
            }
            if let Some(param) = &ep.query_param {
                tool = tool.with_query_param(param.clone());
            }
            if let Some(env) = &ep.api_key_env {
                tool = tool.with_api_key_env(env.clone(), ep.api_key_header.clone());
            }
            if let Some(n) = ep.max_results {
                tool = tool.with_max_results(n);
            }
            Arc::new(tool)
        }
        EndpointKind::Echo => Arc::new(EchoTool::new(ep.name.clone())),
    };
    Some(tool)
}

/// 从 [tools] 段构建注册表：每个启用的端点一条注册，绑定推迟到会话开始
pub fn build_tool_registry(tools: &ToolsSection) -> ToolRegistry {
    let default_timeout = Duration::from_secs(tools.tool_timeout_secs);
    let mut registry = ToolRegistry::new(default_timeout, Duration::from_secs(tools.bind_timeout_secs));

    for ep in &tools.endpoints {
        if !ep.enabled {
            tracing::debug!(tool = %ep.name, "endpoint disabled");
            continue;
        }
        let timeout = ep.timeout_secs.map(Duration::from_secs);
        if let Some(tool) = endpoint_tool(ep, timeout.unwrap_or(default_timeout)) {
            registry.register_arc(tool, timeout);
        }
    }
    if registry.is_empty() {
        tracing::warn!("no tool endpoints configured; research sessions will finalize immediately");
    }
    registry
}

/// sqlite 文件库的父目录需预先存在
fn ensure_sqlite_parent(database_url: &str) {
    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(":memory:") {
        return;
    }
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!(dir = %parent.display(), error = %e, "cannot create database directory");
        }
    }
}

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    registry: Option<ToolRegistry>,
    connector: Option<Arc<dyn StoreConnector>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            registry: None,
            connector: None,
            sink: None,
        }
    }

    /// 覆盖按配置选择的 LLM
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 覆盖按 [tools.endpoints] 构建的注册表
    pub fn with_registry(mut self, registry: ToolRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_store_connector(mut self, connector: Arc<dyn StoreConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    fn build_connector(&self) -> Arc<dyn StoreConnector> {
        let storage = &self.config.storage;
        if !storage.enabled {
            tracing::info!("storage disabled, reports kept in memory");
            return Arc::new(InMemoryConnector::default());
        }
        ensure_sqlite_parent(&storage.database_url);
        Arc::new(SqliteConnector::new(
            storage.database_url.clone(),
            storage.max_connections,
        ))
    }

    pub fn build(self) -> Orchestrator {
        let research = &self.config.research;
        let storage = &self.config.storage;

        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config));
        let connector = self.connector.clone().unwrap_or_else(|| self.build_connector());
        let registry = self
            .registry
            .unwrap_or_else(|| build_tool_registry(&self.config.tools));

        let policy = FallbackPolicy::parse(&research.reflection_fallback).unwrap_or_else(|| {
            tracing::warn!(
                value = %research.reflection_fallback,
                "unknown reflection_fallback, using continue"
            );
            FallbackPolicy::default()
        });

        let synthesizer = ReportSynthesizer::new(llm.clone(), research.synthesis_timeout())
            .with_trusted_domains(research.trusted_domains.clone());
        let controller = LoopController::new(
            Arc::new(LlmQueryPlanner::new(llm.clone(), research.max_queries_per_round)),
            Arc::new(LlmReflector::new(llm)),
            synthesizer,
        )
        .with_fallback_reflector(Arc::new(HeuristicReflector::new(policy)))
        .with_sink(self.sink);

        let gateway = Arc::new(PersistenceGateway::new(
            connector,
            BackoffPolicy::new(
                storage.max_connect_attempts,
                storage.initial_backoff_ms,
                storage.max_backoff_ms,
            ),
        ));
        let limits = ResearchLimits {
            default_max_loops: research.default_max_loops,
            max_loops_limit: research.max_loops_limit,
            session_timeout: research.session_timeout(),
        };

        Orchestrator::new(registry, controller, gateway, limits)
    }
}

/// 便捷函数：加载配置（失败则用默认值）并创建构建器
pub fn create_orchestrator_builder(config_path: Option<PathBuf>) -> OrchestratorBuilder {
    OrchestratorBuilder::new(crate::config::load_config_or_default(config_path))
}
