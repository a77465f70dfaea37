//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `FORAGER__*` 覆盖（双下划线表示嵌套，如 `FORAGER__LLM__PROVIDER=openai`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub research: ResearchSection,
    pub tools: ToolsSection,
    pub storage: StorageSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai / mock；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmProviderSection,
    #[serde(default)]
    pub openai: LlmProviderSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmProviderSection::default(),
            openai: LlmProviderSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmProviderSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [research] 段：循环上限、会话超时、规划规模与反思回退策略
#[derive(Debug, Clone, Deserialize)]
pub struct ResearchSection {
    /// 请求未指定 max_loops 时的默认值
    #[serde(default = "default_max_loops")]
    pub default_max_loops: u32,
    /// 请求 max_loops 的上限（夹紧）
    #[serde(default = "default_max_loops_limit")]
    pub max_loops_limit: u32,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_synthesis_timeout_secs")]
    pub synthesis_timeout_secs: u64,
    #[serde(default = "default_max_queries_per_round")]
    pub max_queries_per_round: usize,
    /// 反思失败后的启发式：continue（直到上限）/ sufficient
    #[serde(default = "default_reflection_fallback")]
    pub reflection_fallback: String,
    /// 额外视为高可信的域名
    #[serde(default)]
    pub trusted_domains: Vec<String>,
}

impl Default for ResearchSection {
    fn default() -> Self {
        Self {
            default_max_loops: default_max_loops(),
            max_loops_limit: default_max_loops_limit(),
            session_timeout_secs: default_session_timeout_secs(),
            synthesis_timeout_secs: default_synthesis_timeout_secs(),
            max_queries_per_round: default_max_queries_per_round(),
            reflection_fallback: default_reflection_fallback(),
            trusted_domains: Vec::new(),
        }
    }
}

impl ResearchSection {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn synthesis_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesis_timeout_secs)
    }
}

fn default_max_loops() -> u32 {
    3
}

fn default_max_loops_limit() -> u32 {
    10
}

fn default_session_timeout_secs() -> u64 {
    300
}

fn default_synthesis_timeout_secs() -> u64 {
    90
}

fn default_max_queries_per_round() -> usize {
    8
}

fn default_reflection_fallback() -> String {
    "continue".to_string()
}

/// [tools] 段：绑定超时、默认调用超时与数据驱动的工具端点
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 注册表绑定单个工具的超时（秒）
    #[serde(default = "default_bind_timeout_secs")]
    pub bind_timeout_secs: u64,
    /// 单次工具调用超时（秒），端点可单独覆盖
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            bind_timeout_secs: default_bind_timeout_secs(),
            tool_timeout_secs: default_tool_timeout_secs(),
            endpoints: Vec::new(),
        }
    }
}

fn default_bind_timeout_secs() -> u64 {
    30
}

fn default_tool_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    WebFetch,
    HttpSearch,
    Echo,
}

/// [[tools.endpoints]]：一个可独立缺席的外部检索能力
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    pub kind: EndpointKind,
    pub description: Option<String>,
    /// http_search 的接口地址；web_fetch 的查询模板（含 `{query}`）
    pub url: Option<String>,
    /// 保存 API Key 的环境变量名
    pub api_key_env: Option<String>,
    /// API Key 放在哪个请求头；缺省为 Bearer 认证
    pub api_key_header: Option<String>,
    /// 查询参数名，缺省 q
    pub query_param: Option<String>,
    pub timeout_secs: Option<u64>,
    pub max_results: Option<usize>,
    /// 结果数组的 JSON Pointer，如 `/results`
    pub results_pointer: Option<String>,
    pub title_field: Option<String>,
    pub url_field: Option<String>,
    pub snippet_field: Option<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    pub max_excerpt_chars: Option<usize>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// [storage] 段：持久化开关、数据库地址与连接退避
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_storage_enabled")]
    pub enabled: bool,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_max_connect_attempts")]
    pub max_connect_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            enabled: default_storage_enabled(),
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            max_connect_attempts: default_max_connect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

fn default_storage_enabled() -> bool {
    true
}

fn default_database_url() -> String {
    "sqlite:data/forager.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_connect_attempts() -> u32 {
    30
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

/// 从 config 目录加载配置，环境变量 FORAGER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 FORAGER__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("FORAGER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时记录告警并使用默认配置
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "config load failed, using defaults");
        AppConfig::default()
    })
}
