//! 工具层：能力契约、注册表、扇出分发器与具体能力（web_fetch / http_search / echo）

pub mod dispatcher;
pub mod echo;
pub mod http_search;
pub mod registry;
pub mod web_fetch;

pub use dispatcher::{CallOutcome, DispatchRound, FanOutDispatcher};
pub use echo::EchoTool;
pub use http_search::{HttpSearchTool, ResultFields};
pub use registry::{CapabilitySet, Tool, ToolBinding, ToolRegistry, ToolSpec};
pub use web_fetch::WebFetchTool;
