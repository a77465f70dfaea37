//! Echo 能力：离线、确定性地把查询回显为一条证据（本地演示与冒烟测试用）

use async_trait::async_trait;

use crate::research::SourceRecord;
use crate::tools::Tool;

pub struct EchoTool {
    name: String,
}

impl EchoTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for EchoTool {
    fn default() -> Self {
        Self::new("echo")
    }
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Offline tool that echoes the query back as a single source. Query: any text."
    }

    async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
        let query = query.trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        Ok(vec![SourceRecord::new(
            self.name.clone(),
            format!("Echo: {query}"),
            format!("echo://{}/{}", self.name, query.to_lowercase().replace(' ', "-")),
            query,
        )])
    }
}
