//! JSON 搜索 API 能力
//!
//! 面向「GET 端点 + 查询参数 + 可选 API Key，返回 JSON 结果数组」一类外部检索服务
//! （网页搜索、新闻、视频、社交等）。结果数组位置与字段名由配置决定，每个端点一条配置。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::research::SourceRecord;
use crate::tools::Tool;

/// 结果字段映射
#[derive(Debug, Clone)]
pub struct ResultFields {
    /// JSON Pointer，指向结果数组（如 "/results"、"/data/items"）
    pub results_pointer: String,
    pub title: String,
    pub url: String,
    pub snippet: String,
}

impl Default for ResultFields {
    fn default() -> Self {
        Self {
            results_pointer: "/results".to_string(),
            title: "title".to_string(),
            url: "url".to_string(),
            snippet: "snippet".to_string(),
        }
    }
}

pub struct HttpSearchTool {
    name: String,
    description: String,
    client: Client,
    endpoint: String,
    query_param: String,
    api_key_env: Option<String>,
    api_key_header: String,
    fields: ResultFields,
    max_results: usize,
}

impl HttpSearchTool {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Self {
        let name = name.into();
        Self {
            description: format!("Search the {name} API and return matching results. Query: search terms."),
            name,
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            endpoint: endpoint.into(),
            query_param: "q".to_string(),
            api_key_env: None,
            api_key_header: "Authorization".to_string(),
            fields: ResultFields::default(),
            max_results: 5,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_query_param(mut self, param: impl Into<String>) -> Self {
        self.query_param = param.into();
        self
    }

    /// API Key 从该环境变量读取；缺失时绑定失败
    pub fn with_api_key_env(mut self, env: impl Into<String>, header: Option<String>) -> Self {
        self.api_key_env = Some(env.into());
        if let Some(header) = header {
            self.api_key_header = header;
        }
        self
    }

    pub fn with_fields(mut self, fields: ResultFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    fn api_key(&self) -> Result<Option<String>, String> {
        match &self.api_key_env {
            None => Ok(None),
            Some(env) => std::env::var(env)
                .ok()
                .filter(|k| !k.trim().is_empty())
                .map(Some)
                .ok_or_else(|| format!("missing credential: {env}")),
        }
    }

    fn parse_results(&self, body: &Value) -> Result<Vec<SourceRecord>, String> {
        let items = body
            .pointer(&self.fields.results_pointer)
            .and_then(Value::as_array)
            .ok_or_else(|| format!("No result array at {}", self.fields.results_pointer))?;

        Ok(items
            .iter()
            .filter_map(|item| {
                let reference = item.get(&self.fields.url)?.as_str()?.trim();
                if reference.is_empty() {
                    return None;
                }
                let text = |key: &str| {
                    item.get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .trim()
                        .to_string()
                };
                let title = text(&self.fields.title);
                Some(SourceRecord::new(
                    self.name.clone(),
                    if title.is_empty() { reference.to_string() } else { title },
                    reference,
                    text(&self.fields.snippet),
                ))
            })
            .take(self.max_results)
            .collect())
    }
}

#[async_trait]
impl Tool for HttpSearchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn connect(&self) -> Result<(), String> {
        self.api_key()?;
        reqwest::Url::parse(&self.endpoint).map_err(|e| format!("Invalid endpoint: {e}"))?;
        Ok(())
    }

    async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
        let mut request = self
            .client
            .get(&self.endpoint)
            .query(&[(self.query_param.as_str(), query.trim())]);
        if let Some(key) = self.api_key()? {
            let value = if self.api_key_header.eq_ignore_ascii_case("authorization") {
                format!("Bearer {key}")
            } else {
                key
            };
            request = request.header(self.api_key_header.as_str(), value);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid JSON: {e}"))?;
        self.parse_results(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> HttpSearchTool {
        HttpSearchTool::new("news", "https://api.example.com/search", Duration::from_secs(5))
    }

    #[test]
    fn test_parse_results_default_fields() {
        let body = json!({
            "results": [
                {"title": "A", "url": "https://a.com", "snippet": "first"},
                {"title": "", "url": "https://b.com"},
                {"title": "no url"}
            ]
        });
        let records = tool().parse_results(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title, "A");
        assert_eq!(records[0].excerpt, "first");
        assert_eq!(records[1].title, "https://b.com");
        assert_eq!(records[0].origin, "news");
    }

    #[test]
    fn test_parse_results_custom_pointer_and_limit() {
        let body = json!({"data": {"items": [
            {"name": "v1", "link": "https://v.com/1"},
            {"name": "v2", "link": "https://v.com/2"},
            {"name": "v3", "link": "https://v.com/3"}
        ]}});
        let t = tool()
            .with_fields(ResultFields {
                results_pointer: "/data/items".to_string(),
                title: "name".to_string(),
                url: "link".to_string(),
                snippet: "desc".to_string(),
            })
            .with_max_results(2);
        let records = t.parse_results(&body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].reference, "https://v.com/2");
    }

    #[test]
    fn test_parse_results_missing_array_is_error() {
        assert!(tool().parse_results(&json!({"hits": []})).is_err());
    }

    #[tokio::test]
    async fn test_connect_fails_without_credential() {
        let t = tool().with_api_key_env("FORAGER_TEST_SURELY_UNSET_KEY", None);
        let err = t.connect().await.unwrap_err();
        assert!(err.contains("FORAGER_TEST_SURELY_UNSET_KEY"));
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_endpoint() {
        let t = HttpSearchTool::new("bad", "not a url", Duration::from_secs(1));
        assert!(t.connect().await.is_err());
    }
}
