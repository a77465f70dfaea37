//! 网页抓取能力：域名白名单、超时、摘录长度限制
//!
//! 查询若本身是 URL 则直接抓取；否则代入 url_template 中的 `{query}`（如站内搜索页）。
//! 仅允许白名单域名；对 HTML 响应使用 html2text 提取可读文本，并取 <title> 作为标题。

use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Url};

use crate::research::SourceRecord;
use crate::tools::Tool;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

pub struct WebFetchTool {
    name: String,
    description: String,
    client: Client,
    url_template: Option<String>,
    allowed_domains: HashSet<String>,
    max_excerpt_chars: usize,
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start();
    s.starts_with("<!")
        || s.to_ascii_lowercase().starts_with("<html")
        || (s.contains("</") && (s.contains("<head") || s.contains("<title") || s.contains("<body")))
}

fn extract_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = TITLE
        .get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").ok())
        .as_ref()?;
    let title = strip_html_tags(re.captures(html)?.get(1)?.as_str());
    (!title.is_empty()).then_some(title)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        text.chars().take(max).collect::<String>() + "...[truncated]"
    } else {
        text.to_string()
    }
}

impl WebFetchTool {
    pub fn new(
        name: impl Into<String>,
        url_template: Option<String>,
        allowed_domains: Vec<String>,
        timeout: Duration,
        max_excerpt_chars: usize,
    ) -> Self {
        let name = name.into();
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en;q=0.9,zh-CN;q=0.8"));
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .unwrap_or_default();
        Self {
            description: format!(
                "Fetch a web page (allowlisted domains) and return its readable text. Query: a URL{}.",
                if url_template.is_some() { " or free-text search terms" } else { "" }
            ),
            name,
            client,
            url_template,
            allowed_domains: allowed_domains
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
            max_excerpt_chars,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// 查询转 URL：URL 原样使用，否则代入模板
    fn resolve_url(&self, query: &str) -> Result<Url, String> {
        let query = query.trim();
        if let Ok(url) = Url::parse(query) {
            if matches!(url.scheme(), "http" | "https") {
                return Ok(url);
            }
        }
        let template = self
            .url_template
            .as_deref()
            .ok_or_else(|| format!("Query is not a URL: {query}"))?;
        let encoded: String = Url::parse_with_params("http://q", &[("q", query)])
            .ok()
            .and_then(|u| u.query().map(|q| q.trim_start_matches("q=").to_string()))
            .unwrap_or_else(|| query.replace(' ', "+"));
        Url::parse(&template.replace("{query}", &encoded)).map_err(|e| e.to_string())
    }

    fn is_allowed(&self, url: &Url) -> Result<(), String> {
        let host = url
            .host_str()
            .ok_or_else(|| "Invalid or missing URL".to_string())?
            .to_lowercase();
        if self.allowed_domains.is_empty() || self.allowed_domains.contains(&host) {
            return Ok(());
        }
        Err(format!("Domain not in allowlist: {host}"))
    }

    fn html_to_text(&self, html: &str) -> String {
        match from_read(html.as_bytes(), 120) {
            Ok(text) if !text.trim().is_empty() => text,
            _ => strip_html_tags(html),
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
        let url = self.resolve_url(query)?;
        self.is_allowed(&url)?;
        tracing::debug!(tool = %self.name, url = %url, "web fetch");

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body = resp.text().await.map_err(|e| format!("Read body: {e}"))?;
        let body = body.trim_start_matches('\u{FEFF}');

        let (title, text) = if looks_like_html(body) {
            (extract_title(body), self.html_to_text(body))
        } else {
            (None, body.to_string())
        };
        let final_url = url.to_string();
        Ok(vec![SourceRecord::new(
            self.name.clone(),
            title.unwrap_or_else(|| final_url.clone()),
            final_url,
            truncate_chars(text.trim(), self.max_excerpt_chars),
        )])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(template: Option<&str>, domains: &[&str]) -> WebFetchTool {
        WebFetchTool::new(
            "web",
            template.map(String::from),
            domains.iter().map(|d| d.to_string()).collect(),
            Duration::from_secs(5),
            100,
        )
    }

    #[test]
    fn test_resolve_url_passthrough() {
        let t = tool(None, &[]);
        let url = t.resolve_url("https://en.wikipedia.org/wiki/Rust").unwrap();
        assert_eq!(url.host_str(), Some("en.wikipedia.org"));
    }

    #[test]
    fn test_resolve_url_template_encodes_query() {
        let t = tool(Some("https://en.wikipedia.org/w/index.php?search={query}"), &[]);
        let url = t.resolve_url("rust async & tokio").unwrap();
        assert!(url.as_str().contains("search=rust+async+%26+tokio"));
    }

    #[test]
    fn test_resolve_free_text_without_template_fails() {
        let t = tool(None, &[]);
        assert!(t.resolve_url("just words").is_err());
    }

    #[test]
    fn test_allowlist() {
        let t = tool(None, &["docs.rs"]);
        let ok = Url::parse("https://docs.rs/tokio").unwrap();
        let bad = Url::parse("https://evil.example/x").unwrap();
        assert!(t.is_allowed(&ok).is_ok());
        assert!(t.is_allowed(&bad).unwrap_err().contains("evil.example"));
    }

    #[test]
    fn test_extract_title_and_strip() {
        let html = "<html><head><title> Tokio <b>Guide</b> </title></head><body>x</body></html>";
        assert!(looks_like_html(html));
        assert_eq!(extract_title(html).as_deref(), Some("Tokio Guide"));
        assert_eq!(strip_html_tags("<p>a</p><p>b</p>"), "a b");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("abc", 5), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc...[truncated]");
    }

    #[tokio::test]
    async fn test_invoke_rejects_disallowed_domain_before_network() {
        let t = tool(None, &["docs.rs"]);
        let err = t.invoke("https://not-allowed.example/").await.unwrap_err();
        assert!(err.contains("allowlist"));
    }
}
