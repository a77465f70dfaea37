//! Query Planner：为下一轮生成 (tool, query) 子查询
//!
//! LlmQueryPlanner 调用生成式模型并解析 JSON 计划（prompt 中附带 schemars 生成的输出 Schema），
//! 过滤掉不存在的工具；TopicFanOutPlanner 是确定性的启发式回退，也便于测试替换。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};

use crate::core::ResearchError;
use crate::llm::{LlmClient, Message};
use crate::research::parse::parse_json;
use crate::tools::ToolSpec;

/// 一次工具调用计划
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct PlannedQuery {
    /// 工具名，必须是可用工具之一
    pub tool: String,
    /// 发给该工具的查询
    pub query: String,
}

impl PlannedQuery {
    pub fn new(tool: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            query: query.into(),
        }
    }
}

/// 规划输出的 JSON Schema，拼入 prompt 以减少格式错误
pub fn plan_schema_json() -> String {
    let schema = schema_for!(Vec<PlannedQuery>);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 规划器契约：topic 为本轮焦点，session_summary 为会话摘要
#[async_trait]
pub trait QueryPlanner: Send + Sync {
    async fn plan(
        &self,
        topic: &str,
        session_summary: &str,
        available_tools: &[ToolSpec],
    ) -> Result<Vec<PlannedQuery>, ResearchError>;
}

/// 过滤未知工具与空查询，去重并截断
fn sanitize(plan: Vec<PlannedQuery>, tools: &[ToolSpec], max_queries: usize) -> Vec<PlannedQuery> {
    let known: HashSet<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    let mut seen = HashSet::new();
    plan.into_iter()
        .map(|q| PlannedQuery::new(q.tool.trim(), q.query.trim()))
        .filter(|q| {
            if !known.contains(q.tool.as_str()) {
                tracing::warn!(tool = %q.tool, "planner proposed unknown tool, dropped");
                return false;
            }
            !q.query.is_empty()
        })
        .filter(|q| seen.insert(q.clone()))
        .take(max_queries)
        .collect()
}

/// 生成式规划器
pub struct LlmQueryPlanner {
    llm: Arc<dyn LlmClient>,
    max_queries: usize,
}

impl LlmQueryPlanner {
    pub fn new(llm: Arc<dyn LlmClient>, max_queries: usize) -> Self {
        Self {
            llm,
            max_queries: max_queries.max(1),
        }
    }

    fn prompt(&self, topic: &str, session_summary: &str, tools: &[ToolSpec]) -> String {
        let tool_lines = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            r#"You are a research planner. Choose which tools to query next and write one focused query per relevant tool.
Only use tools from the list. Skip tools that are not relevant. Avoid repeating queries for sources we already have.

Focus for this round: {topic}

Session state:
{session_summary}

Available tools:
{tool_lines}

Answer with a JSON array (at most {max} items) matching this schema:
{schema}"#,
            max = self.max_queries,
            schema = plan_schema_json(),
        )
    }
}

#[async_trait]
impl QueryPlanner for LlmQueryPlanner {
    async fn plan(
        &self,
        topic: &str,
        session_summary: &str,
        available_tools: &[ToolSpec],
    ) -> Result<Vec<PlannedQuery>, ResearchError> {
        let messages = vec![
            Message::system("You plan web research. Output JSON only."),
            Message::user(self.prompt(topic, session_summary, available_tools)),
        ];
        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| ResearchError::Planning(format!("LLM error: {e}")))?;

        let raw: Vec<PlannedQuery> = parse_json(&response).map_err(ResearchError::Planning)?;
        let proposed = raw.len();
        let plan = sanitize(raw, available_tools, self.max_queries);
        if proposed > 0 && plan.is_empty() {
            return Err(ResearchError::Planning(
                "plan referenced no available tool".to_string(),
            ));
        }
        Ok(plan)
    }
}

/// 启发式回退：每个可用工具各查一次当前焦点
#[derive(Debug, Default, Clone, Copy)]
pub struct TopicFanOutPlanner;

#[async_trait]
impl QueryPlanner for TopicFanOutPlanner {
    async fn plan(
        &self,
        topic: &str,
        _session_summary: &str,
        available_tools: &[ToolSpec],
    ) -> Result<Vec<PlannedQuery>, ResearchError> {
        Ok(available_tools
            .iter()
            .map(|t| PlannedQuery::new(t.name.clone(), topic.trim()))
            .collect())
    }
}
