//! 扇出分发器
//!
//! 一轮中的所有 (tool, query) 并发执行，每次调用各自受该工具的超时约束并相互隔离：
//! 一个调用的错误或超时既不阻塞也不取消其他调用（collect-all, never fail-fast）。
//! 输出与输入顺序一一对应；会话被取消或超时时，仍未完成的调用被硬取消，已完成的结果保留。

use std::time::{Duration, Instant};

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::time::timeout;

use crate::core::{ResearchError, SessionGuard};
use crate::research::{PlannedQuery, SourceRecord};
use crate::tools::CapabilitySet;

/// 单次调用的结果
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub tool: String,
    pub query: String,
    pub result: Result<Vec<SourceRecord>, ResearchError>,
    pub elapsed: Duration,
}

impl CallOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// 一轮分发的全部结果；interrupted 表示会话在本轮中途终止
#[derive(Debug, Clone, Default)]
pub struct DispatchRound {
    pub outcomes: Vec<CallOutcome>,
    pub interrupted: Option<ResearchError>,
}

impl DispatchRound {
    pub fn failures(&self) -> impl Iterator<Item = &CallOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    /// 成功调用返回的记录总数
    pub fn record_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().ok())
            .map(Vec::len)
            .sum()
    }

    /// 取出所有成功记录（失败的调用不参与聚合）
    pub fn into_records(self) -> Vec<SourceRecord> {
        self.outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .flatten()
            .collect()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FanOutDispatcher;

impl FanOutDispatcher {
    pub fn new() -> Self {
        Self
    }

    pub async fn dispatch(
        &self,
        capabilities: &CapabilitySet,
        plan: &[PlannedQuery],
        guard: Option<&SessionGuard>,
    ) -> DispatchRound {
        let mut slots: Vec<Option<CallOutcome>> = (0..plan.len()).map(|_| None).collect();
        let mut pending: FuturesUnordered<_> = plan
            .iter()
            .enumerate()
            .map(|(idx, planned)| async move { (idx, call(capabilities, planned).await) })
            .collect();

        let interrupted = loop {
            tokio::select! {
                next = pending.next() => match next {
                    Some((idx, outcome)) => slots[idx] = Some(outcome),
                    None => break None,
                },
                err = wait_terminated(guard) => break Some(err),
            }
        };
        // 丢弃仍在进行的调用
        drop(pending);

        let outcomes = slots
            .into_iter()
            .zip(plan)
            .map(|(slot, planned)| {
                slot.unwrap_or_else(|| CallOutcome {
                    tool: planned.tool.clone(),
                    query: planned.query.clone(),
                    result: Err(interrupted.clone().unwrap_or(ResearchError::Cancelled)),
                    elapsed: Duration::ZERO,
                })
            })
            .collect();

        DispatchRound {
            outcomes,
            interrupted,
        }
    }
}

async fn wait_terminated(guard: Option<&SessionGuard>) -> ResearchError {
    match guard {
        Some(guard) => guard.terminated().await,
        None => std::future::pending().await,
    }
}

async fn call(capabilities: &CapabilitySet, planned: &PlannedQuery) -> CallOutcome {
    let start = Instant::now();
    let result = match capabilities.get(&planned.tool) {
        None => Err(ResearchError::ToolUnavailable {
            tool: planned.tool.clone(),
            reason: "no available binding".to_string(),
        }),
        Some(binding) => match timeout(binding.timeout, binding.tool().invoke(&planned.query)).await {
            Ok(Ok(records)) => Ok(records
                .into_iter()
                .map(|mut r| {
                    r.origin = binding.name.clone();
                    r
                })
                .collect()),
            Ok(Err(e)) => Err(ResearchError::ToolInvocation {
                tool: planned.tool.clone(),
                reason: e,
            }),
            Err(_) => Err(ResearchError::ToolTimeout {
                tool: planned.tool.clone(),
            }),
        },
    };
    let elapsed = start.elapsed();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(ResearchError::ToolTimeout { .. }) => "timeout",
        Err(ResearchError::ToolUnavailable { .. }) => "unavailable",
        Err(_) => "error",
    };
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": planned.tool,
        "ok": result.is_ok(),
        "outcome": outcome,
        "records": result.as_ref().map(Vec::len).unwrap_or(0),
        "duration_ms": elapsed.as_millis() as u64,
        "query_preview": query_preview(&planned.query),
    });
    tracing::info!(audit = %audit, "tool");

    CallOutcome {
        tool: planned.tool.clone(),
        query: planned.query.clone(),
        result,
        elapsed,
    }
}

fn query_preview(query: &str) -> String {
    if query.chars().count() > 200 {
        format!("{}...", query.chars().take(200).collect::<String>())
    } else {
        query.to_string()
    }
}
