//! Persistence Gateway：懒连接 + 指数退避 + 尽力而为的写入
//!
//! 首次使用时以退避策略建立连接并缓存；一轮尝试全部失败则不缓存，下一个会话重新开始。
//! 同一时刻只有一轮连接在进行，并发到达的调用共享这一轮的结果，不会排队各自重跑退避。
//! 写入失败只返回 SaveOutcome 供观测，不影响报告返回；读取失败以 Persistence 错误返回。

use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

use crate::core::ResearchError;
use crate::research::{normalize_topic, ResearchReport};
use crate::storage::{BackoffPolicy, ReportStore, StoreConnector};

/// 一次写入的结果（用于 PersistenceOutcome 事件）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub ok: bool,
    /// 本次调用等待的那一轮连接的尝试次数；已连接时为 0
    pub attempts: u32,
    pub error: Option<String>,
}

/// 一轮连接的结果：(连接结果, 尝试次数)
type CycleOutput = (Result<Arc<dyn ReportStore>, ResearchError>, u32);
type ConnectCycle = Shared<BoxFuture<'static, CycleOutput>>;

#[derive(Default)]
struct ConnectState {
    next_generation: u64,
    inflight: Option<(u64, ConnectCycle)>,
}

pub struct PersistenceGateway {
    connector: Arc<dyn StoreConnector>,
    policy: BackoffPolicy,
    store: OnceCell<Arc<dyn ReportStore>>,
    connecting: Mutex<ConnectState>,
}

impl PersistenceGateway {
    pub fn new(connector: Arc<dyn StoreConnector>, policy: BackoffPolicy) -> Self {
        Self {
            connector,
            policy,
            store: OnceCell::new(),
            connecting: Mutex::new(ConnectState::default()),
        }
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn is_connected(&self) -> bool {
        self.store.initialized()
    }

    /// 尽力写入，从不返回错误
    pub async fn save(&self, report: &ResearchReport) -> SaveOutcome {
        let (store, attempts) = self.store().await;
        let result = match store {
            Ok(store) => store
                .save(report)
                .await
                .map_err(|e| ResearchError::Persistence(format!("write failed: {e}"))),
            Err(err) => Err(err),
        };

        match result {
            Ok(()) => {
                tracing::info!(report = %report.id, attempts, "report persisted");
                SaveOutcome {
                    ok: true,
                    attempts,
                    error: None,
                }
            }
            Err(err) => {
                tracing::warn!(report = %report.id, attempts, error = %err, "persistence degraded, report not stored");
                SaveOutcome {
                    ok: false,
                    attempts,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<ResearchReport>, ResearchError> {
        let store = self.store().await.0?;
        store
            .get(id)
            .await
            .map_err(|e| ResearchError::Persistence(format!("read failed: {e}")))
    }

    /// topic 会先规范化再查询
    pub async fn list_recent(
        &self,
        topic: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResearchReport>, ResearchError> {
        let store = self.store().await.0?;
        let normalized = topic.map(normalize_topic);
        store
            .list_recent(normalized.as_deref(), limit, offset)
            .await
            .map_err(|e| ResearchError::Persistence(format!("read failed: {e}")))
    }

    /// 已连接直接返回；否则加入正在进行的一轮连接，没有则发起新的一轮
    async fn store(&self) -> CycleOutput {
        if let Some(store) = self.store.get() {
            return (Ok(store.clone()), 0);
        }

        let (generation, cycle) = {
            let mut state = self.connecting.lock().await;
            if let Some(store) = self.store.get() {
                return (Ok(store.clone()), 0);
            }
            if let Some(inflight) = state.inflight.clone() {
                inflight
            } else {
                let generation = state.next_generation;
                state.next_generation += 1;
                let cycle = connect_with_backoff(self.connector.clone(), self.policy.clone())
                    .boxed()
                    .shared();
                state.inflight = Some((generation, cycle.clone()));
                (generation, cycle)
            }
        };

        let (result, attempts) = cycle.await;

        let mut state = self.connecting.lock().await;
        if let Ok(store) = &result {
            let _ = self.store.set(store.clone());
        }
        if matches!(&state.inflight, Some((g, _)) if *g == generation) {
            state.inflight = None;
        }
        (result, attempts)
    }
}

async fn connect_with_backoff(
    connector: Arc<dyn StoreConnector>,
    policy: BackoffPolicy,
) -> CycleOutput {
    let target = connector.describe();
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=max_attempts {
        match connector.connect().await {
            Ok(store) => {
                tracing::info!(target = %target, attempt, "connected to report store");
                return (Ok(store), attempt);
            }
            Err(e) => {
                if attempt < max_attempts {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        target = %target,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "report store connection failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    tracing::warn!(
                        target = %target,
                        attempt,
                        max_attempts,
                        error = %e,
                        "report store connection failed, giving up"
                    );
                }
                last_error = e;
            }
        }
    }

    (
        Err(ResearchError::Persistence(format!(
            "connection failed after {max_attempts} attempts: {last_error}"
        ))),
        max_attempts,
    )
}
