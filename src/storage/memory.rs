//! 内存报告存储（存储关闭时的默认实现，也用于测试）

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::research::{normalize_topic, ResearchReport};
use crate::storage::{ReportStore, StoreConnector};

#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<Uuid, ResearchReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn save(&self, report: &ResearchReport) -> Result<(), String> {
        self.reports.write().await.insert(report.id, report.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ResearchReport>, String> {
        Ok(self.reports.read().await.get(&id).cloned())
    }

    async fn list_recent(
        &self,
        topic_normalized: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResearchReport>, String> {
        let reports = self.reports.read().await;
        let mut matched: Vec<&ResearchReport> = reports
            .values()
            .filter(|r| topic_normalized.map_or(true, |t| normalize_topic(&r.topic) == t))
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(matched
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// 总是连接到同一个内存存储
#[derive(Clone, Default)]
pub struct InMemoryConnector {
    store: Arc<InMemoryReportStore>,
}

impl InMemoryConnector {
    pub fn new(store: Arc<InMemoryReportStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<InMemoryReportStore> {
        self.store.clone()
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn connect(&self) -> Result<Arc<dyn ReportStore>, String> {
        Ok(self.store.clone())
    }
}
