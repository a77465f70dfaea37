//! 持久化层：报告存储契约、SQLite / 内存实现、带退避的连接网关与文件导出

pub mod backoff;
pub mod export;
pub mod gateway;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::research::ResearchReport;

pub use backoff::BackoffPolicy;
pub use export::{export_report, ExportFormat};
pub use gateway::{PersistenceGateway, SaveOutcome};
pub use memory::{InMemoryConnector, InMemoryReportStore};
pub use sqlite::{SqliteConnector, SqliteReportStore};

/// 已连接的报告存储
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// 按 id 写入；同 id 覆盖
    async fn save(&self, report: &ResearchReport) -> Result<(), String>;

    async fn get(&self, id: Uuid) -> Result<Option<ResearchReport>, String>;

    /// topic_normalized 为 normalize_topic 后的话题；按 created_at 倒序
    async fn list_recent(
        &self,
        topic_normalized: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResearchReport>, String>;
}

/// 建立存储连接（由 PersistenceGateway 以指数退避重试）
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// 日志用的目标描述
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Arc<dyn ReportStore>, String>;
}
