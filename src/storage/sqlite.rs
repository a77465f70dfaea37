//! SQLite 报告存储（sqlx，完全异步）
//!
//! research_reports 表带 topic_normalized 列及 (topic_normalized, created_at) 索引，
//! 按话题查询最近报告时走索引。时间以固定精度 RFC3339 文本存储，字典序即时间序。

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::research::{normalize_topic, ResearchReport, SourceRecord};
use crate::storage::{ReportStore, StoreConnector};

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    /// 连接并建表；url 形如 `sqlite:data/forager.db` 或 `sqlite::memory:`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.init_tables().await?;
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS research_reports (
                id TEXT PRIMARY KEY,
                topic TEXT NOT NULL,
                topic_normalized TEXT NOT NULL,
                title TEXT NOT NULL,
                executive_summary TEXT NOT NULL,
                key_findings TEXT NOT NULL,
                sources_formatted TEXT NOT NULL,
                sources TEXT NOT NULL,
                loop_count INTEGER NOT NULL,
                insufficient_sources INTEGER NOT NULL,
                partial INTEGER NOT NULL,
                narrative_fallback INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reports_topic
             ON research_reports(topic_normalized, created_at DESC)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 定长纳秒精度：读回与写入完全一致，且文本排序即时间排序
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {raw:?}: {e}"))
}

fn row_to_report(row: &SqliteRow) -> Result<ResearchReport, String> {
    let get_text = |col: &str| row.try_get::<String, _>(col).map_err(|e| e.to_string());
    let get_flag = |col: &str| row.try_get::<bool, _>(col).map_err(|e| e.to_string());

    let id = Uuid::parse_str(&get_text("id")?).map_err(|e| e.to_string())?;
    let key_findings: Vec<String> =
        serde_json::from_str(&get_text("key_findings")?).map_err(|e| e.to_string())?;
    let sources: Vec<SourceRecord> =
        serde_json::from_str(&get_text("sources")?).map_err(|e| e.to_string())?;
    let loop_count: i64 = row.try_get("loop_count").map_err(|e| e.to_string())?;

    Ok(ResearchReport {
        id,
        topic: get_text("topic")?,
        title: get_text("title")?,
        executive_summary: get_text("executive_summary")?,
        key_findings,
        sources_formatted: get_text("sources_formatted")?,
        sources,
        loop_count: u32::try_from(loop_count).map_err(|e| e.to_string())?,
        insufficient_sources: get_flag("insufficient_sources")?,
        partial: get_flag("partial")?,
        narrative_fallback: get_flag("narrative_fallback")?,
        created_at: parse_timestamp(&get_text("created_at")?)?,
        updated_at: parse_timestamp(&get_text("updated_at")?)?,
    })
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn save(&self, report: &ResearchReport) -> Result<(), String> {
        let key_findings = serde_json::to_string(&report.key_findings).map_err(|e| e.to_string())?;
        let sources = serde_json::to_string(&report.sources).map_err(|e| e.to_string())?;

        sqlx::query(
            "INSERT OR REPLACE INTO research_reports (
                id, topic, topic_normalized, title, executive_summary, key_findings,
                sources_formatted, sources, loop_count, insufficient_sources, partial,
                narrative_fallback, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(report.id.to_string())
        .bind(&report.topic)
        .bind(normalize_topic(&report.topic))
        .bind(&report.title)
        .bind(&report.executive_summary)
        .bind(key_findings)
        .bind(&report.sources_formatted)
        .bind(sources)
        .bind(i64::from(report.loop_count))
        .bind(report.insufficient_sources)
        .bind(report.partial)
        .bind(report.narrative_fallback)
        .bind(timestamp(&report.created_at))
        .bind(timestamp(&report.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| e.to_string())?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ResearchReport>, String> {
        let row = sqlx::query("SELECT * FROM research_reports WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| e.to_string())?;
        row.as_ref().map(row_to_report).transpose()
    }

    async fn list_recent(
        &self,
        topic_normalized: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ResearchReport>, String> {
        let rows = match topic_normalized {
            Some(topic) => {
                sqlx::query(
                    "SELECT * FROM research_reports WHERE topic_normalized = ?
                     ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
                )
                .bind(topic)
                .bind(i64::from(limit))
                .bind(i64::from(offset))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM research_reports
                     ORDER BY created_at DESC, id ASC LIMIT ? OFFSET ?",
                )
                .bind(i64::from(limit))
                .bind(i64::from(offset))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| e.to_string())?;

        rows.iter().map(row_to_report).collect()
    }
}

/// 每次 connect 建立新的连接池并确保表存在
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    database_url: String,
    max_connections: u32,
}

impl SqliteConnector {
    pub fn new(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections,
        }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    fn describe(&self) -> String {
        self.database_url.clone()
    }

    async fn connect(&self) -> Result<Arc<dyn ReportStore>, String> {
        let store = SqliteReportStore::connect(&self.database_url, self.max_connections)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Arc::new(store))
    }
}
