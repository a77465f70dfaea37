//! 持久化集成测试：退避上限、降级事件与 SQLite 往返

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use forager::core::ResearchRequest;
use forager::storage::{SqliteConnector, StoreConnector};
use forager::tools::Tool;
use forager::ResearchEvent;

fn persistence_outcome(events: &[ResearchEvent]) -> Option<(bool, u32, Option<String>)> {
    events.iter().find_map(|e| match e {
        ResearchEvent::PersistenceOutcome {
            ok, attempts, error, ..
        } => Some((*ok, *attempts, error.clone())),
        _ => None,
    })
}

#[tokio::test]
async fn store_reachable_on_last_allowed_attempt_persists() {
    let cap = 5;
    let mut cfg = test_config();
    cfg.storage.max_connect_attempts = cap;
    let connector = Arc::new(FlakyConnector::new(cap - 1));
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(UniqueSourceTool::new("alpha"))];
    let (orch, mut rx) = orchestrator(
        cfg,
        registry(tools, Duration::from_secs(5)),
        connector.clone(),
        None,
    );

    let report = orch
        .research(ResearchRequest::new("durable").with_max_loops(1))
        .await
        .unwrap();

    assert_eq!(connector.calls.load(Ordering::SeqCst), cap);
    assert_eq!(connector.store.len().await, 1);
    let (ok, attempts, error) = persistence_outcome(&drain(&mut rx)).unwrap();
    assert!(ok);
    assert_eq!(attempts, cap);
    assert!(error.is_none());

    let fetched = orch.fetch_report(report.id).await.unwrap().unwrap();
    assert_eq!(fetched, report);
}

#[tokio::test]
async fn store_unreachable_past_cap_degrades_gracefully() {
    let cap = 4;
    let mut cfg = test_config();
    cfg.storage.max_connect_attempts = cap;
    let connector = Arc::new(FlakyConnector::new(cap + 1));
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(UniqueSourceTool::new("alpha"))];
    let (orch, mut rx) = orchestrator(
        cfg,
        registry(tools, Duration::from_secs(5)),
        connector.clone(),
        None,
    );

    // 报告照常返回
    let report = orch
        .research(ResearchRequest::new("ephemeral").with_max_loops(1))
        .await
        .unwrap();
    assert_eq!(report.sources.len(), 1);

    assert_eq!(connector.calls.load(Ordering::SeqCst), cap);
    assert_eq!(connector.store.len().await, 0);
    let events = drain(&mut rx);
    let (ok, attempts, error) = persistence_outcome(&events).unwrap();
    assert!(!ok);
    assert_eq!(attempts, cap);
    assert!(error.unwrap().contains("Persistence"));
    assert!(matches!(
        events.last(),
        Some(ResearchEvent::SessionFinished { .. })
    ));

    // 失败的连接不缓存：读取时重新开始一轮退避，第 cap+2 次连接成功
    assert!(orch.fetch_report(report.id).await.unwrap().is_none());
    assert_eq!(connector.calls.load(Ordering::SeqCst), cap + 2);
}

#[tokio::test]
async fn sqlite_store_round_trip_through_orchestrator() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("reports.db").display());
    let connector: Arc<dyn StoreConnector> = Arc::new(SqliteConnector::new(url, 2));
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(UniqueSourceTool::new("alpha")),
        Arc::new(UniqueSourceTool::new("beta")),
    ];
    let (orch, _rx) = orchestrator(
        test_config(),
        registry(tools, Duration::from_secs(5)),
        connector,
        None,
    );

    let first = orch
        .research(ResearchRequest::new("Rust Async").with_max_loops(1))
        .await
        .unwrap();
    let second = orch
        .research(ResearchRequest::new("  rust   ASYNC ").with_max_loops(2))
        .await
        .unwrap();
    orch.research(ResearchRequest::new("Go").with_max_loops(1))
        .await
        .unwrap();

    let loaded = orch.fetch_report(second.id).await.unwrap().unwrap();
    assert_eq!(loaded.loop_count, 2);
    assert_eq!(loaded.sources.len(), 4);
    assert_eq!(loaded.sources_formatted, second.sources_formatted);

    let recent = orch.list_recent(Some("rust async"), 10, 0).await.unwrap();
    let ids: Vec<_> = recent.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![second.id, first.id]);

    let page = orch.list_recent(Some("Rust Async"), 1, 1).await.unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, first.id);

    assert_eq!(orch.list_recent(None, 10, 0).await.unwrap().len(), 3);
}
