//! 研究流程集成测试：循环上限、部分失败、零绑定、超时与端到端来源计数

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use forager::core::{ResearchRequest, SessionPhase};
use forager::llm::MockLlmClient;
use forager::research::{Aggregator, ResearchSession};
use forager::storage::InMemoryConnector;
use forager::tools::Tool;
use forager::{ResearchEvent, SourceRecord};

#[tokio::test]
async fn end_to_end_two_tools_two_rounds_collect_four_sources() {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(UniqueSourceTool::new("alpha")),
        Arc::new(UniqueSourceTool::new("beta")),
    ];
    let (orch, mut rx) = orchestrator(
        test_config(),
        registry(tools, Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        None,
    );

    let report = orch
        .research(ResearchRequest::new("X").with_max_loops(2))
        .await
        .unwrap();

    assert_eq!(report.loop_count, 2);
    assert_eq!(report.sources.len(), 4);
    assert!(!report.insufficient_sources);
    assert!(!report.partial);
    // Mock LLM 没有脚本：合成退化为原始来源列表
    assert!(report.narrative_fallback);
    assert_eq!(report.sources_formatted.lines().count(), 4);

    let events = drain(&mut rx);
    let decisions: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            ResearchEvent::RoundDecision { decision, .. } => Some(decision.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(decisions, vec!["continue", "continue"]);
}

#[tokio::test]
async fn scripted_oracle_drives_plan_reflect_and_synthesis() {
    let llm = Arc::new(MockLlmClient::scripted(vec![
        Ok(r#"[{"tool": "alpha", "query": "X basics"}, {"tool": "ghost", "query": "ignored"}]"#.to_string()),
        Ok(r#"{"decision": "continue", "refined_topic": "X history", "summary": "basics covered"}"#.to_string()),
        Ok(r#"```json
[{"tool": "beta", "query": "X history"}]
```"#.to_string()),
        Ok(r#"{"decision": "sufficient", "summary": "basics and history covered"}"#.to_string()),
        Ok(r#"{"title": "All about X", "executive_summary": "X is well documented.", "key_findings": ["one", "two"]}"#.to_string()),
    ]));
    let alpha = Arc::new(UniqueSourceTool::new("alpha"));
    let beta = Arc::new(UniqueSourceTool::new("beta"));
    let (orch, mut rx) = orchestrator(
        test_config(),
        registry(vec![alpha.clone(), beta.clone()], Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        Some(llm.clone()),
    );

    let report = orch
        .research(ResearchRequest::new("X").with_max_loops(5))
        .await
        .unwrap();

    assert_eq!(llm.calls(), 5);
    assert_eq!(report.loop_count, 2);
    assert_eq!(report.title, "All about X");
    assert_eq!(report.key_findings, vec!["one".to_string(), "two".to_string()]);
    assert!(!report.narrative_fallback);
    let origins: BTreeSet<&str> = report.sources.iter().map(|s| s.origin.as_str()).collect();
    assert_eq!(origins, BTreeSet::from(["alpha", "beta"]));

    assert!(drain(&mut rx).iter().any(|e| matches!(
        e,
        ResearchEvent::RoundDecision { refined_topic: Some(t), .. } if t == "X history"
    )));
}

#[tokio::test]
async fn loop_count_never_exceeds_max_loops() {
    for max_loops in [0u32, 1, 2, 4] {
        let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(UniqueSourceTool::new("alpha"))];
        let (orch, mut rx) = orchestrator(
            test_config(),
            registry(tools, Duration::from_secs(5)),
            Arc::new(InMemoryConnector::default()),
            None,
        );
        let report = orch
            .research(ResearchRequest::new("bounded").with_max_loops(max_loops))
            .await
            .unwrap();
        assert_eq!(report.loop_count, max_loops);

        let transitions: Vec<(SessionPhase, u32, u32)> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ResearchEvent::PhaseChanged {
                    to,
                    loop_count,
                    max_loops,
                    ..
                } => Some((to, loop_count, max_loops)),
                _ => None,
            })
            .collect();
        assert!(!transitions.is_empty());
        for (_, loop_count, cap) in &transitions {
            assert!(loop_count <= cap, "loop_count {loop_count} > max_loops {cap}");
        }
        assert_eq!(transitions.last().map(|t| t.0), Some(SessionPhase::Done));
    }
}

#[tokio::test]
async fn requested_max_loops_is_clamped_to_limit() {
    let mut cfg = test_config();
    cfg.research.max_loops_limit = 2;
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(UniqueSourceTool::new("alpha"))];
    let (orch, _rx) = orchestrator(
        cfg,
        registry(tools, Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        None,
    );
    let report = orch
        .research(ResearchRequest::new("clamp").with_max_loops(50))
        .await
        .unwrap();
    assert_eq!(report.loop_count, 2);
}

#[tokio::test]
async fn one_failing_tool_of_three_is_excluded() {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(UniqueSourceTool::new("alpha")),
        Arc::new(FailingTool("broken")),
        Arc::new(UniqueSourceTool::new("gamma")),
    ];
    let (orch, mut rx) = orchestrator(
        test_config(),
        registry(tools, Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        None,
    );
    let report = orch
        .research(ResearchRequest::new("resilience").with_max_loops(1))
        .await
        .unwrap();

    let origins: BTreeSet<&str> = report.sources.iter().map(|s| s.origin.as_str()).collect();
    assert_eq!(origins, BTreeSet::from(["alpha", "gamma"]));
    assert_eq!(report.sources.len(), 2);

    let failed: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            ResearchEvent::ToolFailed { tool, .. } => Some(tool),
            _ => None,
        })
        .collect();
    assert_eq!(failed, vec!["broken".to_string()]);
}

#[tokio::test]
async fn zero_bindings_finalize_with_insufficient_sources() {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(UnbindableTool("search")),
        Arc::new(UnbindableTool("video")),
    ];
    let (orch, mut rx) = orchestrator(
        test_config(),
        registry(tools, Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        None,
    );
    let report = orch.research(ResearchRequest::new("nothing")).await.unwrap();

    assert!(report.insufficient_sources);
    assert_eq!(report.loop_count, 0);
    assert!(report.sources.is_empty());

    let events = drain(&mut rx);
    let unavailable = events
        .iter()
        .filter(|e| matches!(e, ResearchEvent::ToolUnavailable { .. }))
        .count();
    assert_eq!(unavailable, 2);
    let phases: Vec<SessionPhase> = events
        .iter()
        .filter_map(|e| match e {
            ResearchEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect();
    assert_eq!(phases, vec![SessionPhase::Finalizing, SessionPhase::Done]);
}

#[tokio::test]
async fn all_calls_failing_sets_insufficient_sources() {
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(FailingTool("a")), Arc::new(FailingTool("b"))];
    let (orch, _rx) = orchestrator(
        test_config(),
        registry(tools, Duration::from_secs(5)),
        Arc::new(InMemoryConnector::default()),
        None,
    );
    let report = orch
        .research(ResearchRequest::new("doomed").with_max_loops(3))
        .await
        .unwrap();
    assert!(report.insufficient_sources);
    assert_eq!(report.loop_count, 1);
    assert!(report.sources.is_empty());
}

#[tokio::test]
async fn session_timeout_keeps_completed_results() {
    let mut cfg = test_config();
    cfg.research.session_timeout_secs = 1;
    let slow = Arc::new(SlowTool {
        name: "slow",
        delay: Duration::from_secs(30),
        calls: AtomicUsize::new(0),
    });
    let tools: Vec<Arc<dyn Tool>> = vec![Arc::new(UniqueSourceTool::new("fast")), slow];
    // 单次调用超时远大于会话超时：只能靠会话超时硬取消
    let (orch, mut rx) = orchestrator(
        cfg,
        registry(tools, Duration::from_secs(60)),
        Arc::new(InMemoryConnector::default()),
        None,
    );

    let started = std::time::Instant::now();
    let report = orch
        .research(ResearchRequest::new("slow topic").with_max_loops(3))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));

    assert!(report.partial);
    assert_eq!(report.sources.len(), 1);
    assert_eq!(report.sources[0].origin, "fast");
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, ResearchEvent::SessionTimedOut { .. })));
}

#[tokio::test]
async fn invalid_request_is_the_only_error() {
    let (orch, _rx) = orchestrator(
        test_config(),
        registry(Vec::new(), Duration::from_secs(1)),
        Arc::new(InMemoryConnector::default()),
        None,
    );
    assert!(orch.research(ResearchRequest::new("")).await.is_err());
    // 没有任何工具也照常返回报告
    let report = orch.research(ResearchRequest::new("fine")).await.unwrap();
    assert!(report.insufficient_sources);
}

#[test]
fn merge_is_independent_of_arrival_order() {
    let records = vec![
        SourceRecord::new("web", "A", "https://www.example.com/a/", "first"),
        SourceRecord::new("news", "A again", "https://example.com/a?utm_source=x", "second"),
        SourceRecord::new("web", "B", "https://example.com/b", "b"),
        SourceRecord::new("video", "C", "https://example.com/c#t=10", "c"),
    ];
    let aggregator = Aggregator::new();

    let mut forward = ResearchSession::new("t", 1);
    aggregator.merge(&mut forward, records.clone());
    let mut backward = ResearchSession::new("t", 1);
    aggregator.merge(&mut backward, records.iter().rev().cloned());
    let mut twice = ResearchSession::new("t", 1);
    aggregator.merge(&mut twice, records.clone());
    aggregator.merge(&mut twice, records.clone());

    let snapshot = |s: &ResearchSession| s.sources().cloned().collect::<Vec<_>>();
    assert_eq!(forward.source_count(), 3);
    assert_eq!(snapshot(&forward), snapshot(&backward));
    assert_eq!(snapshot(&forward), snapshot(&twice));
}
