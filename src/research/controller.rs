//! Loop Controller：显式有限状态机驱动的研究主循环
//!
//! 独占一个 ResearchSession，依次经过 PLANNING → DISPATCHING → REFLECTING，
//! 由反思决策与 max_loops 硬上限决定回到 PLANNING 还是进入 FINALIZING。
//! 子组件失败只会触发重试 / 回退 / 提前收尾，从不向上抛出。

use std::sync::Arc;

use crate::core::{
    next_after_reflection, Decision, RecoveryAction, RecoveryEngine, ResearchError, SessionGuard,
    SessionPhase,
};
use crate::observability::{self, TraceSink};
use crate::research::planner::{PlannedQuery, QueryPlanner, TopicFanOutPlanner};
use crate::research::reflector::{FallbackPolicy, HeuristicReflector, Reflection, Reflector};
use crate::research::synthesizer::ReportSynthesizer;
use crate::research::{Aggregator, ResearchEvent, ResearchReport, ResearchSession, SourceRecord};
use crate::tools::{CapabilitySet, FanOutDispatcher};

pub struct LoopController {
    planner: Arc<dyn QueryPlanner>,
    fallback_planner: Arc<dyn QueryPlanner>,
    reflector: Arc<dyn Reflector>,
    fallback_reflector: Arc<dyn Reflector>,
    synthesizer: ReportSynthesizer,
    aggregator: Aggregator,
    dispatcher: FanOutDispatcher,
    recovery: RecoveryEngine,
    sink: Option<Arc<dyn TraceSink>>,
}

impl LoopController {
    pub fn new(
        planner: Arc<dyn QueryPlanner>,
        reflector: Arc<dyn Reflector>,
        synthesizer: ReportSynthesizer,
    ) -> Self {
        Self {
            planner,
            fallback_planner: Arc::new(TopicFanOutPlanner),
            reflector,
            fallback_reflector: Arc::new(HeuristicReflector::new(FallbackPolicy::default())),
            synthesizer,
            aggregator: Aggregator::new(),
            dispatcher: FanOutDispatcher::new(),
            recovery: RecoveryEngine::new(),
            sink: None,
        }
    }

    pub fn with_fallback_planner(mut self, planner: Arc<dyn QueryPlanner>) -> Self {
        self.fallback_planner = planner;
        self
    }

    pub fn with_fallback_reflector(mut self, reflector: Arc<dyn Reflector>) -> Self {
        self.fallback_reflector = reflector;
        self
    }

    pub fn with_sink(mut self, sink: Option<Arc<dyn TraceSink>>) -> Self {
        self.sink = sink;
        self
    }

    pub fn sink(&self) -> Option<&dyn TraceSink> {
        self.sink.as_deref()
    }

    /// 驱动会话直到 DONE，返回合成后的报告
    pub async fn run(
        &self,
        mut session: ResearchSession,
        capabilities: &CapabilitySet,
        guard: &SessionGuard,
    ) -> ResearchReport {
        session.status = SessionPhase::Planning;
        self.emit(ResearchEvent::SessionStarted {
            session_id: session.id.to_string(),
            topic: session.topic.clone(),
            max_loops: session.max_loops,
            tools: capabilities.available_names(),
        });
        for binding in capabilities.unavailable() {
            self.emit(ResearchEvent::ToolUnavailable {
                tool: binding.name.clone(),
                reason: binding.last_error.clone().unwrap_or_default(),
            });
        }
        tracing::info!(
            session = %session.id,
            topic = %session.topic,
            max_loops = session.max_loops,
            tools = capabilities.available_names().len(),
            "research session started"
        );

        if capabilities.is_empty() {
            tracing::warn!(session = %session.id, "no tool bindings available, finalizing");
            session.insufficient_sources = true;
            self.transition(&mut session, SessionPhase::Finalizing);
        } else if session.max_loops == 0 {
            tracing::info!(session = %session.id, "max_loops is 0, finalizing");
            session.insufficient_sources = true;
            self.transition(&mut session, SessionPhase::Finalizing);
        }

        let mut plan: Vec<PlannedQuery> = Vec::new();
        let mut new_records: Vec<SourceRecord> = Vec::new();

        while session.status != SessionPhase::Finalizing {
            let next = match session.status {
                SessionPhase::Planning => {
                    match self.plan_round(&session, capabilities, guard).await {
                        Ok(queries) if queries.is_empty() => {
                            tracing::warn!(session = %session.id, "empty plan, finalizing");
                            session.insufficient_sources = true;
                            SessionPhase::Finalizing
                        }
                        Ok(queries) => {
                            self.emit(ResearchEvent::RoundPlanned {
                                loop_count: session.loop_count,
                                queries: queries.len(),
                            });
                            plan = queries;
                            SessionPhase::Dispatching
                        }
                        Err(err) => {
                            self.mark_partial(&mut session, &err);
                            SessionPhase::Finalizing
                        }
                    }
                }
                SessionPhase::Dispatching => {
                    self.dispatch_round(&mut session, capabilities, &plan, guard, &mut new_records)
                        .await
                }
                SessionPhase::Reflecting => {
                    match self.reflect_round(&session, &new_records, guard).await {
                        Ok(reflection) => self.apply_reflection(&mut session, reflection),
                        Err(err) => {
                            self.mark_partial(&mut session, &err);
                            SessionPhase::Finalizing
                        }
                    }
                }
                SessionPhase::Finalizing | SessionPhase::Done => SessionPhase::Finalizing,
            };
            self.transition(&mut session, next);
        }

        let report = self.synthesizer.synthesize(&session, self.sink()).await;
        self.transition(&mut session, SessionPhase::Done);
        tracing::info!(
            session = %session.id,
            loop_count = session.loop_count,
            sources = session.source_count(),
            insufficient_sources = session.insufficient_sources,
            partial = session.partial,
            "research session finished"
        );
        report
    }

    /// 规划：失败重试一次，仍失败则使用回退规划器；只有会话终止才返回 Err
    async fn plan_round(
        &self,
        session: &ResearchSession,
        capabilities: &CapabilitySet,
        guard: &SessionGuard,
    ) -> Result<Vec<PlannedQuery>, ResearchError> {
        let specs = capabilities.specs();
        let focus = session.planning_focus();
        let summary = session.summary_for_planning();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match guard.run(self.planner.plan(focus, &summary, &specs)).await? {
                Ok(plan) => return Ok(plan),
                Err(err) => err,
            };
            if self.recovery.handle(&err, attempt) == RecoveryAction::Retry {
                tracing::warn!(attempt, error = %err, "planning failed, retrying");
                self.emit_recovery("planning", "retry", &err);
                continue;
            }
            tracing::warn!(attempt, error = %err, "planning failed, using heuristic plan");
            self.emit_recovery("planning", "fallback", &err);
            return Ok(guard
                .run(self.fallback_planner.plan(focus, &summary, &specs))
                .await?
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "heuristic planner failed");
                    Vec::new()
                }));
        }
    }

    async fn dispatch_round(
        &self,
        session: &mut ResearchSession,
        capabilities: &CapabilitySet,
        plan: &[PlannedQuery],
        guard: &SessionGuard,
        new_records: &mut Vec<SourceRecord>,
    ) -> SessionPhase {
        let round = self.dispatcher.dispatch(capabilities, plan, Some(guard)).await;

        let mut failures = 0;
        for outcome in round.failures() {
            let Err(err) = &outcome.result else { continue };
            if err.tool().is_none() {
                continue;
            }
            failures += 1;
            if let RecoveryAction::ExcludeTool(tool) = self.recovery.handle(err, 1) {
                tracing::warn!(tool = %tool, error = %err, "tool call excluded from round");
            }
            self.emit(ResearchEvent::ToolFailed {
                tool: outcome.tool.clone(),
                query: outcome.query.clone(),
                reason: err.to_string(),
            });
        }
        let interrupted = round.interrupted.clone();
        let records = round.into_records();
        let stats = self.aggregator.merge(session, records.iter().cloned());

        if let Some(err) = interrupted {
            self.emit(ResearchEvent::RoundMerged {
                loop_count: session.loop_count,
                added: stats.added,
                duplicates: stats.duplicates + stats.replaced,
                failures,
            });
            self.mark_partial(session, &err);
            return SessionPhase::Finalizing;
        }

        session.loop_count += 1;
        self.emit(ResearchEvent::RoundMerged {
            loop_count: session.loop_count,
            added: stats.added,
            duplicates: stats.duplicates + stats.replaced,
            failures,
        });
        tracing::info!(
            session = %session.id,
            loop_count = session.loop_count,
            records = records.len(),
            added = stats.added,
            failures,
            "dispatch round merged"
        );

        // 以合并后的计数为准：无引用的记录已被聚合丢弃
        if stats.received() == 0 {
            tracing::warn!(session = %session.id, "round produced no sources, finalizing");
            session.insufficient_sources = true;
            return SessionPhase::Finalizing;
        }
        *new_records = records
            .into_iter()
            .filter(|r| !r.canonical_reference().is_empty())
            .collect();
        SessionPhase::Reflecting
    }

    /// 反思：失败重试一次，仍失败则使用启发式反思器
    async fn reflect_round(
        &self,
        session: &ResearchSession,
        new_records: &[SourceRecord],
        guard: &SessionGuard,
    ) -> Result<Reflection, ResearchError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match guard.run(self.reflector.reflect(session, new_records)).await? {
                Ok(reflection) => return Ok(reflection),
                Err(err) => err,
            };
            if self.recovery.handle(&err, attempt) == RecoveryAction::Retry {
                tracing::warn!(attempt, error = %err, "reflection failed, retrying");
                self.emit_recovery("reflection", "retry", &err);
                continue;
            }
            tracing::warn!(attempt, error = %err, "reflection failed, using heuristic decision");
            self.emit_recovery("reflection", "fallback", &err);
            return Ok(guard
                .run(self.fallback_reflector.reflect(session, new_records))
                .await?
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "heuristic reflector failed");
                    Reflection::sufficient()
                }));
        }
    }

    fn apply_reflection(&self, session: &mut ResearchSession, reflection: Reflection) -> SessionPhase {
        if let Some(summary) = reflection.summary {
            session.draft_summary = summary;
        }
        let refined_topic = match &reflection.decision {
            Decision::Continue { refined_topic } => refined_topic.clone(),
            Decision::Sufficient => None,
        };
        if let Some(topic) = &refined_topic {
            session.focus = Some(topic.clone());
        }
        let decision = if reflection.decision.is_continue() {
            "continue"
        } else {
            "sufficient"
        };
        self.emit(ResearchEvent::RoundDecision {
            loop_count: session.loop_count,
            decision: decision.to_string(),
            refined_topic,
        });
        tracing::info!(
            session = %session.id,
            loop_count = session.loop_count,
            decision,
            "round decision"
        );
        next_after_reflection(&reflection.decision, session.loop_count, session.max_loops)
    }

    fn transition(&self, session: &mut ResearchSession, next: SessionPhase) {
        let from = session.status;
        if !from.can_transition_to(next) {
            tracing::error!(from = %from, to = %next, "illegal phase transition ignored");
            return;
        }
        session.status = next;
        tracing::debug!(from = %from, to = %next, loop_count = session.loop_count, "phase changed");
        self.emit(ResearchEvent::PhaseChanged {
            from,
            to: next,
            loop_count: session.loop_count,
            max_loops: session.max_loops,
        });
    }

    fn mark_partial(&self, session: &mut ResearchSession, err: &ResearchError) {
        session.partial = true;
        tracing::warn!(
            session = %session.id,
            loop_count = session.loop_count,
            reason = %err,
            "session terminated early, finalizing with collected sources"
        );
        self.emit(ResearchEvent::SessionTimedOut {
            loop_count: session.loop_count,
            reason: err.to_string(),
        });
    }

    fn emit_recovery(&self, stage: &str, action: &str, err: &ResearchError) {
        self.emit(ResearchEvent::Recovery {
            stage: stage.to_string(),
            action: action.to_string(),
            detail: err.to_string(),
        });
    }

    fn emit(&self, event: ResearchEvent) {
        observability::emit(self.sink(), event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::core::SessionSupervisor;
    use crate::llm::MockLlmClient;
    use crate::observability::ChannelSink;
    use crate::tools::{Tool, ToolRegistry, ToolSpec};

    /// 每次调用返回一条新引用
    struct Counting {
        name: &'static str,
        calls: AtomicUsize,
    }

    impl Counting {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for Counting {
        fn name(&self) -> &str {
            self.name
        }
        fn description(&self) -> &str {
            "counting stub"
        }
        async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SourceRecord::new(
                self.name,
                format!("{query} #{n}"),
                format!("https://{}.test/{n}", self.name),
                "excerpt",
            )])
        }
    }

    struct Empty;

    #[async_trait]
    impl Tool for Empty {
        fn name(&self) -> &str {
            "empty"
        }
        fn description(&self) -> &str {
            "returns nothing"
        }
        async fn invoke(&self, _query: &str) -> Result<Vec<SourceRecord>, String> {
            Ok(Vec::new())
        }
    }

    /// 只返回没有引用的记录
    struct Unreferenced;

    #[async_trait]
    impl Tool for Unreferenced {
        fn name(&self) -> &str {
            "unreferenced"
        }
        fn description(&self) -> &str {
            "returns records without reference"
        }
        async fn invoke(&self, query: &str) -> Result<Vec<SourceRecord>, String> {
            Ok(vec![
                SourceRecord::new("unreferenced", query, "", "excerpt"),
                SourceRecord::new("unreferenced", query, "   ", "excerpt"),
            ])
        }
    }

    struct FailingPlanner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl QueryPlanner for FailingPlanner {
        async fn plan(
            &self,
            _topic: &str,
            _summary: &str,
            _tools: &[ToolSpec],
        ) -> Result<Vec<PlannedQuery>, ResearchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ResearchError::Planning("malformed".to_string()))
        }
    }

    struct RefiningReflector;

    #[async_trait]
    impl Reflector for RefiningReflector {
        async fn reflect(
            &self,
            session: &ResearchSession,
            _new: &[SourceRecord],
        ) -> Result<Reflection, ResearchError> {
            Ok(Reflection {
                decision: Decision::Continue {
                    refined_topic: Some(format!("{} detail", session.topic)),
                },
                summary: Some(format!("after round {}", session.loop_count)),
            })
        }
    }

    fn synthesizer() -> ReportSynthesizer {
        // 空脚本：合成总是回退为最小报告
        ReportSynthesizer::new(Arc::new(MockLlmClient::new()), Duration::from_secs(1))
    }

    fn controller(reflector: Arc<dyn Reflector>) -> (LoopController, UnboundedReceiver<ResearchEvent>) {
        let (sink, rx) = ChannelSink::channel();
        let controller = LoopController::new(Arc::new(TopicFanOutPlanner), reflector, synthesizer())
            .with_sink(Some(Arc::new(sink)));
        (controller, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ResearchEvent>) -> Vec<ResearchEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    async fn capabilities(tools: Vec<Arc<dyn Tool>>) -> CapabilitySet {
        let mut registry = ToolRegistry::new(Duration::from_secs(1), Duration::from_secs(1));
        for tool in tools {
            registry.register_arc(tool, None);
        }
        registry.build().await
    }

    #[tokio::test]
    async fn test_runs_until_cap_with_continue() {
        let (controller, mut rx) =
            controller(Arc::new(HeuristicReflector::new(FallbackPolicy::ContinueUntilCap)));
        let caps = capabilities(vec![Arc::new(Counting::new("a")), Arc::new(Counting::new("b"))]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));

        let report = controller.run(ResearchSession::new("X", 3), &caps, &guard).await;
        assert_eq!(report.loop_count, 3);
        assert_eq!(report.sources.len(), 6);
        assert!(!report.insufficient_sources);
        assert!(!report.partial);

        let events = drain(&mut rx);
        for ev in &events {
            if let ResearchEvent::PhaseChanged {
                loop_count, max_loops, ..
            } = ev
            {
                assert!(loop_count <= max_loops);
            }
        }
        assert!(matches!(
            events.last(),
            Some(ResearchEvent::PhaseChanged {
                to: SessionPhase::Done,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_sufficient_stops_after_first_round() {
        let (controller, _rx) =
            controller(Arc::new(HeuristicReflector::new(FallbackPolicy::AlwaysSufficient)));
        let caps = capabilities(vec![Arc::new(Counting::new("a"))]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));
        let report = controller.run(ResearchSession::new("X", 5), &caps, &guard).await;
        assert_eq!(report.loop_count, 1);
        assert_eq!(report.sources.len(), 1);
    }

    #[tokio::test]
    async fn test_zero_max_loops_finalizes_immediately() {
        let (controller, mut rx) = controller(Arc::new(HeuristicReflector::default()));
        let caps = capabilities(vec![Arc::new(Counting::new("a"))]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));
        let report = controller.run(ResearchSession::new("X", 0), &caps, &guard).await;
        assert_eq!(report.loop_count, 0);
        assert!(report.insufficient_sources);
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ResearchEvent::RoundPlanned { .. })));
    }

    #[tokio::test]
    async fn test_empty_round_sets_insufficient() {
        let (controller, _rx) = controller(Arc::new(HeuristicReflector::default()));
        let caps = capabilities(vec![Arc::new(Empty)]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));
        let report = controller.run(ResearchSession::new("X", 3), &caps, &guard).await;
        assert_eq!(report.loop_count, 1);
        assert!(report.insufficient_sources);
        assert!(report.sources.is_empty());
    }

    #[tokio::test]
    async fn test_round_of_unreferenced_records_sets_insufficient() {
        let (controller, mut rx) =
            controller(Arc::new(HeuristicReflector::new(FallbackPolicy::ContinueUntilCap)));
        let caps = capabilities(vec![Arc::new(Unreferenced)]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));
        let report = controller.run(ResearchSession::new("X", 3), &caps, &guard).await;
        assert_eq!(report.loop_count, 1);
        assert!(report.insufficient_sources);
        assert!(report.sources.is_empty());
        assert!(!drain(&mut rx).iter().any(|e| matches!(
            e,
            ResearchEvent::PhaseChanged {
                to: SessionPhase::Reflecting,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_planner_failure_retries_then_falls_back() {
        let planner = Arc::new(FailingPlanner {
            calls: AtomicUsize::new(0),
        });
        let (sink, mut rx) = ChannelSink::channel();
        let controller = LoopController::new(
            planner.clone(),
            Arc::new(HeuristicReflector::new(FallbackPolicy::AlwaysSufficient)),
            synthesizer(),
        )
        .with_sink(Some(Arc::new(sink)));
        let caps = capabilities(vec![Arc::new(Counting::new("a"))]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));

        let report = controller.run(ResearchSession::new("X", 2), &caps, &guard).await;
        assert_eq!(planner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(report.sources.len(), 1);

        let actions: Vec<String> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ResearchEvent::Recovery { stage, action, .. } if stage == "planning" => Some(action),
                _ => None,
            })
            .collect();
        assert_eq!(actions, vec!["retry".to_string(), "fallback".to_string()]);
    }

    #[tokio::test]
    async fn test_refined_topic_becomes_next_focus() {
        let (controller, mut rx) = controller(Arc::new(RefiningReflector));
        let caps = capabilities(vec![Arc::new(Counting::new("a"))]).await;
        let guard = SessionSupervisor::new().guard(Duration::from_secs(10));
        let report = controller.run(ResearchSession::new("X", 2), &caps, &guard).await;

        assert_eq!(report.loop_count, 2);
        let titles: Vec<&str> = report.sources.iter().map(|s| s.title.as_str()).collect();
        assert!(titles.contains(&"X #0"));
        assert!(titles.contains(&"X detail #1"));
        assert!(drain(&mut rx).iter().any(|e| matches!(
            e,
            ResearchEvent::RoundDecision { refined_topic: Some(t), .. } if t == "X detail"
        )));
    }

    #[tokio::test]
    async fn test_cancel_before_start_marks_partial() {
        let (controller, _rx) = controller(Arc::new(HeuristicReflector::default()));
        let caps = capabilities(vec![Arc::new(Counting::new("a"))]).await;
        let supervisor = SessionSupervisor::new();
        let guard = supervisor.guard(Duration::from_secs(10));
        supervisor.cancel();
        let report = controller.run(ResearchSession::new("X", 3), &caps, &guard).await;
        assert!(report.partial);
        assert_eq!(report.loop_count, 0);
    }
}
