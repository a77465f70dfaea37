//! 研究层：会话状态、聚合、规划、反思、合成与 Loop Controller

pub mod aggregator;
pub mod controller;
pub mod credibility;
pub mod events;
pub mod parse;
pub mod planner;
pub mod reflector;
pub mod report;
pub mod session;
pub mod synthesizer;

pub use aggregator::{Aggregator, MergeStats};
pub use controller::LoopController;
pub use credibility::{credibility, trust_score, Credibility};
pub use events::ResearchEvent;
pub use planner::{LlmQueryPlanner, PlannedQuery, QueryPlanner, TopicFanOutPlanner};
pub use reflector::{FallbackPolicy, HeuristicReflector, LlmReflector, Reflection, Reflector};
pub use report::ResearchReport;
pub use session::{canonical_reference, normalize_topic, ResearchSession, SourceRecord};
pub use synthesizer::ReportSynthesizer;
