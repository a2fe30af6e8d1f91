//! The fact-check pipeline: research, verification, drafting, review, and
//! reconciliation, driven by the [`Orchestrator`].

pub mod drafting;
pub mod orchestrator;
pub mod reconcile;
pub mod research;
pub mod review;
pub mod run;
pub mod trace;
pub mod verification;

pub use orchestrator::{Orchestrator, RunOutcome};
pub use reconcile::{CONFIDENCE_THRESHOLD, ReviewDecision, cite_evidence, classify, reconcile_reviews};
pub use research::{ResearchOutcome, ResearchStage, composite_score, dedup_and_rank, recency_decay};
pub use run::{PipelineRun, RunState, TerminalReason};
pub use trace::{RunTrace, Stage, TraceEvent, TraceKind};
