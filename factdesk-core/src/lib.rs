//! # Factdesk Core
//!
//! Core library for Factdesk, a multi-agent fact-check desk.
//! Provides the evidence source clients, role-bound agents over an LLM
//! provider, the research / verification / drafting / review stages, the
//! reconciliation engine, the orchestrator, reply rendering, configuration,
//! and error types.

pub mod agents;
pub mod brain;
pub mod config;
pub mod error;
pub mod evidence;
pub mod model;
pub mod persistence;
pub mod pipeline;
pub mod providers;
pub mod render;
pub mod retry;
pub mod types;

// Re-export commonly used types at the crate root.
pub use agents::{Agent, AgentRole, AgentSet};
pub use brain::{LlmProvider, MockLlmProvider};
pub use config::{FactdeskConfig, load_config};
pub use error::{
    ConfigError, FactdeskError, LlmError, PipelineError, Result, SourceError, SubmissionError,
};
pub use evidence::{
    CofactsClient, EvidenceSource, FactCheckToolsClient, RawEvidence, ReplySubmitter, SourceQuery,
};
pub use model::{
    Claim, Classification, Disposition, DraftReply, EvidenceOrigin, EvidenceRecord, Perspective,
    RequestedEdit, ReviewVerdict, SupportJudgment, Verdict,
};
pub use pipeline::{Orchestrator, PipelineRun, RunOutcome, RunState, TerminalReason};
pub use render::{RenderedReply, ReplySubmission, ReplyType, SubmissionReference};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
