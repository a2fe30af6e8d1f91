//! Error types for the Factdesk core library.
//!
//! Uses `thiserror` for public API error types with structured error variants
//! covering evidence sources, LLM generation, the pipeline state machine,
//! reply submission, and configuration.

use crate::pipeline::RunState;

/// Top-level error type for the Factdesk core library.
#[derive(Debug, thiserror::Error)]
pub enum FactdeskError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Submission error: {0}")]
    Submission(#[from] SubmissionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from evidence source clients (claim database, fact-check database).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    #[error("Source '{source_name}' unavailable: {message}")]
    Unavailable { source_name: String, message: String },

    #[error("Source '{source_name}' rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        source_name: String,
        retry_after_secs: u64,
    },

    #[error("Record '{id}' not found in source '{source_name}'")]
    NotFound { source_name: String, id: String },
}

impl SourceError {
    pub fn unavailable(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        SourceError::Unavailable {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Whether a retry after backing off can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SourceError::RateLimited { .. })
    }
}

/// Errors from LLM provider interactions (generation failures).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Provider connection failed: {message}")]
    Connection { message: String },
}

/// Errors raised by the pipeline state machine and its budgets.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PipelineError {
    #[error("Revision budget of {max_revisions} exhausted; needs human editorial decision")]
    RevisionBudgetExhausted { max_revisions: u32 },

    #[error("Run exceeded wall-clock budget of {budget_secs}s")]
    WallClockExceeded { budget_secs: u64 },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("Draft revision out of sequence: expected {expected}, got {got}")]
    RevisionGap { expected: u32, got: u32 },
}

/// Errors from submitting a finalized reply to the claim database.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubmissionError {
    #[error("Reply is not submittable: {reason}")]
    NotSubmittable { reason: String },

    #[error("Submission rejected: {message}")]
    Rejected { message: String },

    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Environment variable not set: {var}")]
    EnvVarMissing { var: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// A type alias for results using the top-level `FactdeskError`.
pub type Result<T> = std::result::Result<T, FactdeskError>;
