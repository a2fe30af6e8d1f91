//! Configuration system for Factdesk.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory (`config.toml`) and/or
//! `.factdesk/config.toml` in the workspace directory.

use crate::model::Perspective;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration for a Factdesk deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FactdeskConfig {
    pub llm: LlmConfig,
    pub agents: AgentModelsConfig,
    pub sources: SourcesConfig,
    pub research: ResearchConfig,
    pub review: ReviewConfig,
    pub retry: RetryConfig,
    pub timeouts: TimeoutConfig,
    pub storage: StorageConfig,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "gemini", "openai", or any OpenAI-compatible endpoint.
    pub provider: String,
    /// Model identifier (e.g., "gemini-2.5-pro", "gpt-4o").
    pub model: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Explicit API key; takes precedence over `api_key_env`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Optional base URL override for the API endpoint.
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: "gemini-2.5-pro".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            api_key: None,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.3,
        }
    }
}

impl LlmConfig {
    /// Validate this LLM config and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.temperature < 0.0 || self.temperature > 2.0 {
            warnings.push(format!(
                "temperature ({}) is outside the usual 0.0-2.0 range",
                self.temperature
            ));
        }
        if self.max_tokens == 0 {
            warnings.push("max_tokens is 0; agents will produce empty output".to_string());
        }
        if self.model.trim().is_empty() {
            warnings.push("llm.model is empty".to_string());
        }
        warnings
    }
}

/// Per-role model overrides. Unset roles use `llm.model`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentModelsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub writer_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verifier_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewer_model: Option<String>,
}

/// Evidence source configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub cofacts: CofactsConfig,
    pub factcheck_tools: FactCheckToolsConfig,
}

/// Cofacts GraphQL API (the internal claim database).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CofactsConfig {
    pub enabled: bool,
    /// GraphQL endpoint.
    pub endpoint: String,
    /// Public site root used to build article URLs.
    pub site_url: String,
    /// Environment variable holding the registered app id (needed for submission).
    pub app_id_env: String,
    /// Environment variable holding the user bearer token (needed for submission).
    pub token_env: String,
}

impl Default for CofactsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://api.cofacts.tw/graphql".to_string(),
            site_url: "https://cofacts.tw".to_string(),
            app_id_env: "COFACTS_APP_ID".to_string(),
            token_env: "COFACTS_TOKEN".to_string(),
        }
    }
}

/// Google Fact Check Tools API (the external fact-check database).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FactCheckToolsConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub api_key_env: String,
}

impl Default for FactCheckToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "https://factchecktools.googleapis.com/v1alpha1/claims:search".to_string(),
            api_key_env: "GOOGLE_FACTCHECK_API_KEY".to_string(),
        }
    }
}

/// Research stage tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchConfig {
    /// Maximum evidence records handed to verification.
    pub evidence_limit: usize,
    /// Records requested from each source.
    pub per_source_limit: usize,
    /// Age (days) at which the recency factor halves.
    pub recency_half_life_days: f64,
    /// Language used when a claim carries no language tag.
    pub default_language: String,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            evidence_limit: 10,
            per_source_limit: 10,
            recency_half_life_days: 365.0,
            default_language: "zh-TW".to_string(),
        }
    }
}

/// Review and revision policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
    /// Perspectives consulted on every draft revision.
    pub perspectives: Vec<Perspective>,
    /// Highest revision number that may still be sent back for rework.
    pub max_revisions: u32,
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            perspectives: vec![
                Perspective::Progressive,
                Perspective::Conservative,
                Perspective::Centrist,
            ],
            max_revisions: 3,
        }
    }
}

/// Exponential backoff policy for retried calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 8000,
        }
    }
}

/// Per-stage call timeouts and the whole-run budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub research_secs: u64,
    pub verification_secs: u64,
    pub drafting_secs: u64,
    pub review_secs: u64,
    pub run_budget_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            research_secs: 30,
            verification_secs: 30,
            drafting_secs: 60,
            review_secs: 60,
            run_budget_secs: 300,
        }
    }
}

impl TimeoutConfig {
    pub fn research(&self) -> Duration {
        Duration::from_secs(self.research_secs)
    }

    pub fn verification(&self) -> Duration {
        Duration::from_secs(self.verification_secs)
    }

    pub fn drafting(&self) -> Duration {
        Duration::from_secs(self.drafting_secs)
    }

    pub fn review(&self) -> Duration {
        Duration::from_secs(self.review_secs)
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs)
    }
}

/// Where run snapshots are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runs_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Resolve the runs directory, falling back to the platform data dir.
    pub fn resolved_runs_dir(&self) -> PathBuf {
        if let Some(dir) = &self.runs_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("org", "factdesk", "factdesk")
            .map(|d| d.data_dir().join("runs"))
            .unwrap_or_else(|| PathBuf::from(".factdesk/runs"))
    }
}

impl FactdeskConfig {
    /// Validate the whole configuration and return human-readable warnings.
    ///
    /// Returns an empty Vec if the config is sound. Problematic values are
    /// reported rather than rejected.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.llm.validate();

        if !self.sources.cofacts.enabled && !self.sources.factcheck_tools.enabled {
            warnings.push(
                "no evidence sources enabled; every claim will be classified unclear".to_string(),
            );
        }
        if self.research.evidence_limit == 0 {
            warnings.push("research.evidence_limit is 0; no evidence will be verified".to_string());
        }
        if self.research.recency_half_life_days <= 0.0 {
            warnings.push(format!(
                "research.recency_half_life_days ({}) must be positive; recency will be ignored",
                self.research.recency_half_life_days
            ));
        }
        if self.review.perspectives.is_empty() {
            warnings.push("review.perspectives is empty; drafts finalize without review".to_string());
        }
        if self.retry.backoff_multiplier < 1.0 {
            warnings.push(format!(
                "retry.backoff_multiplier ({}) < 1.0; backoff will shrink",
                self.retry.backoff_multiplier
            ));
        }

        let t = &self.timeouts;
        for (name, secs) in [
            ("research_secs", t.research_secs),
            ("verification_secs", t.verification_secs),
            ("drafting_secs", t.drafting_secs),
            ("review_secs", t.review_secs),
        ] {
            if secs == 0 {
                warnings.push(format!("timeouts.{name} is 0; every call will time out"));
            } else if secs > t.run_budget_secs {
                warnings.push(format!(
                    "timeouts.{name} ({secs}s) exceeds run_budget_secs ({}s)",
                    t.run_budget_secs
                ));
            }
        }
        warnings
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Load configuration with layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `FACTDESK_`)
/// 3. Workspace-local config (`.factdesk/config.toml`)
/// 4. User config (`<config dir>/factdesk/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&FactdeskConfig>,
) -> Result<FactdeskConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(FactdeskConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("org", "factdesk", "factdesk") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".factdesk").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // FACTDESK_LLM__MODEL, FACTDESK_REVIEW__MAX_REVISIONS, etc.
    figment = figment.merge(Env::prefixed("FACTDESK_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}
