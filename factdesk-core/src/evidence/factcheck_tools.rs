//! Google Fact Check Tools client: the external fact-check database.

use super::{
    EvidenceSource, RawEvidence, SUMMARY_MAX_CHARS, SourceQuery, map_http_status, map_transport,
    one_line,
};
use crate::config::FactCheckToolsConfig;
use crate::error::{ConfigError, SourceError};
use crate::model::EvidenceOrigin;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const SOURCE_NAME: &str = "factcheck_tools";

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    claims: Vec<ClaimEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimEntry {
    #[serde(default)]
    claim_review: Vec<ClaimReview>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimReview {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    publisher: Option<Publisher>,
    #[serde(default)]
    textual_rating: Option<String>,
    #[serde(default)]
    review_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct Publisher {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    site: Option<String>,
}

impl ClaimReview {
    /// `"{publisher}: {rating} ({title})"`, omitting missing parts.
    fn summary(&self) -> String {
        let publisher = self
            .publisher
            .as_ref()
            .and_then(|p| p.name.as_deref().or(p.site.as_deref()))
            .unwrap_or("Unknown publisher");
        let mut summary = format!(
            "{publisher}: {}",
            self.textual_rating.as_deref().unwrap_or("unrated")
        );
        if let Some(title) = self.title.as_deref().filter(|t| !t.trim().is_empty()) {
            summary.push_str(&format!(" ({title})"));
        }
        one_line(&summary, SUMMARY_MAX_CHARS)
    }
}

/// Client for `claims:search`.
pub struct FactCheckToolsClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl FactCheckToolsClient {
    /// Create a client, reading the API key from `config.api_key_env`.
    pub fn new(config: &FactCheckToolsConfig) -> Result<Self, ConfigError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| ConfigError::EnvVarMissing {
                var: config.api_key_env.clone(),
            })?;
        Self::with_key(config, api_key)
    }

    pub fn with_key(config: &FactCheckToolsConfig, api_key: String) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ConfigError::Invalid {
                message: format!("HTTP client for {SOURCE_NAME}: {e}"),
            })?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
        })
    }
}

/// Flatten every review of every claim, ranking by position.
fn to_raw_evidence(response: SearchResponse, limit: usize) -> Vec<RawEvidence> {
    let reviews: Vec<ClaimReview> = response
        .claims
        .into_iter()
        .flat_map(|c| c.claim_review)
        .take(limit)
        .collect();
    let n = reviews.len();
    reviews
        .into_iter()
        .enumerate()
        .map(|(i, review)| RawEvidence {
            summary: review.summary(),
            published_at: review.review_date,
            relevance: 1.0 - i as f64 / n as f64,
            url: review.url,
        })
        .collect()
}

#[async_trait]
impl EvidenceSource for FactCheckToolsClient {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    fn origin(&self) -> EvidenceOrigin {
        EvidenceOrigin::ExternalDatabase
    }

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawEvidence>, SourceError> {
        debug!(language = %query.language_code, limit = query.limit, "Searching Fact Check Tools");
        let page_size = query.limit.to_string();
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("query", query.claim_text.as_str()),
                ("languageCode", query.language_code.as_str()),
                ("pageSize", page_size.as_str()),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| map_transport(SOURCE_NAME, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(map_http_status(SOURCE_NAME, status, response.headers()));
        }
        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::unavailable(SOURCE_NAME, format!("invalid response: {e}")))?;
        Ok(to_raw_evidence(body, query.limit))
    }

    /// The API has no lookup by id.
    async fn fetch_detail(&self, evidence_id: &str) -> Result<RawEvidence, SourceError> {
        Err(SourceError::NotFound {
            source_name: SOURCE_NAME.to_string(),
            id: evidence_id.to_string(),
        })
    }
}
