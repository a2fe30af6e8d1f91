//! Evidence sources: a uniform query interface over claim and fact-check databases.
//!
//! Each source maps its own wire format onto [`RawEvidence`]; the research
//! stage turns those into [`EvidenceRecord`](crate::model::EvidenceRecord)s.

pub mod cofacts;
pub mod factcheck_tools;

use crate::error::{SourceError, SubmissionError};
use crate::model::EvidenceOrigin;
use crate::render::ReplySubmission;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};

pub use cofacts::CofactsClient;
pub use factcheck_tools::FactCheckToolsClient;

/// Maximum characters kept in a one-line evidence summary.
pub const SUMMARY_MAX_CHARS: usize = 200;

/// Retry-After fallback when a 429 carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// A query against one evidence source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceQuery {
    pub claim_text: String,
    pub language_code: String,
    pub limit: usize,
}

/// One source document as reported by the source, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvidence {
    pub url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    /// Source-reported relevance in [0, 1].
    pub relevance: f64,
}

/// A queryable evidence database.
///
/// Zero matches is `Ok(vec![])`, never an error. Implementations hold no
/// per-call state beyond their pooled HTTP client.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Short stable identifier used in logs and warnings.
    fn name(&self) -> &str;

    fn origin(&self) -> EvidenceOrigin;

    async fn query(&self, query: &SourceQuery) -> Result<Vec<RawEvidence>, SourceError>;

    /// Look up a single record by its source-specific id.
    async fn fetch_detail(&self, evidence_id: &str) -> Result<RawEvidence, SourceError>;
}

/// A destination for finalized replies.
#[async_trait]
pub trait ReplySubmitter: Send + Sync {
    /// Submit a reply and return the id the destination assigned to it.
    async fn submit_reply(&self, submission: &ReplySubmission) -> Result<String, SubmissionError>;
}

/// Canonical form of a URL used as the deduplication key.
///
/// Lower-cased, scheme stripped, leading `www.` and trailing `/` removed.
/// Fragments are dropped; query strings are kept.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let joined = match url::Url::parse(trimmed) {
        Ok(parsed) if parsed.host_str().is_some() => {
            let host = parsed.host_str().unwrap_or_default();
            let mut out = host.to_string();
            if let Some(port) = parsed.port() {
                out.push_str(&format!(":{port}"));
            }
            out.push_str(parsed.path());
            if let Some(query) = parsed.query() {
                out.push('?');
                out.push_str(query);
            }
            out
        }
        _ => {
            let without_fragment = trimmed.split('#').next().unwrap_or_default();
            match without_fragment.split_once("://") {
                Some((_, rest)) => rest.to_string(),
                None => without_fragment.to_string(),
            }
        }
    };
    let lowered = joined.to_lowercase();
    let stripped = lowered.strip_prefix("www.").unwrap_or(&lowered);
    stripped.trim_end_matches('/').to_string()
}

/// Collapse text onto one line and truncate it to `max_chars` characters.
pub fn one_line(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut cut: String = collapsed.chars().take(max_chars.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Map a non-success HTTP response onto a `SourceError`.
pub(crate) fn map_http_status(source_name: &str, status: StatusCode, headers: &HeaderMap) -> SourceError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return SourceError::RateLimited {
            source_name: source_name.to_string(),
            retry_after_secs: parse_retry_after(headers).unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        };
    }
    SourceError::unavailable(source_name, format!("HTTP {status}"))
}

/// Map a transport failure onto a `SourceError`.
pub(crate) fn map_transport(source_name: &str, err: reqwest::Error) -> SourceError {
    let kind = if err.is_timeout() { "timed out" } else { "request failed" };
    SourceError::unavailable(source_name, format!("{kind}: {}", err.without_url()))
}

/// Parse `Retry-After` as delta-seconds or an HTTP date.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - Utc::now()).num_seconds().max(0) as u64)
}
