//! Research stage: concurrent evidence gathering, deduplication, and ranking.

use crate::config::{FactdeskConfig, ResearchConfig, RetryConfig};
use crate::error::SourceError;
use crate::evidence::{
    CofactsClient, EvidenceSource, FactCheckToolsClient, RawEvidence, SUMMARY_MAX_CHARS,
    SourceQuery, normalize_url, one_line,
};
use crate::model::{Claim, EvidenceRecord, clamp_unit};
use crate::retry::with_retry;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RELEVANCE_WEIGHT: f64 = 0.6;
const RECENCY_WEIGHT: f64 = 0.4;

/// Ranked evidence plus the failures absorbed while collecting it.
#[derive(Debug, Clone, Default)]
pub struct ResearchOutcome {
    pub records: Vec<EvidenceRecord>,
    pub warnings: Vec<String>,
}

/// Queries every configured source and merges the results.
pub struct ResearchStage {
    sources: Vec<Arc<dyn EvidenceSource>>,
    config: ResearchConfig,
    retry: RetryConfig,
    timeout: Duration,
}

impl ResearchStage {
    pub fn new(
        sources: Vec<Arc<dyn EvidenceSource>>,
        config: ResearchConfig,
        retry: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            sources,
            config,
            retry,
            timeout,
        }
    }

    /// Build the stage with every enabled source.
    ///
    /// A source that cannot be constructed is skipped with a warning.
    pub fn from_config(config: &FactdeskConfig) -> Self {
        let mut sources: Vec<Arc<dyn EvidenceSource>> = Vec::new();
        if config.sources.cofacts.enabled {
            match CofactsClient::new(&config.sources.cofacts) {
                Ok(client) => sources.push(Arc::new(client)),
                Err(e) => warn!(error = %e, "Skipping Cofacts source"),
            }
        }
        if config.sources.factcheck_tools.enabled {
            match FactCheckToolsClient::new(&config.sources.factcheck_tools) {
                Ok(client) => sources.push(Arc::new(client)),
                Err(e) => warn!(error = %e, "Skipping Fact Check Tools source"),
            }
        }
        Self::new(
            sources,
            config.research.clone(),
            config.retry.clone(),
            config.timeouts.research(),
        )
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Gather, deduplicate, and rank evidence for `claim`. Never fails.
    pub async fn research(&self, claim: &Claim) -> ResearchOutcome {
        let query = SourceQuery {
            claim_text: claim.text.clone(),
            language_code: claim
                .language
                .clone()
                .unwrap_or_else(|| self.config.default_language.clone()),
            limit: self.config.per_source_limit,
        };
        let mut outcome = ResearchOutcome::default();
        if self.sources.is_empty() {
            warn!("No evidence sources configured");
            outcome
                .warnings
                .push("no evidence sources configured".to_string());
            return outcome;
        }

        info!(sources = ?self.source_names(), "Querying evidence sources");
        let calls = self
            .sources
            .iter()
            .map(|source| self.query_source(source.as_ref(), &query));
        let results = futures::future::join_all(calls).await;

        let retrieved_at = Utc::now();
        let mut collected = Vec::new();
        let mut failures = 0;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(raw) => {
                    debug!(source = source.name(), count = raw.len(), "Source answered");
                    collected.extend(
                        raw.into_iter()
                            .map(|r| to_record(r, source.as_ref(), retrieved_at)),
                    );
                }
                Err(e) => {
                    failures += 1;
                    warn!(source = source.name(), error = %e, "Evidence source degraded");
                    outcome.warnings.push(e.to_string());
                }
            }
        }
        if failures == self.sources.len() {
            outcome
                .warnings
                .push("all evidence sources failed; continuing without evidence".to_string());
        }

        outcome.records = dedup_and_rank(
            collected,
            Utc::now(),
            self.config.recency_half_life_days,
            self.config.evidence_limit,
        );
        info!(
            records = outcome.records.len(),
            failed_sources = failures,
            "Research complete"
        );
        outcome
    }

    async fn query_source(
        &self,
        source: &dyn EvidenceSource,
        query: &SourceQuery,
    ) -> Result<Vec<RawEvidence>, SourceError> {
        let timeout = self.timeout;
        let attempts = with_retry(&self.retry, || async move {
            match tokio::time::timeout(timeout, source.query(query)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::unavailable(
                    source.name(),
                    format!("timed out after {}s", timeout.as_secs()),
                )),
            }
        });
        // Backoff sleeps count against the same budget as the calls.
        match tokio::time::timeout(timeout, attempts).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::unavailable(
                source.name(),
                format!("gave up after {}s of retries", timeout.as_secs()),
            )),
        }
    }
}

fn to_record(
    raw: RawEvidence,
    source: &dyn EvidenceSource,
    retrieved_at: DateTime<Utc>,
) -> EvidenceRecord {
    EvidenceRecord {
        id: Uuid::new_v4(),
        source_url: raw.url.trim().to_string(),
        summary: one_line(&raw.summary, SUMMARY_MAX_CHARS),
        origin: source.origin(),
        retrieved_at,
        published_at: raw.published_at,
        relevance_score: clamp_unit(raw.relevance),
    }
}

/// `0.5^(age_days / half_life_days)`, clamped to [0, 1].
///
/// Timestamps in the future count as age zero. A non-positive half-life
/// disables decay.
pub fn recency_decay(dated_at: DateTime<Utc>, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    if !half_life_days.is_finite() || half_life_days <= 0.0 {
        return 1.0;
    }
    let age_days = ((now - dated_at).num_seconds().max(0) as f64) / 86_400.0;
    clamp_unit(0.5_f64.powf(age_days / half_life_days))
}

/// Ranking score combining source relevance with recency.
pub fn composite_score(record: &EvidenceRecord, now: DateTime<Utc>, half_life_days: f64) -> f64 {
    RELEVANCE_WEIGHT * clamp_unit(record.relevance_score)
        + RECENCY_WEIGHT * recency_decay(record.dated_at(), now, half_life_days)
}

struct Scored {
    key: String,
    score: f64,
    record: EvidenceRecord,
}

/// Whether `a` should win over `b` when both share a normalized URL.
fn preferred(a: &Scored, b: &Scored) -> bool {
    b.score
        .total_cmp(&a.score)
        .then(a.record.origin.cmp(&b.record.origin))
        .then_with(|| a.record.summary.cmp(&b.record.summary))
        .then_with(|| a.record.source_url.cmp(&b.record.source_url))
        .then_with(|| a.record.published_at.cmp(&b.record.published_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
        == Ordering::Less
}

/// Deduplicate by normalized URL, rank by composite score, and cap at `limit`.
///
/// The result depends only on the set of records given, not their order.
pub fn dedup_and_rank(
    records: Vec<EvidenceRecord>,
    now: DateTime<Utc>,
    half_life_days: f64,
    limit: usize,
) -> Vec<EvidenceRecord> {
    let mut best: HashMap<String, Scored> = HashMap::new();
    for record in records {
        let candidate = Scored {
            key: normalize_url(&record.source_url),
            score: composite_score(&record, now, half_life_days),
            record,
        };
        match best.get(&candidate.key) {
            Some(current) if !preferred(&candidate, current) => {}
            _ => {
                best.insert(candidate.key.clone(), candidate);
            }
        }
    }

    let mut ranked: Vec<Scored> = best.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then(a.record.origin.cmp(&b.record.origin))
            .then_with(|| a.key.cmp(&b.key))
    });
    ranked.truncate(limit);
    ranked.into_iter().map(|s| s.record).collect()
}
