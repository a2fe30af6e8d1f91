//! Verification stage: one independent support judgment per evidence record.

use crate::agents::Agent;
use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::model::{Claim, EvidenceRecord, SupportJudgment, Verdict};
use crate::retry::with_retry;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

/// Judgments in evidence order, plus the failures that were degraded.
#[derive(Debug, Clone, Default)]
pub struct VerificationOutcome {
    pub judgments: Vec<SupportJudgment>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct VerifierReply {
    verdict: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    rationale: String,
}

fn verifier_context(claim: &Claim, record: &EvidenceRecord) -> String {
    let mut context = format!(
        "Claim:\n{}\n\nEvidence ({}):\nSource: {}\n",
        claim.text, record.origin, record.source_url
    );
    if let Some(published) = record.published_at {
        context.push_str(&format!("Published: {}\n", published.format("%Y-%m-%d")));
    }
    context.push_str(&format!("Summary: {}\n", record.summary));
    context
}

async fn judge(
    agent: &Agent,
    claim: &Claim,
    record: &EvidenceRecord,
    retry: &RetryConfig,
    timeout: Duration,
) -> Result<SupportJudgment, LlmError> {
    let context = verifier_context(claim, record);
    let reply: VerifierReply = with_retry(retry, || {
        let context = context.as_str();
        async move {
            tokio::time::timeout(timeout, agent.invoke_json(context))
                .await
                .map_err(|_| LlmError::Timeout {
                    timeout_secs: timeout.as_secs(),
                })?
        }
    })
    .await?;
    Ok(SupportJudgment::new(
        record.id,
        Verdict::from_label(&reply.verdict),
        reply.confidence,
        reply.rationale.trim(),
    ))
}

/// Judge every record concurrently. Never fails; a record whose judgment
/// cannot be obtained gets the degraded unknown judgment.
pub async fn verify(
    agent: &Agent,
    claim: &Claim,
    evidence: &[EvidenceRecord],
    retry: &RetryConfig,
    timeout: Duration,
) -> VerificationOutcome {
    let calls = evidence
        .iter()
        .map(|record| judge(agent, claim, record, retry, timeout));
    let results = futures::future::join_all(calls).await;

    let mut outcome = VerificationOutcome::default();
    for (record, result) in evidence.iter().zip(results) {
        let judgment = match result {
            Ok(judgment) => judgment,
            Err(e) => {
                warn!(evidence = %record.source_url, error = %e, "Verification degraded");
                outcome
                    .warnings
                    .push(format!("verification of {} failed: {e}", record.source_url));
                SupportJudgment::degraded(record.id, format!("verification failed: {e}"))
            }
        };
        outcome.judgments.push(judgment);
    }
    info!(
        judgments = outcome.judgments.len(),
        degraded = outcome.warnings.len(),
        "Verification complete"
    );
    outcome
}
