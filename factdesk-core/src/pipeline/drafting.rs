//! Drafting: the writer composes each revision of the reply.

use super::reconcile::cited_judgments;
use crate::agents::Agent;
use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::model::{
    Classification, Claim, DraftReply, EvidenceRecord, RequestedEdit, SupportJudgment,
};
use crate::retry::with_retry_when;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

/// Body used for unclear claims. Nothing is asserted, so no writer is needed.
pub const EVIDENCE_REQUEST: &str = "We could not find enough evidence to verify this message. \
If you know where it came from or have a source for it, please share it so it can be checked.";

/// Everything the writer needs for one revision.
#[derive(Debug, Clone, Copy)]
pub struct DraftInput<'a> {
    pub claim: &'a Claim,
    pub classification: Classification,
    pub cited: &'a [EvidenceRecord],
    pub judgments: &'a [SupportJudgment],
    pub previous: Option<&'a DraftReply>,
    pub edits: &'a [RequestedEdit],
    pub revision: u32,
}

/// A new revision, and the failure detail if it was built without the writer.
#[derive(Debug, Clone)]
pub struct DraftOutcome {
    pub draft: DraftReply,
    pub degraded: Option<String>,
}

fn headline(classification: Classification) -> &'static str {
    match classification {
        Classification::ContainsMisinformation => "This message contains misinformation.",
        Classification::ContainsTrueInformation => {
            "This message is consistent with the available evidence."
        }
        Classification::ContainsPersonalPerspective => {
            "This message mainly expresses personal opinion. Opinions are not facts."
        }
        Classification::Unclear => EVIDENCE_REQUEST,
    }
}

/// Deterministic body built from the cited judgments' rationales.
pub fn fallback_body(input: &DraftInput<'_>) -> String {
    let mut body = headline(input.classification).to_string();
    for (judgment, url) in cited_judgments(input.cited, input.judgments) {
        let rationale = judgment.rationale.trim();
        if rationale.is_empty() {
            continue;
        }
        body.push_str(&format!("\n- {rationale} ({url})"));
    }
    body
}

fn writer_context(input: &DraftInput<'_>) -> String {
    let mut context = format!(
        "Message:\n{}\n\nClassification: {}\n",
        input.claim.text, input.classification
    );
    if let Some(language) = &input.claim.language {
        context.push_str(&format!("Language: {language}\n"));
    }
    context.push_str("\nCited evidence:\n");
    for (judgment, url) in cited_judgments(input.cited, input.judgments) {
        let summary = input
            .cited
            .iter()
            .find(|r| r.id == judgment.evidence_id)
            .map(|r| r.summary.as_str())
            .unwrap_or_default();
        context.push_str(&format!(
            "- {url}\n  Summary: {summary}\n  Verifier: {} ({:.2}) {}\n",
            judgment.verdict, judgment.confidence, judgment.rationale
        ));
    }
    if let Some(previous) = input.previous {
        context.push_str(&format!(
            "\nPrevious draft (revision {}):\n{}\n",
            previous.revision_number, previous.body_text
        ));
    }
    if !input.edits.is_empty() {
        context.push_str("\nRequested edits (apply all of them):\n");
        for edit in input.edits {
            context.push_str(&format!("- [{}] {}\n", edit.perspective, edit.text));
        }
    }
    context
}

/// Produce revision `input.revision`.
///
/// The writer call is retried on any failure. If it still fails, or the claim
/// is unclear, the body is built deterministically.
pub async fn draft(
    writer: &Agent,
    input: DraftInput<'_>,
    retry: &RetryConfig,
    timeout: Duration,
) -> DraftOutcome {
    let (body_text, degraded) = if input.classification == Classification::Unclear {
        (EVIDENCE_REQUEST.to_string(), None)
    } else {
        let context = writer_context(&input);
        let written = with_retry_when(
            retry,
            |_: &LlmError| true,
            || {
                let context = context.as_str();
                async move {
                    let text = tokio::time::timeout(timeout, writer.invoke(context))
                        .await
                        .map_err(|_| LlmError::Timeout {
                            timeout_secs: timeout.as_secs(),
                        })??;
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        return Err(LlmError::ResponseParse {
                            message: "writer returned an empty draft".to_string(),
                        });
                    }
                    Ok(text)
                }
            },
        )
        .await;
        match written {
            Ok(text) => (text, None),
            Err(e) => {
                warn!(revision = input.revision, error = %e, "Writer failed; using fallback draft");
                (
                    fallback_body(&input),
                    Some(format!("writer failed on revision {}: {e}", input.revision)),
                )
            }
        }
    };

    info!(
        revision = input.revision,
        classification = %input.classification,
        edits = input.edits.len(),
        "Draft ready"
    );
    DraftOutcome {
        draft: DraftReply {
            classification: input.classification,
            body_text,
            cited_evidence: input.cited.to_vec(),
            revision_number: input.revision,
            incorporated_edits: input.edits.to_vec(),
            created_at: Utc::now(),
        },
        degraded,
    }
}
