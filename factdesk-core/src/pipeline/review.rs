//! Review stage: independent perspective reviewers score each revision.

use crate::agents::{Agent, AgentRole, parse_json_reply};
use crate::config::RetryConfig;
use crate::error::LlmError;
use crate::model::{Disposition, DraftReply, Perspective, ReviewVerdict};
use crate::retry::with_retry_when;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct ReviewerReply {
    disposition: String,
    #[serde(default)]
    comments: String,
    #[serde(default)]
    requested_edits: Vec<String>,
}

fn parse_disposition(label: &str) -> Result<Disposition, LlmError> {
    match label.trim().to_ascii_lowercase().as_str() {
        "accept" | "accepted" | "approve" | "approved" => Ok(Disposition::Accept),
        "revise" | "reject" | "rejected" | "request_changes" => Ok(Disposition::Revise),
        other => Err(LlmError::ResponseParse {
            message: format!("unknown disposition '{other}'"),
        }),
    }
}

fn review_context(draft: &DraftReply) -> String {
    let mut context = format!(
        "Draft reply (revision {}), classified as {}:\n{}\n",
        draft.revision_number, draft.classification, draft.body_text
    );
    if !draft.cited_evidence.is_empty() {
        context.push_str("\nReferences:\n");
        for record in &draft.cited_evidence {
            context.push_str(&format!("- {} - {}\n", record.source_url, record.summary));
        }
    }
    context
}

fn perspective_of(reviewer: &Agent) -> Perspective {
    match reviewer.role() {
        AgentRole::Reviewer(perspective) => perspective.clone(),
        other => Perspective::Custom(other.to_string()),
    }
}

/// Ask one reviewer for a verdict on `draft`. Never fails.
///
/// Any failure is retried; a reviewer that stays unreachable is counted as
/// accepting, with the fact recorded on the verdict.
pub async fn review(
    reviewer: &Agent,
    draft: &DraftReply,
    retry: &RetryConfig,
    timeout: Duration,
) -> ReviewVerdict {
    let reviewer_id = reviewer.role().to_string();
    let perspective = perspective_of(reviewer);
    let context = review_context(draft);

    let reply = with_retry_when(
        retry,
        |_: &LlmError| true,
        || {
            let context = context.as_str();
            async move {
                let text = tokio::time::timeout(timeout, reviewer.invoke(context))
                    .await
                    .map_err(|_| LlmError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    })??;
                let reply: ReviewerReply = parse_json_reply(&text)?;
                let disposition = parse_disposition(&reply.disposition)?;
                Ok((disposition, reply))
            }
        },
    )
    .await;

    match reply {
        Ok((disposition, reply)) => {
            let comments = reply.comments.trim().to_string();
            let mut requested_edits: Vec<String> = reply
                .requested_edits
                .into_iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            if disposition == Disposition::Revise && requested_edits.is_empty() {
                requested_edits.push(if comments.is_empty() {
                    format!("Address the {perspective} reviewer's objection")
                } else {
                    comments.clone()
                });
            }
            if disposition == Disposition::Accept {
                requested_edits.clear();
            }
            ReviewVerdict {
                reviewer_id,
                perspective,
                revision_number: draft.revision_number,
                disposition,
                comments,
                requested_edits,
                reviewer_unavailable: false,
            }
        }
        Err(e) => {
            warn!(reviewer = %reviewer_id, error = %e, "Reviewer unavailable; counting as accept");
            ReviewVerdict {
                comments: format!("Reviewer unavailable, accepted without review: {e}"),
                reviewer_id,
                perspective,
                revision_number: draft.revision_number,
                disposition: Disposition::Accept,
                requested_edits: Vec::new(),
                reviewer_unavailable: true,
            }
        }
    }
}

/// Run every reviewer on the same draft concurrently; verdicts keep reviewer order.
pub async fn review_all(
    reviewers: &[Agent],
    draft: &DraftReply,
    retry: &RetryConfig,
    timeout: Duration,
) -> Vec<ReviewVerdict> {
    let calls = reviewers
        .iter()
        .map(|reviewer| review(reviewer, draft, retry, timeout));
    let verdicts = futures::future::join_all(calls).await;
    info!(
        revision = draft.revision_number,
        accepted = verdicts.iter().filter(|v| v.is_accept()).count(),
        total = verdicts.len(),
        "Review complete"
    );
    verdicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brain::MockLlmProvider;
    use crate::model::Classification;
    use chrono::Utc;
    use std::sync::Arc;

    fn draft() -> DraftReply {
        DraftReply {
            classification: Classification::ContainsMisinformation,
            body_text: "The claim is false.".into(),
            cited_evidence: Vec::new(),
            revision_number: 2,
            incorporated_edits: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn reviewer(provider: MockLlmProvider, perspective: Perspective) -> Agent {
        Agent::new(AgentRole::Reviewer(perspective), Arc::new(provider))
    }

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            initial_backoff_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_review_parses_verdict() {
        let agent = reviewer(
            MockLlmProvider::with_response(
                r#"{"disposition":"revise","comments":"too harsh","requested_edits":["soften tone"," "]}"#,
            ),
            Perspective::Conservative,
        );
        let verdict = review(&agent, &draft(), &fast_retry(), Duration::from_secs(60)).await;
        assert_eq!(verdict.reviewer_id, "reviewer-conservative");
        assert_eq!(verdict.perspective, Perspective::Conservative);
        assert_eq!(verdict.revision_number, 2);
        assert_eq!(verdict.disposition, Disposition::Revise);
        assert_eq!(verdict.requested_edits, ["soften tone"]);
        assert!(!verdict.reviewer_unavailable);
    }

    #[tokio::test]
    async fn test_revise_without_edits_promotes_comment() {
        let agent = reviewer(
            MockLlmProvider::with_response(r#"{"disposition":"reject","comments":"Cite the ministry"}"#),
            Perspective::Centrist,
        );
        let verdict = review(&agent, &draft(), &fast_retry(), Duration::from_secs(60)).await;
        assert_eq!(verdict.disposition, Disposition::Revise);
        assert_eq!(verdict.requested_edits, ["Cite the ministry"]);
    }

    #[tokio::test]
    async fn test_unparseable_then_valid_is_retried() {
        let provider = MockLlmProvider::with_response(r#"{"disposition":"accept"}"#);
        provider.queue_response(MockLlmProvider::text_response(r#"{"disposition":"maybe"}"#));
        let agent = reviewer(provider, Perspective::Progressive);
        let verdict = review(&agent, &draft(), &fast_retry(), Duration::from_secs(60)).await;
        assert!(verdict.is_accept());
        assert!(!verdict.reviewer_unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_timeout_counts_as_accept() {
        let provider = MockLlmProvider::with_response(r#"{"disposition":"revise"}"#)
            .with_delay(Duration::from_secs(600));
        let agent = reviewer(provider, Perspective::Centrist);
        let verdict = review(
            &agent,
            &draft(),
            &RetryConfig::default(),
            Duration::from_secs(60),
        )
        .await;
        assert!(verdict.is_accept());
        assert!(verdict.reviewer_unavailable);
        assert!(verdict.comments.contains("Reviewer unavailable"));
    }

    #[tokio::test]
    async fn test_review_all_keeps_reviewer_order() {
        let agents = vec![
            reviewer(
                MockLlmProvider::with_response(r#"{"disposition":"accept"}"#),
                Perspective::Progressive,
            ),
            reviewer(
                MockLlmProvider::with_response(
                    r#"{"disposition":"revise","requested_edits":["x"]}"#,
                ),
                Perspective::Conservative,
            ),
        ];
        let verdicts = review_all(&agents, &draft(), &fast_retry(), Duration::from_secs(60)).await;
        assert_eq!(verdicts.len(), 2);
        assert_eq!(verdicts[0].perspective, Perspective::Progressive);
        assert!(!verdicts[1].is_accept());
    }
}
