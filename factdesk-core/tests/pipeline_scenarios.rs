//! End-to-end pipeline scenarios.
//!
//! Each test drives a full run through the `Orchestrator` with in-process
//! evidence sources and `MockLlmProvider` agents. Time is paused so retry
//! backoff and timeouts resolve instantly.

use async_trait::async_trait;
use factdesk_core::agents::{Agent, AgentRole, AgentSet};
use factdesk_core::brain::MockLlmProvider;
use factdesk_core::config::FactdeskConfig;
use factdesk_core::error::{SourceError, SubmissionError};
use factdesk_core::evidence::{EvidenceSource, RawEvidence, ReplySubmitter, SourceQuery};
use factdesk_core::model::{Claim, Classification, EvidenceOrigin, Perspective, Verdict};
use factdesk_core::pipeline::{
    Orchestrator, ResearchStage, RunState, Stage, TerminalReason, TraceKind,
};
use factdesk_core::render::ReplySubmission;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A source that answers with fixed records or a fixed error.
struct FakeSource {
    name: &'static str,
    origin: EvidenceOrigin,
    result: Result<Vec<RawEvidence>, SourceError>,
}

impl FakeSource {
    fn answering(name: &'static str, origin: EvidenceOrigin, urls: &[&str]) -> Arc<Self> {
        let items = urls
            .iter()
            .map(|url| RawEvidence {
                url: url.to_string(),
                summary: format!("Fact-check at {url}"),
                published_at: None,
                relevance: 0.9,
            })
            .collect();
        Arc::new(Self {
            name,
            origin,
            result: Ok(items),
        })
    }

    fn down(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            origin: EvidenceOrigin::ExternalDatabase,
            result: Err(SourceError::unavailable(name, "connection refused")),
        })
    }
}

#[async_trait]
impl EvidenceSource for FakeSource {
    fn name(&self) -> &str {
        self.name
    }

    fn origin(&self) -> EvidenceOrigin {
        self.origin
    }

    async fn query(&self, _query: &SourceQuery) -> Result<Vec<RawEvidence>, SourceError> {
        self.result.clone()
    }

    async fn fetch_detail(&self, id: &str) -> Result<RawEvidence, SourceError> {
        Err(SourceError::NotFound {
            source_name: self.name.to_string(),
            id: id.to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    calls: Mutex<Vec<ReplySubmission>>,
}

#[async_trait]
impl ReplySubmitter for RecordingSubmitter {
    async fn submit_reply(&self, submission: &ReplySubmission) -> Result<String, SubmissionError> {
        self.calls.lock().unwrap().push(submission.clone());
        Ok("reply-42".to_string())
    }
}

/// Verifier: a.org contradicts at 0.8, b.org supports at 0.3.
fn verifier() -> MockLlmProvider {
    MockLlmProvider::with_handler(|req| {
        let context = req.user_text();
        Ok(if context.contains("a.org") {
            r#"{"verdict":"contradicts","confidence":0.8,"rationale":"Official data refutes it"}"#
        } else {
            r#"{"verdict":"supports","confidence":0.3,"rationale":"Loosely related anecdote"}"#
        }
        .to_string())
    })
}

fn writer() -> MockLlmProvider {
    MockLlmProvider::with_response("The message is misleading; the cited agencies refute it.")
}

fn accepting() -> MockLlmProvider {
    MockLlmProvider::with_response(r#"{"disposition":"accept","comments":"fine"}"#)
}

fn build(
    sources: Vec<Arc<FakeSource>>,
    verifier: MockLlmProvider,
    writer: Arc<MockLlmProvider>,
    reviewers: Vec<(Perspective, MockLlmProvider)>,
    config: FactdeskConfig,
) -> Orchestrator {
    let sources: Vec<Arc<dyn EvidenceSource>> = sources
        .into_iter()
        .map(|s| s as Arc<dyn EvidenceSource>)
        .collect();
    let research = ResearchStage::new(
        sources,
        config.research.clone(),
        config.retry.clone(),
        config.timeouts.research(),
    );
    let agents = AgentSet::new(
        Agent::new(AgentRole::Writer, writer),
        Agent::new(AgentRole::Verifier, Arc::new(verifier)),
        reviewers
            .into_iter()
            .map(|(p, provider)| Agent::new(AgentRole::Reviewer(p), Arc::new(provider)))
            .collect(),
    );
    Orchestrator::new(research, agents, config)
}

fn three_accepting() -> Vec<(Perspective, MockLlmProvider)> {
    vec![
        (Perspective::Progressive, accepting()),
        (Perspective::Conservative, accepting()),
        (Perspective::Centrist, accepting()),
    ]
}

#[tokio::test(start_paused = true)]
async fn test_contradiction_outweighs_weak_support() {
    let orchestrator = build(
        vec![
            FakeSource::answering(
                "cofacts",
                EvidenceOrigin::InternalDatabase,
                &["https://a.org/check"],
            ),
            FakeSource::answering(
                "factcheck_tools",
                EvidenceOrigin::ExternalDatabase,
                &["https://b.org/story"],
            ),
        ],
        verifier(),
        Arc::new(writer()),
        three_accepting(),
        FactdeskConfig::default(),
    );

    let outcome = orchestrator
        .run(Claim::new("Tap water in Taipei is radioactive"))
        .await;

    assert_eq!(outcome.run.state(), RunState::Finalized);
    let draft = outcome.run.latest_draft().unwrap();
    assert_eq!(draft.classification, Classification::ContainsMisinformation);
    // Both records carry a supports/contradicts judgment, so both are cited.
    assert_eq!(draft.cited_evidence.len(), 2);
    let contradicting = outcome
        .run
        .judgments()
        .iter()
        .find(|j| j.verdict == Verdict::Contradicts)
        .unwrap();
    assert!(contradicting.confidence >= 0.5);
    assert!(
        draft
            .cited_evidence
            .iter()
            .any(|r| r.id == contradicting.evidence_id)
    );
    let reply = outcome.reply.unwrap();
    assert!(reply.rendered.contains("References:\n- https://"));
}

#[tokio::test(start_paused = true)]
async fn test_all_sources_failing_yields_unclear_without_submission() {
    let writer = Arc::new(writer());
    let submitter = Arc::new(RecordingSubmitter::default());
    let orchestrator = build(
        vec![FakeSource::down("cofacts"), FakeSource::down("factcheck_tools")],
        verifier(),
        writer.clone(),
        three_accepting(),
        FactdeskConfig::default(),
    )
    .with_submitter(submitter.clone());

    let outcome = orchestrator
        .run(Claim::new("Something happened somewhere").with_article("art-7"))
        .await;

    assert!(outcome.run.evidence().is_empty());
    assert!(
        outcome
            .run
            .warnings()
            .iter()
            .any(|w| w.contains("all evidence sources failed"))
    );
    let draft = outcome.run.latest_draft().unwrap();
    assert_eq!(draft.classification, Classification::Unclear);
    assert_eq!(writer.call_count(), 0);

    let err = orchestrator.publish(&outcome, None).await.unwrap_err();
    assert!(matches!(err, SubmissionError::NotSubmittable { .. }));
    assert!(err.to_string().contains("unclear replies are not published"));
    assert!(submitter.calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_requested_edit_is_carried_into_next_revision() {
    let centrist = MockLlmProvider::with_handler(|req| {
        Ok(if req.user_text().contains("(revision 0)") {
            r#"{"disposition":"revise","comments":"Too combative","requested_edits":["soften tone"]}"#
        } else {
            r#"{"disposition":"accept"}"#
        }
        .to_string())
    });
    let orchestrator = build(
        vec![FakeSource::answering(
            "cofacts",
            EvidenceOrigin::InternalDatabase,
            &["https://a.org/check"],
        )],
        verifier(),
        Arc::new(writer()),
        vec![
            (Perspective::Progressive, accepting()),
            (Perspective::Conservative, accepting()),
            (Perspective::Centrist, centrist),
        ],
        FactdeskConfig::default(),
    );

    let outcome = orchestrator.run(Claim::new("claim")).await;

    assert_eq!(outcome.run.state(), RunState::Finalized);
    let drafts = outcome.run.drafts();
    assert_eq!(drafts.len(), 2);
    assert_eq!(drafts[1].revision_number, 1);
    let carried: Vec<_> = drafts[1]
        .incorporated_edits
        .iter()
        .map(|e| (e.perspective.clone(), e.text.as_str()))
        .collect();
    assert_eq!(carried, vec![(Perspective::Centrist, "soften tone")]);
    assert_eq!(
        outcome.run.trace().states_entered(),
        vec![
            RunState::Verifying,
            RunState::Drafting,
            RunState::Reviewing,
            RunState::Drafting,
            RunState::Reviewing,
            RunState::Finalized,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_reviewer_counts_as_accept() {
    let silent = MockLlmProvider::with_response(r#"{"disposition":"revise"}"#)
        .with_delay(Duration::from_secs(3600));
    let orchestrator = build(
        vec![FakeSource::answering(
            "cofacts",
            EvidenceOrigin::InternalDatabase,
            &["https://a.org/check"],
        )],
        verifier(),
        Arc::new(writer()),
        vec![
            (Perspective::Progressive, accepting()),
            (Perspective::Centrist, silent),
        ],
        FactdeskConfig::default(),
    );

    let outcome = orchestrator.run(Claim::new("claim")).await;

    assert_eq!(outcome.run.state(), RunState::Finalized);
    let verdicts = outcome.run.latest_reviews();
    let unavailable = verdicts.iter().find(|v| v.reviewer_unavailable).unwrap();
    assert!(unavailable.is_accept());
    assert!(unavailable.comments.contains("unavailable"));
    assert!(
        outcome
            .run
            .trace()
            .degradations()
            .any(|(stage, detail)| stage == Stage::Review && detail.contains("reviewer-centrist"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_persistent_objection_exhausts_revision_budget() {
    let stubborn = MockLlmProvider::with_response(
        r#"{"disposition":"revise","requested_edits":["rewrite the conclusion"]}"#,
    );
    let mut config = FactdeskConfig::default();
    config.review.max_revisions = 2;
    let orchestrator = build(
        vec![FakeSource::answering(
            "cofacts",
            EvidenceOrigin::InternalDatabase,
            &["https://a.org/check"],
        )],
        verifier(),
        Arc::new(writer()),
        vec![(Perspective::Conservative, stubborn)],
        config,
    );

    let outcome = orchestrator.run(Claim::new("claim")).await;

    assert_eq!(outcome.run.state(), RunState::Aborted);
    assert_eq!(
        outcome.run.terminal(),
        Some(&TerminalReason::RevisionBudgetExhausted { max_revisions: 2 })
    );
    let revisions: Vec<u32> = outcome
        .run
        .drafts()
        .iter()
        .map(|d| d.revision_number)
        .collect();
    assert_eq!(revisions, vec![0, 1, 2]);
    assert!(outcome.reply.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_wall_clock_budget_aborts_and_keeps_evidence() {
    let slow_verifier = verifier().with_delay(Duration::from_secs(600));
    let mut config = FactdeskConfig::default();
    config.timeouts.run_budget_secs = 5;
    let orchestrator = build(
        vec![FakeSource::answering(
            "cofacts",
            EvidenceOrigin::InternalDatabase,
            &["https://a.org/check"],
        )],
        slow_verifier,
        Arc::new(writer()),
        three_accepting(),
        config,
    );

    let outcome = orchestrator.run(Claim::new("claim")).await;

    assert_eq!(outcome.run.state(), RunState::Aborted);
    assert_eq!(
        outcome.run.terminal(),
        Some(&TerminalReason::WallClockExceeded { budget_secs: 5 })
    );
    assert_eq!(outcome.run.evidence().len(), 1);
    assert!(outcome.run.judgments().is_empty());
    assert!(
        outcome
            .run
            .trace()
            .events()
            .iter()
            .any(|e| e.kind == TraceKind::Orphaned { stage: Stage::Verification })
    );
    assert!(outcome.run.finished_at().is_some());
}
