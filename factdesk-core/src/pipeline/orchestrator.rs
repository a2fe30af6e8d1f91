//! Orchestrator: drives one claim through the pipeline state machine.
//!
//! A run is owned by the single future returned from [`Orchestrator::run`].
//! Fan-out inside a stage never touches the run; results are folded back in
//! by that future after each join barrier.

use super::drafting::{DraftInput, draft};
use super::reconcile::{ReviewDecision, cite_evidence, classify, reconcile_reviews};
use super::research::ResearchStage;
use super::review::review_all;
use super::run::{PipelineRun, RunState, TerminalReason};
use super::trace::Stage;
use super::verification::verify;
use crate::agents::AgentSet;
use crate::config::FactdeskConfig;
use crate::error::{FactdeskError, PipelineError, SubmissionError};
use crate::evidence::{CofactsClient, ReplySubmitter};
use crate::model::{Claim, Classification, RequestedEdit};
use crate::providers::create_provider;
use crate::render::RenderedReply;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{Instrument, error, info, info_span, warn};

/// A finished run and, when it finalized, its rendered reply.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run: PipelineRun,
    pub reply: Option<RenderedReply>,
    /// Where the run snapshot was written, if persistence is enabled.
    pub saved_to: Option<PathBuf>,
}

impl RunOutcome {
    pub fn is_finalized(&self) -> bool {
        self.run.state() == RunState::Finalized
    }
}

pub struct Orchestrator {
    research: ResearchStage,
    agents: AgentSet,
    config: FactdeskConfig,
    submitter: Option<Arc<dyn ReplySubmitter>>,
    runs_dir: Option<PathBuf>,
}

impl Orchestrator {
    pub fn new(research: ResearchStage, agents: AgentSet, config: FactdeskConfig) -> Self {
        Self {
            research,
            agents,
            config,
            submitter: None,
            runs_dir: None,
        }
    }

    /// Wire every component from configuration.
    ///
    /// Cofacts doubles as the reply submitter when it is enabled, and runs
    /// are saved under the configured runs directory.
    pub fn from_config(config: FactdeskConfig) -> Result<Self, FactdeskError> {
        let provider = create_provider(&config.llm)?;
        let agents = AgentSet::from_config(&config, provider);
        let research = ResearchStage::from_config(&config);
        let runs_dir = config.storage.resolved_runs_dir();
        let mut orchestrator = Self::new(research, agents, config).with_runs_dir(runs_dir);
        if orchestrator.config.sources.cofacts.enabled {
            let cofacts = CofactsClient::new(&orchestrator.config.sources.cofacts)?;
            orchestrator = orchestrator.with_submitter(Arc::new(cofacts));
        }
        Ok(orchestrator)
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn ReplySubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }

    pub fn with_runs_dir(mut self, dir: PathBuf) -> Self {
        self.runs_dir = Some(dir);
        self
    }

    pub fn config(&self) -> &FactdeskConfig {
        &self.config
    }

    /// Run `claim` to a terminal state within the wall-clock budget.
    ///
    /// Always returns the run, partial if it was aborted.
    pub async fn run(&self, claim: Claim) -> RunOutcome {
        let mut run = PipelineRun::new(claim);
        let span = info_span!("run", run_id = %run.id());
        async move {
            info!("Run started");
            let budget = self.config.timeouts.run_budget();
            let driven = tokio::time::timeout(budget, self.drive(&mut run)).await;
            let reason = match driven {
                Ok(Ok(())) => None,
                Ok(Err(e)) => {
                    error!(error = %e, "Run broke an invariant");
                    Some(TerminalReason::InvariantViolation {
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    warn!(budget_secs = budget.as_secs(), state = %run.state(), "Run wall-clock budget exceeded");
                    run.orphan_current_stage();
                    Some(TerminalReason::WallClockExceeded {
                        budget_secs: budget.as_secs(),
                    })
                }
            };
            if let Some(reason) = reason
                && let Err(e) = run.abort(reason)
            {
                error!(error = %e, "Could not abort run");
            }

            let reply = (run.state() == RunState::Finalized)
                .then(|| run.latest_draft().map(RenderedReply::from_draft))
                .flatten();
            let saved_to = self.persist(&run);
            info!(
                state = %run.state(),
                revisions = run.drafts().len(),
                warnings = run.warnings().len(),
                "Run finished"
            );
            RunOutcome {
                run,
                reply,
                saved_to,
            }
        }
        .instrument(span)
        .await
    }

    fn persist(&self, run: &PipelineRun) -> Option<PathBuf> {
        let dir = self.runs_dir.as_ref()?;
        match run.save(dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, dir = %dir.display(), "Could not save run snapshot");
                None
            }
        }
    }

    async fn drive(&self, run: &mut PipelineRun) -> Result<(), PipelineError> {
        let timeouts = &self.config.timeouts;
        let retry = &self.config.retry;

        let started = Instant::now();
        let research = self.research.research(run.claim()).await;
        for warning in research.warnings {
            run.degrade(Stage::Research, warning);
        }
        run.set_evidence(research.records);
        run.stage_completed(Stage::Research, started.elapsed());
        run.transition(RunState::Verifying)?;

        let started = Instant::now();
        let verification = verify(
            &self.agents.verifier,
            run.claim(),
            run.evidence(),
            retry,
            timeouts.verification(),
        )
        .await;
        for warning in verification.warnings {
            run.degrade(Stage::Verification, warning);
        }
        run.set_judgments(verification.judgments);
        run.stage_completed(Stage::Verification, started.elapsed());
        run.transition(RunState::Drafting)?;

        let classification = classify(run.evidence(), run.judgments());
        let cited = cite_evidence(classification, run.evidence(), run.judgments());
        info!(%classification, cited = cited.len(), "Claim classified");

        let max_revisions = self.config.review.max_revisions;
        let mut edits: Vec<RequestedEdit> = Vec::new();
        loop {
            let revision = run.next_revision();
            let started = Instant::now();
            let outcome = draft(
                &self.agents.writer,
                DraftInput {
                    claim: run.claim(),
                    classification,
                    cited: &cited,
                    judgments: run.judgments(),
                    previous: run.latest_draft(),
                    edits: &edits,
                    revision,
                },
                retry,
                timeouts.drafting(),
            )
            .await;
            if let Some(detail) = outcome.degraded {
                run.degrade(Stage::Drafting, detail);
            }
            run.push_draft(outcome.draft)?;
            run.stage_completed(Stage::Drafting, started.elapsed());
            run.transition(RunState::Reviewing)?;

            let started = Instant::now();
            // Unclear replies only ask for evidence and are never published.
            let verdicts = match run.latest_draft() {
                Some(current) if current.classification != Classification::Unclear => {
                    review_all(&self.agents.reviewers, current, retry, timeouts.review()).await
                }
                _ => Vec::new(),
            };
            for verdict in verdicts.iter().filter(|v| v.reviewer_unavailable) {
                run.degrade(
                    Stage::Review,
                    format!(
                        "{} unavailable on revision {revision}; counted as accept",
                        verdict.reviewer_id
                    ),
                );
            }
            run.record_reviews(verdicts)?;
            run.stage_completed(Stage::Review, started.elapsed());

            match reconcile_reviews(revision, run.latest_reviews(), max_revisions) {
                ReviewDecision::Finalize => {
                    run.finalize()?;
                    return Ok(());
                }
                ReviewDecision::Revise { edits: requested } => {
                    info!(revision, edits = requested.len(), "Revision requested");
                    edits = requested;
                    run.transition(RunState::Drafting)?;
                }
                ReviewDecision::Abort { max_revisions } => {
                    warn!(revision, "Reviewers still object; needs human editorial decision");
                    run.abort(TerminalReason::RevisionBudgetExhausted { max_revisions })?;
                    return Ok(());
                }
            }
        }
    }

    /// Submit a finalized reply to the claim database.
    ///
    /// `article_id` overrides the claim's own article link. Nothing is sent
    /// for unclear or unfinished runs.
    pub async fn publish(
        &self,
        outcome: &RunOutcome,
        article_id: Option<&str>,
    ) -> Result<String, SubmissionError> {
        let not_submittable = |reason: String| SubmissionError::NotSubmittable { reason };
        if !outcome.is_finalized() {
            return Err(not_submittable(format!(
                "run is {}, not finalized",
                outcome.run.state()
            )));
        }
        let reply = outcome
            .reply
            .as_ref()
            .ok_or_else(|| not_submittable("run has no rendered reply".to_string()))?;
        if !reply.is_submittable() {
            return Err(not_submittable(
                "unclear replies are not published".to_string(),
            ));
        }
        let article_id = article_id
            .or(outcome.run.claim().article_id.as_deref())
            .ok_or_else(|| not_submittable("no article id to reply to".to_string()))?;
        let submission = reply
            .to_submission(article_id)
            .ok_or_else(|| not_submittable("unclear replies are not published".to_string()))?;
        let submitter = self
            .submitter
            .as_ref()
            .ok_or_else(|| not_submittable("no reply submitter configured".to_string()))?;

        let reply_id = submitter.submit_reply(&submission).await?;
        info!(
            run_id = %outcome.run.id(),
            article_id,
            reply_id = %reply_id,
            reply_type = submission.reply_type.as_cofacts(),
            "Reply published"
        );
        Ok(reply_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentRole};
    use crate::brain::MockLlmProvider;
    use crate::config::{ResearchConfig, RetryConfig};
    use crate::evidence::{EvidenceSource, RawEvidence, SourceQuery};
    use crate::error::SourceError;
    use crate::model::{EvidenceOrigin, Perspective};
    use crate::render::ReplySubmission;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    struct OneHit;

    #[async_trait]
    impl EvidenceSource for OneHit {
        fn name(&self) -> &str {
            "one_hit"
        }

        fn origin(&self) -> EvidenceOrigin {
            EvidenceOrigin::InternalDatabase
        }

        async fn query(&self, _query: &SourceQuery) -> Result<Vec<RawEvidence>, SourceError> {
            Ok(vec![RawEvidence {
                url: "https://cofacts.tw/article/abc".into(),
                summary: "Existing reply: this is a hoax".into(),
                published_at: None,
                relevance: 1.0,
            }])
        }

        async fn fetch_detail(&self, id: &str) -> Result<RawEvidence, SourceError> {
            Err(SourceError::NotFound {
                source_name: "one_hit".into(),
                id: id.into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingSubmitter {
        seen: Mutex<Vec<ReplySubmission>>,
    }

    #[async_trait]
    impl ReplySubmitter for RecordingSubmitter {
        async fn submit_reply(
            &self,
            submission: &ReplySubmission,
        ) -> Result<String, SubmissionError> {
            self.seen.lock().unwrap().push(submission.clone());
            Ok("reply-1".into())
        }
    }

    fn orchestrator(reviewer_reply: &str) -> Orchestrator {
        let mut config = FactdeskConfig::default();
        config.retry = RetryConfig {
            initial_backoff_ms: 1,
            ..Default::default()
        };
        let research = ResearchStage::new(
            vec![Arc::new(OneHit)],
            ResearchConfig::default(),
            config.retry.clone(),
            Duration::from_secs(30),
        );
        let verifier = Agent::new(
            AgentRole::Verifier,
            Arc::new(MockLlmProvider::with_response(
                r#"{"verdict":"contradicts","confidence":0.9,"rationale":"Debunked"}"#,
            )),
        );
        let writer = Agent::new(
            AgentRole::Writer,
            Arc::new(MockLlmProvider::with_response("This rumor is false.")),
        );
        let reviewer = Agent::new(
            AgentRole::Reviewer(Perspective::Centrist),
            Arc::new(MockLlmProvider::with_response(reviewer_reply)),
        );
        Orchestrator::new(
            research,
            AgentSet::new(writer, verifier, vec![reviewer]),
            config,
        )
    }

    #[tokio::test]
    async fn test_run_finalizes_and_publishes() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let orchestrator =
            orchestrator(r#"{"disposition":"accept"}"#).with_submitter(submitter.clone());
        let outcome = orchestrator
            .run(Claim::new("Vaccines contain microchips").with_article("art-1"))
            .await;

        assert_eq!(outcome.run.state(), RunState::Finalized);
        assert_eq!(
            outcome.run.trace().states_entered(),
            vec![
                RunState::Verifying,
                RunState::Drafting,
                RunState::Reviewing,
                RunState::Finalized
            ]
        );
        let reply = outcome.reply.as_ref().unwrap();
        assert_eq!(reply.classification, Classification::ContainsMisinformation);
        assert!(reply.rendered.starts_with("Text: This rumor is false."));

        let reply_id = orchestrator.publish(&outcome, None).await.unwrap();
        assert_eq!(reply_id, "reply-1");
        let seen = submitter.seen.lock().unwrap();
        assert_eq!(seen[0].article_id, "art-1");
        assert_eq!(seen[0].references[0].url, "https://cofacts.tw/article/abc");
    }

    #[tokio::test]
    async fn test_publish_rejects_unfinished_run() {
        let submitter = Arc::new(RecordingSubmitter::default());
        let orchestrator = orchestrator(r#"{"disposition":"revise","requested_edits":["more"]}"#)
            .with_submitter(submitter.clone());
        let outcome = orchestrator.run(Claim::new("claim")).await;
        assert_eq!(outcome.run.state(), RunState::Aborted);
        assert_eq!(outcome.run.drafts().len(), 4);
        assert!(matches!(
            orchestrator.publish(&outcome, Some("art-1")).await,
            Err(SubmissionError::NotSubmittable { .. })
        ));
        assert!(submitter.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_publish_requires_article_id() {
        let orchestrator = orchestrator(r#"{"disposition":"accept"}"#)
            .with_submitter(Arc::new(RecordingSubmitter::default()));
        let outcome = orchestrator.run(Claim::new("claim")).await;
        let err = orchestrator.publish(&outcome, None).await.unwrap_err();
        assert!(err.to_string().contains("no article id"));
    }

    #[tokio::test]
    async fn test_run_snapshot_saved() {
        let dir = tempfile::TempDir::new().unwrap();
        let orchestrator =
            orchestrator(r#"{"disposition":"accept"}"#).with_runs_dir(dir.path().to_path_buf());
        let outcome = orchestrator.run(Claim::new("claim")).await;
        let path = outcome.saved_to.unwrap();
        assert!(path.exists());
        let loaded = PipelineRun::load(dir.path(), outcome.run.id())
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state(), RunState::Finalized);
    }
}
