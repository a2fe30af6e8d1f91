//! Pipeline run state machine with persistence.
//!
//! A `PipelineRun` is owned by exactly one orchestrating future. Every state
//! change goes through [`PipelineRun::transition`], which rejects edges the
//! pipeline does not allow and appends the change to the run trace.

use super::trace::{RunTrace, Stage, TraceKind};
use crate::error::{FactdeskError, PipelineError};
use crate::model::{Claim, DraftReply, EvidenceRecord, ReviewVerdict, SupportJudgment};
use crate::persistence;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

/// Current phase of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Researching,
    Verifying,
    Drafting,
    Reviewing,
    Finalized,
    Aborted,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Finalized | RunState::Aborted)
    }

    /// Whether `self -> to` is an edge of the pipeline.
    pub fn can_transition_to(self, to: RunState) -> bool {
        use RunState::*;
        match (self, to) {
            (Researching, Verifying)
            | (Verifying, Drafting)
            | (Drafting, Reviewing)
            | (Reviewing, Finalized)
            | (Reviewing, Drafting) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }

    /// The stage doing work while the run is in this state.
    pub fn stage(self) -> Option<Stage> {
        match self {
            RunState::Researching => Some(Stage::Research),
            RunState::Verifying => Some(Stage::Verification),
            RunState::Drafting => Some(Stage::Drafting),
            RunState::Reviewing => Some(Stage::Review),
            RunState::Finalized | RunState::Aborted => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Researching => "researching",
            RunState::Verifying => "verifying",
            RunState::Drafting => "drafting",
            RunState::Reviewing => "reviewing",
            RunState::Finalized => "finalized",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum TerminalReason {
    Finalized,
    /// Reviewers still disagreed at the last allowed revision.
    RevisionBudgetExhausted { max_revisions: u32 },
    WallClockExceeded { budget_secs: u64 },
    /// The run broke one of its own invariants.
    InvariantViolation { message: String },
}

impl TerminalReason {
    /// The pipeline error this reason corresponds to, if it is a failure.
    pub fn as_error(&self) -> Option<PipelineError> {
        match self {
            TerminalReason::Finalized | TerminalReason::InvariantViolation { .. } => None,
            TerminalReason::RevisionBudgetExhausted { max_revisions } => {
                Some(PipelineError::RevisionBudgetExhausted {
                    max_revisions: *max_revisions,
                })
            }
            TerminalReason::WallClockExceeded { budget_secs } => {
                Some(PipelineError::WallClockExceeded {
                    budget_secs: *budget_secs,
                })
            }
        }
    }
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Finalized => write!(f, "finalized"),
            TerminalReason::InvariantViolation { message } => {
                write!(f, "invariant violation: {message}")
            }
            other => match other.as_error() {
                Some(err) => write!(f, "{err}"),
                None => Ok(()),
            },
        }
    }
}

/// One claim's journey through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    id: Uuid,
    claim: Claim,
    state: RunState,
    evidence: Vec<EvidenceRecord>,
    judgments: Vec<SupportJudgment>,
    drafts: Vec<DraftReply>,
    /// Verdict sets indexed by revision number.
    reviews: Vec<Vec<ReviewVerdict>>,
    trace: RunTrace,
    warnings: Vec<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    terminal: Option<TerminalReason>,
}

impl PipelineRun {
    pub fn new(claim: Claim) -> Self {
        Self {
            id: Uuid::new_v4(),
            claim,
            state: RunState::Researching,
            evidence: Vec::new(),
            judgments: Vec::new(),
            drafts: Vec::new(),
            reviews: Vec::new(),
            trace: RunTrace::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
            terminal: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn claim(&self) -> &Claim {
        &self.claim
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn evidence(&self) -> &[EvidenceRecord] {
        &self.evidence
    }

    pub fn judgments(&self) -> &[SupportJudgment] {
        &self.judgments
    }

    pub fn drafts(&self) -> &[DraftReply] {
        &self.drafts
    }

    pub fn latest_draft(&self) -> Option<&DraftReply> {
        self.drafts.last()
    }

    /// Verdicts for `revision`, empty if it has not been reviewed.
    pub fn reviews_for(&self, revision: u32) -> &[ReviewVerdict] {
        self.reviews
            .get(revision as usize)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn latest_reviews(&self) -> &[ReviewVerdict] {
        self.reviews.last().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn trace(&self) -> &RunTrace {
        &self.trace
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn terminal(&self) -> Option<&TerminalReason> {
        self.terminal.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Revision number the next draft must carry.
    pub fn next_revision(&self) -> u32 {
        self.drafts.len() as u32
    }

    /// Move to `to`, recording the change in the trace.
    pub fn transition(&mut self, to: RunState) -> Result<(), PipelineError> {
        let from = self.state;
        if !from.can_transition_to(to) {
            return Err(PipelineError::InvalidTransition { from, to });
        }
        self.state = to;
        self.trace.record(TraceKind::Transition { from, to });
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Enter `Finalized`. Every verdict on the latest revision must be accept.
    pub fn finalize(&mut self) -> Result<(), PipelineError> {
        if self.drafts.is_empty() || !self.latest_reviews().iter().all(ReviewVerdict::is_accept) {
            return Err(PipelineError::InvalidTransition {
                from: self.state,
                to: RunState::Finalized,
            });
        }
        self.transition(RunState::Finalized)?;
        self.terminal = Some(TerminalReason::Finalized);
        Ok(())
    }

    /// Enter `Aborted` for `reason`.
    pub fn abort(&mut self, reason: TerminalReason) -> Result<(), PipelineError> {
        self.transition(RunState::Aborted)?;
        self.terminal = Some(reason);
        Ok(())
    }

    pub(crate) fn set_evidence(&mut self, evidence: Vec<EvidenceRecord>) {
        self.evidence = evidence;
    }

    pub(crate) fn set_judgments(&mut self, judgments: Vec<SupportJudgment>) {
        self.judgments = judgments;
    }

    /// Append a draft. Its revision number must be exactly the next one.
    pub fn push_draft(&mut self, draft: DraftReply) -> Result<(), PipelineError> {
        let expected = self.next_revision();
        if draft.revision_number != expected {
            return Err(PipelineError::RevisionGap {
                expected,
                got: draft.revision_number,
            });
        }
        self.drafts.push(draft);
        Ok(())
    }

    /// Record the verdict set for the latest draft.
    pub fn record_reviews(&mut self, verdicts: Vec<ReviewVerdict>) -> Result<(), PipelineError> {
        let expected = self.drafts.len().saturating_sub(1) as u32;
        if self.drafts.is_empty() || self.reviews.len() != self.drafts.len() - 1 {
            return Err(PipelineError::RevisionGap {
                expected: self.reviews.len() as u32,
                got: expected,
            });
        }
        if let Some(stray) = verdicts.iter().find(|v| v.revision_number != expected) {
            return Err(PipelineError::RevisionGap {
                expected,
                got: stray.revision_number,
            });
        }
        self.reviews.push(verdicts);
        Ok(())
    }

    /// Record an absorbed failure as a warning and a trace event.
    pub fn degrade(&mut self, stage: Stage, detail: impl Into<String>) {
        let detail = detail.into();
        warn!(run_id = %self.id, %stage, detail = %detail, "Stage degraded");
        self.warnings.push(format!("{stage}: {detail}"));
        self.trace.record(TraceKind::Degradation { stage, detail });
    }

    pub(crate) fn stage_completed(&mut self, stage: Stage, elapsed: Duration) {
        self.trace.record(TraceKind::StageCompleted {
            stage,
            elapsed_ms: elapsed.as_millis() as u64,
        });
    }

    /// Record that the current stage's work was abandoned.
    pub(crate) fn orphan_current_stage(&mut self) {
        if let Some(stage) = self.state.stage() {
            self.trace.record(TraceKind::Orphaned { stage });
        }
    }

    /// Write `<dir>/<id>.json` atomically and return its path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, FactdeskError> {
        let path = persistence::snapshot_path(dir, &self.id.to_string());
        persistence::write_json_atomic(&path, self)?;
        Ok(path)
    }

    /// Load a saved run; `Ok(None)` if there is no snapshot for `id`.
    pub fn load(dir: &Path, id: Uuid) -> Result<Option<Self>, FactdeskError> {
        let path = persistence::snapshot_path(dir, &id.to_string());
        Ok(persistence::read_json(&path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Classification, Disposition, Perspective};
    use tempfile::TempDir;

    fn draft(revision: u32) -> DraftReply {
        DraftReply {
            classification: Classification::ContainsMisinformation,
            body_text: format!("draft {revision}"),
            cited_evidence: Vec::new(),
            revision_number: revision,
            incorporated_edits: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn verdict(revision: u32, disposition: Disposition) -> ReviewVerdict {
        ReviewVerdict {
            reviewer_id: "reviewer-centrist".into(),
            perspective: Perspective::Centrist,
            revision_number: revision,
            disposition,
            comments: String::new(),
            requested_edits: Vec::new(),
            reviewer_unavailable: false,
        }
    }

    fn run_in_reviewing() -> PipelineRun {
        let mut run = PipelineRun::new(Claim::new("claim"));
        run.transition(RunState::Verifying).unwrap();
        run.transition(RunState::Drafting).unwrap();
        run.push_draft(draft(0)).unwrap();
        run.transition(RunState::Reviewing).unwrap();
        run
    }

    #[test]
    fn test_transition_table() {
        use RunState::*;
        let all = [Researching, Verifying, Drafting, Reviewing, Finalized, Aborted];
        let allowed = [
            (Researching, Verifying),
            (Verifying, Drafting),
            (Drafting, Reviewing),
            (Reviewing, Finalized),
            (Reviewing, Drafting),
            (Researching, Aborted),
            (Verifying, Aborted),
            (Drafting, Aborted),
            (Reviewing, Aborted),
        ];
        for from in all {
            for to in all {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_invalid_transition_rejected_and_untraced() {
        let mut run = PipelineRun::new(Claim::new("c"));
        let err = run.transition(RunState::Finalized).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InvalidTransition {
                from: RunState::Researching,
                to: RunState::Finalized
            }
        ));
        assert_eq!(run.state(), RunState::Researching);
        assert!(run.trace().is_empty());
    }

    #[test]
    fn test_revision_gap_rejected() {
        let mut run = PipelineRun::new(Claim::new("c"));
        assert!(matches!(
            run.push_draft(draft(1)),
            Err(PipelineError::RevisionGap {
                expected: 0,
                got: 1
            })
        ));
        run.push_draft(draft(0)).unwrap();
        assert_eq!(run.next_revision(), 1);
    }

    #[test]
    fn test_finalize_requires_all_accept() {
        let mut run = run_in_reviewing();
        run.record_reviews(vec![
            verdict(0, Disposition::Accept),
            verdict(0, Disposition::Revise),
        ])
        .unwrap();
        assert!(run.finalize().is_err());
        assert_eq!(run.state(), RunState::Reviewing);

        let mut run = run_in_reviewing();
        run.record_reviews(vec![verdict(0, Disposition::Accept)])
            .unwrap();
        run.finalize().unwrap();
        assert_eq!(run.state(), RunState::Finalized);
        assert_eq!(run.terminal(), Some(&TerminalReason::Finalized));
        assert!(run.finished_at().is_some());
    }

    #[test]
    fn test_record_reviews_checks_revision() {
        let mut run = run_in_reviewing();
        assert!(run.record_reviews(vec![verdict(3, Disposition::Accept)]).is_err());
        run.record_reviews(vec![verdict(0, Disposition::Accept)])
            .unwrap();
        // A second verdict set for the same draft is out of sequence.
        assert!(run.record_reviews(vec![]).is_err());
        assert_eq!(run.reviews_for(0).len(), 1);
        assert!(run.reviews_for(1).is_empty());
    }

    #[test]
    fn test_abort_from_any_non_terminal_state() {
        let mut run = PipelineRun::new(Claim::new("c"));
        run.orphan_current_stage();
        run.abort(TerminalReason::WallClockExceeded { budget_secs: 300 })
            .unwrap();
        assert_eq!(run.state(), RunState::Aborted);
        assert!(run.abort(TerminalReason::Finalized).is_err());
        assert_eq!(
            run.terminal().map(ToString::to_string).as_deref(),
            Some("Run exceeded wall-clock budget of 300s")
        );
    }

    #[test]
    fn test_degrade_records_warning_and_trace() {
        let mut run = PipelineRun::new(Claim::new("c"));
        run.degrade(Stage::Research, "source 'cofacts' unavailable");
        assert_eq!(run.warnings(), ["research: source 'cofacts' unavailable"]);
        assert_eq!(run.trace().degradations().count(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut run = run_in_reviewing();
        run.degrade(Stage::Review, "reviewer-progressive unavailable");
        let path = run.save(dir.path()).unwrap();
        assert!(path.ends_with(format!("{}.json", run.id())));

        let loaded = PipelineRun::load(dir.path(), run.id()).unwrap().unwrap();
        assert_eq!(loaded.state(), RunState::Reviewing);
        assert_eq!(loaded.drafts().len(), 1);
        assert_eq!(loaded.trace(), run.trace());
        assert!(PipelineRun::load(dir.path(), Uuid::new_v4()).unwrap().is_none());
    }
}
