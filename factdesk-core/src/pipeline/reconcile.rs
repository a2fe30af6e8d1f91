//! Reconciliation policy: classification, citation, and review consensus.
//!
//! Pure functions over immutable snapshots. Contradiction dominates support:
//! one confident contradiction is enough to call a claim misinformation even
//! when other evidence supports it.

use crate::model::{
    Classification, EvidenceRecord, RequestedEdit, ReviewVerdict, SupportJudgment, Verdict,
};
use std::collections::HashMap;
use uuid::Uuid;

/// Minimum confidence for a judgment to decide the classification.
pub const CONFIDENCE_THRESHOLD: f64 = 0.5;

fn by_evidence(judgments: &[SupportJudgment]) -> HashMap<Uuid, &SupportJudgment> {
    judgments.iter().map(|j| (j.evidence_id, j)).collect()
}

/// Classify a claim from its evidence and their judgments.
pub fn classify(evidence: &[EvidenceRecord], judgments: &[SupportJudgment]) -> Classification {
    let confident = |verdict: Verdict| {
        judgments
            .iter()
            .any(|j| j.verdict == verdict && j.confidence >= CONFIDENCE_THRESHOLD)
    };
    if confident(Verdict::Contradicts) {
        Classification::ContainsMisinformation
    } else if confident(Verdict::Supports) {
        Classification::ContainsTrueInformation
    } else if !evidence.is_empty() {
        Classification::ContainsPersonalPerspective
    } else {
        Classification::Unclear
    }
}

/// Records a reply with `classification` cites, in ranked order.
///
/// A record whose judgment is unknown, or that has no judgment, is never cited.
pub fn cite_evidence(
    classification: Classification,
    evidence: &[EvidenceRecord],
    judgments: &[SupportJudgment],
) -> Vec<EvidenceRecord> {
    let judged = by_evidence(judgments);
    let keep = |verdict: Verdict| match classification {
        Classification::ContainsMisinformation | Classification::ContainsTrueInformation => {
            matches!(verdict, Verdict::Supports | Verdict::Contradicts)
        }
        Classification::ContainsPersonalPerspective => verdict != Verdict::Unknown,
        Classification::Unclear => false,
    };
    evidence
        .iter()
        .filter(|record| {
            judged
                .get(&record.id)
                .is_some_and(|judgment| keep(judgment.verdict))
        })
        .cloned()
        .collect()
}

/// The judgments for `cited`, in citation order.
pub fn cited_judgments<'a>(
    cited: &[EvidenceRecord],
    judgments: &'a [SupportJudgment],
) -> Vec<(&'a SupportJudgment, String)> {
    let judged = by_evidence(judgments);
    cited
        .iter()
        .filter_map(|record| judged.get(&record.id).map(|j| (*j, record.source_url.clone())))
        .collect()
}

/// What to do after a revision has been reviewed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewDecision {
    /// Every verdict accepted.
    Finalize,
    /// Draft again, carrying these edits.
    Revise { edits: Vec<RequestedEdit> },
    /// Reviewers still object and no revisions remain.
    Abort { max_revisions: u32 },
}

/// Merge one revision's verdicts into a single decision.
///
/// Edits are collected from every revise verdict in reviewer order, then in
/// the order each reviewer listed them.
pub fn reconcile_reviews(
    revision: u32,
    verdicts: &[ReviewVerdict],
    max_revisions: u32,
) -> ReviewDecision {
    if verdicts.iter().all(ReviewVerdict::is_accept) {
        return ReviewDecision::Finalize;
    }
    if revision >= max_revisions {
        return ReviewDecision::Abort { max_revisions };
    }
    let edits = verdicts
        .iter()
        .filter(|v| !v.is_accept())
        .flat_map(|v| {
            v.requested_edits.iter().map(|text| RequestedEdit {
                reviewer_id: v.reviewer_id.clone(),
                perspective: v.perspective.clone(),
                text: text.clone(),
            })
        })
        .collect();
    ReviewDecision::Revise { edits }
}
