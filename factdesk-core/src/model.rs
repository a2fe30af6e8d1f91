//! Evidence and reply data model.
//!
//! Every value here is an immutable snapshot once created: stages produce new
//! records rather than editing old ones, and a pipeline run only ever filters,
//! ranks, or appends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A submitted piece of text suspected of containing misinformation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    /// BCP-47 language tag, e.g. "zh-TW".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Cofacts article this claim was reported as, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<String>,
}

impl Claim {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            language: None,
            article_id: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_article(mut self, article_id: impl Into<String>) -> Self {
        self.article_id = Some(article_id.into());
        self
    }
}

/// Which database an evidence record came from.
///
/// Declaration order is the tie-break priority when ranking: internal first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceOrigin {
    /// The crowd-sourced claim database (Cofacts).
    InternalDatabase,
    /// An external fact-check database.
    ExternalDatabase,
}

impl fmt::Display for EvidenceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceOrigin::InternalDatabase => write!(f, "internal_database"),
            EvidenceOrigin::ExternalDatabase => write!(f, "external_database"),
        }
    }
}

/// A normalized reference to a source document relevant to a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    pub id: Uuid,
    pub source_url: String,
    pub summary: String,
    pub origin: EvidenceOrigin,
    pub retrieved_at: DateTime<Utc>,
    /// Publication time reported by the source, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// Source-reported relevance in [0, 1].
    pub relevance_score: f64,
}

impl EvidenceRecord {
    /// The timestamp recency is measured from.
    pub fn dated_at(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.retrieved_at)
    }
}

/// Whether a piece of evidence backs the claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Supports,
    Contradicts,
    Irrelevant,
    Unknown,
}

impl Verdict {
    /// Parse a verifier label leniently; anything unrecognized is `Unknown`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "supports" | "supported" | "support" => Verdict::Supports,
            "contradicts" | "contradicted" | "contradict" | "refutes" => Verdict::Contradicts,
            "irrelevant" | "not_relevant" | "unrelated" => Verdict::Irrelevant,
            _ => Verdict::Unknown,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Supports => write!(f, "supports"),
            Verdict::Contradicts => write!(f, "contradicts"),
            Verdict::Irrelevant => write!(f, "irrelevant"),
            Verdict::Unknown => write!(f, "unknown"),
        }
    }
}

/// A verdict on one evidence record, referenced by id rather than position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportJudgment {
    pub evidence_id: Uuid,
    pub verdict: Verdict,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub rationale: String,
    /// True when this is the fallback produced by a failed verification.
    #[serde(default)]
    pub degraded: bool,
}

impl SupportJudgment {
    pub fn new(
        evidence_id: Uuid,
        verdict: Verdict,
        confidence: f64,
        rationale: impl Into<String>,
    ) -> Self {
        Self {
            evidence_id,
            verdict,
            confidence: clamp_unit(confidence),
            rationale: rationale.into(),
            degraded: false,
        }
    }

    /// The unknown/zero-confidence judgment used when verification fails.
    pub fn degraded(evidence_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            evidence_id,
            verdict: Verdict::Unknown,
            confidence: 0.0,
            rationale: reason.into(),
            degraded: true,
        }
    }
}

/// The reply classification published to the claim database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    ContainsMisinformation,
    ContainsTrueInformation,
    ContainsPersonalPerspective,
    Unclear,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::ContainsMisinformation => write!(f, "contains_misinformation"),
            Classification::ContainsTrueInformation => write!(f, "contains_true_information"),
            Classification::ContainsPersonalPerspective => {
                write!(f, "contains_personal_perspective")
            }
            Classification::Unclear => write!(f, "unclear"),
        }
    }
}

/// A reviewer objection carried into the next draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedEdit {
    pub reviewer_id: String,
    pub perspective: Perspective,
    pub text: String,
}

/// One versioned candidate answer awaiting review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftReply {
    pub classification: Classification,
    pub body_text: String,
    /// Cited records in ranked order.
    pub cited_evidence: Vec<EvidenceRecord>,
    pub revision_number: u32,
    /// Reviewer edits this revision was asked to incorporate.
    #[serde(default)]
    pub incorporated_edits: Vec<RequestedEdit>,
    pub created_at: DateTime<Utc>,
}

/// Reviewer decision on a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Accept,
    Revise,
}

/// An independent evaluation axis applied to a draft.
///
/// The built-in political perspectives can be extended with any named axis.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Perspective {
    Progressive,
    Conservative,
    Centrist,
    Custom(String),
}

impl Perspective {
    pub fn as_str(&self) -> &str {
        match self {
            Perspective::Progressive => "progressive",
            Perspective::Conservative => "conservative",
            Perspective::Centrist => "centrist",
            Perspective::Custom(name) => name,
        }
    }
}

impl From<String> for Perspective {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "progressive" => Perspective::Progressive,
            "conservative" => Perspective::Conservative,
            "centrist" | "moderate" => Perspective::Centrist,
            _ => Perspective::Custom(value.trim().to_string()),
        }
    }
}

impl From<Perspective> for String {
    fn from(value: Perspective) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Perspective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reviewer's verdict on one draft revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub reviewer_id: String,
    pub perspective: Perspective,
    pub revision_number: u32,
    pub disposition: Disposition,
    pub comments: String,
    pub requested_edits: Vec<String>,
    /// Set when the reviewer could not be reached and acceptance was assumed.
    #[serde(default)]
    pub reviewer_unavailable: bool,
}

impl ReviewVerdict {
    pub fn is_accept(&self) -> bool {
        self.disposition == Disposition::Accept
    }
}

pub(crate) fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
