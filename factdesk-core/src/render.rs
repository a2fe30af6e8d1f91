//! Final reply rendering and the submission payload.

use crate::evidence::{SUMMARY_MAX_CHARS, one_line};
use crate::model::{Classification, DraftReply};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reply type accepted by the claim database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyType {
    Rumor,
    NotRumor,
    Opinionated,
}

impl ReplyType {
    /// Unclear replies have no reply type and are never submitted.
    pub fn from_classification(classification: Classification) -> Option<Self> {
        match classification {
            Classification::ContainsMisinformation => Some(ReplyType::Rumor),
            Classification::ContainsTrueInformation => Some(ReplyType::NotRumor),
            Classification::ContainsPersonalPerspective => Some(ReplyType::Opinionated),
            Classification::Unclear => None,
        }
    }

    /// The Cofacts `ReplyTypeEnum` value.
    pub fn as_cofacts(self) -> &'static str {
        match self {
            ReplyType::Rumor => "RUMOR",
            ReplyType::NotRumor => "NOT_RUMOR",
            ReplyType::Opinionated => "OPINIONATED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionReference {
    pub url: String,
    pub summary: String,
}

/// An authenticated reply submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplySubmission {
    pub article_id: String,
    pub reply_type: ReplyType,
    pub text: String,
    pub references: Vec<SubmissionReference>,
}

impl ReplySubmission {
    /// References as `URL - summary` lines.
    pub fn reference_text(&self) -> String {
        self.references
            .iter()
            .map(|r| format!("{} - {}", r.url, r.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A finalized draft in its published layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedReply {
    pub classification: Classification,
    pub text: String,
    pub references: Vec<SubmissionReference>,
    /// The full rendered layout.
    pub rendered: String,
}

impl RenderedReply {
    pub fn from_draft(draft: &DraftReply) -> Self {
        let text = draft.body_text.trim().to_string();
        let references: Vec<SubmissionReference> = draft
            .cited_evidence
            .iter()
            .map(|record| SubmissionReference {
                url: record.source_url.clone(),
                summary: one_line(&record.summary, SUMMARY_MAX_CHARS),
            })
            .collect();
        let rendered = layout(draft.classification, &text, &references);
        Self {
            classification: draft.classification,
            text,
            references,
            rendered,
        }
    }

    pub fn is_submittable(&self) -> bool {
        ReplyType::from_classification(self.classification).is_some()
    }

    /// The submission for `article_id`, or `None` for an unclear reply.
    pub fn to_submission(&self, article_id: &str) -> Option<ReplySubmission> {
        Some(ReplySubmission {
            article_id: article_id.to_string(),
            reply_type: ReplyType::from_classification(self.classification)?,
            text: self.text.clone(),
            references: self.references.clone(),
        })
    }
}

impl fmt::Display for RenderedReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

fn layout(classification: Classification, text: &str, references: &[SubmissionReference]) -> String {
    let heading = match classification {
        Classification::Unclear => return text.to_string(),
        Classification::ContainsPersonalPerspective => "Opinion Sources:",
        Classification::ContainsMisinformation | Classification::ContainsTrueInformation => {
            "References:"
        }
    };
    let mut out = format!("Text: {text}");
    if references.is_empty() && classification == Classification::ContainsPersonalPerspective {
        return out;
    }
    out.push('\n');
    out.push_str(heading);
    for reference in references {
        out.push_str(&format!("\n- {} - {}", reference.url, reference.summary));
    }
    out
}
