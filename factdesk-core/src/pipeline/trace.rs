//! Append-only run trace.
//!
//! Every state change, stage completion, and degradation in a run is
//! recorded as a numbered event. Events are never edited or removed.

use super::run::RunState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unit of pipeline work that can complete, degrade, or be orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Research,
    Verification,
    Drafting,
    Review,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Research => write!(f, "research"),
            Stage::Verification => write!(f, "verification"),
            Stage::Drafting => write!(f, "drafting"),
            Stage::Review => write!(f, "review"),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    Transition { from: RunState, to: RunState },
    StageCompleted { stage: Stage, elapsed_ms: u64 },
    /// A failure absorbed with a safe default.
    Degradation { stage: Stage, detail: String },
    /// Work still in flight when the run's wall-clock budget ran out.
    Orphaned { stage: Stage },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: TraceKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunTrace {
    events: Vec<TraceEvent>,
}

impl RunTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event and return its sequence number.
    pub fn record(&mut self, kind: TraceKind) -> u64 {
        let seq = self.events.len() as u64;
        self.events.push(TraceEvent {
            seq,
            at: Utc::now(),
            kind,
        });
        seq
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn degradations(&self) -> impl Iterator<Item = (Stage, &str)> {
        self.events.iter().filter_map(|e| match &e.kind {
            TraceKind::Degradation { stage, detail } => Some((*stage, detail.as_str())),
            _ => None,
        })
    }

    /// States entered, in order.
    pub fn states_entered(&self) -> Vec<RunState> {
        self.events
            .iter()
            .filter_map(|e| match e.kind {
                TraceKind::Transition { to, .. } => Some(to),
                _ => None,
            })
            .collect()
    }
}
