//! Evaluation outcomes and the per-event trace.
//!
//! Every term in a compiled expression returns an `Outcome`. The evaluator
//! appends one `TraceEntry` per term to the event's `Trace`, so a processed
//! event always carries an audit trail of which operator ran and why it
//! failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Event;

/// The tagged result of a single operator over a single event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// One recorded operator evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    /// Name of the expression that produced the outcome.
    pub expression: String,
    pub success: bool,
    pub message: String,
}

/// Ordered list of every operator outcome for one event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    entries: Vec<TraceEntry>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the outcome of expression `name`.
    pub fn record(&mut self, name: &str, outcome: &Outcome) {
        self.entries.push(TraceEntry {
            expression: name.to_string(),
            success: outcome.success,
            message: outcome.message.clone(),
        });
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }

    pub fn failures(&self) -> impl Iterator<Item = &TraceEntry> {
        self.entries.iter().filter(|e| !e.success)
    }

    /// True if any entry's message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.iter().any(|e| e.message.contains(needle))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// An event after evaluation against an environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Name of the environment that evaluated the event.
    pub environment: String,
    /// The decoded / enriched event.
    pub event: Event,
    /// Result of the environment's root expression. The root chains every
    /// graph, so this is `true` once evaluation ran; whether a decoder or
    /// rule matched is read from `trace`.
    pub success: bool,
    pub trace: Trace,
    /// Wall-clock time (UTC) evaluation finished.
    pub processed_at: DateTime<Utc>,
}
