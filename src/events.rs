//! Monitoring event stream.
//!
//! Every assessment decision is appended to a JSONL event log so downstream
//! dashboards can follow the monitor without sharing its memory. Emitting is
//! fail-open: a log that cannot be written never affects an assessment.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::confidence::Reliability;
use crate::error::Result;
use crate::escalation::Urgency;
use crate::journal::JsonLines;
use crate::safety::Severity;

/// Schema version written with every event.
pub const EVENT_SCHEMA_VERSION: u32 = 1;

/// One monitoring event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MonitorEvent {
    Assessed {
        interaction_id: String,
        category: String,
        confidence: f64,
        reliability: Reliability,
        signals: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_severity: Option<Severity>,
    },
    Corrected {
        interaction_id: String,
        attempts: usize,
        resolved: bool,
        confidence: f64,
    },
    Escalated {
        interaction_id: String,
        urgency: Urgency,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expert_id: Option<String>,
        reason: String,
    },
    Deferred {
        interaction_id: String,
        reason: String,
    },
    Reflected {
        interaction_id: String,
        category: String,
        outcome_score: f64,
        process_score: f64,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        recurring_issues: Vec<String>,
    },
}

impl MonitorEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::Assessed { .. } => "assessed",
            MonitorEvent::Corrected { .. } => "corrected",
            MonitorEvent::Escalated { .. } => "escalated",
            MonitorEvent::Deferred { .. } => "deferred",
            MonitorEvent::Reflected { .. } => "reflected",
        }
    }

    pub fn interaction_id(&self) -> &str {
        match self {
            MonitorEvent::Assessed { interaction_id, .. }
            | MonitorEvent::Corrected { interaction_id, .. }
            | MonitorEvent::Escalated { interaction_id, .. }
            | MonitorEvent::Deferred { interaction_id, .. }
            | MonitorEvent::Reflected { interaction_id, .. } => interaction_id,
        }
    }
}

/// A versioned, timestamped event as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub v: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub event: MonitorEvent,
}

/// Append-only event log.
pub struct EventLog {
    journal: JsonLines<EventRecord>,
}

impl EventLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            journal: JsonLines::new(path),
        }
    }

    /// Append an event, logging instead of failing.
    pub fn emit(&self, event: MonitorEvent) {
        let name = event.name();
        let record = EventRecord {
            v: EVENT_SCHEMA_VERSION,
            ts: Utc::now(),
            event,
        };
        if let Err(e) = self.journal.append(&record) {
            tracing::warn!("failed to write {} event: {}", name, e);
        }
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<EventRecord>> {
        self.journal.read_tail(limit)
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("path", &self.journal.path())
            .finish()
    }
}
