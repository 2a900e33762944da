//! Observers of session events.
//!
//! Logging and transcripts are not baked into the session state machine;
//! they subscribe to its event bus through [`SessionObserver`]. Two
//! implementations ship with the crate:
//!
//! - [`TracingObserver`] logs every event through `tracing`.
//! - [`JsonlTranscriptWriter`] appends every event to a daily-rotating
//!   JSONL file.

pub mod writer;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::event::SessionEvent;
use crate::models::record::OutputRecord;
use crate::models::state::ProcessState;

/// Receives every event published by a session.
///
/// Implementations must be [`Send`] and [`Sync`]; each attached observer is
/// driven from its own task via [`std::sync::Arc`].
pub trait SessionObserver: Send + Sync {
    /// Handle one event from the session labelled `session`.
    ///
    /// # Errors
    ///
    /// Returns an error if the observer cannot record the event. Errors are
    /// logged by the bus and never affect the session.
    fn on_event(&self, session: &str, event: &SessionEvent) -> crate::Result<()>;
}

/// Logs every event at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl SessionObserver for TracingObserver {
    fn on_event(&self, session: &str, event: &SessionEvent) -> crate::Result<()> {
        match event {
            SessionEvent::StateChanged { from, to } => {
                info!(session, %from, %to, "session state changed");
            }
            SessionEvent::RecordObserved { turn, record } => {
                debug!(session, ?turn, kind = record.kind(), "record observed");
            }
            SessionEvent::Failed(err) => {
                warn!(session, error = %err, fatal = err.is_fatal(), "session failed");
            }
            SessionEvent::SessionReady { session_id } => {
                info!(session, session_id = session_id.as_str(), "session ready");
            }
        }
        Ok(())
    }
}

/// One line of a session transcript.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    /// When the entry was written.
    pub timestamp: DateTime<Utc>,
    /// Relay-local session label.
    pub session: String,
    /// Event kind (`state_changed`, `record_observed`, ...).
    pub kind: &'static str,
    /// Turn in flight, for record events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn: Option<u64>,
    /// The observed record, for record events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<OutputRecord>,
    /// Rendered error, for failure events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// New state, for state events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ProcessState>,
    /// Identifier issued by the wrapped tool, for readiness events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TranscriptEntry {
    /// Build the transcript line for `event`.
    #[must_use]
    pub fn from_event(session: &str, event: &SessionEvent) -> Self {
        let mut entry = Self {
            timestamp: Utc::now(),
            session: session.to_owned(),
            kind: event.kind(),
            turn: None,
            record: None,
            error: None,
            state: None,
            session_id: None,
        };
        match event {
            SessionEvent::StateChanged { to, .. } => entry.state = Some(*to),
            SessionEvent::RecordObserved { turn, record } => {
                entry.turn = *turn;
                entry.record = Some(record.clone());
            }
            SessionEvent::Failed(err) => entry.error = Some(err.to_string()),
            SessionEvent::SessionReady { session_id } => {
                entry.session_id = Some(session_id.clone());
            }
        }
        entry
    }
}

pub use writer::JsonlTranscriptWriter;
