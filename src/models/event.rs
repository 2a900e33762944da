//! Events published on a session's event bus.

use crate::models::record::OutputRecord;
use crate::models::state::ProcessState;
use crate::AppError;

/// Everything observers and the client learn about a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The lifecycle state moved.
    StateChanged {
        /// State before the transition.
        from: ProcessState,
        /// State after the transition.
        to: ProcessState,
    },
    /// A record was parsed from the output stream.
    RecordObserved {
        /// Sequence of the turn in flight when the record arrived, if any.
        turn: Option<u64>,
        /// The classified record.
        record: OutputRecord,
    },
    /// A loop-internal or upstream failure.
    Failed(AppError),
    /// The init record arrived and the session identifier is known.
    SessionReady {
        /// Identifier issued by the wrapped tool.
        session_id: String,
    },
}

impl SessionEvent {
    /// Short kind label used in logs and transcripts.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::RecordObserved { .. } => "record_observed",
            Self::Failed(_) => "failed",
            Self::SessionReady { .. } => "session_ready",
        }
    }
}
