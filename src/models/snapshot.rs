//! Read-only projection of session state for callers.

use serde::Serialize;

use crate::models::state::ProcessState;

/// Point-in-time view of a session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSnapshot {
    /// Identifier issued by the wrapped tool, once the init record arrived.
    pub session_id: Option<String>,
    /// Lifecycle state when the snapshot was taken.
    pub process_state: ProcessState,
    /// Whether the subprocess is still usable.
    pub is_alive: bool,
    /// Turns whose result record has been observed.
    pub completed_turns: u64,
}

impl SessionSnapshot {
    /// Snapshot for a client that has no session yet.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            session_id: None,
            process_state: ProcessState::NotStarted,
            is_alive: false,
            completed_turns: 0,
        }
    }
}
