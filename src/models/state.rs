//! Process lifecycle state and its permitted transitions.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a [`ProcessSession`](crate::process::session::ProcessSession).
///
/// The machine only moves forward, except for the
/// `Ready | Paused -> Processing -> Paused` turn cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessState {
    /// Session constructed, nothing spawned yet.
    NotStarted,
    /// Subprocess spawned; waiting for its init record.
    Initializing,
    /// Init record observed; no turn has been submitted yet.
    Ready,
    /// A turn has been written and its result record is pending.
    Processing,
    /// The last turn completed; waiting for the next submission.
    Paused,
    /// `terminate()` is closing the subprocess down.
    Terminating,
    /// The subprocess exited after termination or a clean idle exit.
    Terminated,
    /// Unrecoverable failure. Terminal.
    Error,
}

impl ProcessState {
    /// Whether a lifecycle transition from `self` to `next` is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ProcessState::{
            Error, Initializing, NotStarted, Paused, Processing, Ready, Terminated, Terminating,
        };
        matches!(
            (self, next),
            (NotStarted, Initializing)
                | (Initializing, Ready)
                // A seed turn may be written before the init record arrives.
                | (Initializing | Ready | Paused, Processing)
                | (Processing, Paused)
                | (Initializing | Ready | Processing | Paused, Terminating)
                | (Ready | Paused | Terminating, Terminated)
                | (NotStarted | Initializing | Ready | Processing | Paused, Error)
        )
    }

    /// Whether the subprocess is (still) usable for turns.
    #[must_use]
    pub fn is_alive(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::Ready | Self::Processing | Self::Paused
        )
    }

    /// Whether the state is terminal or on its way there.
    #[must_use]
    pub fn is_closing(self) -> bool {
        matches!(self, Self::Terminating | Self::Terminated | Self::Error)
    }

    /// Whether the writer may hand the subprocess another turn.
    #[must_use]
    pub fn accepts_turn(self) -> bool {
        matches!(self, Self::Initializing | Self::Ready | Self::Paused)
    }
}

impl Display for ProcessState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotStarted => "not_started",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Paused => "paused",
            Self::Terminating => "terminating",
            Self::Terminated => "terminated",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}
