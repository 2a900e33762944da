//! Turn model: one submitted prompt awaiting its result record.

use serde::{Deserialize, Serialize};

/// One request/response cycle handed from the feeder to the writer loop.
///
/// Sequence numbers start at 1 and increase by one per accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Turn {
    seq: u64,
    prompt: String,
}

impl Turn {
    /// Construct a turn. Turns are immutable once built.
    #[must_use]
    pub fn new(seq: u64, prompt: impl Into<String>) -> Self {
        Self {
            seq,
            prompt: prompt.into(),
        }
    }

    /// Sequence number assigned at submission.
    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Prompt text exactly as submitted.
    #[must_use]
    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}
