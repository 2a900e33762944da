//! Structured records classified from the subprocess output stream.

use serde::Serialize;
use serde_json::Value;

/// One parsed line of subprocess output.
///
/// Payloads of content and result records are opaque to the relay and are
/// forwarded untouched. Unrecognized `type` values are preserved verbatim.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRecord {
    /// The subprocess announced its session identifier.
    SessionInit {
        /// Identifier issued by the wrapped tool.
        session_id: String,
    },
    /// Conversation content for the caller.
    Content {
        /// The full JSON object as emitted.
        payload: Value,
    },
    /// Authoritative end-of-turn marker with usage/cost metadata.
    TurnResult {
        /// The full JSON object as emitted.
        metadata: Value,
    },
    /// The subprocess reported an error.
    UpstreamError {
        /// Message embedded in the error record.
        message: String,
    },
    /// Valid JSON with a `type` the relay does not recognize.
    Unknown {
        /// The `type` discriminator as emitted.
        record_type: String,
        /// The raw line.
        raw: String,
    },
}

impl OutputRecord {
    /// Short kind label used in logs and transcripts.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionInit { .. } => "session_init",
            Self::Content { .. } => "content",
            Self::TurnResult { .. } => "turn_result",
            Self::UpstreamError { .. } => "upstream_error",
            Self::Unknown { .. } => "unknown",
        }
    }

    /// Whether this record is conversation content.
    #[must_use]
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Content { .. })
    }

    /// Whether this record ends the turn in flight.
    #[must_use]
    pub fn is_turn_result(&self) -> bool {
        matches!(self, Self::TurnResult { .. })
    }
}
