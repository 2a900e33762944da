//! Error types shared across the crate.

use std::fmt::{Display, Formatter};

/// Shared result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering every failure mode of a relay session.
///
/// Every payload is a plain message so errors can be cloned into
/// [`SessionEvent::Failed`](crate::models::event::SessionEvent::Failed) and
/// fanned out to several subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The subprocess could not be spawned (missing or unauthorized executable).
    Spawn(String),
    /// An output line could not be parsed into a record.
    MalformedOutput(String),
    /// The subprocess reported an error record; carries the embedded message.
    Upstream(String),
    /// The subprocess exited while the session still needed it.
    PrematureExit(String),
    /// Cooperative cancellation aborted the operation.
    Cancelled(String),
    /// No session-ready signal arrived within the startup window.
    InitializationTimeout(String),
    /// A query did not complete within its configured window.
    QueryTimeout(String),
    /// A single-use value or slot has already been consumed.
    AlreadyConsumed(String),
    /// The bounded submit queue has no room for another turn.
    QueueFull(String),
    /// The operation is not valid in the current lifecycle state.
    InvalidState(String),
    /// The prompt cannot be encoded for the subprocess.
    InvalidPrompt(String),
    /// File-system or stream I/O failure.
    Io(String),
}

impl AppError {
    /// Whether this error ends the session it was raised in.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Spawn(_)
                | Self::PrematureExit(_)
                | Self::Cancelled(_)
                | Self::InitializationTimeout(_)
                | Self::Io(_)
        )
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn failure: {msg}"),
            Self::MalformedOutput(msg) => write!(f, "malformed output: {msg}"),
            Self::Upstream(msg) => write!(f, "upstream error: {msg}"),
            Self::PrematureExit(msg) => write!(f, "premature exit: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::InitializationTimeout(msg) => write!(f, "initialization timeout: {msg}"),
            Self::QueryTimeout(msg) => write!(f, "query timeout: {msg}"),
            Self::AlreadyConsumed(msg) => write!(f, "already consumed: {msg}"),
            Self::QueueFull(msg) => write!(f, "queue full: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::InvalidPrompt(msg) => write!(f, "invalid prompt: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
