//! Input encoding and the writer loop.
//!
//! The writer drains the turn stream into the subprocess's stdin, one
//! newline-terminated line per turn, and parks between turns until the
//! session state says the previous turn completed. Stdin stays open across
//! turns; it is shut down only when the loop exits.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::feeder::TurnStream;
use crate::models::state::ProcessState;
use crate::process::session::SessionShared;
use crate::{AppError, Result};

/// How a prompt is serialized onto the input stream.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InputFormat {
    /// The prompt itself. Must not contain line breaks.
    #[default]
    Text,
    /// A stream-json user message:
    /// `{"type":"user","message":{"role":"user","content":"…"}}`.
    Json,
}

impl InputFormat {
    /// Encode `prompt` as one newline-terminated line.
    ///
    /// # Errors
    ///
    /// - [`AppError::InvalidPrompt`] if the prompt is blank, or contains a
    ///   line break in [`InputFormat::Text`].
    pub fn encode(self, prompt: &str) -> Result<Vec<u8>> {
        if prompt.trim().is_empty() {
            return Err(AppError::InvalidPrompt("prompt must not be empty".into()));
        }
        let mut bytes = match self {
            Self::Text => {
                if prompt.contains(['\n', '\r']) {
                    return Err(AppError::InvalidPrompt(
                        "text input cannot carry line breaks; use the json input format".into(),
                    ));
                }
                prompt.as_bytes().to_vec()
            }
            Self::Json => {
                let msg = json!({
                    "type": "user",
                    "message": { "role": "user", "content": prompt }
                });
                serde_json::to_vec(&msg).map_err(|e| {
                    AppError::InvalidPrompt(format!("failed to serialise prompt: {e}"))
                })?
            }
        };
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Why the writer loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriterExit {
    /// The turn stream ended (feeder terminated).
    StreamEnded,
    /// The cancellation token fired.
    Cancelled,
    /// The session left the turn cycle (terminating, terminated, or failed).
    SessionClosed,
    /// Writing to stdin failed.
    Failed(AppError),
}

/// Writer loop: for each turn, enter `Processing`, write the line, then wait
/// for `Paused`/`Ready` before pulling the next turn.
///
/// `Processing` is entered before the write so a fast result record can
/// never arrive ahead of the transition it completes.
pub(crate) async fn run_writer<W>(
    shared: Arc<SessionShared>,
    mut stdin: W,
    mut turns: TurnStream,
    format: InputFormat,
    cancel: CancellationToken,
) -> WriterExit
where
    W: AsyncWrite + Unpin + Send,
{
    let session = shared.id().to_owned();
    let mut state_rx = shared.watch_state();

    let exit = loop {
        let turn = tokio::select! {
            biased;

            () = cancel.cancelled() => break WriterExit::Cancelled,
            turn = turns.next() => match turn {
                Some(turn) => turn,
                None => break WriterExit::StreamEnded,
            },
        };

        let bytes = match format.encode(turn.prompt()) {
            Ok(bytes) => bytes,
            Err(err) => {
                // The turn is skipped; the session keeps running.
                shared.reject_turn(turn.seq(), err);
                continue;
            }
        };

        if !shared.begin_turn(turn.seq()) {
            debug!(session, turn = turn.seq(), "writer: session no longer accepts turns");
            break WriterExit::SessionClosed;
        }

        let written = async {
            stdin.write_all(&bytes).await?;
            stdin.flush().await
        };
        if let Err(err) = written.await {
            warn!(session, turn = turn.seq(), error = %err, "writer: write to stdin failed");
            break WriterExit::Failed(AppError::Io(format!("write failed: {err}")));
        }
        debug!(session, turn = turn.seq(), bytes = bytes.len(), "writer: turn written");

        let settled = tokio::select! {
            biased;

            () = cancel.cancelled() => break WriterExit::Cancelled,
            settled = state_rx.wait_for(|s| !matches!(s, ProcessState::Processing)) => {
                settled.map(|s| *s)
            }
        };
        match settled {
            Ok(ProcessState::Paused | ProcessState::Ready) => {}
            Ok(_) | Err(_) => break WriterExit::SessionClosed,
        }
    };

    if let Err(err) = stdin.shutdown().await {
        debug!(session, error = %err, "writer: stdin shutdown failed");
    }
    debug!(session, ?exit, "writer: stopped, stdin closed");
    exit
}
