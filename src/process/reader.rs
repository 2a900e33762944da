//! Output classification and the reader loop.
//!
//! Each non-empty stdout line must be a JSON object with a `type`
//! discriminator. Recognized shapes:
//!
//! | `type`                                 | Record                          |
//! |----------------------------------------|---------------------------------|
//! | `init`, or `system` + `subtype: init`  | [`OutputRecord::SessionInit`]   |
//! | `content`, `assistant`, `user`, `stream_event` | [`OutputRecord::Content`] |
//! | `result`                               | [`OutputRecord::TurnResult`]    |
//! | `error`                                | [`OutputRecord::UpstreamError`] |
//! | *(any other)*                          | [`OutputRecord::Unknown`]       |
//!
//! Lines that are not JSON objects, lack `type`, or are init records without
//! a session identifier are [`AppError::MalformedOutput`]; the reader logs
//! and skips them.

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::record::OutputRecord;
use crate::process::codec::LineCodec;
use crate::{AppError, Result};

/// Why the reader loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderExit {
    /// The output stream reached EOF.
    Eof,
    /// The cancellation token fired.
    Cancelled,
    /// The output stream failed.
    Failed(AppError),
}

/// Parse one output line.
///
/// Returns `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns [`AppError::MalformedOutput`] if the line is not a JSON object
/// with a string `type`, or is an init record without a session identifier.
pub fn parse_output_line(line: &str) -> Result<Option<OutputRecord>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let value: Value = serde_json::from_str(trimmed)
        .map_err(|e| AppError::MalformedOutput(format!("malformed json: {e}")))?;
    let Some(object) = value.as_object() else {
        return Err(AppError::MalformedOutput("expected a json object".into()));
    };
    let Some(record_type) = object.get("type").and_then(Value::as_str) else {
        return Err(AppError::MalformedOutput("missing 'type' field".into()));
    };

    let record = match record_type {
        "init" => init_record(&value)?,
        "system" if object.get("subtype").and_then(Value::as_str) == Some("init") => {
            init_record(&value)?
        }
        "content" | "assistant" | "user" | "stream_event" => {
            OutputRecord::Content { payload: value }
        }
        "result" => OutputRecord::TurnResult { metadata: value },
        "error" => OutputRecord::UpstreamError {
            message: error_message(&value),
        },
        other => OutputRecord::Unknown {
            record_type: other.to_owned(),
            raw: trimmed.to_owned(),
        },
    };
    Ok(Some(record))
}

/// Read `stdout` line by line until EOF, cancellation, or a stream error,
/// handing each parsed record to `on_record`.
///
/// Malformed and oversized lines are logged and skipped. Cancellation is
/// checked between lines, so a line already decoded is always delivered.
pub async fn run_reader<R, F>(
    session: String,
    stdout: R,
    cancel: CancellationToken,
    mut on_record: F,
) -> ReaderExit
where
    R: AsyncRead + Unpin + Send,
    F: FnMut(OutputRecord) + Send,
{
    let mut framed = FramedRead::new(stdout, LineCodec::new());

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(session, "reader: cancellation received, stopping");
                return ReaderExit::Cancelled;
            }

            item = framed.next() => match item {
                None => {
                    debug!(session, "reader: EOF");
                    return ReaderExit::Eof;
                }
                Some(Err(AppError::MalformedOutput(msg))) => {
                    warn!(session, error = msg.as_str(), "reader: framing error, skipping");
                }
                Some(Err(err)) => {
                    warn!(session, error = %err, "reader: stream error, stopping");
                    return ReaderExit::Failed(err);
                }
                Some(Ok(line)) => match parse_output_line(&line) {
                    Ok(Some(record)) => on_record(record),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(session, error = %err, raw_line = %line, "reader: parse error, skipping line");
                    }
                },
            }
        }
    }
}

fn init_record(value: &Value) -> Result<OutputRecord> {
    find_session_id(value)
        .map(|session_id| OutputRecord::SessionInit { session_id })
        .ok_or_else(|| AppError::MalformedOutput("init record without session id".into()))
}

/// Look for the session id at the top level, then under `session` / `data`.
fn find_session_id(value: &Value) -> Option<String> {
    let direct = |v: &Value| {
        ["session_id", "sessionId"]
            .iter()
            .find_map(|key| v.get(*key).and_then(Value::as_str))
            .map(str::to_owned)
    };

    direct(value).or_else(|| {
        ["session", "data"].iter().find_map(|key| {
            let nested = value.get(*key)?;
            direct(nested).or_else(|| nested.get("id").and_then(Value::as_str).map(str::to_owned))
        })
    })
}

fn error_message(value: &Value) -> String {
    if let Some(msg) = value.get("message").and_then(Value::as_str) {
        return msg.to_owned();
    }
    match value.get("error") {
        Some(Value::String(msg)) => msg.clone(),
        Some(err) => err
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| err.to_string(), str::to_owned),
        None => "upstream reported an error without a message".to_owned(),
    }
}
