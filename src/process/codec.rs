//! NDJSON line codec for subprocess streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so an
//! unterminated or oversized line from a misbehaving subprocess cannot grow
//! the read buffer without bound.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Maximum accepted output line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited UTF-8 codec with a [`MAX_LINE_BYTES`] decode limit.
///
/// Oversized inbound lines are discarded up to their newline and decoding
/// resumes with the next line, so one bad line never ends the stream.
/// Oversized outbound lines map to [`AppError::MalformedOutput`]; I/O errors
/// map to [`AppError::Io`].
#[derive(Debug)]
pub struct LineCodec(LinesCodec);

impl LineCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_length(MAX_LINE_BYTES)
    }

    /// Codec with a custom decode limit.
    #[must_use]
    pub fn with_max_length(max: usize) -> Self {
        Self(LinesCodec::new_with_max_length(max))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode(src) {
                // The inner codec is now discarding up to the next newline;
                // decoding again resumes with the following line.
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = self.0.max_length(), "codec: oversized line discarded");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.0.decode_eof(src) {
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(limit = self.0.max_length(), "codec: oversized line discarded");
                }
                other => return other.map_err(map_codec_error),
            }
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.0.encode(item, dst).map_err(map_codec_error)
    }
}

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::MalformedOutput("line too long: exceeded decode limit".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
