//! NDJSON framing for the stdio transport.
//!
//! Wraps [`tokio_util::codec::LinesCodec`] with a maximum line length so a
//! peer cannot make the server buffer an unbounded message. Unlike the bare
//! lines codec, oversized and non-UTF-8 lines are discarded with a warning
//! and decoding carries on with the next line; a single bad line never ends
//! the stream.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};
use tracing::warn;

use crate::{AppError, Result};

/// Default maximum inbound line length: 1 MiB.
pub const MAX_LINE_BYTES: usize = 1_048_576;

/// Newline-delimited JSON codec.
///
/// Each `\n`-terminated UTF-8 line is one frame; a trailing `\r` is
/// stripped. Encoding appends `\n` and does not enforce the length limit.
#[derive(Debug)]
pub struct NdjsonCodec {
    inner: LinesCodec,
    max_line_bytes: usize,
}

impl NdjsonCodec {
    /// Codec with the default [`MAX_LINE_BYTES`] limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_line_bytes(MAX_LINE_BYTES)
    }

    /// Codec accepting lines up to `max_line_bytes`.
    #[must_use]
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            inner: LinesCodec::new_with_max_length(max_line_bytes),
            max_line_bytes,
        }
    }
}

impl Default for NdjsonCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NdjsonCodec {
    type Item = String;
    type Error = AppError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode(src) {
                Ok(line) => return Ok(line),
                Err(err) => self.skip_or_fail(err)?,
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        loop {
            match self.inner.decode_eof(src) {
                Ok(line) => return Ok(line),
                Err(err) => self.skip_or_fail(err)?,
            }
        }
    }
}

impl Encoder<String> for NdjsonCodec {
    type Error = AppError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<()> {
        self.inner.encode(item, dst).map_err(map_codec_error)
    }
}

impl NdjsonCodec {
    /// `Ok(())` when the offending line has been (or is being) discarded.
    fn skip_or_fail(&self, err: LinesCodecError) -> Result<()> {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                warn!(max_line_bytes = self.max_line_bytes, "discarding oversized line");
                Ok(())
            }
            LinesCodecError::Io(io_err) if io_err.kind() == std::io::ErrorKind::InvalidData => {
                warn!(%io_err, "discarding line that is not valid UTF-8");
                Ok(())
            }
            other => Err(map_codec_error(other)),
        }
    }
}

// ── Private helper ────────────────────────────────────────────────────────────

fn map_codec_error(e: LinesCodecError) -> AppError {
    match e {
        LinesCodecError::MaxLineLengthExceeded => {
            AppError::Protocol("line too long".into())
        }
        LinesCodecError::Io(io_err) => AppError::Io(io_err.to_string()),
    }
}
