//! Newline-delimited text codec
//!
//! Inbound framing is [`LinesCodec`]: a line ends at `\n`, a trailing `\r`
//! is stripped and a final unterminated line at end of stream is still
//! yielded. Outbound: each item is written followed by a single `\n`.

use std::io;

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

/// Default maximum inbound line length (64 KiB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Line codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Line too long (max {max} bytes)")]
    LineTooLong { max: usize },

    #[error("Line is not valid UTF-8")]
    InvalidUtf8,
}

/// Codec for newline-delimited UTF-8 lines
#[derive(Debug, Clone)]
pub struct LineCodec {
    inner: LinesCodec,
    max_length: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::with_max_length(DEFAULT_MAX_LINE_LENGTH)
    }

    /// Create a codec rejecting inbound lines longer than `max_length` bytes
    ///
    /// The limit excludes the line terminator.
    pub fn with_max_length(max_length: usize) -> Self {
        // One spare byte so a `\r` before the newline does not count
        Self {
            inner: LinesCodec::new_with_max_length(max_length.saturating_add(1)),
            max_length,
        }
    }

    fn check(&self, line: Option<String>) -> Result<Option<String>, CodecError> {
        match line {
            Some(line) if line.len() > self.max_length => Err(CodecError::LineTooLong {
                max: self.max_length,
            }),
            other => Ok(other),
        }
    }

    fn map_err(&self, err: LinesCodecError) -> CodecError {
        match err {
            LinesCodecError::MaxLineLengthExceeded => CodecError::LineTooLong {
                max: self.max_length,
            },
            LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => {
                CodecError::InvalidUtf8
            }
            LinesCodecError::Io(e) => CodecError::Io(e),
        }
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode(src).map_err(|e| self.map_err(e))?;
        self.check(line)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let line = self.inner.decode_eof(src).map_err(|e| self.map_err(e))?;
        self.check(line)
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(item.len() + 1);
        dst.put_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
