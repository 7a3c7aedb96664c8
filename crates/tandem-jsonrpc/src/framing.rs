//! `Content-Length` framing of message payloads.
//!
//! A frame is a block of `Name: value` header lines terminated by an empty
//! line (`\r\n\r\n`), followed by exactly `Content-Length` bytes of body.
//!
//! Framing problems are yielded as items rather than stream errors, so a
//! [`tokio_util::codec::FramedRead`] keeps reading after a bad frame. Only
//! I/O failures end the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// A frame that could not be delimited or was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    #[error("Missing Content-Length header")]
    MissingContentLength,

    #[error("Invalid Content-Length header: {0:?}")]
    InvalidContentLength(String),

    #[error("Malformed header line: {0:?}")]
    MalformedHeader(String),

    #[error("Header block exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("Frame of {length} bytes exceeds the limit of {limit} bytes")]
    FrameTooLarge { length: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    Header,
    Body(usize),
    /// Discarding the body of an oversized frame
    Skip(usize),
}

/// Codec for `Content-Length` delimited frames.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    state: DecodeState,
    max_content_length: usize,
    max_header_bytes: usize,
    content_type: Option<String>,
}

impl FrameCodec {
    /// `max_header_bytes` is raised to at least the terminator length.
    pub fn new(max_content_length: usize, max_header_bytes: usize) -> Self {
        Self {
            state: DecodeState::Header,
            max_content_length,
            max_header_bytes: max_header_bytes.max(HEADER_TERMINATOR.len()),
            content_type: None,
        }
    }

    /// Emit a `Content-Type` header on every encoded frame.
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    fn parse_headers(&self, block: &[u8]) -> Result<usize, FramingError> {
        let text = String::from_utf8_lossy(block);
        let mut content_length = None;

        for line in text.split("\r\n").filter(|line| !line.is_empty()) {
            let Some((name, value)) = line.split_once(':') else {
                return Err(FramingError::MalformedHeader(line.to_string()));
            };
            let value = value.trim();
            match name.trim() {
                CONTENT_LENGTH => {
                    let length = value
                        .parse::<usize>()
                        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?;
                    content_length = Some(length);
                }
                CONTENT_TYPE => trace!(content_type = value, "Ignoring Content-Type header"),
                other => trace!(header = other, "Ignoring unknown header"),
            }
        }

        content_length.ok_or(FramingError::MissingContentLength)
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_MAX_CONTENT_LENGTH,
            crate::config::DEFAULT_MAX_HEADER_BYTES,
        )
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Bytes, FramingError>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Header => {
                    let Some(end) = src
                        .windows(HEADER_TERMINATOR.len())
                        .position(|window| window == HEADER_TERMINATOR)
                    else {
                        if src.len() > self.max_header_bytes {
                            // Keep the tail in case it holds the start of a terminator.
                            let keep = HEADER_TERMINATOR.len() - 1;
                            src.advance(src.len().saturating_sub(keep));
                            return Ok(Some(Err(FramingError::HeaderTooLarge {
                                limit: self.max_header_bytes,
                            })));
                        }
                        return Ok(None);
                    };

                    let block = src.split_to(end + HEADER_TERMINATOR.len());
                    let length = match self.parse_headers(&block[..end]) {
                        Ok(length) => length,
                        Err(error) => return Ok(Some(Err(error))),
                    };

                    if length > self.max_content_length {
                        debug!(length, limit = self.max_content_length, "Skipping oversized frame");
                        self.state = DecodeState::Skip(length);
                        return Ok(Some(Err(FramingError::FrameTooLarge {
                            length,
                            limit: self.max_content_length,
                        })));
                    }
                    self.state = DecodeState::Body(length);
                }
                DecodeState::Body(length) => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                    return Ok(Some(Ok(src.split_to(length).freeze())));
                }
                DecodeState::Skip(remaining) => {
                    let skipped = remaining.min(src.len());
                    src.advance(skipped);
                    if skipped < remaining {
                        self.state = DecodeState::Skip(remaining - skipped);
                        return Ok(None);
                    }
                    self.state = DecodeState::Header;
                }
            }
        }
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, body: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut header = format!("{}: {}\r\n", CONTENT_LENGTH, body.len());
        if let Some(content_type) = &self.content_type {
            header.push_str(&format!("{}: {}\r\n", CONTENT_TYPE, content_type));
        }
        header.push_str("\r\n");

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
