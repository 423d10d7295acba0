//! Newline-delimited JSON framing for the backend channel.
//!
//! Outbound messages are encoded as one JSON object followed by `\n`.
//! Inbound bytes are split on `\n` and each line is parsed on its own, so a
//! malformed line only fails itself.
//!
//! The backend's stdout may be delivered at arbitrary byte boundaries, so
//! [`LineDecoder`] keeps a partial trailing line until the rest arrives.

use crate::protocol::Outbound;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Maximum line size (50MB). Longer lines are dropped instead of buffered.
pub const MAX_LINE_SIZE: usize = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A line from the backend that is not valid JSON.
#[derive(Debug, Error)]
#[error("Failed to parse backend message: {source}")]
pub struct DecodeError {
    /// The offending line, lossily converted to UTF-8.
    pub raw: String,
    #[source]
    pub source: serde_json::Error,
}

/// Result of parsing one line.
pub type Decoded = std::result::Result<Value, DecodeError>;

/// Encode a message as a single newline-terminated JSON line.
pub fn encode(message: &Outbound) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode a chunk that is assumed to end on a line boundary.
///
/// Empty segments (including the one after a trailing newline) are skipped.
pub fn decode_chunk(chunk: &[u8]) -> Vec<Decoded> {
    chunk
        .split(|byte| *byte == b'\n')
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &[u8]) -> Decoded {
    serde_json::from_slice(line).map_err(|source| DecodeError {
        raw: String::from_utf8_lossy(line).into_owned(),
        source,
    })
}

/// Incremental decoder that tolerates lines split across deliveries.
#[derive(Debug)]
pub struct LineDecoder {
    /// Bytes of a line whose terminating newline has not arrived yet
    pending: Vec<u8>,
    /// Set while skipping the remainder of an oversized line
    discarding: bool,
    max_line_size: usize,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::with_max_line_size(MAX_LINE_SIZE)
    }

    pub fn with_max_line_size(max_line_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            discarding: false,
            max_line_size,
        }
    }

    /// Feed a chunk of bytes, returning every line completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Decoded> {
        let mut decoded = Vec::new();
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|byte| *byte == b'\n') {
            let line = &rest[..pos];
            rest = &rest[pos + 1..];

            if self.discarding {
                self.discarding = false;
                continue;
            }

            if self.exceeds_limit(self.pending.len() + line.len()) {
                self.pending.clear();
                continue;
            }

            if self.pending.is_empty() {
                if !line.is_empty() {
                    decoded.push(parse_line(line));
                }
            } else {
                self.pending.extend_from_slice(line);
                let line = std::mem::take(&mut self.pending);
                decoded.push(parse_line(&line));
            }
        }

        if !rest.is_empty() && !self.discarding {
            if self.exceeds_limit(self.pending.len() + rest.len()) {
                self.pending.clear();
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        decoded
    }

    fn exceeds_limit(&self, len: usize) -> bool {
        if len > self.max_line_size {
            warn!(
                "Backend line exceeds max size ({} > {}), dropping",
                len, self.max_line_size
            );
            true
        } else {
            false
        }
    }

    /// Flush an unterminated final line, e.g. when the stream hits EOF.
    pub fn finish(&mut self) -> Option<Decoded> {
        self.discarding = false;
        if self.pending.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.pending);
        Some(parse_line(&line))
    }

    /// Whether a partial line is currently buffered.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}
