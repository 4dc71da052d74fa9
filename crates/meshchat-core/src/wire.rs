//! Peer-to-peer wire format.
//!
//! Every frame is one UTF-8 JSON object terminated by `\n`. Two kinds exist:
//!
//! ```json
//! {"type":"hello","from":"a","chan":"room"}
//! {"type":"msg","chan":"room","from":"a","text":"hi","ts":1730000000.25}
//! ```
//!
//! `hello` is always the first frame on a dialed link and binds the socket to
//! the sender's peer id on the accepting side. Receivers split the byte stream
//! on `\n` and decode one object at a time; a partial frame stays buffered
//! until the rest of it arrives.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Frame delimiter.
pub const LINE_SEP: u8 = b'\n';

/// Largest unterminated frame a receiver is willing to buffer.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Sender attributed to a `msg` frame that omits `from`.
pub const UNKNOWN_SENDER: &str = "?";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame exceeds {max} bytes without a delimiter ({len} buffered)")]
    FrameTooLong { len: usize, max: usize },
}

impl ProtocolError {
    /// Whether the link that produced this error must be torn down.
    /// A single malformed line is dropped; an unbounded one is not survivable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::FrameTooLong { .. })
    }
}

/// A decoded peer frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Hello {
        from: String,
        #[serde(default)]
        chan: String,
    },
    Msg {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        chan: Option<String>,
        #[serde(default = "unknown_sender")]
        from: String,
        #[serde(default)]
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ts: Option<f64>,
    },
}

fn unknown_sender() -> String {
    UNKNOWN_SENDER.to_string()
}

impl Frame {
    pub fn hello(from: &str, chan: &str) -> Self {
        Frame::Hello {
            from: from.to_string(),
            chan: chan.to_string(),
        }
    }

    pub fn msg(chan: &str, from: &str, text: &str, ts: f64) -> Self {
        Frame::Msg {
            chan: Some(chan.to_string()),
            from: from.to_string(),
            text: text.to_string(),
            ts: Some(ts),
        }
    }

    /// Serialize to a single delimited line.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut raw = serde_json::to_vec(self)?;
        raw.push(LINE_SEP);
        Ok(Bytes::from(raw))
    }

    /// Decode one line (without its delimiter).
    pub fn decode(line: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(line)?)
    }
}

/// Receive-side reassembly buffer for newline-delimited frames.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: BytesMut,
    max_len: usize,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_len(MAX_FRAME_LEN)
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_len,
        }
    }

    /// Raw buffer for socket reads to append into.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    #[cfg(test)]
    fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Bytes received but not yet terminated.
    #[cfg(test)]
    fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete, non-blank line.
    ///
    /// Returns `Ok(None)` when only a partial frame (or nothing) is buffered.
    pub fn next_line(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        loop {
            match self.buf.iter().position(|b| *b == LINE_SEP) {
                Some(pos) => {
                    let mut line = self.buf.split_to(pos + 1).freeze();
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(pos - 1);
                    }
                    if line.iter().all(u8::is_ascii_whitespace) {
                        continue;
                    }
                    return Ok(Some(line));
                }
                None if self.buf.len() > self.max_len => {
                    let len = self.buf.len();
                    self.buf.clear();
                    return Err(ProtocolError::FrameTooLong {
                        len,
                        max: self.max_len,
                    });
                }
                None => return Ok(None),
            }
        }
    }
}
