//! Line framing for the LineHub wire protocol.
//!
//! Wire format:
//! ```text
//! [payload bytes][0x0D 0x0A]
//! ```
//! Payloads are plain UTF-8 text; the CRLF pair terminates one logical
//! message.  There is no length prefix and no escaping.
//!
//! TCP is a *stream* protocol: a single `read()` call may return less than
//! one complete frame, or several frames at once.  [`FrameBuffer`]
//! accumulates bytes across reads and yields complete frames in order,
//! retaining any trailing partial frame (including a delimiter split across
//! two reads) for the next round.

use thiserror::Error;

/// The fixed 2-byte sequence marking the end of one logical message.
pub const DELIMITER: &[u8; 2] = b"\r\n";

/// Errors that can occur when decoding a received frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The frame payload is not valid UTF-8.
    #[error("frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Encodes a message payload into its on-wire form.
///
/// The delimiter is appended verbatim; a payload that itself contains the
/// delimiter will be split into two frames by the receiver.  That is a
/// limitation of the wire format, not something this function rejects.
pub fn encode(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() + DELIMITER.len());
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(DELIMITER);
    buf
}

/// Decodes the raw bytes of one frame into text.
///
/// # Errors
///
/// Returns [`FrameError::InvalidUtf8`] if the payload is not UTF-8.
pub fn decode(frame: Vec<u8>) -> Result<String, FrameError> {
    Ok(String::from_utf8(frame)?)
}

/// Streaming reassembly buffer for delimiter-framed messages.
///
/// Feed raw socket bytes in with [`extend`](Self::extend), then drain every
/// complete frame with [`pop_frame`](Self::pop_frame) before reading again.
/// The buffer remembers how far it has already scanned, so bytes that were
/// checked once are not checked again on the next push.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    // Index below which no delimiter can start; everything before it was
    // scanned by an earlier pop_frame call that found nothing.
    scanned: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends newly received bytes to the buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Removes and returns the next complete frame, without its delimiter.
    ///
    /// Returns `None` when no complete frame is buffered; the partial
    /// remainder stays in place for the next [`extend`](Self::extend).
    pub fn pop_frame(&mut self) -> Option<Vec<u8>> {
        match find_delimiter(&self.buf, self.scanned) {
            Some(idx) => {
                let frame = self.buf[..idx].to_vec();
                self.buf.drain(..idx + DELIMITER.len());
                self.scanned = 0;
                Some(frame)
            }
            None => {
                // The final byte may be the first half of a split delimiter.
                self.scanned = self.buf.len().saturating_sub(1);
                None
            }
        }
    }

    /// Number of buffered bytes that do not yet form a complete frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find_delimiter(buf: &[u8], from: usize) -> Option<usize> {
    if buf.len() < DELIMITER.len() {
        return None;
    }
    let from = from.min(buf.len() - 1);
    buf[from..]
        .windows(DELIMITER.len())
        .position(|w| w == DELIMITER)
        .map(|pos| pos + from)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
