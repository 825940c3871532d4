//! Stream framing.
//!
//! A TCP read can end anywhere, so inbound bytes accumulate in a
//! [`FrameDecoder`] until a whole frame is present:
//!
//! ```text
//! +--------+--------+------+-----------------+
//! | len_hi | len_lo | kind | body (len - 1)  |
//! +--------+--------+------+-----------------+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::{codec, Command, DecodeError};
use crate::error::CommandError;

/// Size of the big-endian length prefix.
pub const FRAME_HEADER_LEN: usize = 2;

/// Largest frame (kind + body) accepted by default.
pub const DEFAULT_MAX_FRAME_LEN: usize = 4096;

/// Encode a wire command into one length-prefixed frame.
pub fn encode_frame(command: &Command) -> Result<Bytes, CommandError> {
    let payload = codec::encode(command)?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    // kind + largest legal body stays far below u16::MAX
    frame.put_u16(payload.len() as u16);
    frame.put_slice(&payload);
    Ok(frame.freeze())
}

/// Incremental frame splitter for one inbound stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_len: usize,
    /// Body bytes of a rejected oversized frame still to be dropped
    skip: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameDecoder {
    /// Create a decoder rejecting frames longer than `max_frame_len`.
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            max_frame_len,
            skip: 0,
        }
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, data: &[u8]) {
        let skipped = self.skip.min(data.len());
        self.skip -= skipped;
        self.buf.extend_from_slice(&data[skipped..]);
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame.
    ///
    /// Returns `None` until a whole frame is buffered. A frame that fails to
    /// decode is consumed and reported, so the caller can keep going. An
    /// oversized frame is reported once and its body is dropped as it
    /// arrives, without being buffered.
    pub fn next_command(&mut self) -> Option<Result<Command, DecodeError>> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return None;
        }

        let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
        if len == 0 {
            self.buf.advance(FRAME_HEADER_LEN);
            return Some(Err(DecodeError::EmptyFrame));
        }
        if len > self.max_frame_len {
            self.buf.advance(FRAME_HEADER_LEN);
            let present = len.min(self.buf.len());
            self.buf.advance(present);
            self.skip = len - present;
            return Some(Err(DecodeError::FrameTooLarge {
                len,
                max: self.max_frame_len,
            }));
        }
        if self.buf.len() < FRAME_HEADER_LEN + len {
            return None;
        }

        let frame = self.buf.split_to(FRAME_HEADER_LEN + len);
        Some(codec::decode(&frame[FRAME_HEADER_LEN..]))
    }
}
