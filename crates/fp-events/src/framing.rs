//! Bounded line framing
//!
//! [`LineFramer`] accepts arbitrary, non-line-aligned writes and splits them
//! into complete lines. Both `\n` and `\r\n` terminate a line. Content that
//! has not seen a terminator yet is kept in a fixed-capacity buffer; a
//! fragment that would not fit is reported as [`FramingError::LineTooLong`]
//! instead of growing memory or being truncated.

use std::collections::VecDeque;

use crate::error::FramingError;

/// Default capacity of the partial-line buffer (16 KiB).
///
/// Event producers emit one JSON object per line, which stays far below
/// this bound for legitimate payloads.
pub const DEFAULT_LINE_BUFFER_SIZE: usize = 16 * 1024;

/// Incremental, memory-bounded line splitter
#[derive(Debug)]
pub struct LineFramer {
    /// Partial line carried over from previous writes
    partial: Vec<u8>,
    /// Maximum number of bytes `partial` may hold
    capacity: usize,
    /// Complete lines not yet taken by the reader
    ready: VecDeque<String>,
}

impl LineFramer {
    /// Create a framer with the default 16 KiB buffer
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LINE_BUFFER_SIZE)
    }

    /// Create a framer whose partial-line buffer holds at most `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            partial: Vec::with_capacity(capacity),
            capacity,
            ready: VecDeque::new(),
        }
    }

    /// Configured buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes currently held as an unterminated partial line
    pub fn buffered(&self) -> usize {
        self.partial.len()
    }

    /// Feed a chunk of bytes.
    ///
    /// Every terminator found completes one line, which is queued for
    /// [`next_line`](Self::next_line). Returns the number of bytes consumed,
    /// which is the whole chunk on success.
    ///
    /// If the unterminated tail of `chunk` does not fit next to the content
    /// already buffered, nothing of that tail is stored and
    /// [`FramingError::LineTooLong`] is returned. Lines completed earlier in
    /// the same chunk stay queued and `consumed` in the error tells how much
    /// of the chunk they covered.
    pub fn write(&mut self, chunk: &[u8]) -> Result<usize, FramingError> {
        let mut start = 0;

        while let Some(offset) = chunk[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let mut line = Vec::with_capacity(self.partial.len() + offset);
            line.append(&mut self.partial);
            line.extend_from_slice(&chunk[start..end]);

            // The \r may have arrived at the tail of an earlier write
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            self.ready
                .push_back(String::from_utf8_lossy(&line).into_owned());
            start = end + 1;
        }

        if start < chunk.len() {
            let remaining = &chunk[start..];
            let free = self.capacity - self.partial.len();

            if remaining.len() > free {
                let mut line = Vec::with_capacity(self.partial.len() + remaining.len());
                line.extend_from_slice(&self.partial);
                line.extend_from_slice(remaining);

                return Err(FramingError::LineTooLong {
                    line,
                    buffer_size: self.capacity,
                    buffer_free: free,
                    consumed: start,
                });
            }

            self.partial.extend_from_slice(remaining);
        }

        Ok(chunk.len())
    }

    /// Take the next complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        self.ready.pop_front()
    }

    /// Drain all complete lines queued so far
    pub fn lines(&mut self) -> impl Iterator<Item = String> + '_ {
        self.ready.drain(..)
    }

    /// Emit the pending partial line.
    ///
    /// Returns `None` when no residual byte is held, so a stream that ended
    /// on a clean boundary never produces a trailing empty line.
    pub fn flush(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }

        let mut line = std::mem::take(&mut self.partial);
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Drop the buffered partial line, e.g. to resynchronise after an overflow
    pub fn discard_partial(&mut self) -> usize {
        let dropped = self.partial.len();
        self.partial.clear();
        dropped
    }
}

impl Default for LineFramer {
    fn default() -> Self {
        Self::new()
    }
}
