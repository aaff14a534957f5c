//! Framing and event error types

use thiserror::Error;

/// Errors raised while splitting a byte stream into lines
#[derive(Error, Debug)]
pub enum FramingError {
    /// An unterminated fragment no longer fits in the line buffer
    #[error(
        "line does not contain newline and is {} bytes too long for buffer (buffer size: {buffer_size})",
        overflow(.line, .buffer_size)
    )]
    LineTooLong {
        /// Buffered partial content followed by the offending fragment
        line: Vec<u8>,
        /// Configured buffer capacity
        buffer_size: usize,
        /// Free space left in the buffer when the fragment arrived
        buffer_free: usize,
        /// Bytes of the write that were framed before the overflow
        consumed: usize,
    },

    /// I/O error from the underlying reader
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn overflow(line: &[u8], buffer_size: &usize) -> usize {
    line.len().saturating_sub(*buffer_size)
}

impl FramingError {
    /// Number of bytes by which an overflowing line exceeds the buffer
    pub fn excess(&self) -> Option<usize> {
        match self {
            FramingError::LineTooLong {
                line, buffer_size, ..
            } => Some(overflow(line, buffer_size)),
            FramingError::Io(_) => None,
        }
    }
}

/// Errors raised while parsing a lifecycle event line
#[derive(Error, Debug)]
pub enum EventError {
    /// The line is not a JSON event object
    #[error("Invalid event JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The devcontainer metadata label could not be decoded
    #[error("Invalid devcontainer metadata: {0}")]
    Metadata(String),

    /// A required field is absent from the event
    #[error("Missing event field: {0}")]
    MissingField(&'static str),
}
