//! Tokio codec for bounded line framing

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::error::FramingError;
use crate::framing::LineFramer;

/// Decoder yielding one `String` per line of the underlying byte stream.
///
/// Wraps a [`LineFramer`], so memory held for an unterminated line is
/// bounded by the framer's capacity.
#[derive(Debug, Default)]
pub struct LineCodec {
    framer: LineFramer,
    /// Overflow seen while lines framed before it were still queued
    pending_error: Option<FramingError>,
}

impl LineCodec {
    /// Create a codec with the default 16 KiB line buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a codec with a custom line buffer capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            framer: LineFramer::with_capacity(capacity),
            pending_error: None,
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.framer.next_line() {
            return Ok(Some(line));
        }

        if let Some(err) = self.pending_error.take() {
            return Err(err);
        }

        if src.is_empty() {
            return Ok(None);
        }

        let chunk = src.split();
        if let Err(err) = self.framer.write(&chunk) {
            // Deliver the lines that were complete before the overflow first
            match self.framer.next_line() {
                Some(line) => {
                    self.pending_error = Some(err);
                    return Ok(Some(line));
                }
                None => return Err(err),
            }
        }

        Ok(self.framer.next_line())
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(line) = self.decode(src)? {
            return Ok(Some(line));
        }
        Ok(self.framer.flush())
    }
}
