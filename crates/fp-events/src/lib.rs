//! fp-events: Line framing and lifecycle events for the port forwarder
//!
//! This crate turns the raw output of a container event source into
//! discrete lines under a fixed memory ceiling, and parses those lines
//! into the lifecycle events the forwarder reacts to.

pub mod codec;
pub mod error;
pub mod event;
pub mod framing;

pub use codec::LineCodec;
pub use error::{EventError, FramingError};
pub use event::{remote_user_from_metadata, EventAction, LifecycleEvent};
pub use framing::{LineFramer, DEFAULT_LINE_BUFFER_SIZE};
