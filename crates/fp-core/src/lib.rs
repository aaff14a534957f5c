//! fp-core: Core abstractions and configuration for the port forwarder
//!
//! This crate provides the shared types, error taxonomy, configuration
//! loading and capability traits used by the forwarding engine, the
//! lifecycle reactor and the command-line front end.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, ForwardError, FpError, RuntimeError};
pub use types::{ContainerId, ContainerState, ContainerStatus, ForwardSpec};
