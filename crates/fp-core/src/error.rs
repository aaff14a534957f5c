//! Core error types for the port forwarder

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the forwarder
#[derive(Error, Debug)]
pub enum FpError {
    /// Forwarding engine error
    #[error("Forwarding error: {0}")]
    Forward(#[from] ForwardError),

    /// Container runtime error
    #[error("Container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the port forwarding engine
#[derive(Error, Debug)]
pub enum ForwardError {
    /// No port was configured
    #[error("at least one port should be specified")]
    NoPorts,

    /// Port 0 cannot be forwarded
    #[error("invalid port: {0}")]
    InvalidPort(u16),

    /// The same port appears more than once
    #[error("port {0} is listed more than once")]
    DuplicatePort(u16),

    /// Start was requested on an already cancelled forwarder
    #[error("forwarding has been cancelled")]
    Cancelled,

    /// Binding a local listener failed
    #[error("failed to listen on port {port}: {source}")]
    Bind {
        /// The port we tried to listen on
        port: u16,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the container runtime collaborators
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// No running container belongs to the workspace
    #[error("failed to find container for workspace {0}")]
    ContainerNotFound(PathBuf),

    /// The runtime binary could not be started
    #[error("failed to run {program}: {source}")]
    Spawn {
        /// Program that failed to start
        program: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The runtime command exited unsuccessfully
    #[error("{command} failed: {output}")]
    CommandFailed {
        /// Command line that was executed
        command: String,
        /// Combined output of the command
        output: String,
    },

    /// The container metadata could not be interpreted
    #[error("invalid container metadata: {0}")]
    Metadata(String),

    /// The lifecycle event source reported a start-up error
    #[error("event source failed: {0}")]
    EventSource(String),

    /// The operation was cancelled before it completed
    #[error("operation cancelled")]
    Cancelled,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Config file exists but could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File that failed to read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// JSON parse error
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
