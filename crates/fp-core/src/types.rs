//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::error::ForwardError;

/// Identifier of a container, possibly empty while still unknown
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(pub String);

impl ContainerId {
    /// Create a new container ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the container is still unknown
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Abbreviated form used in log lines
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(12)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of the forwarded container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Nothing known yet
    #[default]
    Unknown,
    /// Resolved by lookup, no lifecycle event seen yet
    Starting,
    /// Started or restarted
    Running,
    /// Died, waiting for a restart within the grace period
    Dying,
    /// Given up on; forwarding is shutting down
    Stopped,
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerStatus::Unknown => write!(f, "unknown"),
            ContainerStatus::Starting => write!(f, "starting"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Dying => write!(f, "dying"),
            ContainerStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot of what is known about the forwarded container.
///
/// Written only by the lifecycle reactor; tunnels clone it at the moment a
/// connection is dispatched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerState {
    /// Container identifier (empty while unknown)
    pub id: ContainerId,
    /// User to run the tunnel command as (empty means the container default)
    pub remote_user: String,
    /// Current lifecycle status
    pub status: ContainerStatus,
}

impl ContainerState {
    /// Create a state for a container found by lookup
    pub fn resolved(id: ContainerId, remote_user: impl Into<String>) -> Self {
        Self {
            id,
            remote_user: remote_user.into(),
            status: ContainerStatus::Starting,
        }
    }

    /// Whether a container is known to route connections to
    pub fn is_known(&self) -> bool {
        !self.id.is_empty()
    }
}

/// Validated, ordered set of local ports to forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardSpec {
    ports: Vec<u16>,
}

impl ForwardSpec {
    /// Validate a port list.
    ///
    /// The list must be non-empty, contain no port 0 and no repeated port.
    pub fn new(ports: impl Into<Vec<u16>>) -> Result<Self, ForwardError> {
        let ports = ports.into();
        if ports.is_empty() {
            return Err(ForwardError::NoPorts);
        }

        let mut seen = HashSet::with_capacity(ports.len());
        for &port in &ports {
            if port == 0 {
                return Err(ForwardError::InvalidPort(port));
            }
            if !seen.insert(port) {
                return Err(ForwardError::DuplicatePort(port));
            }
        }

        Ok(Self { ports })
    }

    /// Ports in configuration order
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    /// Number of ports
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// Always false for a validated spec
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}
