//! Forwarder runtime settings

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Tunables for the forwarding engine, the lifecycle reactor and the
/// container runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// How long a died container may take to restart before forwarding stops
    #[serde(with = "duration_secs")]
    pub grace_period: Duration,

    /// Upper bound on engine teardown once shutdown begins
    #[serde(rename = "drain_timeout_ms", with = "duration_millis")]
    pub drain_timeout: Duration,

    /// How far back the event source replays lifecycle events on start
    #[serde(with = "duration_secs")]
    pub events_since: Duration,

    /// How long to watch the event source for start-up errors
    #[serde(rename = "startup_probe_ms", with = "duration_millis")]
    pub startup_probe: Duration,

    /// Accepted connections that may wait for dispatch before accepting blocks
    pub dispatch_capacity: usize,

    /// Local address the listeners bind to
    pub bind_address: IpAddr,

    /// Container runtime executable
    pub docker_binary: String,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(1),
            events_since: Duration::from_secs(10),
            startup_probe: Duration::from_millis(500),
            dispatch_capacity: 16,
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            docker_binary: "docker".to_string(),
        }
    }
}
