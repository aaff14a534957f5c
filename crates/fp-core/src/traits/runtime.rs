//! Container runtime capability

use async_trait::async_trait;
use futures::Stream;
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use fp_events::LifecycleEvent;

use crate::error::RuntimeError;
use crate::traits::Tunnel;
use crate::types::{ContainerId, ContainerState};

/// Read side of the container snapshot published by the lifecycle reactor
pub type StateReceiver = watch::Receiver<ContainerState>;

/// Everything the forwarder needs from the container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Ordered stream of lifecycle events; ends when the source stops
    type Events: Stream<Item = LifecycleEvent> + Send + Unpin + 'static;

    /// Tunnel used for accepted connections
    type Tunnel: Tunnel;

    /// Find the running container that belongs to `workspace`.
    ///
    /// Returns [`RuntimeError::ContainerNotFound`] when none is running.
    async fn resolve_container_id(&self, workspace: &Path) -> Result<ContainerId, RuntimeError>;

    /// Determine the user to run tunnel commands as.
    ///
    /// A non-empty `override_user` wins over the container metadata.
    async fn resolve_remote_user(
        &self,
        id: &ContainerId,
        override_user: Option<&str>,
    ) -> Result<String, RuntimeError>;

    /// Open the lifecycle event stream for the workspace's container.
    ///
    /// Events from the last `since` are replayed. The stream ends when
    /// `cancel` fires.
    async fn lifecycle_events(
        &self,
        workspace: &Path,
        config_path: &Path,
        since: Duration,
        cancel: CancellationToken,
    ) -> Result<Self::Events, RuntimeError>;

    /// Build the tunnel, reading the container snapshot from `state` at
    /// each dispatch
    fn tunnel(&self, state: StateReceiver) -> Self::Tunnel;
}
