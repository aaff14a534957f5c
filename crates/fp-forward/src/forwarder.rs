//! Devcontainer port forwarder
//!
//! Wires a [`ContainerRuntime`] to the [`LifecycleReactor`] and the
//! [`PortForwarder`]. All three share one cancellation token derived from
//! the caller's: cancelling the parent, an expired grace period or the end
//! of the event stream stops everything.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use fp_core::config::{devcontainer_config_path, DevcontainerConfig, ForwarderConfig};
use fp_core::traits::ContainerRuntime;
use fp_core::{ContainerState, ForwardError, ForwardSpec, FpError, RuntimeError};

use crate::engine::PortForwarder;
use crate::reactor::{LifecycleReactor, ReactorExit};

/// Forwards the ports of a devcontainer.json to the workspace's container
pub struct DevContainerForwarder<R: ContainerRuntime> {
    runtime: R,
    workspace: PathBuf,
    config_path: PathBuf,
    spec: ForwardSpec,
    remote_user_override: Option<String>,
    settings: ForwarderConfig,
    cancel: CancellationToken,
}

impl<R: ContainerRuntime> DevContainerForwarder<R> {
    /// Create a forwarder for `workspace`.
    ///
    /// Fails if the devcontainer configuration lists no usable port. The
    /// forwarder stops when `parent` is cancelled.
    pub fn new(
        runtime: R,
        workspace: impl Into<PathBuf>,
        devcontainer: &DevcontainerConfig,
        settings: ForwarderConfig,
        parent: &CancellationToken,
    ) -> Result<Self, FpError> {
        let workspace = workspace.into();
        let spec = ForwardSpec::new(devcontainer.forward_ports.clone())?;

        Ok(Self {
            runtime,
            config_path: devcontainer_config_path(&workspace),
            workspace,
            spec,
            remote_user_override: devcontainer.remote_user_override().map(str::to_string),
            settings,
            cancel: parent.child_token(),
        })
    }

    /// Container runtime in use
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Workspace folder
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Ports that will be forwarded
    pub fn ports(&self) -> &[u16] {
        self.spec.ports()
    }

    /// Token shared by everything this forwarder starts
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop forwarding
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolve the container, open the event stream and start forwarding.
    ///
    /// A missing container is not an error: connections are refused by the
    /// tunnel until a start event names one. Any other failure cancels the
    /// forwarder's token before it is returned.
    pub async fn start(&self) -> Result<ForwarderHandle, FpError> {
        if self.cancel.is_cancelled() {
            return Err(ForwardError::Cancelled.into());
        }

        match self.start_inner().await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.cancel.cancel();
                Err(e)
            }
        }
    }

    async fn start_inner(&self) -> Result<ForwarderHandle, FpError> {
        let initial = self.resolve_initial_state().await?;

        let events = self
            .runtime
            .lifecycle_events(
                &self.workspace,
                &self.config_path,
                self.settings.events_since,
                self.cancel.clone(),
            )
            .await?;

        let (reactor, state_rx) = LifecycleReactor::new(self.settings.grace_period);
        let reactor = reactor
            .with_remote_user_override(self.remote_user_override.clone())
            .with_initial_state(initial);

        let engine = PortForwarder::from_spec(self.spec.clone(), self.runtime.tunnel(state_rx))
            .with_bind_address(self.settings.bind_address)
            .with_dispatch_capacity(self.settings.dispatch_capacity)
            .with_drain_timeout(self.settings.drain_timeout);
        let forwarding = engine.start(self.cancel.clone()).await?;
        let local_addrs = forwarding.local_addrs().to_vec();

        tracing::info!(ports = ?self.spec.ports(), "Forwarding ports to devcontainer");

        let reactor_task = tokio::spawn(reactor.run(events, self.cancel.clone()));
        let cancel = self.cancel.clone();
        let done = tokio::spawn(async move {
            cancel.cancelled().await;
            let exit = match reactor_task.await {
                Ok(exit) => Some(exit),
                Err(e) => {
                    tracing::error!("Lifecycle reactor failed: {}", e);
                    None
                }
            };
            forwarding.wait().await;
            exit
        });

        Ok(ForwarderHandle { local_addrs, done })
    }

    async fn resolve_initial_state(&self) -> Result<ContainerState, RuntimeError> {
        let id = match self.runtime.resolve_container_id(&self.workspace).await {
            Ok(id) => id,
            Err(RuntimeError::ContainerNotFound(_)) => {
                tracing::info!("No running container yet, waiting for it to start");
                return Ok(ContainerState::default());
            }
            Err(e) => return Err(e),
        };

        let remote_user = self
            .runtime
            .resolve_remote_user(&id, self.remote_user_override.as_deref())
            .await?;

        tracing::info!(
            container = %id.short(),
            remote_user = %remote_user,
            "Found running container"
        );
        Ok(ContainerState::resolved(id, remote_user))
    }
}

/// Handle to a started [`DevContainerForwarder`]
#[derive(Debug)]
pub struct ForwarderHandle {
    local_addrs: Vec<SocketAddr>,
    done: JoinHandle<Option<ReactorExit>>,
}

impl ForwarderHandle {
    /// Addresses of the local listeners, in configuration order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Whether everything has shut down
    pub fn is_finished(&self) -> bool {
        self.done.is_finished()
    }

    /// Wait until the forwarder has stopped.
    ///
    /// Returns how the lifecycle reactor ended, if it ended cleanly.
    pub async fn wait(self) -> Option<ReactorExit> {
        match self.done.await {
            Ok(exit) => exit,
            Err(e) => {
                tracing::error!("Forwarder shutdown failed: {}", e);
                None
            }
        }
    }
}
