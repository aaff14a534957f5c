//! Container runtime backed by the docker CLI
//!
//! Containers are found through the labels the devcontainer CLI sets on
//! them, lifecycle events come from `docker events`, and every forwarded
//! connection is relayed by a `docker exec` running socat inside the
//! container.

mod command;
mod events;
mod exec;

pub use command::{
    events_args, exec_args, inspect_metadata_args, ps_args, CONFIG_FILE_LABEL, LOCAL_FOLDER_LABEL,
};
pub use events::EventStream;
pub use exec::ExecTunnel;

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use fp_core::config::{devcontainer_config_path, ForwarderConfig};
use fp_core::traits::{ContainerRuntime, StateReceiver};
use fp_core::{ContainerId, RuntimeError};
use fp_events::remote_user_from_metadata;

use command::display_command;

/// Default time to watch `docker events` for start-up errors
pub const DEFAULT_STARTUP_PROBE: Duration = Duration::from_millis(500);

/// Output of `docker inspect --format` for a missing label
const NO_VALUE: &str = "<no value>";

/// Docker CLI runtime
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
    startup_probe: Duration,
}

impl DockerCli {
    /// Use `docker` from `PATH`
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
            startup_probe: DEFAULT_STARTUP_PROBE,
        }
    }

    /// Build from forwarder settings
    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self {
            program: config.docker_binary.clone(),
            startup_probe: config.startup_probe,
        }
    }

    /// Use another docker-compatible executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set how long `docker events` is watched for start-up errors
    pub fn with_startup_probe(mut self, probe: Duration) -> Self {
        self.startup_probe = probe;
        self
    }

    /// Executable in use
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run a docker command to completion and return its stdout
    async fn output(&self, args: &[String]) -> Result<String, RuntimeError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&output.stderr));
            return Err(RuntimeError::CommandFailed {
                command: display_command(&self.program, args),
                output: combined.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    type Events = EventStream;
    type Tunnel = ExecTunnel;

    async fn resolve_container_id(&self, workspace: &Path) -> Result<ContainerId, RuntimeError> {
        let config_path = devcontainer_config_path(workspace);
        let output = self.output(&ps_args(workspace, &config_path)).await?;
        first_container_id(&output)
            .ok_or_else(|| RuntimeError::ContainerNotFound(workspace.to_path_buf()))
    }

    async fn resolve_remote_user(
        &self,
        id: &ContainerId,
        override_user: Option<&str>,
    ) -> Result<String, RuntimeError> {
        if let Some(user) = override_user.filter(|u| !u.is_empty()) {
            return Ok(user.to_string());
        }

        let output = self.output(&inspect_metadata_args(id)).await?;
        remote_user_from_label(&output)
    }

    async fn lifecycle_events(
        &self,
        workspace: &Path,
        config_path: &Path,
        since: Duration,
        cancel: CancellationToken,
    ) -> Result<Self::Events, RuntimeError> {
        let args = events_args(workspace, config_path, since);
        events::spawn_event_source(&self.program, args, self.startup_probe, cancel).await
    }

    fn tunnel(&self, state: StateReceiver) -> Self::Tunnel {
        ExecTunnel::new(self.program.clone(), state)
    }
}

/// First id printed by `docker ps -q`
fn first_container_id(output: &str) -> Option<ContainerId> {
    let mut ids = output.lines().map(str::trim).filter(|line| !line.is_empty());
    let id = ids.next()?;
    if ids.next().is_some() {
        tracing::warn!("Several running containers match the workspace, using {}", id);
    }
    Some(ContainerId::new(id))
}

/// Remote user from the metadata label printed by `docker inspect`
fn remote_user_from_label(output: &str) -> Result<String, RuntimeError> {
    let label = output.trim();
    if label.is_empty() || label == NO_VALUE {
        return Ok(String::new());
    }

    let user = remote_user_from_metadata(label)
        .map_err(|e| RuntimeError::Metadata(e.to_string()))?;
    Ok(user.unwrap_or_default())
}
