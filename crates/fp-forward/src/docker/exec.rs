//! Tunnel through `docker exec` and socat

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::process::{ChildStdin, ChildStdout, Command};

use fp_core::traits::{StateReceiver, Tunnel};
use fp_core::{ContainerState, RuntimeError};

use super::command::{display_command, exec_args, is_valid_user_name};

/// How long to wait for the exec process to exit once the relay is done
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Forwards each connection through its own `docker exec` process.
///
/// The container and remote user are read from the state channel when a
/// connection is dispatched; a later restart does not affect connections
/// already relayed.
pub struct ExecTunnel {
    program: String,
    state: StateReceiver,
}

impl ExecTunnel {
    /// Create a tunnel running `program` (normally `docker`)
    pub fn new(program: impl Into<String>, state: StateReceiver) -> Self {
        Self {
            program: program.into(),
            state,
        }
    }

    async fn relay(
        &self,
        conn: TcpStream,
        container: &ContainerState,
        port: u16,
    ) -> Result<(), RuntimeError> {
        if !container.remote_user.is_empty() && !is_valid_user_name(&container.remote_user) {
            return Err(RuntimeError::Metadata(format!(
                "refusing to run as remote user {:?}",
                container.remote_user
            )));
        }

        let args = exec_args(&container.id, &container.remote_user, port);
        let command_line = display_command(&self.program, &args);
        tracing::debug!("Running {}", command_line);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RuntimeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(RuntimeError::CommandFailed {
                command: command_line,
                output: "stdio was not captured".to_string(),
            });
        };

        pipe(conn, stdin, stdout, port).await;

        match tokio::time::timeout(REAP_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(port, "Tunnel process exited with {}", status),
            Ok(Err(e)) => tracing::warn!(port, "Failed to wait for tunnel process: {}", e),
            Err(_) => {
                tracing::debug!(port, "Tunnel process still running, killing it");
                if let Err(e) = child.kill().await {
                    tracing::warn!(port, "Failed to kill tunnel process: {}", e);
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Tunnel for ExecTunnel {
    async fn forward(&self, conn: TcpStream, target_port: u16) {
        let container = self.state.borrow().clone();
        if !container.is_known() {
            tracing::warn!(port = target_port, "No container to forward to, dropping connection");
            return;
        }

        if let Err(e) = self.relay(conn, &container, target_port).await {
            tracing::warn!(
                port = target_port,
                container = %container.id.short(),
                "Failed to forward port to container: {}",
                e
            );
        }
    }
}

/// Copy both directions until either side is done, then close everything
async fn pipe(mut conn: TcpStream, mut stdin: ChildStdin, mut stdout: ChildStdout, port: u16) {
    let (mut client_read, mut client_write) = conn.split();

    let to_container = async {
        let copied = tokio::io::copy(&mut client_read, &mut stdin).await;
        let _ = stdin.shutdown().await;
        copied
    };
    let from_container = tokio::io::copy(&mut stdout, &mut client_write);

    tokio::select! {
        copied = to_container => match copied {
            Ok(bytes) => tracing::trace!(port, bytes, "Client closed the connection"),
            Err(e) => tracing::debug!(port, "Client to container copy failed: {}", e),
        },
        copied = from_container => match copied {
            Ok(bytes) => tracing::trace!(port, bytes, "Container closed the connection"),
            Err(e) => tracing::debug!(port, "Container to client copy failed: {}", e),
        },
    }
}
