//! Lifecycle events from `docker events`

use std::pin::Pin;
use std::process::Stdio;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use fp_core::RuntimeError;
use fp_events::{LifecycleEvent, LineCodec};

use super::command::display_command;

/// Parsed events buffered between the reader task and the reactor
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Stream of lifecycle events produced by a background reader
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<LifecycleEvent>,
}

impl EventStream {
    /// Wrap a channel receiver
    pub fn from_receiver(rx: mpsc::Receiver<LifecycleEvent>) -> Self {
        Self { rx }
    }
}

impl Stream for EventStream {
    type Item = LifecycleEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Start `program args` and stream the events it prints.
///
/// Anything the process writes to stderr within `startup_probe` is treated
/// as a start-up failure. The process is killed once `cancel` fires.
pub(crate) async fn spawn_event_source(
    program: &str,
    args: Vec<String>,
    startup_probe: Duration,
    cancel: CancellationToken,
) -> Result<EventStream, RuntimeError> {
    let command_line = display_command(program, &args);
    tracing::debug!("Starting event source: {}", command_line);

    let mut child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| RuntimeError::Spawn {
            program: program.to_string(),
            source,
        })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| RuntimeError::EventSource("stdout was not captured".to_string()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| RuntimeError::EventSource("stderr was not captured".to_string()))?;

    let lines = FramedRead::new(stdout, LineCodec::new());
    let mut errors = FramedRead::new(stderr, LineCodec::new());

    tokio::select! {
        _ = cancel.cancelled() => return Err(RuntimeError::Cancelled),
        line = errors.next() => match line {
            Some(Ok(line)) => {
                return Err(RuntimeError::EventSource(format!("{}: {}", command_line, line.trim())));
            }
            Some(Err(e)) => return Err(RuntimeError::EventSource(e.to_string())),
            None => {
                if let Ok(Some(status)) = child.try_wait() {
                    if !status.success() {
                        return Err(RuntimeError::EventSource(format!(
                            "{} exited with {}",
                            command_line, status
                        )));
                    }
                }
            }
        },
        _ = tokio::time::sleep(startup_probe) => {}
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(read_events(child, lines, errors, tx, cancel));

    Ok(EventStream::from_receiver(rx))
}

async fn read_events(
    mut child: Child,
    mut lines: FramedRead<ChildStdout, LineCodec>,
    mut errors: FramedRead<ChildStderr, LineCodec>,
    tx: mpsc::Sender<LifecycleEvent>,
    cancel: CancellationToken,
) {
    let mut stderr_open = true;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            line = errors.next(), if stderr_open => match line {
                Some(Ok(line)) => tracing::warn!("Event source: {}", line),
                Some(Err(e)) => {
                    tracing::debug!("Event source stderr unreadable: {}", e);
                    stderr_open = false;
                }
                None => stderr_open = false,
            },
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match LifecycleEvent::from_json(&line) {
                        Ok(event) => {
                            tracing::trace!(action = %event.action, id = %event.id, "Lifecycle event");
                            let sent = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => false,
                                sent = tx.send(event) => sent.is_ok(),
                            };
                            if !sent {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!("Skipping unparsable event: {}", e),
                    }
                }
                Some(Err(e)) => {
                    tracing::error!("Failed to read lifecycle events: {}", e);
                    break;
                }
                None => {
                    tracing::info!("Event source exited");
                    break;
                }
            },
        }
    }

    if let Err(e) = child.kill().await {
        tracing::debug!("Failed to stop event source: {}", e);
    }
}
