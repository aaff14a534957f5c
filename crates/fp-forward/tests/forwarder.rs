//! Orchestration tests against an in-memory container runtime

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as event_channel;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use fp_core::config::{DevcontainerConfig, ForwarderConfig};
use fp_core::traits::{ContainerRuntime, StateReceiver, Tunnel};
use fp_core::{ContainerId, ContainerState, ForwardError, FpError, RuntimeError};
use fp_events::{EventAction, LifecycleEvent};
use fp_forward::{DevContainerForwarder, TerminationReason};

type EventSender = event_channel::UnboundedSender<LifecycleEvent>;

/// Runtime whose container and events are scripted by the test
struct FakeRuntime {
    container: Option<(&'static str, &'static str)>,
    events: Mutex<Option<event_channel::UnboundedReceiver<LifecycleEvent>>>,
    event_error: bool,
    dispatched: mpsc::UnboundedSender<(u16, ContainerState)>,
    state: Mutex<Option<StateReceiver>>,
    seen_override: Mutex<Option<Option<String>>>,
}

struct RecordingTunnel {
    state: StateReceiver,
    dispatched: mpsc::UnboundedSender<(u16, ContainerState)>,
}

#[async_trait]
impl Tunnel for RecordingTunnel {
    async fn forward(&self, _conn: TcpStream, target_port: u16) {
        let snapshot = self.state.borrow().clone();
        let _ = self.dispatched.send((target_port, snapshot));
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    type Events = event_channel::UnboundedReceiver<LifecycleEvent>;
    type Tunnel = RecordingTunnel;

    async fn resolve_container_id(&self, workspace: &Path) -> Result<ContainerId, RuntimeError> {
        match self.container {
            Some((id, _)) => Ok(ContainerId::new(id)),
            None => Err(RuntimeError::ContainerNotFound(workspace.to_path_buf())),
        }
    }

    async fn resolve_remote_user(
        &self,
        _id: &ContainerId,
        override_user: Option<&str>,
    ) -> Result<String, RuntimeError> {
        *self.seen_override.lock().unwrap() = Some(override_user.map(str::to_string));
        Ok(override_user
            .map(str::to_string)
            .or_else(|| self.container.map(|(_, user)| user.to_string()))
            .unwrap_or_default())
    }

    async fn lifecycle_events(
        &self,
        _workspace: &Path,
        config_path: &Path,
        _since: Duration,
        _cancel: CancellationToken,
    ) -> Result<Self::Events, RuntimeError> {
        assert!(config_path.ends_with(".devcontainer/devcontainer.json"));
        if self.event_error {
            return Err(RuntimeError::EventSource("unknown flag: --format".to_string()));
        }
        self.events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| RuntimeError::EventSource("already taken".to_string()))
    }

    fn tunnel(&self, state: StateReceiver) -> Self::Tunnel {
        *self.state.lock().unwrap() = Some(state.clone());
        RecordingTunnel {
            state,
            dispatched: self.dispatched.clone(),
        }
    }
}

struct Harness {
    runtime: FakeRuntime,
    events: EventSender,
    dispatched: mpsc::UnboundedReceiver<(u16, ContainerState)>,
}

fn harness(container: Option<(&'static str, &'static str)>) -> Harness {
    let (events_tx, events_rx) = event_channel::unbounded();
    let (dispatched_tx, dispatched_rx) = mpsc::unbounded_channel();
    Harness {
        runtime: FakeRuntime {
            container,
            events: Mutex::new(Some(events_rx)),
            event_error: false,
            dispatched: dispatched_tx,
            state: Mutex::new(None),
            seen_override: Mutex::new(None),
        },
        events: events_tx,
        dispatched: dispatched_rx,
    }
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn devcontainer(ports: Vec<u16>, remote_user: Option<&str>) -> DevcontainerConfig {
    DevcontainerConfig {
        name: "app".to_string(),
        remote_user: remote_user.map(str::to_string),
        forward_ports: ports,
    }
}

fn settings(grace: Duration) -> ForwarderConfig {
    ForwarderConfig {
        grace_period: grace,
        drain_timeout: Duration::from_millis(500),
        ..ForwarderConfig::default()
    }
}

fn workspace() -> PathBuf {
    PathBuf::from("/home/dev/app")
}

#[tokio::test]
async fn test_connections_use_resolved_container() {
    let Harness {
        runtime,
        events: _events,
        mut dispatched,
    } = harness(Some(("abc123", "vscode")));
    let port = free_port();
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![port], None),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();
    assert_eq!(handle.local_addrs()[0].port(), port);

    let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (target, state) = dispatched.recv().await.unwrap();
    assert_eq!(target, port);
    assert_eq!(state.id.as_str(), "abc123");
    assert_eq!(state.remote_user, "vscode");

    cancel.cancel();
    let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit.reason, TerminationReason::Cancelled);
}

#[tokio::test]
async fn test_configured_remote_user_is_passed_as_override() {
    let Harness {
        runtime,
        events: _events,
        dispatched: _dispatched,
    } = harness(Some(("abc123", "vscode")));
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![free_port()], Some("dev")),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();
    assert_eq!(
        *forwarder.runtime().seen_override.lock().unwrap(),
        Some(Some("dev".to_string()))
    );

    cancel.cancel();
    let exit = handle.wait().await.unwrap();
    assert_eq!(exit.state.remote_user, "dev");
}

#[tokio::test]
async fn test_waits_for_start_event_when_no_container() {
    let Harness {
        runtime,
        events,
        mut dispatched,
    } = harness(None);
    let port = free_port();
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![port], None),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();
    let mut state_rx = forwarder
        .runtime()
        .state
        .lock()
        .unwrap()
        .clone()
        .expect("tunnel was built during start");

    let _early = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (_, state) = dispatched.recv().await.unwrap();
    assert!(!state.is_known());

    events
        .unbounded_send(LifecycleEvent::start("feed42", "node"))
        .unwrap();
    state_rx.wait_for(|state| state.is_known()).await.unwrap();

    let _late = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (_, state) = dispatched.recv().await.unwrap();
    assert_eq!(state.id.as_str(), "feed42");
    assert_eq!(state.remote_user, "node");

    cancel.cancel();
    handle.wait().await;
}

#[tokio::test]
async fn test_grace_expiry_stops_forwarding() {
    let Harness {
        runtime,
        events,
        dispatched: _dispatched,
    } = harness(Some(("abc123", "vscode")));
    let port = free_port();
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![port], None),
        settings(Duration::from_millis(200)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();

    events
        .unbounded_send(LifecycleEvent::new(EventAction::Die, "abc123"))
        .unwrap();

    let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit.reason, TerminationReason::GraceExpired);
    assert!(forwarder.cancellation_token().is_cancelled());
    // Parent token is left alone
    assert!(!cancel.is_cancelled());
    assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
}

#[tokio::test]
async fn test_restart_within_grace_keeps_forwarding() {
    let Harness {
        runtime,
        events,
        mut dispatched,
    } = harness(Some(("abc123", "vscode")));
    let port = free_port();
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![port], None),
        settings(Duration::from_millis(500)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();

    events
        .unbounded_send(LifecycleEvent::new(EventAction::Die, "abc123"))
        .unwrap();
    events
        .unbounded_send(LifecycleEvent::new(EventAction::Restart, "abc123"))
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!handle.is_finished());

    let _client = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    let (_, state) = dispatched.recv().await.unwrap();
    assert_eq!(state.id.as_str(), "abc123");

    cancel.cancel();
    handle.wait().await;
}

#[tokio::test]
async fn test_event_stream_end_stops_forwarding() {
    let Harness {
        runtime,
        events,
        dispatched: _dispatched,
    } = harness(Some(("abc123", "vscode")));
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![free_port()], None),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();
    let handle = forwarder.start().await.unwrap();

    drop(events);
    let exit = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit.reason, TerminationReason::EventStreamEnded);
}

#[tokio::test]
async fn test_event_source_failure_fails_start() {
    let Harness {
        mut runtime,
        events: _events,
        dispatched: _dispatched,
    } = harness(Some(("abc123", "vscode")));
    runtime.event_error = true;
    let port = free_port();
    let cancel = CancellationToken::new();

    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![port], None),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();

    let err = forwarder.start().await.unwrap_err();
    assert!(matches!(err, FpError::Runtime(RuntimeError::EventSource(_))));
    assert!(forwarder.cancellation_token().is_cancelled());
    assert!(tokio::net::TcpListener::bind(("127.0.0.1", port)).await.is_ok());
}

#[tokio::test]
async fn test_no_ports_is_rejected() {
    let Harness { runtime, .. } = harness(None);
    let result = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(Vec::new(), None),
        settings(Duration::from_secs(5)),
        &CancellationToken::new(),
    );
    assert!(matches!(result, Err(FpError::Forward(ForwardError::NoPorts))));
}

#[tokio::test]
async fn test_start_after_parent_cancel_fails() {
    let Harness { runtime, .. } = harness(None);
    let cancel = CancellationToken::new();
    let forwarder = DevContainerForwarder::new(
        runtime,
        workspace(),
        &devcontainer(vec![free_port()], None),
        settings(Duration::from_secs(5)),
        &cancel,
    )
    .unwrap();

    cancel.cancel();
    assert!(matches!(
        forwarder.start().await,
        Err(FpError::Forward(ForwardError::Cancelled))
    ));
}
