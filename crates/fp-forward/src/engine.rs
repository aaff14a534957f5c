//! Multi-port forwarding engine
//!
//! One acceptor task per local port pushes accepted connections into a
//! bounded channel. A single dispatcher drains that channel and runs every
//! connection on its own worker, so a slow tunnel never blocks accepting or
//! other connections. A supervisor waits for cancellation and then tears
//! everything down, bounded by the drain timeout.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use fp_core::traits::Tunnel;
use fp_core::{ForwardError, ForwardSpec};

/// Accepted connections that may wait for the dispatcher
pub const DEFAULT_DISPATCH_CAPACITY: usize = 16;

/// Upper bound on teardown once cancellation is observed
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed accept before trying again
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Forwards every configured local port to a [`Tunnel`]
pub struct PortForwarder<T: Tunnel> {
    spec: ForwardSpec,
    tunnel: Arc<T>,
    bind_address: IpAddr,
    dispatch_capacity: usize,
    drain_timeout: Duration,
}

impl<T: Tunnel> PortForwarder<T> {
    /// Create a forwarder for `ports`, validating the list
    pub fn new(ports: impl Into<Vec<u16>>, tunnel: T) -> Result<Self, ForwardError> {
        Ok(Self::from_spec(ForwardSpec::new(ports)?, tunnel))
    }

    /// Create a forwarder for an already validated port list
    pub fn from_spec(spec: ForwardSpec, tunnel: T) -> Self {
        Self {
            spec,
            tunnel: Arc::new(tunnel),
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            dispatch_capacity: DEFAULT_DISPATCH_CAPACITY,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Listen on another local address (loopback by default)
    pub fn with_bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set how many accepted connections may queue before accepting blocks
    pub fn with_dispatch_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_capacity = capacity.max(1);
        self
    }

    /// Set the upper bound on teardown
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Forwarded ports in configuration order
    pub fn ports(&self) -> &[u16] {
        self.spec.ports()
    }

    /// Open one listener per port and start forwarding.
    ///
    /// Listeners are opened in configuration order. If any of them fails,
    /// the ones opened so far are closed again and the error names the
    /// failing port. Forwarding runs until `cancel` fires; the returned
    /// handle completes once every listener is closed and every worker has
    /// finished or the drain timeout ran out.
    pub async fn start(&self, cancel: CancellationToken) -> Result<ForwardingHandle, ForwardError> {
        if cancel.is_cancelled() {
            return Err(ForwardError::Cancelled);
        }

        let listeners = self.bind_all().await?;
        let local_addrs = listeners
            .iter()
            .filter_map(|listener| listener.local_addr().ok())
            .collect();

        let (conn_tx, conn_rx) = mpsc::channel(self.dispatch_capacity);

        let mut acceptors = JoinSet::new();
        for (&port, listener) in self.spec.ports().iter().zip(listeners) {
            acceptors.spawn(accept_loop(port, listener, conn_tx.clone(), cancel.clone()));
        }
        drop(conn_tx);

        let workers = TaskTracker::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            conn_rx,
            Arc::clone(&self.tunnel),
            workers.clone(),
            cancel.clone(),
        ));

        let done = tokio::spawn(supervise(
            acceptors,
            dispatcher,
            workers,
            cancel,
            self.drain_timeout,
        ));

        Ok(ForwardingHandle { local_addrs, done })
    }

    async fn bind_all(&self) -> Result<Vec<TcpListener>, ForwardError> {
        let mut listeners = Vec::with_capacity(self.spec.len());

        for &port in self.spec.ports() {
            let addr = SocketAddr::new(self.bind_address, port);
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    tracing::info!("Listening on {}", addr);
                    listeners.push(listener);
                }
                Err(source) => {
                    tracing::error!("Failed to listen on {}: {}", addr, source);
                    drop(listeners);
                    return Err(ForwardError::Bind { port, source });
                }
            }
        }

        Ok(listeners)
    }
}

/// Handle to a running [`PortForwarder`]
#[derive(Debug)]
pub struct ForwardingHandle {
    local_addrs: Vec<SocketAddr>,
    done: JoinHandle<()>,
}

impl ForwardingHandle {
    /// Addresses the listeners are bound to, in configuration order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    /// Whether teardown has completed
    pub fn is_finished(&self) -> bool {
        self.done.is_finished()
    }

    /// Wait until forwarding has stopped
    pub async fn wait(self) {
        if let Err(e) = self.done.await {
            tracing::error!("Forwarding supervisor failed: {}", e);
        }
    }
}

async fn accept_loop(
    port: u16,
    listener: TcpListener,
    conn_tx: mpsc::Sender<TcpStream>,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                tracing::debug!(port, remote_address = %peer_addr, "Accepted connection");

                // Blocks while the dispatcher is behind
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = conn_tx.send(stream) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(port, "Failed to accept connection: {}", e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                }
            }
        }
    }

    drop(listener);
    tracing::debug!(port, "Stopped listening");
}

async fn dispatch_loop<T: Tunnel>(
    mut conn_rx: mpsc::Receiver<TcpStream>,
    tunnel: Arc<T>,
    workers: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let conn = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            conn = conn_rx.recv() => conn,
        };
        let Some(conn) = conn else { break };

        workers.spawn(handle_connection(conn, Arc::clone(&tunnel), cancel.clone()));
    }

    // Connections still queued are dropped, which closes them
    conn_rx.close();
}

async fn handle_connection<T: Tunnel>(conn: TcpStream, tunnel: Arc<T>, cancel: CancellationToken) {
    let port = match conn.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            tracing::warn!("Dropping connection without local address: {}", e);
            return;
        }
    };
    let remote = conn
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    tracing::debug!(port, remote_address = %remote, "Received connection on forwarded port");

    tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(port, remote_address = %remote, "Connection abandoned on shutdown");
        }
        _ = tunnel.forward(conn, port) => {
            tracing::debug!(port, remote_address = %remote, "Connection finished");
        }
    }
}

async fn supervise(
    mut acceptors: JoinSet<()>,
    dispatcher: JoinHandle<()>,
    workers: TaskTracker,
    cancel: CancellationToken,
    drain_timeout: Duration,
) {
    cancel.cancelled().await;
    tracing::info!("Stopping port forwarding");

    let teardown = async move {
        while let Some(result) = acceptors.join_next().await {
            if let Err(e) = result {
                tracing::warn!("Accept loop failed: {}", e);
            }
        }
        if let Err(e) = dispatcher.await {
            tracing::warn!("Dispatcher failed: {}", e);
        }
        workers.close();
        workers.wait().await;
    };

    // Dropping an unfinished teardown aborts the remaining acceptors
    if tokio::time::timeout(drain_timeout, teardown).await.is_err() {
        tracing::warn!(
            "Timed out after {:?} waiting for connections to finish",
            drain_timeout
        );
    }

    tracing::info!("Port forwarding stopped");
}
