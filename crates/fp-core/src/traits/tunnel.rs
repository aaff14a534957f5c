//! Tunnel capability

use async_trait::async_trait;
use std::future::Future;
use tokio::net::TcpStream;

/// Relays one accepted local connection into the container.
///
/// The engine hands over ownership of the connection; the tunnel is
/// responsible for closing it when the relay ends. Failures are handled
/// (logged) inside the tunnel and never reach the engine.
#[async_trait]
pub trait Tunnel: Send + Sync + 'static {
    /// Relay `conn` to `target_port` inside the container
    async fn forward(&self, conn: TcpStream, target_port: u16);
}

#[async_trait]
impl<F, Fut> Tunnel for F
where
    F: Fn(TcpStream, u16) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn forward(&self, conn: TcpStream, target_port: u16) {
        (self)(conn, target_port).await
    }
}
