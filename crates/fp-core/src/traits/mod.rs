//! Capability traits for the forwarder's collaborators

mod runtime;
mod tunnel;

pub use runtime::{ContainerRuntime, StateReceiver};
pub use tunnel::Tunnel;
