//! fp-forward: Forward local ports into a devcontainer
//!
//! The [`PortForwarder`] accepts connections on every configured local port
//! and hands each one to a [`Tunnel`](fp_core::traits::Tunnel). The
//! [`LifecycleReactor`] follows the container's lifecycle events and stops
//! everything, through a shared cancellation token, once the container has
//! been gone for longer than the grace period. [`DevContainerForwarder`]
//! wires both to a [`ContainerRuntime`](fp_core::traits::ContainerRuntime);
//! [`docker::DockerCli`] is the runtime backed by the docker CLI.

pub mod docker;
pub mod engine;
pub mod forwarder;
pub mod reactor;

pub use engine::{ForwardingHandle, PortForwarder};
pub use forwarder::{DevContainerForwarder, ForwarderHandle};
pub use reactor::{LifecycleReactor, ReactorExit, ReactorPhase, TerminationReason};
