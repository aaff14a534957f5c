//! Container lifecycle reactor
//!
//! Consumes lifecycle events and keeps the shared [`ContainerState`] up to
//! date. A `die` arms a grace deadline; a `start` or `restart` before the
//! deadline disarms it. If the deadline passes, the reactor cancels the
//! shared token, which stops forwarding and the event source.
//!
//! The reactor is the only writer of the state channel. Tunnels read
//! snapshots through [`StateReceiver`]s.

use std::fmt;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fp_core::traits::StateReceiver;
use fp_core::{ContainerId, ContainerState, ContainerStatus};
use fp_events::{EventAction, LifecycleEvent};

/// How long a died container may take to come back by default
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Why the reactor stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// The container did not restart within the grace period
    GraceExpired,
    /// The event source stopped producing events
    EventStreamEnded,
    /// The shared token was cancelled by someone else
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::GraceExpired => write!(f, "grace period expired"),
            TerminationReason::EventStreamEnded => write!(f, "event stream ended"),
            TerminationReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Reactor state machine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactorPhase {
    /// No container known yet
    Unknown,
    /// Container known and considered alive
    Active,
    /// Container died; forwarding stops at `deadline` unless it comes back
    GracePending {
        /// When the grace period runs out
        deadline: Instant,
    },
    /// Terminal
    Terminated(TerminationReason),
}

/// Final outcome of [`LifecycleReactor::run`]
#[derive(Debug, Clone)]
pub struct ReactorExit {
    /// Why the reactor stopped
    pub reason: TerminationReason,
    /// Last published container state
    pub state: ContainerState,
}

/// Lifecycle event consumer owning the container state
pub struct LifecycleReactor {
    grace_period: Duration,
    remote_user_override: Option<String>,
    phase: ReactorPhase,
    state_tx: watch::Sender<ContainerState>,
}

impl LifecycleReactor {
    /// Create a reactor with an unknown container.
    ///
    /// Returns the reactor together with a receiver for state snapshots.
    pub fn new(grace_period: Duration) -> (Self, StateReceiver) {
        let (state_tx, state_rx) = watch::channel(ContainerState::default());
        let reactor = Self {
            grace_period,
            remote_user_override: None,
            phase: ReactorPhase::Unknown,
            state_tx,
        };
        (reactor, state_rx)
    }

    /// Seed the state from a container found before events are consumed
    pub fn with_initial_state(mut self, state: ContainerState) -> Self {
        if state.is_known() {
            self.phase = ReactorPhase::Active;
        }
        self.state_tx.send_replace(state);
        self
    }

    /// Use this remote user instead of the one carried by start events
    pub fn with_remote_user_override(mut self, user: Option<String>) -> Self {
        self.remote_user_override = user.filter(|u| !u.is_empty());
        self
    }

    /// Current phase
    pub fn phase(&self) -> ReactorPhase {
        self.phase
    }

    /// Current container state
    pub fn state(&self) -> ContainerState {
        self.state_tx.borrow().clone()
    }

    /// Another receiver for state snapshots
    pub fn subscribe(&self) -> StateReceiver {
        self.state_tx.subscribe()
    }

    /// Apply one event observed at `now`.
    ///
    /// Returns the termination reason if the reactor must stop. An expired
    /// grace deadline wins over the event: a restart that arrives after the
    /// deadline does not revive forwarding.
    pub fn handle_event(&mut self, event: LifecycleEvent, now: Instant) -> Option<TerminationReason> {
        match self.phase {
            ReactorPhase::Terminated(reason) => return Some(reason),
            ReactorPhase::GracePending { deadline } if now >= deadline => {
                return Some(TerminationReason::GraceExpired);
            }
            _ => {}
        }

        match event.action {
            EventAction::Start => {
                let remote_user = self
                    .remote_user_override
                    .clone()
                    .or(event.remote_user)
                    .unwrap_or_default();
                let id = ContainerId::new(event.id);

                if matches!(self.phase, ReactorPhase::GracePending { .. }) {
                    tracing::info!("Container started again within the grace period");
                }
                tracing::info!(
                    container = %id.short(),
                    remote_user = %remote_user,
                    "Container started, allow forwarding"
                );

                self.phase = ReactorPhase::Active;
                self.state_tx.send_replace(ContainerState {
                    id,
                    remote_user,
                    status: ContainerStatus::Running,
                });
            }
            EventAction::Die => {
                let deadline = now + self.grace_period;
                tracing::info!(
                    container = %ContainerId::new(event.id).short(),
                    "Container died, stopping forwarding in {:?} unless it restarts",
                    self.grace_period
                );

                self.phase = ReactorPhase::GracePending { deadline };
                self.state_tx
                    .send_modify(|state| state.status = ContainerStatus::Dying);
            }
            EventAction::Restart => match self.phase {
                ReactorPhase::GracePending { .. } => {
                    tracing::info!("Container restarted, allow forwarding");
                    self.phase = ReactorPhase::Active;
                    self.state_tx
                        .send_modify(|state| state.status = ContainerStatus::Running);
                }
                _ => {
                    tracing::debug!(phase = ?self.phase, "Ignoring restart outside the grace period");
                }
            },
            EventAction::Other(action) => {
                tracing::trace!(action = %action, "Ignoring lifecycle event");
            }
        }

        None
    }

    /// Consume `events` until the reactor terminates.
    ///
    /// Cancels `cancel` on the way out, whatever the reason.
    pub async fn run<S>(mut self, mut events: S, cancel: CancellationToken) -> ReactorExit
    where
        S: Stream<Item = LifecycleEvent> + Unpin,
    {
        let reason = loop {
            let deadline = match self.phase {
                ReactorPhase::GracePending { deadline } => Some(deadline),
                _ => None,
            };
            let grace_timer = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break TerminationReason::Cancelled,
                _ = grace_timer => {
                    tracing::warn!("Container did not restart in time, bailing out");
                    break TerminationReason::GraceExpired;
                }
                event = events.next() => match event {
                    Some(event) => {
                        if let Some(reason) = self.handle_event(event, Instant::now()) {
                            break reason;
                        }
                    }
                    None => {
                        tracing::warn!("Lifecycle event stream ended");
                        break TerminationReason::EventStreamEnded;
                    }
                },
            }
        };

        self.phase = ReactorPhase::Terminated(reason);
        self.state_tx
            .send_modify(|state| state.status = ContainerStatus::Stopped);

        if reason != TerminationReason::Cancelled {
            tracing::info!("Cancelling forwarding and event handling ({})", reason);
        }
        cancel.cancel();

        ReactorExit {
            reason,
            state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;

    const GRACE: Duration = Duration::from_secs(5);

    fn event(action: EventAction, id: &str) -> LifecycleEvent {
        LifecycleEvent::new(action, id)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_publishes_state() {
        let (mut reactor, state_rx) = LifecycleReactor::new(GRACE);
        assert_eq!(reactor.phase(), ReactorPhase::Unknown);

        let result = reactor.handle_event(LifecycleEvent::start("A", "vscode"), Instant::now());
        assert!(result.is_none());
        assert_eq!(reactor.phase(), ReactorPhase::Active);

        let state = state_rx.borrow().clone();
        assert_eq!(state.id.as_str(), "A");
        assert_eq!(state.remote_user, "vscode");
        assert_eq!(state.status, ContainerStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_user_override_wins() {
        let (reactor, state_rx) = LifecycleReactor::new(GRACE);
        let mut reactor = reactor.with_remote_user_override(Some("dev".to_string()));

        reactor.handle_event(LifecycleEvent::start("A", "vscode"), Instant::now());
        assert_eq!(state_rx.borrow().remote_user, "dev");

        // Start without metadata and without override leaves the user empty
        let (mut reactor, state_rx) = LifecycleReactor::new(GRACE);
        reactor.handle_event(event(EventAction::Start, "B"), Instant::now());
        assert_eq!(state_rx.borrow().remote_user, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_die_arms_and_restart_disarms() {
        let (reactor, state_rx) = LifecycleReactor::new(GRACE);
        let mut reactor = reactor
            .with_initial_state(ContainerState::resolved(ContainerId::new("A"), "vscode"));
        assert_eq!(reactor.phase(), ReactorPhase::Active);

        let now = Instant::now();
        reactor.handle_event(event(EventAction::Die, "A"), now);
        assert_eq!(
            reactor.phase(),
            ReactorPhase::GracePending {
                deadline: now + GRACE
            }
        );
        assert_eq!(state_rx.borrow().status, ContainerStatus::Dying);

        let result = reactor.handle_event(event(EventAction::Restart, "A"), now + GRACE / 2);
        assert!(result.is_none());
        assert_eq!(reactor.phase(), ReactorPhase::Active);

        // Identifier and user survive a restart
        let state = state_rx.borrow().clone();
        assert_eq!(state.id.as_str(), "A");
        assert_eq!(state.remote_user, "vscode");
        assert_eq!(state.status, ContainerStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_die_rearms_deadline() {
        let (mut reactor, _state_rx) = LifecycleReactor::new(GRACE);
        let now = Instant::now();

        reactor.handle_event(event(EventAction::Die, "A"), now);
        reactor.handle_event(event(EventAction::Die, "A"), now + Duration::from_secs(3));
        assert_eq!(
            reactor.phase(),
            ReactorPhase::GracePending {
                deadline: now + Duration::from_secs(3) + GRACE
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_deadline_does_not_revive() {
        let (mut reactor, _state_rx) = LifecycleReactor::new(GRACE);
        let now = Instant::now();

        reactor.handle_event(event(EventAction::Die, "A"), now);
        let result = reactor.handle_event(event(EventAction::Restart, "A"), now + GRACE);
        assert_eq!(result, Some(TerminationReason::GraceExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_during_grace_switches_container() {
        let (mut reactor, state_rx) = LifecycleReactor::new(GRACE);
        let now = Instant::now();

        reactor.handle_event(LifecycleEvent::start("A", "vscode"), now);
        reactor.handle_event(event(EventAction::Die, "A"), now);
        reactor.handle_event(LifecycleEvent::start("B", "node"), now + Duration::from_secs(1));

        assert_eq!(reactor.phase(), ReactorPhase::Active);
        assert_eq!(state_rx.borrow().id.as_str(), "B");
        assert_eq!(state_rx.borrow().remote_user, "node");
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_outside_grace_is_ignored() {
        let (mut reactor, _state_rx) = LifecycleReactor::new(GRACE);
        reactor.handle_event(event(EventAction::Restart, "A"), Instant::now());
        assert_eq!(reactor.phase(), ReactorPhase::Unknown);

        reactor.handle_event(event(EventAction::Other("exec_start".into()), "A"), Instant::now());
        assert_eq!(reactor.phase(), ReactorPhase::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_restart_within_grace_keeps_forwarding() {
        let (tx, rx) = mpsc::unbounded();
        let (reactor, state_rx) = LifecycleReactor::new(GRACE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reactor.run(rx, cancel.clone()));

        tx.unbounded_send(LifecycleEvent::start("A", "vscode")).unwrap();
        tx.unbounded_send(event(EventAction::Die, "A")).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.unbounded_send(event(EventAction::Restart, "A")).unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(!cancel.is_cancelled());
        assert_eq!(state_rx.borrow().status, ContainerStatus::Running);
        assert_eq!(state_rx.borrow().id.as_str(), "A");

        drop(tx);
        let exit = task.await.unwrap();
        assert_eq!(exit.reason, TerminationReason::EventStreamEnded);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_grace_expiry_cancels() {
        let (tx, rx) = mpsc::unbounded();
        let (reactor, state_rx) = LifecycleReactor::new(GRACE);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let task = tokio::spawn(reactor.run(rx, cancel.clone()));

        tx.unbounded_send(LifecycleEvent::start("A", "vscode")).unwrap();
        tx.unbounded_send(event(EventAction::Die, "A")).unwrap();

        let exit = task.await.unwrap();
        assert_eq!(exit.reason, TerminationReason::GraceExpired);
        assert!(started.elapsed() >= GRACE);
        assert!(cancel.is_cancelled());
        assert_eq!(exit.state.id.as_str(), "A");
        assert_eq!(state_rx.borrow().status, ContainerStatus::Stopped);

        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_external_cancel() {
        let (_tx, rx) = mpsc::unbounded::<LifecycleEvent>();
        let (reactor, _state_rx) = LifecycleReactor::new(GRACE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reactor.run(rx, cancel.clone()));

        cancel.cancel();
        let exit = task.await.unwrap();
        assert_eq!(exit.reason, TerminationReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_without_die_never_expires() {
        let (tx, rx) = mpsc::unbounded();
        let (reactor, _state_rx) = LifecycleReactor::new(GRACE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reactor.run(rx, cancel.clone()));

        tx.unbounded_send(LifecycleEvent::start("A", "vscode")).unwrap();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(!cancel.is_cancelled());

        cancel.cancel();
        assert_eq!(task.await.unwrap().reason, TerminationReason::Cancelled);
    }
}
