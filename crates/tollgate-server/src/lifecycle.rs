//! Server lifecycle states and drain reporting.
//!
//! A server moves through four states, strictly in order:
//!
//! ```text
//! Starting ──bind──▶ Running ──signal──▶ Draining ──done/deadline──▶ Stopped
//! ```
//!
//! A bind failure goes straight from `Starting` to `Stopped`. No state is ever
//! revisited.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;

/// The lifecycle state of a server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleState {
    /// Binding the listener.
    Starting,
    /// Accepting and serving connections.
    Running,
    /// No longer accepting; waiting for in-flight connections.
    Draining,
    /// Finished.
    Stopped,
}

impl LifecycleState {
    /// Returns the state name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, forward-only lifecycle state.
///
/// Observers get a [`watch::Receiver`] so they can await transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<LifecycleState>,
}

impl Lifecycle {
    /// Creates a lifecycle in [`LifecycleState::Starting`].
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        Self { state }
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Moves to `next` if it is later than the current state.
    ///
    /// Returns `false`, leaving the state unchanged, for a backward or
    /// repeated transition.
    pub fn advance(&self, next: LifecycleState) -> bool {
        let advanced = self.state.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });

        if advanced {
            tracing::info!(state = %next, "Server lifecycle transition");
        }
        advanced
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// How a drain ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every in-flight connection finished before the deadline.
    Clean,
    /// The deadline elapsed first and connections were abandoned.
    Forced {
        /// Connections still open when the deadline elapsed.
        abandoned: usize,
    },
}

impl DrainOutcome {
    /// Returns `true` for [`DrainOutcome::Forced`].
    #[must_use]
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::Forced { .. })
    }
}

/// Summary of a completed server run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    /// The address the server was bound to.
    pub local_addr: SocketAddr,
    /// Connections open when draining began.
    pub in_flight_at_signal: usize,
    /// How the drain ended.
    pub outcome: DrainOutcome,
    /// Time spent draining.
    pub drain_duration: Duration,
}
