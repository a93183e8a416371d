//! Process lifecycle state
//!
//! `Starting -> Running -> Stopping -> Terminated`, with `Starting -> Stopping`
//! allowed when a stop arrives before the beat ran. Transitions never go back.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LifecycleState {
    Starting,
    Running,
    Stopping,
    Terminated,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Terminated => "terminated",
        }
    }

    fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Starting, Running) | (Starting, Stopping) | (Running, Stopping) | (Stopping, Terminated)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("invalid lifecycle transition {from} -> {to}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },
}

/// Shared handle to the lifecycle state
///
/// Clones observe the same state. The health server reads it for `/readyz`.
#[derive(Clone)]
pub struct Lifecycle {
    sender: Arc<watch::Sender<LifecycleState>>,
}

impl Lifecycle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(LifecycleState::Starting);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.sender.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Move to `next`, failing if that would go backwards or skip a state
    pub fn transition(&self, next: LifecycleState) -> Result<(), LifecycleError> {
        let mut outcome = Ok(());
        self.sender.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                outcome = Err(LifecycleError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        outcome
    }

    /// Wait until the state reaches at least `target`
    pub async fn wait_for(&self, target: LifecycleState) {
        let mut receiver = self.sender.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = receiver.wait_for(|state| *state >= target).await;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
