//! Graceful shutdown handling for oktabeat
//!
//! Termination signals are registered before the beat starts, so a SIGTERM that
//! arrives right after the readiness marker is still handled by us rather than
//! by the default action (which would kill the process with a non-zero status).

use std::fmt;
use tokio::sync::watch;
use tracing::info;

/// Why the beat was asked to stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal(Signal),
    /// The beat task ended on its own
    BeatExited,
    /// Initialization failed after other tasks were started
    StartupFailed,
    /// The controller went away without sending a reason
    ControllerDropped,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "{}", signal),
            ShutdownReason::BeatExited => write!(f, "beat exited"),
            ShutdownReason::StartupFailed => write!(f, "startup failed"),
            ShutdownReason::ControllerDropped => write!(f, "controller dropped"),
        }
    }
}

/// Receiving half of the shutdown broadcast
///
/// Cloned into every task that must stop when the beat stops.
#[derive(Clone)]
pub struct ShutdownSignal {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownSignal {
    /// Wait until shutdown has been requested and return why
    ///
    /// Returns immediately if it already was.
    pub async fn wait(&mut self) -> ShutdownReason {
        loop {
            let current = *self.receiver.borrow();
            if let Some(reason) = current {
                return reason;
            }
            if self.receiver.changed().await.is_err() {
                let last = *self.receiver.borrow();
                return last.unwrap_or(ShutdownReason::ControllerDropped);
            }
        }
    }
}

/// Sending half of the shutdown broadcast
///
/// Only the first reason sticks.
pub struct ShutdownController {
    sender: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownController {
    pub fn shutdown(&self, reason: ShutdownReason) {
        let first = self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(reason = %reason, "Shutdown signal sent");
        }
    }
}

pub fn shutdown_channel() -> (ShutdownController, ShutdownSignal) {
    let (sender, receiver) = watch::channel(None);
    (ShutdownController { sender }, ShutdownSignal { receiver })
}

/// Termination request received from the OS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Interrupt,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Terminate => write!(f, "SIGTERM"),
            Signal::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Installed SIGTERM/SIGINT handlers
#[cfg(unix)]
pub struct SignalListener {
    sigterm: tokio::signal::unix::Signal,
    sigint: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl SignalListener {
    /// Replace the default SIGTERM/SIGINT actions with our handlers
    pub fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            sigterm: signal(SignalKind::terminate())?,
            sigint: signal(SignalKind::interrupt())?,
        })
    }

    /// Wait for the next SIGTERM or SIGINT
    pub async fn recv(&mut self) -> Signal {
        let signal = tokio::select! {
            _ = self.sigterm.recv() => Signal::Terminate,
            _ = self.sigint.recv() => Signal::Interrupt,
        };
        info!(signal = %signal, "Received termination signal");
        signal
    }
}

/// Ctrl+C handler on non-unix platforms
#[cfg(not(unix))]
pub struct SignalListener {
    _private: (),
}

#[cfg(not(unix))]
impl SignalListener {
    pub fn register() -> std::io::Result<Self> {
        Ok(Self { _private: () })
    }

    pub async fn recv(&mut self) -> Signal {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to wait for Ctrl+C");
        }
        info!("Received Ctrl+C");
        Signal::Interrupt
    }
}
