use std::sync::Arc;

use eyre::{Result, WrapErr};
use tokio::{signal, sync::watch};

/// Why the server is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / Ctrl+C
    Interrupt,
    /// SIGTERM
    Terminate,
    /// Triggered programmatically
    Requested,
}

/// Broadcasts a single shutdown event to every server task.
///
/// Tokens created after the event still observe it.
#[derive(Clone)]
pub struct GracefulShutdown {
    state: Arc<watch::Sender<Option<ShutdownReason>>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            state: Arc::new(state),
        }
    }

    /// Check if shutdown has been initiated
    pub fn is_shutdown_initiated(&self) -> bool {
        self.state.borrow().is_some()
    }

    /// Initiate shutdown. Returns `false` if it was already initiated.
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let triggered = self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(reason);
            true
        });
        if triggered {
            tracing::info!("Shutdown initiated: {:?}", reason);
        } else {
            tracing::warn!("Shutdown already initiated, ignoring {:?}", reason);
        }
        triggered
    }

    /// Wait for SIGINT or SIGTERM and initiate shutdown.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("Signal handler started. Listening for SIGTERM and SIGINT");

        tokio::select! {
            result = signal::ctrl_c() => {
                result.wrap_err("Failed to listen for Ctrl+C")?;
                self.trigger(ShutdownReason::Interrupt);
            }
            _ = wait_for_sigterm() => {
                self.trigger(ShutdownReason::Terminate);
            }
        }
        Ok(())
    }

    /// Token resolving once shutdown is initiated
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            receiver: self.state.subscribe(),
        }
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C exists off Unix
    std::future::pending::<()>().await;
}

#[derive(Clone)]
pub struct ShutdownToken {
    receiver: watch::Receiver<Option<ShutdownReason>>,
}

impl ShutdownToken {
    pub fn is_shutdown_initiated(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    /// Resolve once shutdown is initiated.
    pub async fn wait(mut self) -> ShutdownReason {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(ShutdownReason::Requested),
            // Every `GracefulShutdown` handle is gone; nothing can trigger anymore.
            Err(_) => ShutdownReason::Requested,
        }
    }
}
