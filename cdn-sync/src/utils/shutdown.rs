//! Ctrl+C / SIGTERM handling for a running sync.
//!
//! A signal never interrupts an in-flight batch: it cancels a token that the
//! uploader checks before starting the next batch, so the manifest always
//! reflects every completed batch.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shutdown coordinator
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Token observed by the uploader between batches.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task that cancels the token on SIGINT or SIGTERM.
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                reason = wait_for_signal() => {
                    match reason {
                        Ok(name) => info!("Received {}, finishing the current batch before stopping", name),
                        Err(e) => {
                            warn!("Failed to install signal handlers: {}", e);
                            return;
                        }
                    }
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        })
    }

    /// Release the signal listener once the run is over.
    pub fn finish(&self) {
        self.token.cancel();
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = signal::ctrl_c() => res.map(|_| "SIGINT (Ctrl+C)"),
            _ = terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|_| "Ctrl+C")
    }
}
