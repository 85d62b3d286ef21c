//! Interrupt handling for SIGINT and SIGTERM.
//!
//! The first signal cancels the run token; the orchestrator abandons the
//! current stage and runs its regular cleanup. Later signals are logged and
//! ignored so cleanup is not cut short.

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Turns process signals into cancellation of one run.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Watch for signals until the task is aborted.
    pub async fn watch(self) {
        #[cfg(unix)]
        let mut terminate =
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(stream) => Some(stream),
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    None
                }
            };

        loop {
            #[cfg(unix)]
            let terminated = async {
                match terminate.as_mut() {
                    Some(stream) => {
                        if stream.recv().await.is_none() {
                            std::future::pending::<()>().await;
                        }
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            #[cfg(not(unix))]
            let terminated = std::future::pending::<()>();

            let name = tokio::select! {
                result = signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!("Failed to listen for SIGINT: {}", e);
                        return;
                    }
                    "SIGINT"
                }
                _ = terminated => "SIGTERM",
            };

            self.interrupt(name);
        }
    }

    /// Cancel the run on the first call; report later calls.
    pub fn interrupt(&self, source: &str) {
        if self.token.is_cancelled() {
            warn!("Received {} again, cleanup still in progress", source);
        } else {
            info!("Received {}, interrupting backup", source);
            self.token.cancel();
        }
    }
}
