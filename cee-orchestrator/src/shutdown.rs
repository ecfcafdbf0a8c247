//! Graceful shutdown for the long-running monitor
//!
//! A signal flips a watch channel; background loops select on it and
//! return, and whatever has not stopped within the timeout is aborted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    is_shutting_down: Arc<AtomicBool>,
    /// How long background tasks get to finish
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Idempotent
    pub fn shutdown(&self) {
        if self.is_shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(true);
    }

    /// Block until SIGTERM, SIGINT or SIGQUIT, then start shutdown
    pub async fn wait_for_signal(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = signal(SignalKind::terminate())?;
            let mut sigint = signal(SignalKind::interrupt())?;
            let mut sigquit = signal(SignalKind::quit())?;

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
                _ = sigquit.recv() => info!("Received SIGQUIT"),
            }
        }

        #[cfg(not(unix))]
        {
            tokio::signal::ctrl_c().await?;
            info!("Received Ctrl+C");
        }

        self.shutdown();
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Wait for a task to stop on its own, aborting it after the timeout
    pub async fn drain(&self, name: &str, mut handle: JoinHandle<()>) {
        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(())) => info!(task = %name, "Task stopped"),
            Ok(Err(e)) => warn!(task = %name, error = %e, "Task ended abnormally"),
            Err(_) => {
                warn!(task = %name, timeout_secs = self.timeout.as_secs(), "Task did not stop in time, aborting");
                handle.abort();
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_notifies_subscribers() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();

        assert!(!coordinator.is_shutting_down());
        coordinator.shutdown();

        rx.changed().await.unwrap();
        assert!(*rx.borrow());
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let coordinator = ShutdownCoordinator::new();
        let clone = coordinator.clone();

        clone.shutdown();
        coordinator.shutdown();
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_aborts_stuck_task() {
        let coordinator = ShutdownCoordinator::with_timeout(Duration::from_secs(1));
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        coordinator.drain("stuck", handle).await;
    }

    #[tokio::test]
    async fn test_drain_waits_for_cooperative_task() {
        let coordinator = ShutdownCoordinator::new();
        let mut rx = coordinator.subscribe();
        let handle = tokio::spawn(async move {
            let _ = rx.changed().await;
        });

        coordinator.shutdown();
        coordinator.drain("monitor", handle).await;
    }
}
