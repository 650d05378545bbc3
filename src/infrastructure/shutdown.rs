//! Graceful Shutdown
//!
//! Stops coordinator workers between runs. A run that already started is
//! never cancelled: it holds a [`RunGuard`] and shutdown waits for every
//! guard to drop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;

/// Shutdown coordinator shared by the supervisor and its workers.
#[derive(Clone)]
pub struct ShutdownController {
    initiated: Arc<AtomicBool>,
    /// Coordinator runs currently executing
    in_flight: Arc<AtomicUsize>,
    shutdown_tx: broadcast::Sender<()>,
    drained: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            initiated: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            drained: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to the shutdown broadcast.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.initiated.swap(true, Ordering::SeqCst) {
            tracing::info!(in_flight = self.in_flight_runs(), "initiating graceful shutdown");
            let _ = self.shutdown_tx.send(());
            if self.in_flight_runs() == 0 {
                self.drained.notify_waiters();
            }
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    pub fn in_flight_runs(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Mark a run as started. The returned guard marks it finished on drop.
    pub fn run_guard(&self) -> RunGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        RunGuard {
            controller: self.clone(),
        }
    }

    fn run_finished(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.drained.notify_waiters();
        }
    }

    /// Wait until no run is in flight, or until `timeout` elapses.
    ///
    /// Returns whether the drain completed.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drained.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.in_flight_runs() == 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    in_flight = self.in_flight_runs(),
                    "drain timeout, coordinator runs still active"
                );
                false
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII marker for one in-flight coordinator run.
pub struct RunGuard {
    controller: ShutdownController,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.controller.run_finished();
    }
}

/// Completes when SIGINT or SIGTERM is received, then initiates shutdown.
pub async fn shutdown_signal(controller: ShutdownController) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }

    controller.shutdown();
}
