//! Graceful Shutdown Handler
//!
//! One shutdown request fans out to every scheduler loop and background task
//! through a [`ShutdownToken`]. The sequence then stops the loops and drains
//! supervised tasks within a bounded time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - skip draining
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Shutdown phase tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// Waiting for scheduler loops to leave their current iteration
    StoppingLoops,
    /// Waiting for watchers and protective-order tasks
    DrainingTasks,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingLoops => write!(f, "stopping_loops"),
            ShutdownPhase::DrainingTasks => write!(f, "draining_tasks"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    timeout: Duration,
    shutdown_requested: AtomicBool,
    signal_tx: watch::Sender<Option<ShutdownSignal>>,
    phase_tx: watch::Sender<ShutdownPhase>,
}

impl GracefulShutdown {
    pub fn new(timeout: Duration) -> Self {
        let (signal_tx, _) = watch::channel(None);
        let (phase_tx, _) = watch::channel(ShutdownPhase::Running);
        Self {
            timeout,
            shutdown_requested: AtomicBool::new(false),
            signal_tx,
            phase_tx,
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_tx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        self.signal_tx.send_replace(Some(signal));
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        self.phase_tx.send_replace(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Token observed by loops and background tasks
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
        }
    }

    /// Run the shutdown sequence once a signal has been requested.
    ///
    /// `stop_loops` resolves when every scheduler loop has exited and
    /// `drain_tasks` when supervised tasks are gone. Each gets what is left
    /// of the overall timeout; an urgent signal skips the drain.
    pub async fn execute<L, D>(&self, stop_loops: L, drain_tasks: D) -> Result<(), ShutdownError>
    where
        L: std::future::Future<Output = ()>,
        D: std::future::Future<Output = bool>,
    {
        let start = tokio::time::Instant::now();
        let deadline = start + self.timeout;
        let signal = *self.signal_tx.borrow();

        info!("Starting graceful shutdown (timeout: {:?})", self.timeout);

        self.set_phase(ShutdownPhase::StoppingLoops);
        if tokio::time::timeout_at(deadline, stop_loops).await.is_err() {
            error!("Scheduler loops did not stop in time");
            self.set_phase(ShutdownPhase::Complete);
            return Err(ShutdownError::Timeout);
        }
        debug!("Scheduler loops stopped");

        self.set_phase(ShutdownPhase::DrainingTasks);
        if signal == Some(ShutdownSignal::Urgent) {
            warn!("Urgent shutdown, background tasks are aborted without draining");
        } else {
            match tokio::time::timeout_at(deadline, drain_tasks).await {
                Ok(true) => info!("Background tasks drained"),
                Ok(false) => warn!("Some background tasks were aborted"),
                Err(_) => warn!("Background task drain timed out, proceeding anyway"),
            }
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());
        Ok(())
    }
}

/// Cheap clonable view of the shutdown state
#[derive(Clone)]
pub struct ShutdownToken {
    signal_rx: watch::Receiver<Option<ShutdownSignal>>,
}

impl ShutdownToken {
    pub fn is_shutdown_requested(&self) -> bool {
        self.signal_rx.borrow().is_some()
    }

    /// Resolve once shutdown is requested. Also resolves if the coordinator
    /// is dropped.
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        loop {
            if let Some(signal) = *self.signal_rx.borrow_and_update() {
                return signal;
            }
            if self.signal_rx.changed().await.is_err() {
                return ShutdownSignal::Urgent;
            }
        }
    }

    /// Sleep for `duration` unless shutdown comes first. Returns `false` when
    /// interrupted.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShutdownError {
    #[error("shutdown timed out")]
    Timeout,
}

/// Install OS signal handlers that request shutdown.
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, urgency) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            match signal(kind) {
                Ok(mut stream) => {
                    tokio::spawn(async move {
                        stream.recv().await;
                        info!("Received {}", name);
                        shutdown.request_shutdown(urgency);
                    });
                }
                Err(e) => error!("Failed to install {} handler: {}", name, e),
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C");
                    shutdown.request_shutdown(ShutdownSignal::Graceful);
                }
                Err(e) => error!("Failed to install Ctrl+C handler: {}", e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_signal_display() {
        assert_eq!(ShutdownSignal::Graceful.to_string(), "graceful");
        assert_eq!(ShutdownSignal::Urgent.to_string(), "urgent");
        assert_eq!(ShutdownPhase::DrainingTasks.to_string(), "draining_tasks");
    }

    #[tokio::test]
    async fn test_shutdown_request_reaches_tokens() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let mut token = shutdown.token();
        let cloned = token.clone();

        assert!(!token.is_shutdown_requested());
        shutdown.request_shutdown(ShutdownSignal::Graceful);
        // Duplicate request keeps the first signal
        shutdown.request_shutdown(ShutdownSignal::Urgent);

        assert!(cloned.is_shutdown_requested());
        assert_eq!(token.wait_for_shutdown().await, ShutdownSignal::Graceful);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_interrupted() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let mut token = shutdown.token();

        let sleeper = tokio::spawn(async move { token.sleep(Duration::from_secs(60)).await });
        tokio::task::yield_now().await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_walks_phases() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        shutdown.execute(async {}, async { true }).await.unwrap();
        assert_eq!(shutdown.current_phase(), ShutdownPhase::Complete);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_times_out_on_stuck_loops() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(1));
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        let stuck = std::future::pending::<()>();
        assert!(matches!(
            shutdown.execute(stuck, async { true }).await,
            Err(ShutdownError::Timeout)
        ));
    }
}
