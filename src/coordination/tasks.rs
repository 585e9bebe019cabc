//! Supervision of fire-and-forget engine work (timeout watchers, protective
//! orders). Every task observes the shutdown token and is joined on drain.

use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use super::shutdown::ShutdownToken;

pub struct TaskSupervisor {
    tasks: Mutex<JoinSet<()>>,
    token: ShutdownToken,
}

impl TaskSupervisor {
    pub fn new(token: ShutdownToken) -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(JoinSet::new()),
            token,
        })
    }

    /// Token handed to supervised tasks that need to sleep
    pub fn token(&self) -> ShutdownToken {
        self.token.clone()
    }

    /// Spawn `task`; it is dropped at its next await point once shutdown is
    /// requested.
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_shutdown_requested() {
            warn!(task = name, "Shutdown in progress, task not started");
            return;
        }

        let mut token = self.token.clone();
        let mut tasks = self.tasks.lock().await;
        reap_finished(&mut tasks);
        tasks.spawn(async move {
            tokio::select! {
                _ = task => debug!(task = name, "Background task finished"),
                _ = token.wait_for_shutdown() => debug!(task = name, "Background task cancelled"),
            }
        });
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Wait for every task, aborting whatever is still running after
    /// `timeout`. Returns `true` when nothing had to be aborted.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let mut tasks = self.tasks.lock().await;
        let joined = tokio::time::timeout(timeout, async {
            while let Some(result) = tasks.join_next().await {
                log_join(result);
            }
        })
        .await;

        match joined {
            Ok(()) => true,
            Err(_) => {
                warn!(remaining = tasks.len(), "Aborting background tasks");
                tasks.abort_all();
                while tasks.join_next().await.is_some() {}
                false
            }
        }
    }
}

fn reap_finished(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().now_or_never().flatten() {
        log_join(result);
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Background task panicked: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::shutdown::{GracefulShutdown, ShutdownSignal};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn drain_waits_for_finished_work() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let supervisor = TaskSupervisor::new(shutdown.token());
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter = counter.clone();
            supervisor
                .spawn("count", async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        assert!(supervisor.drain(Duration::from_secs(1)).await);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(supervisor.is_empty().await);
    }

    #[tokio::test]
    async fn shutdown_cancels_sleeping_tasks() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let supervisor = TaskSupervisor::new(shutdown.token());

        supervisor
            .spawn("sleeper", tokio::time::sleep(Duration::from_secs(3600)))
            .await;
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        assert!(supervisor.drain(Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn no_new_tasks_after_shutdown() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let supervisor = TaskSupervisor::new(shutdown.token());
        shutdown.request_shutdown(ShutdownSignal::Graceful);

        supervisor.spawn("late", async {}).await;
        assert!(supervisor.is_empty().await);
    }

    #[tokio::test]
    async fn panics_are_contained() {
        let shutdown = GracefulShutdown::new(Duration::from_secs(5));
        let supervisor = TaskSupervisor::new(shutdown.token());

        supervisor.spawn("boom", async { panic!("boom"); }).await;
        assert!(supervisor.drain(Duration::from_secs(1)).await);
    }
}
