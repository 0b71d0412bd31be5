// Background Tasks - Bounded, cancellable detached execution

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// Spawns detached jobs that return to the caller immediately. At most
/// `max_concurrency` jobs run at once; the rest wait for a permit.
#[derive(Clone)]
pub struct BackgroundTasks {
    name: &'static str,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl BackgroundTasks {
    pub fn new(name: &'static str, max_concurrency: usize) -> Self {
        Self::with_shutdown(name, max_concurrency, CancellationToken::new())
    }

    /// Share one shutdown token across several task groups.
    pub fn with_shutdown(name: &'static str, max_concurrency: usize, shutdown: CancellationToken) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            name,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Ambient context for a job: cancelled when the group shuts down.
    pub fn context(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permits = self.permits.clone();
        let shutdown = self.shutdown.clone();
        let name = self.name;

        self.tracker.spawn(async move {
            let _permit = tokio::select! {
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
                _ = shutdown.cancelled() => {
                    debug!("{} task dropped before start: shutting down", name);
                    return;
                }
            };
            job.await;
        });
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for every job spawned so far, queued ones included.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Cancel backoff sleeps and in-flight requests of running jobs and
    /// drop jobs still waiting for a permit.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
