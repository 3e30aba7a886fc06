//! Bounded background work.
//!
//! Rejection notices and raw-batch archival run off the batch's critical
//! path. `BackgroundTasks` caps how many exist at once (running or not) and
//! gives the host a drain hook so work still in flight when the process
//! winds down is either awaited or explicitly abandoned.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Result of [`BackgroundTasks::drain`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that ran to completion during the drain.
    pub completed: usize,
    /// Tasks that panicked.
    pub failed: usize,
    /// Tasks still running at the deadline; these were aborted.
    pub abandoned: usize,
}

/// Spawns fire-and-forget tasks under a concurrency limit.
///
/// A task holds its permit from spawn until it finishes, so a saturated pool
/// makes callers wait instead of queueing unbounded work.
pub struct BackgroundTasks {
    permits: Arc<Semaphore>,
    tasks: Mutex<JoinSet<()>>,
}

impl BackgroundTasks {
    /// Create a pool running at most `max_concurrency` tasks at once.
    ///
    /// A limit of zero is raised to one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        // A poisoned lock only means another spawn panicked mid-insert;
        // the set itself is still usable.
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn a task once a permit is free.
    pub async fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Ok(permit) = self.permits.clone().acquire_owned().await else {
            warn!(task = name, "Background pool closed, dropping task");
            return;
        };

        let mut tasks = self.tasks();

        // Reap finished tasks so the set doesn't grow across batches
        while let Some(result) = tasks.try_join_next() {
            if let Err(e) = result {
                if e.is_panic() {
                    error!(error = %e, "Background task panicked");
                }
            }
        }

        tasks.spawn(async move {
            let _permit = permit;
            task.await;
            debug!(task = name, "Background task finished");
        });
    }

    /// Number of tasks spawned and not yet reaped.
    pub fn in_flight(&self) -> usize {
        self.tasks().len()
    }

    /// Wait up to `timeout` for every spawned task, then abort the rest.
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut tasks = std::mem::take(&mut *self.tasks());
        let mut report = DrainReport::default();

        if tasks.is_empty() {
            return report;
        }

        let pending = tasks.len();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(()))) => report.completed += 1,
                Ok(Some(Err(e))) => {
                    error!(error = %e, "Background task failed during drain");
                    report.failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    report.abandoned = tasks.len();
                    tasks.abort_all();
                    // Let aborted tasks observe cancellation before returning
                    while tasks.join_next().await.is_some() {}
                    break;
                }
            }
        }

        if report.abandoned > 0 {
            warn!(
                pending = pending,
                completed = report.completed,
                abandoned = report.abandoned,
                "Drain deadline reached, abandoned background tasks"
            );
        } else {
            info!(completed = report.completed, "Background tasks drained");
        }

        report
    }
}

impl Default for BackgroundTasks {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let pool = BackgroundTasks::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = counter.clone();
            pool.spawn("count", async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        let report = pool.drain(Duration::from_secs(5)).await;

        assert_eq!(report.completed, 10);
        assert_eq!(report.abandoned, 0);
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = BackgroundTasks::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = running.clone();
            let peak = peak.clone();
            pool.spawn("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            })
            .await;
        }

        pool.drain(Duration::from_secs(5)).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_drain_abandons_at_deadline() {
        let pool = BackgroundTasks::new(4);
        pool.spawn("quick", async {}).await;
        pool.spawn("stuck", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        })
        .await;

        let report = pool.drain(Duration::from_millis(50)).await;

        assert_eq!(report.completed, 1);
        assert_eq!(report.abandoned, 1);
    }

    #[tokio::test]
    async fn test_panicking_task_counted_as_failed() {
        let pool = BackgroundTasks::new(1);
        pool.spawn("boom", async { panic!("boom") }).await;

        let report = pool.drain(Duration::from_secs(1)).await;
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_spawn_waits_when_pool_is_full() {
        let pool = Arc::new(BackgroundTasks::new(1));
        let (release, hold) = tokio::sync::oneshot::channel::<()>();
        pool.spawn("holder", async move {
            let _ = hold.await;
        })
        .await;

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.spawn("second", async {}).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!waiting.is_finished());
        assert_eq!(pool.in_flight(), 1);

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), waiting)
            .await
            .unwrap()
            .unwrap();
        let report = pool.drain(Duration::from_secs(5)).await;
        assert_eq!(report.failed, 0);
        assert_eq!(report.abandoned, 0);
    }

    #[tokio::test]
    async fn test_drain_empty_pool() {
        let pool = BackgroundTasks::default();
        assert_eq!(pool.drain(Duration::from_millis(1)).await, DrainReport::default());
    }
}
