use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// A submitted job waiting for a worker slot.
struct PendingJob {
    job: JobFuture,
    submitted_at: DateTime<Utc>,
}

/// Snapshot of the pool. Not a consistent read under concurrent mutation;
/// staleness is acceptable for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherStats {
    pub max_workers: usize,
    pub active_workers: usize,
    pub queued_jobs: usize,
    pub available_slots: usize,
}

/// Worker pool running at most `max_workers` batch jobs concurrently,
/// process-wide. Jobs start in FIFO submission order; completion order is
/// whatever job durations make it.
///
/// This is the outer concurrency layer: it caps total scraping pressure
/// across all batch jobs regardless of how many rows each one holds. Slot
/// accounting is a counting semaphore, so the dispatch loop blocks on a free
/// slot instead of polling.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    tx: mpsc::UnboundedSender<PendingJob>,
    shutdown_tx: watch::Sender<bool>,
    max_workers: usize,
    active: AtomicUsize,
    queued: AtomicUsize,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(DispatcherInner {
            tx,
            shutdown_tx,
            max_workers,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            loop_handle: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch_loop(inner.clone(), rx, shutdown_rx));
        // Stash the handle so shutdown can await the loop.
        if let Ok(mut slot) = inner.loop_handle.try_lock() {
            *slot = Some(handle);
        }

        info!("Dispatcher started with {} max concurrent job(s)", max_workers);
        Self { inner }
    }

    /// Enqueue a job. Returns immediately; the queue is unbounded.
    pub fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let pending = PendingJob {
            job: Box::pin(job),
            submitted_at: Utc::now(),
        };
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        if self.inner.tx.send(pending).is_err() {
            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
            warn!("Job submitted after shutdown was dropped");
        } else {
            debug!("Job queued ({} waiting)", self.inner.queued.load(Ordering::SeqCst));
        }
    }

    pub fn stats(&self) -> DispatcherStats {
        let active = self.inner.active.load(Ordering::SeqCst);
        DispatcherStats {
            max_workers: self.inner.max_workers,
            active_workers: active,
            queued_jobs: self.inner.queued.load(Ordering::SeqCst),
            available_slots: self.inner.max_workers.saturating_sub(active),
        }
    }

    /// Stop the dispatch loop and give in-flight jobs a bounded time to
    /// finish. Jobs still queued are dropped.
    pub async fn shutdown(&self) {
        info!("Dispatcher shutting down");
        let _ = self.inner.shutdown_tx.send(true);

        if let Some(handle) = self.inner.loop_handle.lock().await.take() {
            let _ = handle.await;
        }

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while self.inner.active.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
        .await;

        match drained {
            Ok(()) => info!("Dispatcher drained cleanly"),
            Err(_) => warn!(
                "Dispatcher shutdown timed out with {} job(s) still running",
                self.inner.active.load(Ordering::SeqCst)
            ),
        }
    }
}

async fn dispatch_loop(
    inner: Arc<DispatcherInner>,
    mut rx: mpsc::UnboundedReceiver<PendingJob>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let slots = Arc::new(Semaphore::new(inner.max_workers));

    loop {
        let pending = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            pending = rx.recv() => match pending {
                Some(pending) => pending,
                None => break,
            },
        };

        // Blocks here until a worker slot frees up; queued jobs behind this
        // one keep their FIFO position in the channel. Shutdown must be able
        // to interrupt the wait, otherwise a long-running job would delay it.
        let permit = tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        inner.queued.fetch_sub(1, Ordering::SeqCst);
        inner.active.fetch_add(1, Ordering::SeqCst);
        let wait = Utc::now() - pending.submitted_at;
        debug!(
            "Starting job after {}ms in queue (active: {}/{})",
            wait.num_milliseconds(),
            inner.active.load(Ordering::SeqCst),
            inner.max_workers
        );

        let inner_for_job = inner.clone();
        tokio::spawn(async move {
            // An extra task layer so a panicking job surfaces as a JoinError
            // instead of taking anything else down.
            let outcome = tokio::spawn(pending.job).await;
            if let Err(e) = outcome {
                error!("Job crashed: {}", e);
            }

            inner_for_job.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
            debug!(
                "Job finished (active: {}/{})",
                inner_for_job.active.load(Ordering::SeqCst),
                inner_for_job.max_workers
            );
        });
    }

    let waiting = inner.queued.swap(0, Ordering::SeqCst);
    if waiting > 0 {
        warn!("Dropping {} queued job(s) at shutdown", waiting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_jobs_run_and_stats_settle() {
        let dispatcher = Dispatcher::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let counter = counter.clone();
            dispatcher.submit(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while counter.load(Ordering::SeqCst) < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs did not finish");

        let stats = dispatcher.stats();
        assert_eq!(stats.max_workers, 2);
        assert_eq!(stats.active_workers, 0);
        assert_eq!(stats.available_slots, 2);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max_workers() {
        let dispatcher = Dispatcher::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let running = running.clone();
            let peak = peak.clone();
            let done = done.clone();
            dispatcher.submit(async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::timeout(Duration::from_secs(3), async {
            while done.load(Ordering::SeqCst) < 6 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs did not finish");

        assert!(peak.load(Ordering::SeqCst) <= 2, "outer pool bound violated");
    }

    #[tokio::test]
    async fn test_jobs_start_in_submission_order() {
        // One worker means starts are strictly sequential.
        let dispatcher = Dispatcher::new(1);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..4 {
            let order = order.clone();
            let done = done.clone();
            dispatcher.submit(async move {
                order.lock().unwrap().push(i);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while done.load(Ordering::SeqCst) < 4 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("jobs did not finish");

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_panicking_job_does_not_kill_the_pool() {
        let dispatcher = Dispatcher::new(1);
        let done = Arc::new(AtomicUsize::new(0));

        dispatcher.submit(async {
            panic!("job blew up");
        });

        let done_clone = done.clone();
        dispatcher.submit(async move {
            done_clone.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while done.load(Ordering::SeqCst) < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("pool died after a panicking job");

        assert_eq!(dispatcher.stats().active_workers, 0);
    }

    #[tokio::test]
    async fn test_shutdown_drops_queued_jobs() {
        let dispatcher = Dispatcher::new(1);
        let started = Arc::new(AtomicUsize::new(0));

        // One slow job holds the only slot; the rest stay queued.
        {
            let started = started.clone();
            dispatcher.submit(async move {
                started.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
            });
        }
        for _ in 0..3 {
            let started = started.clone();
            dispatcher.submit(async move {
                started.fetch_add(1, Ordering::SeqCst);
            });
        }

        // Let the first job claim its slot before shutting down.
        tokio::time::sleep(Duration::from_millis(30)).await;
        dispatcher.shutdown().await;

        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().queued_jobs, 0);
    }
}
