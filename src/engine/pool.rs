use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, error, info};
use metrics::gauge;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, PoolError, Result};

/// Job queue depth used by [`GPool::new`].
pub const DEFAULT_QUEUE_DEPTH: usize = 10;

const BACKOFF_STEP: Duration = Duration::from_millis(5);
const MAX_BACKOFF_STEPS: u32 = 20;

type Job = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Bounded-concurrency job scheduler.
///
/// Jobs are queued on a bounded channel and started by a single intake task
/// while fewer than `max_concurrency` are running. A slot is taken before a
/// job starts and released only after it has finished, panics included.
pub struct GPool {
    token: CancellationToken,
    max_concurrency: usize,
    current: Arc<AtomicUsize>,
    sender: mpsc::Sender<Job>,
}

impl GPool {
    /// Must be called inside a tokio runtime.
    pub fn new(token: CancellationToken, capacity: usize) -> Self {
        Self::with_queue_depth(token, capacity, DEFAULT_QUEUE_DEPTH)
    }

    pub fn with_queue_depth(token: CancellationToken, capacity: usize, queue_depth: usize) -> Self {
        let max_concurrency = capacity.max(1);
        let (sender, receiver) = mpsc::channel(queue_depth.max(1));
        let current = Arc::new(AtomicUsize::new(0));

        tokio::spawn(intake(
            token.clone(),
            max_concurrency,
            current.clone(),
            receiver,
        ));

        GPool {
            token,
            max_concurrency,
            current,
            sender,
        }
    }

    /// Queues `job`. Waits while the queue is full; fails with
    /// `PoolError::Cancelled` once the pool's token is cancelled.
    pub async fn do_job<F, Fut>(&self, job: F) -> Result<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let job: Job = Box::new(move || job().boxed());
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::cancelled()),
            res = self.sender.send(job) => res.map_err(|_| PoolError::Closed.into()),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn current_concurrency(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn idle_concurrency(&self) -> usize {
        self.max_concurrency.saturating_sub(self.current_concurrency())
    }
}

/// Releases one slot when dropped.
struct Slot(Arc<AtomicUsize>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
        gauge!("crawlet_pool_active_jobs").decrement(1.0);
    }
}

async fn intake(
    token: CancellationToken,
    max_concurrency: usize,
    current: Arc<AtomicUsize>,
    mut receiver: mpsc::Receiver<Job>,
) {
    info!("Starting job pool with concurrency {max_concurrency}");
    let mut backoff: u32 = 0;

    loop {
        if current.load(Ordering::Acquire) >= max_concurrency {
            backoff = (backoff + 1).min(MAX_BACKOFF_STEPS);
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(BACKOFF_STEP * backoff) => continue,
            }
        }
        backoff = 0;

        let job = tokio::select! {
            _ = token.cancelled() => break,
            job = receiver.recv() => match job {
                Some(job) => job,
                None => {
                    debug!("job queue closed");
                    break;
                }
            },
        };

        current.fetch_add(1, Ordering::AcqRel);
        gauge!("crawlet_pool_active_jobs").increment(1.0);
        let slot = Slot(current.clone());

        tokio::spawn(async move {
            let _slot = slot;
            if let Err(panic) = AssertUnwindSafe(async move { job().await })
                .catch_unwind()
                .await
            {
                error!("pool job panicked: {}", panic_message(panic.as_ref()));
            }
        });
    }

    info!("job pool intake loop ended");
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        timeout(Duration::from_secs(5), async {
            while counter.load(Ordering::SeqCst) < expected {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("jobs did not finish in time");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_two_runs_five_jobs() {
        let pool = Arc::new(GPool::new(CancellationToken::new(), 2));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));
        let observed_over_max = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let (running, peak, done) = (running.clone(), peak.clone(), done.clone());
            let (pool_ref, over) = (pool.clone(), observed_over_max.clone());
            pool.do_job(move || async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                if pool_ref.current_concurrency() > pool_ref.max_concurrency() {
                    over.fetch_add(1, Ordering::SeqCst);
                }
                sleep(Duration::from_millis(50)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        wait_for(&done, 5).await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(observed_over_max.load(Ordering::SeqCst), 0);
        assert_eq!(pool.max_concurrency(), 2);
    }

    #[tokio::test]
    async fn test_never_exceeds_max_under_load() {
        let pool = Arc::new(GPool::with_queue_depth(CancellationToken::new(), 3, 4));
        let done = Arc::new(AtomicUsize::new(0));
        let mut peak = 0;

        let producer = {
            let (pool, done) = (pool.clone(), done.clone());
            tokio::spawn(async move {
                for i in 0..30u64 {
                    let done = done.clone();
                    pool.do_job(move || async move {
                        sleep(Duration::from_millis(1 + i % 7)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
                }
            })
        };

        while done.load(Ordering::SeqCst) < 30 {
            let current = pool.current_concurrency();
            assert!(current <= pool.max_concurrency());
            peak = peak.max(current);
            sleep(Duration::from_millis(1)).await;
        }
        producer.await.unwrap();
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_panic_releases_slot() {
        let pool = GPool::new(CancellationToken::new(), 1);
        let done = Arc::new(AtomicUsize::new(0));

        pool.do_job(|| async { panic!("boom") }).await.unwrap();
        for _ in 0..3 {
            let done = done.clone();
            pool.do_job(move || async move {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();
        }

        wait_for(&done, 3).await;
        timeout(Duration::from_secs(1), async {
            while pool.current_concurrency() != 0 {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pool.idle_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_pool_rejects_jobs() {
        let token = CancellationToken::new();
        let pool = GPool::new(token.clone(), 2);
        token.cancel();

        let err = pool.do_job(|| async {}).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_unblocks_waiting_submitter() {
        let token = CancellationToken::new();
        let pool = Arc::new(GPool::with_queue_depth(token.clone(), 1, 1));
        let (_release, hold) = tokio::sync::oneshot::channel::<()>();

        pool.do_job(move || async move {
            let _ = hold.await;
        })
        .await
        .unwrap();
        pool.do_job(|| async {}).await.unwrap();

        let waiting = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.do_job(|| async {}).await })
        };
        sleep(Duration::from_millis(30)).await;
        assert!(!waiting.is_finished());

        token.cancel();
        let res = timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
        assert!(res.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_panic_message() {
        let panic: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(panic.as_ref()), "static message");
        let panic: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(panic.as_ref()), "owned");
        let panic: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(panic.as_ref()), "unknown panic");
    }
}
