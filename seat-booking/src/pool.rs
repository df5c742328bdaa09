use std::{fmt, future::Future, sync::Arc, time::Duration};

use tokio::{
    sync::{AcquireError, Semaphore},
    task::JoinHandle,
};

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

#[derive(thiserror::Error)]
pub enum DispatchError<W> {
    // A permit was free but no slot has been vacated yet,
    // the work is handed back so the caller can submit it again.
    #[error("no worker slot has been vacated yet")]
    Retry(W),

    #[error("{0}")]
    Closed(#[from] AcquireError),
}

impl<W> fmt::Debug for DispatchError<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry(_) => f.write_str("Retry"),
            Self::Closed(err) => f.debug_tuple("Closed").field(err).finish(),
        }
    }
}

/// A bounded pool of worker tasks.
///
/// At most `max_workers` tasks are alive at once. Each running task holds one
/// permit of the semaphore, so `dispatch` waits for capacity instead of
/// spawning without bound. Finished tasks are reclaimed lazily when their
/// slot is needed again.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    slots: Vec<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(max_workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            slots: (0..max_workers).map(|_| None).collect(),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.slots.len()
    }

    /// Runs `work` on a new worker task.
    ///
    /// Waits while every worker is busy.
    pub async fn dispatch<W>(&mut self, work: W) -> Result<(), DispatchError<W>>
    where
        W: Future<Output = ()> + Send + 'static,
    {
        let permit = self.permits.clone().acquire_owned().await?;

        let Some(slot) = self
            .slots
            .iter_mut()
            .find(|slot| match slot {
                Some(handle) => handle.is_finished(),
                None => true,
            })
        else {
            // the permit was released by a worker that is still winding down
            drop(permit);
            return Err(DispatchError::Retry(work));
        };

        if let Some(finished) = slot.take() {
            if let Err(err) = finished.await {
                tracing::warn!("a worker terminated abnormally: {}", err);
            }
        }

        *slot = Some(tokio::spawn(async move {
            work.await;
            drop(permit);
        }));

        Ok(())
    }

    /// Joins every worker, returns the number of free permits.
    pub async fn wait_all(&mut self) -> usize {
        for slot in self.slots.iter_mut() {
            // keep the handle in place until it has been joined,
            // so an interrupted wait leaves it for `finish` to abort
            if let Some(handle) = slot.as_mut() {
                if let Err(err) = handle.await {
                    tracing::error!("failed to join a worker: {}", err);
                }
            }
            *slot = None;
        }

        self.permits.available_permits()
    }

    /// Waits up to `grace_period` for every worker, then aborts the rest
    /// and closes the pool. Returns whether every worker joined in time.
    pub async fn drain(&mut self, grace_period: Duration) -> bool {
        let joined = match tokio::time::timeout(grace_period, self.wait_all()).await {
            Ok(free) => {
                tracing::debug!(
                    "all workers joined, {} of {} permits free",
                    free,
                    self.max_workers()
                );
                true
            }
            Err(_) => {
                tracing::warn!(
                    "{} workers still running after {:?}, aborting them",
                    self.live_workers(),
                    grace_period
                );
                false
            }
        };

        self.finish();
        joined
    }

    /// Number of workers that have not completed yet.
    pub fn live_workers(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Stops admitting work and aborts whatever is still running.
    pub fn finish(&mut self) {
        self.permits.close();
        for handle in self.slots.iter_mut().filter_map(Option::take) {
            handle.abort();
        }
    }
}

/// Delay between two attempts at re-submitting the same work.
#[derive(Debug)]
pub struct Backoff {
    delay: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            delay: INITIAL_BACKOFF,
        }
    }
}

impl Backoff {
    pub async fn wait(&mut self) {
        tokio::time::sleep(self.delay).await;
        self.delay = (self.delay * 2).min(MAX_BACKOFF);
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use tokio::sync::oneshot;

    use super::{Backoff, DispatchError, WorkerPool};

    // submits until the pool accepts, the way the listener does
    async fn submit<W>(pool: &mut WorkerPool, mut work: W)
    where
        W: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut backoff = Backoff::default();
        loop {
            match pool.dispatch(work).await {
                Ok(()) => return,
                Err(DispatchError::Retry(returned)) => {
                    work = returned;
                    backoff.wait().await;
                }
                Err(err) => panic!("{}", err),
            }
        }
    }

    #[tokio::test]
    async fn never_exceed_max_workers() {
        let mut pool = WorkerPool::new(3);
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..20 {
            let (live, peak, done) = (live.clone(), peak.clone(), done.clone());
            submit(&mut pool, async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
            assert!(pool.live_workers() <= 3);
        }

        assert_eq!(pool.wait_all().await, 3);
        assert_eq!(done.load(Ordering::SeqCst), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.live_workers(), 0);
    }

    #[tokio::test]
    async fn dispatch_waits_for_capacity() {
        let mut pool = WorkerPool::new(1);
        let (release, released) = oneshot::channel::<()>();

        submit(&mut pool, async move {
            let _ = released.await;
        })
        .await;
        assert_eq!(pool.live_workers(), 1);

        // the only worker is busy, so the next dispatch must block
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.dispatch(async {})).await;
        assert!(blocked.is_err());

        release.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(5), submit(&mut pool, async {}))
            .await
            .unwrap();
        assert_eq!(pool.wait_all().await, 1);
    }

    #[tokio::test]
    async fn retry_when_no_slot_is_vacated() {
        let mut pool = WorkerPool::new(1);
        let (release, released) = oneshot::channel::<()>();
        submit(&mut pool, async move {
            let _ = released.await;
        })
        .await;

        // a free permit with every slot still occupied
        pool.permits.add_permits(1);
        let result = pool.dispatch(async {}).await;
        assert!(matches!(result, Err(DispatchError::Retry(_))));
        // the permit went back
        assert_eq!(pool.permits.available_permits(), 1);

        release.send(()).unwrap();
        pool.wait_all().await;
    }

    #[tokio::test]
    async fn finish_closes_the_pool() {
        let mut pool = WorkerPool::new(2);
        submit(&mut pool, std::future::pending()).await;

        pool.finish();
        assert_eq!(pool.live_workers(), 0);
        assert!(matches!(
            pool.dispatch(async {}).await,
            Err(DispatchError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn drain_waits_for_workers_within_grace_period() {
        let mut pool = WorkerPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let done = done.clone();
            submit(&mut pool, async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        }

        assert!(pool.drain(Duration::from_secs(5)).await);
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert!(matches!(
            pool.dispatch(async {}).await,
            Err(DispatchError::Closed(_))
        ));
    }

    #[tokio::test]
    async fn drain_aborts_workers_past_grace_period() {
        let mut pool = WorkerPool::new(2);
        let done = Arc::new(AtomicUsize::new(0));

        let finished = done.clone();
        submit(&mut pool, async move {
            finished.fetch_add(1, Ordering::SeqCst);
        })
        .await;

        // the stuck worker owns the sender, aborting it drops the sender
        let (alive, aborted) = oneshot::channel::<()>();
        submit(&mut pool, async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        })
        .await;

        assert!(!pool.drain(Duration::from_millis(50)).await);
        assert_eq!(pool.live_workers(), 0);
        assert_eq!(done.load(Ordering::SeqCst), 1);

        let dropped = tokio::time::timeout(Duration::from_secs(5), aborted)
            .await
            .unwrap();
        assert!(dropped.is_err());
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let mut backoff = Backoff::default();
        for _ in 0..10 {
            backoff.wait().await;
        }
        assert_eq!(backoff.delay, super::MAX_BACKOFF);
    }
}
