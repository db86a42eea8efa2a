use std::{collections::VecDeque, sync::Arc};

use tokio::{sync::Mutex, task::JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    driver::RetryDriver,
    store::JobStore,
    types::{FailureKind, JobId, Outcome},
};

/// Bookkeeping for a finished batch. A batch never fails as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: Vec<JobId>,
    pub failed: Vec<(JobId, FailureKind)>,
    /// Ids that could not be claimed (already running or gone).
    pub skipped: Vec<JobId>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len() + self.skipped.len()
    }

    fn merge(&mut self, other: BatchSummary) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }
}

/// Runs batches of jobs with at most `concurrency` drivers in flight.
#[derive(Clone)]
pub struct WorkerPool {
    store: JobStore,
    driver: RetryDriver,
    concurrency: usize,
}

impl WorkerPool {
    pub fn new(store: JobStore, driver: RetryDriver, concurrency: usize) -> Self {
        Self {
            store,
            driver,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Drive every job in `ids` to a terminal state.
    ///
    /// Jobs start in queue order; each worker pulls the next id as soon as its
    /// current job finishes, so completion order is unconstrained.
    ///
    /// Ids that are already running elsewhere are not driven again. They land
    /// in [`BatchSummary::skipped`] and are still running when this returns;
    /// their current driver finishes them.
    #[instrument(skip_all, fields(jobs = ids.len(), concurrency = self.concurrency))]
    pub async fn run_batch(&self, ids: Vec<JobId>) -> BatchSummary {
        let workers = self.concurrency.min(ids.len());
        let queue = Arc::new(Mutex::new(VecDeque::from(ids)));

        let mut set = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let store = self.store.clone();
            let driver = self.driver.clone();
            set.spawn(work_queue(worker, queue, store, driver));
        }

        let mut summary = BatchSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(part) => summary.merge(part),
                // The worker's claimed job, if any, was released when its handle dropped.
                Err(err) => error!(error = %err, "batch worker aborted"),
            }
        }

        info!(
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            skipped = summary.skipped.len(),
            "batch finished"
        );
        summary
    }
}

async fn work_queue(
    worker: usize,
    queue: Arc<Mutex<VecDeque<JobId>>>,
    store: JobStore,
    driver: RetryDriver,
) -> BatchSummary {
    let mut summary = BatchSummary::default();

    loop {
        // Lock only for the pop so siblings are never blocked on a running job.
        let next = queue.lock().await.pop_front();
        let Some(id) = next else {
            break;
        };

        let handle = match store.claim(id).await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(worker, job_id = %id, error = %err, "skipping job");
                summary.skipped.push(id);
                continue;
            }
        };

        debug!(worker, job_id = %id, "job started");
        match driver.run(handle).await {
            Outcome::Succeeded => summary.succeeded.push(id),
            Outcome::Failed(kind) => summary.failed.push((id, kind)),
        }
    }

    debug!(worker, "queue drained");
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex as StdMutex,
    };

    use async_trait::async_trait;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::{
        credentials::CredentialSignal,
        generator::{GenerationError, ImageGenerator},
        types::Artifact,
    };

    /// Blocks every call until the test hands out a permit.
    struct Gated {
        gate: Semaphore,
        started: StdMutex<Vec<String>>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl Gated {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                gate: Semaphore::new(0),
                started: StdMutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            })
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ImageGenerator for Gated {
        async fn generate(&self, prompt: &str) -> Result<Artifact, GenerationError> {
            self.started.lock().unwrap().push(prompt.to_string());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);

            let permit = self.gate.acquire().await.map_err(|e| GenerationError::new(e.to_string()))?;
            permit.forget();

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if prompt.starts_with("fail") {
                Err(GenerationError::with_status(500, "boom"))
            } else {
                Ok(Artifact::new(format!("img://{prompt}")))
            }
        }
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    fn pool(store: &JobStore, generator: Arc<Gated>, concurrency: usize) -> WorkerPool {
        let driver = RetryDriver::new(generator, CredentialSignal::new());
        WorkerPool::new(store.clone(), driver, concurrency)
    }

    #[tokio::test]
    async fn five_jobs_three_workers_refill_in_order() {
        let store = JobStore::new();
        let ids = store.extend(["s1", "s2", "s3", "s4", "s5"]).await;
        let generator = Gated::new();
        let pool = pool(&store, generator.clone(), 3);

        let batch = tokio::spawn({
            let pool = pool.clone();
            let ids = ids.clone();
            async move { pool.run_batch(ids).await }
        });

        settle().await;
        assert_eq!(generator.started(), vec!["s1", "s2", "s3"]);
        assert_eq!(store.running_count().await, 3);

        generator.gate.add_permits(1);
        settle().await;
        assert_eq!(generator.started(), vec!["s1", "s2", "s3", "s4"]);
        assert_eq!(store.running_count().await, 3);

        generator.gate.add_permits(1);
        settle().await;
        assert_eq!(generator.started().len(), 5);

        generator.gate.add_permits(3);
        let summary = batch.await.unwrap();

        assert_eq!(summary.succeeded.len(), 5);
        assert!(summary.failed.is_empty());
        assert_eq!(generator.peak.load(Ordering::SeqCst), 3);
        for job in store.snapshot().await {
            assert!(job.result.is_some());
            assert!(!job.is_running);
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_batch() {
        let store = JobStore::new();
        let ids = store.extend(["fail-1", "ok-2", "fail-3", "ok-4"]).await;
        let generator = Gated::new();
        generator.gate.add_permits(4);

        let summary = pool(&store, generator, 2).run_batch(ids.clone()).await;

        assert_eq!(summary.total(), 4);
        let mut succeeded = summary.succeeded.clone();
        succeeded.sort();
        assert_eq!(succeeded, vec![ids[1], ids[3]]);
        assert_eq!(summary.failed.len(), 2);
        assert!(summary.failed.iter().all(|(_, kind)| *kind == FailureKind::Unknown));
        assert_eq!(store.failed_ids().await, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn running_jobs_are_skipped_not_duplicated() {
        let store = JobStore::new();
        let ids = store.extend(["a", "b"]).await;
        let held = store.claim(ids[0]).await.unwrap();
        let generator = Gated::new();
        generator.gate.add_permits(2);

        let summary = pool(&store, generator.clone(), 3).run_batch(ids.clone()).await;

        assert_eq!(summary.skipped, vec![ids[0]]);
        assert_eq!(summary.succeeded, vec![ids[1]]);
        assert_eq!(generator.started(), vec!["b"]);
        assert!(store.get(ids[0]).await.unwrap().is_running);
        held.complete(Artifact::new("img://a")).await.unwrap();
    }

    #[tokio::test]
    async fn empty_batch_completes_immediately() {
        let store = JobStore::new();
        let summary = pool(&store, Gated::new(), 3).run_batch(Vec::new()).await;
        assert_eq!(summary, BatchSummary::default());
    }

    #[tokio::test]
    async fn zero_concurrency_still_makes_progress() {
        let store = JobStore::new();
        let ids = store.extend(["x"]).await;
        let generator = Gated::new();
        generator.gate.add_permits(1);

        let pool = pool(&store, generator, 0);
        assert_eq!(pool.concurrency(), 1);
        assert_eq!(pool.run_batch(ids).await.succeeded.len(), 1);
    }
}
