use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use tokio::sync::{broadcast, RwLock};
use tracing::{instrument, warn};

use crate::{
    error::{Error, Result},
    job_handle::JobHandle,
    types::{FailureKind, JobEvent, JobId, JobRecord, JobStats},
};

pub(crate) const QUEUED_MESSAGE: &str = "Queued";

/// In-memory store of per-scene job records.
///
/// Cheap to clone; clones share the same records and change feed. Every
/// mutation publishes a [`JobEvent`] so observers can follow progress.
#[derive(Clone)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    next_id: Arc<AtomicU64>,
    events: broadcast::Sender<JobEvent>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::with_event_capacity(256)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    pub async fn add(&self, prompt: impl Into<String>) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let record = JobRecord::new(id, prompt.into());

        let mut jobs = self.jobs.write().await;
        jobs.insert(id, record.clone());
        self.publish(JobEvent::Updated(record));

        id
    }

    pub async fn extend<I, S>(&self, prompts: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ids = Vec::new();
        for prompt in prompts {
            ids.push(self.add(prompt).await);
        }
        ids
    }

    pub async fn get(&self, id: JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(&id).cloned()
    }

    /// All records in id order.
    pub async fn snapshot(&self) -> Vec<JobRecord> {
        let jobs = self.jobs.read().await;
        let mut records: Vec<_> = jobs.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    #[instrument(skip(self, prompt), err)]
    pub async fn set_prompt(&self, id: JobId, prompt: impl Into<String>) -> Result<()> {
        self.modify(id, |job| {
            if job.is_running {
                return Err(Error::JobBusy(id));
            }
            job.prompt = prompt.into();
            Ok(())
        })
        .await
    }

    #[instrument(skip(self), err)]
    pub async fn remove(&self, id: JobId) -> Result<JobRecord> {
        let mut jobs = self.jobs.write().await;

        let running = jobs.get(&id).ok_or(Error::JobNotFound(id))?.is_running;
        if running {
            return Err(Error::JobBusy(id));
        }

        let removed = jobs.remove(&id).ok_or(Error::JobNotFound(id))?;
        self.publish(JobEvent::Removed(id));

        Ok(removed)
    }

    /// Jobs without a result that nobody is driving, in id order.
    pub async fn pending_ids(&self) -> Vec<JobId> {
        self.select(JobRecord::is_pending).await
    }

    /// Jobs whose last attempt sequence failed, in id order.
    pub async fn failed_ids(&self) -> Vec<JobId> {
        self.select(JobRecord::is_failed).await
    }

    /// Clear a failed job's error and mark it queued for another batch.
    #[instrument(skip(self), err)]
    pub async fn requeue(&self, id: JobId) -> Result<()> {
        self.modify(id, |job| {
            if job.is_running {
                return Err(Error::JobBusy(id));
            }
            job.last_error = None;
            job.status_message = Some(QUEUED_MESSAGE.to_string());
            Ok(())
        })
        .await
    }

    /// Take exclusive ownership of a job for one attempt sequence.
    ///
    /// Fails with [`Error::JobBusy`] while another handle owns it.
    #[instrument(skip(self), err)]
    pub async fn claim(&self, id: JobId) -> Result<JobHandle> {
        let prompt = self
            .modify(id, |job| {
                if job.is_running {
                    return Err(Error::JobBusy(id));
                }
                job.is_running = true;
                job.last_error = None;
                job.attempts = 0;
                Ok(job.prompt.clone())
            })
            .await?;

        Ok(JobHandle::new(self.clone(), id, prompt))
    }

    pub async fn running_count(&self) -> usize {
        self.jobs.read().await.values().filter(|j| j.is_running).count()
    }

    pub async fn stats(&self) -> JobStats {
        let jobs = self.jobs.read().await;
        let mut stats = JobStats {
            total: jobs.len(),
            ..Default::default()
        };

        for job in jobs.values() {
            if job.is_running {
                stats.running += 1;
            } else if job.result.is_some() {
                stats.succeeded += 1;
            } else if job.last_error.is_some() {
                stats.failed += 1;
            } else {
                stats.pending += 1;
            }
        }

        stats
    }

    /// Apply `f` to one record under the write lock and publish the result.
    pub(crate) async fn modify<F, T>(&self, id: JobId, f: F) -> Result<T>
    where
        F: FnOnce(&mut JobRecord) -> Result<T>,
    {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(Error::JobNotFound(id))?;

        let out = f(job)?;
        self.publish(JobEvent::Updated(job.clone()));

        Ok(out)
    }

    /// Release a job whose handle was dropped mid-sequence.
    ///
    /// Runs from `Drop`, so it cannot wait on the lock. When the lock is busy
    /// the release is finished on the runtime instead.
    pub(crate) fn abandon(&self, id: JobId) {
        if let Ok(mut jobs) = self.jobs.try_write() {
            self.release_abandoned(&mut jobs, id);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = self.clone();
                runtime.spawn(async move {
                    let mut jobs = store.jobs.write().await;
                    store.release_abandoned(&mut jobs, id);
                });
            }
            Err(_) => warn!(job_id = %id, "job handle dropped outside a runtime, record left running"),
        }
    }

    fn release_abandoned(&self, jobs: &mut HashMap<JobId, JobRecord>, id: JobId) {
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };
        if !job.is_running {
            return;
        }

        warn!(job_id = %id, attempts = job.attempts, "job handle dropped before finishing");
        job.is_running = false;
        job.result = None;
        job.last_error = Some(FailureKind::Unknown);
        job.status_message = None;
        self.publish(JobEvent::Updated(job.clone()));
    }

    async fn select(&self, keep: fn(&JobRecord) -> bool) -> Vec<JobId> {
        let jobs = self.jobs.read().await;
        let mut ids: Vec<_> = jobs.values().filter(|j| keep(j)).map(|j| j.id).collect();
        ids.sort();
        ids
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
