use crate::{
    error::Result,
    store::JobStore,
    types::{Artifact, FailureKind, JobId},
};

/// Exclusive ownership of one job for a single attempt sequence.
///
/// Obtained from [`JobStore::claim`]. `complete` and `fail` consume the handle
/// and clear `is_running`. A handle dropped without either (its driver was
/// cancelled or panicked) releases the job as failed with
/// [`FailureKind::Unknown`].
pub struct JobHandle {
    store: JobStore,
    id: JobId,
    prompt: String,
    released: bool,
}

impl JobHandle {
    pub(crate) fn new(store: JobStore, id: JobId, prompt: String) -> Self {
        Self {
            store,
            id,
            prompt,
            released: false,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub async fn set_status(&self, message: Option<String>) -> Result<()> {
        self.store
            .modify(self.id, |job| {
                job.status_message = message;
                Ok(())
            })
            .await
    }

    pub(crate) async fn record_attempt(&self, attempt: u32, message: Option<String>) -> Result<()> {
        self.store
            .modify(self.id, |job| {
                job.attempts = attempt;
                job.status_message = message;
                Ok(())
            })
            .await
    }

    pub async fn complete(mut self, artifact: Artifact) -> Result<()> {
        let written = self
            .store
            .modify(self.id, |job| {
                job.result = Some(artifact);
                job.last_error = None;
                job.status_message = None;
                job.is_running = false;
                Ok(())
            })
            .await;
        self.released = true;
        written
    }

    /// End the sequence in `kind`. A previous result is dropped so the record
    /// never shows a success and a failure at once.
    pub async fn fail(mut self, kind: FailureKind) -> Result<()> {
        let written = self
            .store
            .modify(self.id, |job| {
                job.result = None;
                job.last_error = Some(kind);
                job.status_message = None;
                job.is_running = false;
                Ok(())
            })
            .await;
        self.released = true;
        written
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        if !self.released {
            self.store.abandon(self.id);
        }
    }
}
