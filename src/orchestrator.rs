use std::sync::Arc;

use tracing::{info, instrument};

use crate::{
    classifier::ErrorClassifier,
    config::SchedulerConfig,
    credentials::CredentialSignal,
    driver::RetryDriver,
    error::Result,
    generator::ImageGenerator,
    scheduler::{BatchSummary, WorkerPool},
    store::JobStore,
    types::{JobId, Outcome},
};

/// Entry point for the surrounding session: bulk generation, retrying
/// failures and regenerating a single scene.
pub struct Orchestrator {
    store: JobStore,
    driver: RetryDriver,
    pool: WorkerPool,
    credentials: CredentialSignal,
}

impl Orchestrator {
    pub fn new(config: SchedulerConfig, generator: Arc<dyn ImageGenerator>) -> Result<Self> {
        Self::build(config, generator, None)
    }

    pub fn with_classifier(
        config: SchedulerConfig,
        generator: Arc<dyn ImageGenerator>,
        classifier: Arc<dyn ErrorClassifier>,
    ) -> Result<Self> {
        Self::build(config, generator, Some(classifier))
    }

    fn build(
        config: SchedulerConfig,
        generator: Arc<dyn ImageGenerator>,
        classifier: Option<Arc<dyn ErrorClassifier>>,
    ) -> Result<Self> {
        config.validate()?;

        let store = JobStore::with_event_capacity(config.event_capacity);
        let credentials = CredentialSignal::new();

        let mut driver = RetryDriver::new(generator, credentials.clone()).with_policy(config.retry);
        if let Some(classifier) = classifier {
            driver = driver.with_classifier(classifier);
        }
        let pool = WorkerPool::new(store.clone(), driver.clone(), config.concurrency);

        Ok(Self {
            store,
            driver,
            pool,
            credentials,
        })
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    pub fn credentials(&self) -> &CredentialSignal {
        &self.credentials
    }

    /// Generate every scene that has no image yet.
    #[instrument(skip_all)]
    pub async fn generate_all(&self) -> BatchSummary {
        let ids = self.store.pending_ids().await;
        info!(jobs = ids.len(), "generating pending scenes");
        self.pool.run_batch(ids).await
    }

    /// Re-run every scene whose last attempt sequence failed.
    #[instrument(skip_all)]
    pub async fn retry_failed(&self) -> BatchSummary {
        let mut ids = Vec::new();
        for id in self.store.failed_ids().await {
            // A job claimed since the listing is no longer ours to reset.
            if self.store.requeue(id).await.is_ok() {
                ids.push(id);
            }
        }

        info!(jobs = ids.len(), "retrying failed scenes");
        self.pool.run_batch(ids).await
    }

    /// Regenerate one scene directly, outside any batch.
    #[instrument(skip(self), err)]
    pub async fn generate_one(&self, id: JobId) -> Result<Outcome> {
        let handle = self.store.claim(id).await?;
        Ok(self.driver.run(handle).await)
    }
}
