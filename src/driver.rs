use std::sync::Arc;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    classifier::{ErrorClassifier, FailureSignal, SubstringClassifier},
    config::RetryPolicy,
    credentials::CredentialSignal,
    error::Result,
    generator::ImageGenerator,
    job_handle::JobHandle,
    types::{Artifact, FailureKind, Outcome},
};

/// Drives one claimed job through generation, backoff and retry until it
/// reaches a terminal state.
#[derive(Clone)]
pub struct RetryDriver {
    generator: Arc<dyn ImageGenerator>,
    classifier: Arc<dyn ErrorClassifier>,
    policy: RetryPolicy,
    credentials: CredentialSignal,
}

impl RetryDriver {
    pub fn new(generator: Arc<dyn ImageGenerator>, credentials: CredentialSignal) -> Self {
        Self {
            generator,
            classifier: Arc::new(SubstringClassifier),
            policy: RetryPolicy::default(),
            credentials,
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run the job to a terminal state and release it.
    ///
    /// Never fails: every outcome is written to the job's record.
    #[instrument(skip_all, fields(job_id = %handle.id()))]
    pub async fn run(&self, handle: JobHandle) -> Outcome {
        match self.attempt_sequence(&handle).await {
            Ok(artifact) => {
                info!(%artifact, "scene generated");
                note(handle.complete(artifact).await);
                Outcome::Succeeded
            }
            Err(kind) => {
                note(handle.fail(kind).await);
                Outcome::Failed(kind)
            }
        }
    }

    async fn attempt_sequence(&self, handle: &JobHandle) -> Result<Artifact, FailureKind> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let status = (attempt > 1).then(|| format!("Retrying (attempt {attempt}/{max_attempts})…"));
            note(handle.record_attempt(attempt, status).await);

            debug!(attempt, "requesting image");
            let err = match self.generator.generate(handle.prompt()).await {
                Ok(artifact) => return Ok(artifact),
                Err(err) => err,
            };

            let signal = FailureSignal::from(&err);
            let kind = self.classifier.classify(&signal);

            let wait_secs = match kind {
                FailureKind::RateLimited => self
                    .policy
                    .rate_limit_wait(self.classifier.suggested_retry_delay(&signal)),
                FailureKind::ServiceOverloaded => self.policy.overload_wait(attempt),
                FailureKind::AuthDenied => {
                    error!(attempt, error = %err, "credential rejected");
                    self.credentials.invalidate();
                    return Err(kind);
                }
                _ => {
                    warn!(attempt, %kind, error = %err, "generation failed");
                    return Err(kind);
                }
            };

            if attempt >= max_attempts {
                warn!(attempt, %kind, error = %err, "giving up after max attempts");
                return Err(FailureKind::RetriesExhausted);
            }

            warn!(attempt, %kind, wait_secs, error = %err, "retryable failure, backing off");
            self.countdown(handle, wait_secs).await;
            attempt += 1;
        }
    }

    /// Wait `secs` ticks, publishing the remaining time on each one.
    async fn countdown(&self, handle: &JobHandle, secs: u64) {
        let mut ticks = interval(self.policy.tick());
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

        for remaining in (1..=secs).rev() {
            ticks.tick().await;
            note(handle.set_status(Some(format!("Retrying in {remaining}s…"))).await);
        }
        ticks.tick().await;
    }
}

fn note(result: Result<()>) {
    if let Err(err) = result {
        warn!(error = %err, "failed to update job record");
    }
}
