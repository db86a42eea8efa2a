//! Bounded-concurrency scene image generation with adaptive retry.
//!
//! A [`JobStore`] holds one record per scene. An [`Orchestrator`] selects
//! which scenes to (re)generate and hands them to a [`WorkerPool`], which keeps
//! at most `concurrency` [`RetryDriver`]s running. Each driver calls the remote
//! [`ImageGenerator`], classifies failures and backs off on rate limits and
//! overloads, publishing a live countdown to the store.

pub mod classifier;
pub mod config;
pub mod credentials;
pub mod driver;
pub mod error;
pub mod generator;
pub mod job_handle;
pub mod orchestrator;
pub mod scheduler;
pub mod store;
pub mod telemetry;
pub mod types;

pub use classifier::{suggested_retry_delay, ErrorClassifier, FailureSignal, SubstringClassifier};
pub use config::{RetryPolicy, SchedulerConfig};
pub use credentials::{CredentialSignal, CredentialState};
pub use driver::RetryDriver;
pub use error::{Error, Result};
pub use generator::{GenerationError, ImageGenerator, PlaceholderGuard};
pub use job_handle::JobHandle;
pub use orchestrator::Orchestrator;
pub use scheduler::{BatchSummary, WorkerPool};
pub use store::JobStore;
pub use types::{Artifact, FailureKind, JobEvent, JobId, JobRecord, JobStats, Outcome};
