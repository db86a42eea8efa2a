use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque handle to a generated image (URL, data URI, storage key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact(String);

impl Artifact {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a generation attempt failed.
///
/// `RateLimited` and `ServiceOverloaded` are retried by the driver and only
/// reach a record's `last_error` indirectly, as `RetriesExhausted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DailyQuotaExceeded,
    RateLimited,
    ServiceOverloaded,
    AuthDenied,
    Unknown,
    RetriesExhausted,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::RateLimited | FailureKind::ServiceOverloaded)
    }

    /// Short tag shown next to a failed scene.
    pub fn label(&self) -> &'static str {
        match self {
            FailureKind::DailyQuotaExceeded => "Daily Quota Exceeded",
            FailureKind::RateLimited => "Rate Limited",
            FailureKind::ServiceOverloaded => "Service Overloaded",
            FailureKind::AuthDenied => "Auth Failed",
            FailureKind::Unknown => "Failed",
            FailureKind::RetriesExhausted => "Max Retries Exceeded",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub prompt: String,
    pub result: Option<Artifact>,
    pub is_running: bool,
    pub last_error: Option<FailureKind>,
    pub status_message: Option<String>,
    pub attempts: u32,
}

impl JobRecord {
    pub(crate) fn new(id: JobId, prompt: String) -> Self {
        Self {
            id,
            prompt,
            result: None,
            is_running: false,
            last_error: None,
            status_message: None,
            attempts: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        !self.is_running && self.result.is_none()
    }

    pub fn is_failed(&self) -> bool {
        !self.is_running && self.last_error.is_some()
    }
}

/// Published by the store on every record mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Updated(JobRecord),
    Removed(JobId),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Terminal outcome of one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(FailureKind),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }
}
