use thiserror::Error;

use crate::types::JobId;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job {0} is already running")]
    JobBusy(JobId),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
