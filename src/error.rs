use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum TaskmillError {
    #[error("Invalid callback: {0:?} is not a registered function")]
    InvalidCallback(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Callback {0:?} cannot be resolved in this process")]
    UnresolvableCallback(String),

    #[error("Unknown task function: {0:?}")]
    UnknownFunction(String),

    #[error("Unsupported type for strict serialization: {0}")]
    UnsupportedType(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Job not found: {0}")]
    JobNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, TaskmillError>;
