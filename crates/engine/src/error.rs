//! Errors surfaced across the Queue Engine boundary.

use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Transport, availability or state failure reported by a Queue Engine.
///
/// The orchestration layer never retries these; they are surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The job does not exist (never added, or already removed).
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The job was removed while a caller was waiting on it.
    #[error("job removed: {0}")]
    JobRemoved(JobId),

    /// The requested lifecycle transition is invalid for the job's status.
    #[error("cannot {action} job {job_id} while it is {status}")]
    InvalidTransition {
        job_id: JobId,
        action: &'static str,
        status: JobStatus,
    },

    /// The engine could not be reached (connection lost, shut down, ...).
    #[error("engine unavailable: {0}")]
    Unavailable(String),

    /// A payload could not be encoded or decoded.
    #[error("payload error: {0}")]
    Payload(String),
}

impl EngineError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn payload(msg: impl Into<String>) -> Self {
        Self::Payload(msg.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(value: serde_json::Error) -> Self {
        Self::Payload(value.to_string())
    }
}

/// The registered processing function failed for a job.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("job {job_id} failed: {reason}")]
pub struct ProcessingError {
    pub job_id: JobId,
    /// Error message reported by the processing function.
    pub reason: String,
}

/// Outcome error of waiting on a job (`finished`).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Processing(#[from] ProcessingError),
}
