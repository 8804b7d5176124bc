use thiserror::Error;

use crate::scheduler::{InstanceId, JobId, JobStatus};

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Instance not found: {0}")]
    InstanceNotFound(InstanceId),

    #[error("Not permitted: {0}")]
    Unauthorized(String),

    #[error("Job {0} already holds a claim on its instance")]
    DuplicateClaim(JobId),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Job store is at capacity")]
    QueueFull,

    #[error("Script generation failed: {0}")]
    ScriptGeneration(String),

    #[error("Failed to spawn benchmark process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Job store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
