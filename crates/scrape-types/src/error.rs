use thiserror::Error;

/// Error kinds shared across the orchestration core. Every crate boundary
/// funnels its failures into one of these; API-facing code only ever sees
/// `InvalidInput`, `NotFound`, `InvalidTransition`, `JobNotCompleted` and
/// `QueueFull` (see scrape-service for the mapping).
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("invalid transition from {from:?} to {to:?} for job {id}")]
    InvalidTransition {
        id: String,
        from: crate::JobStatus,
        to: crate::JobStatus,
    },

    #[error("job {0} has not reached a completed terminal state")]
    JobNotCompleted(String),

    #[error("queue is at capacity ({0} jobs)")]
    QueueFull(u64),

    #[error("store is unavailable: {0}")]
    StoreUnavailable(String),

    #[error("remote cache is unavailable")]
    RemoteUnavailable,

    #[error("job id {0} collides with an existing job")]
    DuplicateId(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
