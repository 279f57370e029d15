use drawproxy_core::error::CoreError;
use drawproxy_core::job::JobStatus;
use drawproxy_core::store::StoreError;
use drawproxy_core::types::{JobId, WorkerId};
use drawproxy_gateway::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No connected worker satisfies the job's constraints. The job has
    /// been failed.
    #[error("No eligible worker for job {job_id}")]
    NoEligibleWorker { job_id: JobId },

    /// Eligible workers exist but every one is full, paced or out of
    /// quota. The job has been failed; a later retry may succeed.
    #[error("All eligible workers are at capacity (job {job_id})")]
    CapacityExhausted { job_id: JobId },

    /// A child job references a parent that has not succeeded.
    #[error("Parent job {parent_id} is not ready (status {status})")]
    ParentNotReady { parent_id: JobId, status: JobStatus },

    #[error("Worker {worker_id} is not in the pool")]
    WorkerNotFound { worker_id: WorkerId },

    #[error("Session error on worker {worker_id}: {source}")]
    Session {
        worker_id: WorkerId,
        #[source]
        source: SessionError,
    },

    #[error("Worker pool is stopped")]
    Stopped,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Job that was created and failed as part of this rejection.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            DispatchError::NoEligibleWorker { job_id }
            | DispatchError::CapacityExhausted { job_id } => Some(job_id),
            _ => None,
        }
    }
}
