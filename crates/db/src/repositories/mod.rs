pub mod job_repo;
pub mod worker_repo;

pub use job_repo::JobRepo;
pub use worker_repo::WorkerRepo;
