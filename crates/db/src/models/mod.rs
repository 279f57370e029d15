pub mod job;
pub mod worker;

pub use job::JobRow;
pub use worker::WorkerRow;
