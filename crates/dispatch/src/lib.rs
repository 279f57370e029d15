//! Dispatch engine.
//!
//! - [`pool::WorkerPool`]: registry of workers and their gateway sessions.
//! - [`selection`] and [`admission`]: which worker may take a job right now.
//! - [`dispatcher::Dispatcher`]: job submission, cancellation and the
//!   launch loop that hands admitted jobs to sessions.
//! - [`tracker`]: turns gateway events into job transitions.
//! - [`background`]: daily quota reset and the job timeout sweep.

pub mod admission;
pub mod background;
pub mod command;
pub mod config;
pub mod connector;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod selection;
pub mod tracker;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::DispatchConfig;
pub use dispatcher::Dispatcher;
pub use error::DispatchError;
pub use pool::{WorkerPool, WorkerView};
pub use selection::SelectMode;
