//! Periodic maintenance loops, each run until its cancellation token
//! fires.

pub mod quota_reset;
pub mod timeout_sweep;
