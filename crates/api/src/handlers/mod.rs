pub mod stats;
pub mod tasks;
pub mod workers;
