/// Durable account identifier of a worker.
pub type WorkerId = String;

/// Job identifiers are UUID strings.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
