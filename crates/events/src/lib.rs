//! Job lifecycle events and their external delivery.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`]: one job transition, carrying a snapshot of the job.
//! - [`WebhookDelivery`]: HTTP POST with retry.
//! - [`NotifyRouter`]: posts each event to the job's `notify_hook`.

pub mod bus;
pub mod delivery;
pub mod notify;

pub use bus::{EventBus, JobEvent, JobEventKind};
pub use delivery::webhook::{WebhookDelivery, WebhookError};
pub use notify::NotifyRouter;
