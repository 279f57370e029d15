//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`JobEvent`]s. It is
//! shared via `Arc<EventBus>` between the dispatch engine and consumers
//! such as the webhook router.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use drawproxy_core::job::{Job, JobStatus};

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Created,
    Submitted,
    Progress,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobEventKind {
    /// The event a job in `status` has just produced.
    pub fn for_status(status: JobStatus) -> Self {
        match status {
            JobStatus::NotStart => JobEventKind::Created,
            JobStatus::Submitted => JobEventKind::Submitted,
            JobStatus::InProgress => JobEventKind::Progress,
            JobStatus::Success => JobEventKind::Succeeded,
            JobStatus::Failure => JobEventKind::Failed,
            JobStatus::Cancel => JobEventKind::Cancelled,
        }
    }

    /// Dot-separated event name, e.g. `"job.succeeded"`.
    pub fn event_type(self) -> &'static str {
        match self {
            JobEventKind::Created => "job.created",
            JobEventKind::Submitted => "job.submitted",
            JobEventKind::Progress => "job.progress",
            JobEventKind::Succeeded => "job.succeeded",
            JobEventKind::Failed => "job.failed",
            JobEventKind::Cancelled => "job.cancelled",
        }
    }
}

/// A job transition, with the job as it looked right after it.
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Event for the status `job` is currently in.
    pub fn from_job(job: &Job) -> Self {
        Self {
            kind: JobEventKind::for_status(job.status),
            job: job.clone(),
            timestamp: Utc::now(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Dropped silently when nobody is subscribed.
    pub fn publish(&self, event: JobEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use drawproxy_core::job::JobAction;

    use super::*;

    fn job() -> Job {
        Job::new(JobAction::Imagine, "a cat", "/imagine a cat")
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let mut j = job();
        j.mark_submitted("w1").unwrap();
        bus.publish(JobEvent::from_job(&j));

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.kind, JobEventKind::Submitted);
        assert_eq!(received.event_type(), "job.submitted");
        assert_eq!(received.job.id, j.id);
        assert_eq!(received.job.worker_id.as_deref(), Some("w1"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(JobEvent::from_job(&job()));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.kind, JobEventKind::Created);
        assert_eq!(e2.job.id, e1.job.id);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(JobEvent::from_job(&job()));
    }

    #[test]
    fn kind_follows_status() {
        assert_eq!(JobEventKind::for_status(JobStatus::Failure), JobEventKind::Failed);
        assert_eq!(JobEventKind::for_status(JobStatus::Cancel).event_type(), "job.cancelled");
    }
}
