//! Posts job events to the caller's `notify_hook`.
//!
//! [`NotifyRouter`] subscribes to the [`EventBus`](crate::EventBus) and,
//! for every transition of a job that carries a webhook URL, POSTs the
//! job snapshot there. Deliveries run on their own tasks so one slow hook
//! never holds up the others.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::{JobEvent, JobEventKind};
use crate::delivery::webhook::WebhookDelivery;

pub struct NotifyRouter {
    delivery: Arc<WebhookDelivery>,
}

impl NotifyRouter {
    pub fn new(delivery: WebhookDelivery) -> Self {
        Self {
            delivery: Arc::new(delivery),
        }
    }

    /// Run until the bus closes or `cancel` fires.
    pub async fn run(self, mut receiver: broadcast::Receiver<JobEvent>, cancel: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };
            match event {
                Ok(event) => self.route(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Notify router lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, notify router shutting down");
                    break;
                }
            }
        }
    }

    fn route(&self, event: JobEvent) {
        // Creation is answered synchronously by the submit call.
        if event.kind == JobEventKind::Created {
            return;
        }
        let Some(url) = event.job.notify_hook.clone().filter(|u| !u.is_empty()) else {
            return;
        };

        let body = webhook_body(&event);
        let delivery = Arc::clone(&self.delivery);
        let job_id = event.job.id.clone();
        tokio::spawn(async move {
            if let Err(e) = delivery.deliver(&url, &body).await {
                tracing::warn!(job_id = %job_id, url = %url, error = %e, "Job notification not delivered");
            }
        });
    }
}

/// The job snapshot plus the event name.
pub fn webhook_body(event: &JobEvent) -> serde_json::Value {
    let mut body = serde_json::to_value(&event.job).unwrap_or_else(|_| serde_json::json!({}));
    if let Some(obj) = body.as_object_mut() {
        obj.insert("event_type".into(), event.event_type().into());
        obj.insert("event_time".into(), serde_json::json!(event.timestamp));
    }
    body
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use drawproxy_core::job::{Job, JobAction};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    use super::*;
    use crate::bus::EventBus;
    use crate::test_support::read_request;

    #[test]
    fn body_carries_job_and_event_type() {
        let mut job = Job::new(JobAction::Imagine, "a cat", "/imagine a cat");
        job.fail("no eligible worker").unwrap();
        let body = webhook_body(&JobEvent::from_job(&job));
        assert_eq!(body["id"], job.id.as_str());
        assert_eq!(body["status"], "FAILURE");
        assert_eq!(body["event_type"], "job.failed");
        assert_eq!(body["fail_reason"], "no eligible worker");
    }

    #[tokio::test]
    async fn posts_to_notify_hook() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let _ = tx.send(read_request(&mut socket).await);
                let _ = socket
                    .write_all(b"HTTP/1.1 204 No Content\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let router = NotifyRouter::new(WebhookDelivery::new().unwrap());
        let handle = tokio::spawn(router.run(bus.subscribe(), cancel.clone()));

        let mut job = Job::new(JobAction::Imagine, "a cat", "/imagine a cat");
        job.notify_hook = Some(format!("http://{addr}/cb"));
        bus.publish(JobEvent::from_job(&job));
        job.mark_submitted("w1").unwrap();
        bus.publish(JobEvent::from_job(&job));

        let request = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("no webhook call")
            .unwrap();
        assert!(request.starts_with("POST /cb"));
        assert!(request.contains("job.submitted"));

        cancel.cancel();
        handle.await.unwrap();
    }
}
