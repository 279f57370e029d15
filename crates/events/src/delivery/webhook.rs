//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookDelivery`] POSTs a JSON body to a caller-supplied URL. Failed
//! attempts are retried after 1 s, 2 s and 4 s.

use std::time::Duration;

/// Retry delays (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

pub struct WebhookDelivery {
    client: reqwest::Client,
    retry_delays: Vec<Duration>,
}

impl WebhookDelivery {
    pub fn new() -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            retry_delays: RETRY_DELAYS.to_vec(),
        })
    }

    /// Override the backoff schedule; one retry per entry.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// POST `body` to `url`, retrying on failure.
    ///
    /// Returns `Ok(())` on the first 2xx response.
    pub async fn deliver(&self, url: &str, body: &serde_json::Value) -> Result<(), WebhookError> {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let err = match self.try_send(url, body).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let Some(delay) = self.retry_delays.get(attempt - 1) else {
                tracing::error!(url, attempt, error = %err, "Webhook delivery failed after all retries");
                return Err(err);
            };
            tracing::warn!(url, attempt, error = %err, "Webhook delivery attempt failed, retrying");
            tokio::time::sleep(*delay).await;
        }
    }

    async fn try_send(&self, url: &str, body: &serde_json::Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(body).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;
    use crate::test_support::read_request;

    /// Minimal HTTP endpoint answering every request with `status`.
    async fn endpoint(status: u16) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {status} X\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}/hook"), hits)
    }

    #[tokio::test]
    async fn delivers_on_first_success() {
        let (url, hits) = endpoint(200).await;
        let delivery = WebhookDelivery::new().unwrap();
        delivery
            .deliver(&url, &serde_json::json!({"id": "job-1"}))
            .await
            .unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_reports_status() {
        let (url, hits) = endpoint(500).await;
        let delivery = WebhookDelivery::new()
            .unwrap()
            .with_retry_delays(vec![Duration::from_millis(10); 3]);

        let result = delivery.deliver(&url, &serde_json::json!({})).await;
        assert!(matches!(result, Err(WebhookError::HttpStatus(500))));
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn webhook_error_display_http_status() {
        let err = WebhookError::HttpStatus(502);
        assert_eq!(err.to_string(), "Webhook returned HTTP 502");
    }
}
