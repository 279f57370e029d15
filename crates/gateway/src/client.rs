//! WebSocket transport for a worker's gateway.
//!
//! [`GatewayClient`] holds the target URL for one worker account. Call
//! [`GatewayClient::connect`] to open a live [`GatewayConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type used by sessions.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection target for one worker account.
pub struct GatewayClient {
    worker_id: String,
    url: String,
}

/// A live WebSocket connection to a gateway.
pub struct GatewayConnection {
    pub worker_id: String,
    /// URL actually dialled (the resume URL after a resumable loss).
    pub url: String,
    pub ws_stream: WsStream,
}

impl GatewayClient {
    pub fn new(worker_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            url: url.into(),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Open the WebSocket. No protocol messages are exchanged here.
    pub async fn connect(&self) -> Result<GatewayConnection, GatewayError> {
        let (ws_stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            GatewayError::Connection(format!("Failed to connect to gateway at {}: {e}", self.url))
        })?;

        tracing::debug!(worker_id = %self.worker_id, url = %self.url, "Gateway socket open");

        Ok(GatewayConnection {
            worker_id: self.worker_id.clone(),
            url: self.url.clone(),
            ws_stream,
        })
    }
}

/// Build the URL to dial for a resume attempt.
///
/// Resume URLs handed out by the gateway carry no query string, so the
/// version/encoding query of the configured URL is carried over.
pub fn resume_url(resume_base: &str, configured: &str) -> String {
    if resume_base.contains('?') {
        return resume_base.to_string();
    }
    match configured.split_once('?') {
        Some((_, query)) => format!("{}/?{query}", resume_base.trim_end_matches('/')),
        None => resume_base.to_string(),
    }
}

/// Errors that can occur when working with the transport.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_url_carries_query() {
        assert_eq!(
            resume_url("wss://resume.example", "wss://gw.example/?v=10&encoding=json"),
            "wss://resume.example/?v=10&encoding=json"
        );
    }

    #[test]
    fn resume_url_with_query_kept() {
        assert_eq!(
            resume_url("wss://resume.example/?v=9", "wss://gw.example/?v=10"),
            "wss://resume.example/?v=9"
        );
    }

    #[test]
    fn resume_url_without_configured_query() {
        assert_eq!(resume_url("ws://127.0.0.1:1", "ws://127.0.0.1:2"), "ws://127.0.0.1:1");
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails() {
        let client = GatewayClient::new("w1", "ws://127.0.0.1:1");
        let result = client.connect().await;
        assert!(matches!(result, Err(GatewayError::Connection(_))));
    }
}
