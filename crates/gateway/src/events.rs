//! Events a session reports to its owner.
//!
//! The session only decodes and routes; interpreting these events as
//! job transitions is the job of whatever implements
//! [`GatewayEventHandler`].

use serde::{Deserialize, Serialize};

/// An event originating from one worker's gateway session.
#[derive(Debug, Clone, Serialize)]
pub enum GatewayEvent {
    /// The session reached READY (after identify or resume).
    Connected { resumed: bool },

    /// A READY session lost its connection or was closed.
    ///
    /// `resumable` is true when the next connection will attempt to
    /// resume, so in-flight remote work may still report back.
    /// `connection` is the [`SessionStatus::connections`] value the lost
    /// connection had while READY.
    ///
    /// [`SessionStatus::connections`]: crate::SessionStatus::connections
    Disconnected { resumable: bool, connection: u64 },

    /// A bot message was created or edited.
    ContentUpdate(ContentUpdate),

    /// Acknowledgment of a button/modal/command interaction.
    Interaction(InteractionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentKind {
    Created,
    Updated,
}

/// Content update (message create/update) as seen by the session.
#[derive(Debug, Clone, Serialize)]
pub struct ContentUpdate {
    pub kind: ContentKind,
    pub message_id: String,
    pub channel_id: String,
    pub content: String,
    pub nonce: Option<String>,
    /// Message this one replies to, when present.
    pub referenced_message_id: Option<String>,
    pub attachments: Vec<Attachment>,
    pub from_bot: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InteractionKind {
    Created,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct InteractionEvent {
    pub kind: InteractionKind,
    pub interaction_id: Option<String>,
    pub nonce: Option<String>,
}

/// Receiver for session events.
///
/// Called synchronously from the session's read loop, so implementations
/// must not block; forward into a channel for anything slow. A panic in
/// here fails the connection (it is then re-established) rather than
/// crashing the process.
pub trait GatewayEventHandler: Send + Sync + 'static {
    fn on_event(&self, worker_id: &str, event: GatewayEvent);
}

/// Handler that drops every event.
pub struct NoopHandler;

impl GatewayEventHandler for NoopHandler {
    fn on_event(&self, _worker_id: &str, _event: GatewayEvent) {}
}
