//! Gateway session library.
//!
//! One [`session::Session`] keeps a persistent push-style connection to a
//! worker account's gateway alive: hello/identify (or resume) handshake,
//! jittered heartbeat with ack tracking, dispatch demultiplexing, and
//! reconnect with exponential backoff.

pub mod client;
pub mod events;
pub mod messages;
pub mod reconnect;
pub mod session;

pub use events::{GatewayEvent, GatewayEventHandler};
pub use session::{Session, SessionConfig, SessionError, SessionState, SessionStatus};
