//! Gateway wire envelope and payloads.
//!
//! Every frame is a JSON object `{"op": n, "d": ..., "s": n?, "t": "EVENT"?}`.
//! Only the opcodes and dispatch events the session state machine and
//! job correlation need are modelled; everything else passes through as
//! raw JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::events::{
    Attachment, ContentKind, ContentUpdate, GatewayEvent, InteractionEvent, InteractionKind,
};

/// Gateway opcodes.
pub mod opcode {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RESUME: u8 = 6;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Dispatch event names.
pub mod event_name {
    pub const READY: &str = "READY";
    pub const RESUMED: &str = "RESUMED";
    pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";
    pub const MESSAGE_UPDATE: &str = "MESSAGE_UPDATE";
    pub const INTERACTION_CREATE: &str = "INTERACTION_CREATE";
    pub const INTERACTION_SUCCESS: &str = "INTERACTION_SUCCESS";
    pub const INTERACTION_FAILURE: &str = "INTERACTION_FAILURE";
}

/// The envelope shared by every gateway frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

/// `op 10` payload.
#[derive(Debug, Clone, Deserialize)]
pub struct HelloData {
    /// Mandated heartbeat interval in milliseconds.
    pub heartbeat_interval: u64,
}

/// The fields of the `READY` dispatch needed for resume.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyData {
    pub session_id: String,
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageData {
    id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    nonce: Option<Value>,
    #[serde(default)]
    message_reference: Option<MessageReference>,
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    author: Option<Author>,
}

#[derive(Debug, Clone, Deserialize)]
struct MessageReference {
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Author {
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct InteractionData {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    nonce: Option<Value>,
}

/// Parse one text frame.
pub fn parse_payload(text: &str) -> Result<GatewayPayload, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn parse_hello(payload: &GatewayPayload) -> Result<HelloData, serde_json::Error> {
    HelloData::deserialize(&payload.d)
}

pub fn parse_ready(payload: &GatewayPayload) -> Result<ReadyData, serde_json::Error> {
    ReadyData::deserialize(&payload.d)
}

/// `d` of an invalid-session frame: whether the session may be resumed.
pub fn invalid_session_resumable(payload: &GatewayPayload) -> bool {
    payload.d.as_bool().unwrap_or(false)
}

pub fn heartbeat(seq: Option<u64>) -> GatewayPayload {
    GatewayPayload {
        op: opcode::HEARTBEAT,
        d: seq.map_or(Value::Null, Value::from),
        s: None,
        t: None,
    }
}

pub fn identify(token: &str, intents: u64) -> GatewayPayload {
    GatewayPayload {
        op: opcode::IDENTIFY,
        d: json!({
            "token": token,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "drawproxy",
                "device": "drawproxy",
            },
            "intents": intents,
        }),
        s: None,
        t: None,
    }
}

pub fn resume(token: &str, session_id: &str, seq: u64) -> GatewayPayload {
    GatewayPayload {
        op: opcode::RESUME,
        d: json!({
            "token": token,
            "session_id": session_id,
            "seq": seq,
        }),
        s: None,
        t: None,
    }
}

/// Map a content-update or interaction dispatch to a [`GatewayEvent`].
///
/// Returns `Ok(None)` for event names the session does not route.
pub fn classify_dispatch(
    name: &str,
    d: &Value,
) -> Result<Option<GatewayEvent>, serde_json::Error> {
    use event_name::*;

    let event = match name {
        MESSAGE_CREATE | MESSAGE_UPDATE => {
            let msg = MessageData::deserialize(d)?;
            GatewayEvent::ContentUpdate(ContentUpdate {
                kind: if name == MESSAGE_CREATE {
                    ContentKind::Created
                } else {
                    ContentKind::Updated
                },
                message_id: msg.id,
                channel_id: msg.channel_id,
                content: msg.content,
                nonce: msg.nonce.map(nonce_text),
                referenced_message_id: msg.message_reference.and_then(|r| r.message_id),
                attachments: msg.attachments,
                from_bot: msg.author.is_some_and(|a| a.bot),
            })
        }
        INTERACTION_CREATE | INTERACTION_SUCCESS | INTERACTION_FAILURE => {
            let data = InteractionData::deserialize(d)?;
            let kind = match name {
                INTERACTION_CREATE => InteractionKind::Created,
                INTERACTION_SUCCESS => InteractionKind::Succeeded,
                _ => InteractionKind::Failed,
            };
            GatewayEvent::Interaction(InteractionEvent {
                kind,
                interaction_id: data.id,
                nonce: data.nonce.map(nonce_text),
            })
        }
        _ => return Ok(None),
    };
    Ok(Some(event))
}

/// Nonces arrive as either strings or numbers.
fn nonce_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_hello_frame() {
        let p = parse_payload(r#"{"op":10,"d":{"heartbeat_interval":41250}}"#).unwrap();
        assert_eq!(p.op, opcode::HELLO);
        assert_eq!(parse_hello(&p).unwrap().heartbeat_interval, 41250);
    }

    #[test]
    fn hello_without_interval_is_malformed() {
        let p = parse_payload(r#"{"op":10,"d":{}}"#).unwrap();
        assert!(parse_hello(&p).is_err());
    }

    #[test]
    fn parse_ready_dispatch() {
        let p = parse_payload(
            r#"{"op":0,"s":1,"t":"READY","d":{"session_id":"abc","resume_gateway_url":"wss://r"}}"#,
        )
        .unwrap();
        assert_eq!(p.s, Some(1));
        assert_eq!(p.t.as_deref(), Some(event_name::READY));
        let ready = parse_ready(&p).unwrap();
        assert_eq!(ready.session_id, "abc");
        assert_eq!(ready.resume_gateway_url.as_deref(), Some("wss://r"));
    }

    #[test]
    fn invalid_session_flag() {
        let p = parse_payload(r#"{"op":9,"d":true}"#).unwrap();
        assert!(invalid_session_resumable(&p));
        let p = parse_payload(r#"{"op":9,"d":false}"#).unwrap();
        assert!(!invalid_session_resumable(&p));
        let p = parse_payload(r#"{"op":9}"#).unwrap();
        assert!(!invalid_session_resumable(&p));
    }

    #[test]
    fn heartbeat_carries_sequence() {
        let json = serde_json::to_value(heartbeat(Some(42))).unwrap();
        assert_eq!(json, serde_json::json!({"op": 1, "d": 42}));
        let json = serde_json::to_value(heartbeat(None)).unwrap();
        assert_eq!(json, serde_json::json!({"op": 1, "d": null}));
    }

    #[test]
    fn identify_and_resume_payloads() {
        let json = serde_json::to_value(identify("tok", 513)).unwrap();
        assert_eq!(json["op"], 2);
        assert_eq!(json["d"]["token"], "tok");
        assert_eq!(json["d"]["intents"], 513);

        let json = serde_json::to_value(resume("tok", "sess", 7)).unwrap();
        assert_eq!(json["op"], 6);
        assert_eq!(json["d"]["session_id"], "sess");
        assert_eq!(json["d"]["seq"], 7);
    }

    #[test]
    fn classify_message_create() {
        let d = serde_json::json!({
            "id": "m1",
            "channel_id": "c1",
            "content": "**a cat** - <@1> (42%) (fast)",
            "nonce": 1234,
            "author": {"bot": true},
            "attachments": [{"url": "https://cdn/x.png", "proxy_url": "https://media/x.png", "filename": "x.png"}]
        });
        let event = classify_dispatch(event_name::MESSAGE_CREATE, &d).unwrap();
        assert_matches!(event, Some(GatewayEvent::ContentUpdate(update)) => {
            assert_eq!(update.kind, ContentKind::Created);
            assert_eq!(update.nonce.as_deref(), Some("1234"));
            assert!(update.from_bot);
            assert_eq!(update.attachments.len(), 1);
            assert_eq!(update.attachments[0].proxy_url.as_deref(), Some("https://media/x.png"));
        });
    }

    #[test]
    fn classify_interaction_failure() {
        let d = serde_json::json!({"id": "i1", "nonce": "job-1"});
        let event = classify_dispatch(event_name::INTERACTION_FAILURE, &d).unwrap();
        assert_matches!(event, Some(GatewayEvent::Interaction(i)) => {
            assert_eq!(i.kind, InteractionKind::Failed);
            assert_eq!(i.nonce.as_deref(), Some("job-1"));
        });
    }

    #[test]
    fn unrouted_dispatch_is_ignored() {
        let d = serde_json::json!({});
        assert!(classify_dispatch("GUILD_CREATE", &d).unwrap().is_none());
    }

    #[test]
    fn message_without_id_is_an_error() {
        let d = serde_json::json!({"content": "x"});
        assert!(classify_dispatch(event_name::MESSAGE_UPDATE, &d).is_err());
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_payload("not json at all").is_err());
    }
}
