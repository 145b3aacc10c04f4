//! # Control channel messages.
//!
//! Every frame carries one JSON [`Message`]:
//!
//! ```text
//! { "kind": "ready"|"command"|"reply"|"event", "id"?: string, "name"?: string,
//!   "payload"?: any, "error"?: string }
//! ```
//!
//! ## Rules
//! - `ready` opens every connection (server → client) with `{pid, title}` as payload.
//! - `command` carries an `id` only when the caller waits for a reply.
//! - `reply` echoes the command `id`; `error` set means the command failed.
//! - `event` never carries an `id` and is fire-and-forget.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Built-in command names.
pub mod commands {
    /// Graceful terminate, no reply.
    pub const KILL: &str = "kill";
    /// Exit so the supervisor brings up a replacement, no reply.
    pub const RESTART: &str = "restart";
    /// Write a heap/memory report; replies with its path.
    pub const HEAPDUMP: &str = "heapdump";
    /// Trigger a collection; replies on completion.
    pub const GC: &str = "gc";
}

/// Message discriminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Ready,
    Command,
    Reply,
    Event,
}

/// One control channel frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of the `ready` handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub pid: u32,
    pub title: String,
}

impl Message {
    fn bare(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            name: None,
            payload: None,
            error: None,
        }
    }

    /// Handshake sent by the managed process on every new connection.
    pub fn ready(pid: u32, title: &str) -> Self {
        let payload = ReadyPayload {
            pid,
            title: title.to_string(),
        };
        Self {
            payload: serde_json::to_value(payload).ok(),
            ..Self::bare(MessageKind::Ready)
        }
    }

    /// Command; `id` is set when a reply is expected.
    pub fn command(name: &str, payload: Option<Value>, id: Option<String>) -> Self {
        Self {
            id,
            name: Some(name.to_string()),
            payload,
            ..Self::bare(MessageKind::Command)
        }
    }

    /// Successful reply to command `id`.
    pub fn reply(id: String, payload: Value) -> Self {
        Self {
            id: Some(id),
            payload: Some(payload),
            ..Self::bare(MessageKind::Reply)
        }
    }

    /// Failed reply to command `id`.
    pub fn failure(id: String, error: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            error: Some(error.into()),
            ..Self::bare(MessageKind::Reply)
        }
    }

    /// Fire-and-forget event.
    pub fn event(name: &str, payload: Option<Value>) -> Self {
        Self {
            name: Some(name.to_string()),
            payload,
            ..Self::bare(MessageKind::Event)
        }
    }

    /// Parses the handshake payload of a `ready` message.
    pub fn ready_payload(&self) -> Option<ReadyPayload> {
        if self.kind != MessageKind::Ready {
            return None;
        }
        self.payload
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_omits_absent_fields() {
        let v = serde_json::to_value(Message::event("gc:start", None)).unwrap();
        assert_eq!(v, json!({"kind": "event", "name": "gc:start"}));

        let v = serde_json::to_value(Message::command("custom:hello", None, Some("7".into())))
            .unwrap();
        assert_eq!(v, json!({"kind": "command", "id": "7", "name": "custom:hello"}));
    }

    #[test]
    fn ready_payload_is_parsed() {
        let msg: Message =
            serde_json::from_value(json!({"kind": "ready", "payload": {"pid": 12, "title": "web"}}))
                .unwrap();
        assert_eq!(
            msg.ready_payload(),
            Some(ReadyPayload {
                pid: 12,
                title: "web".into()
            })
        );
        assert!(Message::reply("1".into(), json!(null)).ready_payload().is_none());
    }
}
