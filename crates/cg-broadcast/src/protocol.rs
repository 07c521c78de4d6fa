//! Wire protocol between the broadcaster and its channels.
//!
//! Every frame is a JSON text message of the form
//! `{"type": ..., "payload": ..., "timestamp": <unix ms>}`.
//!
//! ```text
//! client ──► server   subscribe{topics}  unsubscribe{topics}  ping
//! server ──► client   connected{clientId, serverTime}  pong{serverTime}
//!                     change{topic, path, kind}  error{code, message}
//! ```

use camino::Utf8PathBuf;
use cg_watcher::{ChangeEvent, ChangeKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BroadcastError;

/// Topic carried by file change messages unless the publisher picks another.
pub const DEFAULT_TOPIC: &str = "changes";

/// Error code sent when a client frame cannot be understood.
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";

/// A message plus the time it was sent.
///
/// # Examples
///
/// ```
/// use cg_broadcast::{ClientMessage, Envelope};
///
/// let frame = r#"{"type":"subscribe","payload":{"topics":["changes"]},"timestamp":1}"#;
/// let envelope = Envelope::<ClientMessage>::decode(frame).unwrap();
/// assert_eq!(
///     envelope.message,
///     ClientMessage::Subscribe { topics: vec!["changes".to_owned()] }
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<M> {
    /// The typed message (`type` and `payload` on the wire).
    #[serde(flatten)]
    pub message: M,
    /// Sender's clock, milliseconds since the Unix epoch.
    #[serde(default)]
    pub timestamp: i64,
}

impl<M> Envelope<M> {
    /// Wraps `message`, stamped with the current time.
    #[must_use]
    pub fn now(message: M) -> Self {
        Self {
            message,
            timestamp: now_millis(),
        }
    }
}

impl<M: Serialize> Envelope<M> {
    /// Serializes to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<String, BroadcastError> {
        serde_json::to_string(self).map_err(BroadcastError::Encode)
    }
}

impl<M: DeserializeOwned> Envelope<M> {
    /// Parses a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Decode`] for malformed JSON or unknown types.
    pub fn decode(text: &str) -> Result<Self, BroadcastError> {
        serde_json::from_str(text).map_err(BroadcastError::Decode)
    }
}

/// Frames sent by a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Add topics to this connection's filter.
    Subscribe {
        /// Topics to add.
        topics: Vec<String>,
    },
    /// Remove topics from this connection's filter.
    Unsubscribe {
        /// Topics to remove.
        topics: Vec<String>,
    },
    /// Heartbeat. Answered with [`ServerMessage::Pong`].
    Ping,
}

/// A file change as delivered to channels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeMessage {
    /// Topic this change was published on.
    pub topic: String,
    /// Path that changed.
    pub path: Utf8PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
}

impl ChangeMessage {
    /// Builds the wire form of a watcher event.
    #[must_use]
    pub fn from_event(topic: impl Into<String>, event: &ChangeEvent) -> Self {
        Self {
            topic: topic.into(),
            path: event.path.clone(),
            kind: event.kind,
        }
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// First frame on every connection.
    Connected {
        /// Id assigned to this connection.
        client_id: Uuid,
        /// Server clock at accept time, Unix ms.
        server_time: i64,
    },
    /// Reply to [`ClientMessage::Ping`].
    Pong {
        /// Server clock, Unix ms.
        server_time: i64,
    },
    /// A debounced file change.
    Change(ChangeMessage),
    /// Something about the client's last frame was wrong.
    Error {
        /// Machine-readable code, e.g. [`INVALID_MESSAGE`].
        code: String,
        /// Human-readable detail.
        message: String,
    },
}

impl ServerMessage {
    /// Builds an [`ServerMessage::Error`].
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Current wall-clock time in Unix milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_frame_shape() {
        let envelope = Envelope {
            message: ServerMessage::Change(ChangeMessage {
                topic: DEFAULT_TOPIC.to_owned(),
                path: Utf8PathBuf::from("/data/orders.json"),
                kind: ChangeKind::Unlink,
            }),
            timestamp: 1_700_000_000_000,
        };

        insta::assert_json_snapshot!(envelope, @r###"
        {
          "type": "change",
          "payload": {
            "topic": "changes",
            "path": "/data/orders.json",
            "kind": "unlink"
          },
          "timestamp": 1700000000000
        }
        "###);
    }

    #[test]
    fn test_connected_frame_uses_camel_case() {
        let client_id = Uuid::nil();
        let text = Envelope {
            message: ServerMessage::Connected {
                client_id,
                server_time: 5,
            },
            timestamp: 5,
        }
        .encode()
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["type"], "connected");
        assert_eq!(value["payload"]["clientId"], client_id.to_string());
        assert_eq!(value["payload"]["serverTime"], 5);
    }

    #[test]
    fn test_ping_without_payload_or_timestamp() {
        let envelope = Envelope::<ClientMessage>::decode(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(envelope.message, ClientMessage::Ping);
        assert_eq!(envelope.timestamp, 0);
    }

    #[test]
    fn test_server_frames_decode() {
        let text = Envelope::now(ServerMessage::error(INVALID_MESSAGE, "bad")).encode().unwrap();
        let decoded = Envelope::<ServerMessage>::decode(&text).unwrap();
        assert_eq!(decoded.message, ServerMessage::error(INVALID_MESSAGE, "bad"));
        assert!(decoded.timestamp > 0);
    }

    #[test]
    fn test_unknown_type_is_decode_error() {
        let err = Envelope::<ClientMessage>::decode(r#"{"type":"shout","payload":{}}"#).unwrap_err();
        assert!(matches!(err, BroadcastError::Decode(_)));

        let err = Envelope::<ClientMessage>::decode("not json").unwrap_err();
        assert!(matches!(err, BroadcastError::Decode(_)));
    }
}
