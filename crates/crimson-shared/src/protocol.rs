use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{MessageId, MessageType, PresenceStatus, RoomId, UserId};

/// Row of the `messages` table as it travels over the realtime bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageRecord {
    /// Unique within a room; used for deduplication
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Plaintext, or `base64(nonce || ciphertext || tag)` when `encrypted`
    pub content: String,
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub encrypted: bool,
    /// ISO-8601 on the wire
    pub created_at: DateTime<Utc>,
}

/// Row of the `user_presence` table; one per (user, room).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub room_id: RoomId,
    pub is_typing: bool,
    pub last_activity: DateTime<Utc>,
    pub status: PresenceStatus,
}

/// Any record carried by a feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Record {
    Message(MessageRecord),
    Presence(PresenceRecord),
}

impl Record {
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Message(_) => "message",
            Record::Presence(_) => "presence",
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Record::Message(m) => &m.room_id,
            Record::Presence(p) => &p.room_id,
        }
    }

    pub fn into_message(self, topic: &str) -> Result<MessageRecord, ProtocolError> {
        match self {
            Record::Message(m) => Ok(m),
            other => Err(ProtocolError::UnexpectedRecord {
                topic: topic.to_string(),
                kind: other.kind(),
            }),
        }
    }

    pub fn into_presence(self, topic: &str) -> Result<PresenceRecord, ProtocolError> {
        match self {
            Record::Presence(p) => Ok(p),
            other => Err(ProtocolError::UnexpectedRecord {
                topic: topic.to_string(),
                kind: other.kind(),
            }),
        }
    }
}

/// Change operation reported by the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransportOp {
    Insert,
    Update,
    Upsert,
    Delete,
}

/// One `{op, record}` item pushed by a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportEvent {
    pub op: TransportOp,
    pub record: Record,
}

impl TransportEvent {
    pub fn new(op: TransportOp, record: Record) -> Self {
        Self { op, record }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize from JSON
    pub fn from_json(data: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_record_wire_shape() {
        let json = r#"{
            "id": "m-1",
            "room_id": "general",
            "sender_id": "u-1",
            "content": "aGVsbG8=",
            "message_type": "text",
            "encrypted": true,
            "created_at": "2024-05-01T12:00:00.000Z"
        }"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, MessageId::from("m-1"));
        assert_eq!(record.media_url, None);
        assert!(record.encrypted);

        let back = serde_json::to_value(&record).unwrap();
        assert!(back.get("media_url").is_none());
        assert_eq!(back["message_type"], "text");
    }

    #[test]
    fn test_untagged_record_picks_presence() {
        let json = r#"{
            "op": "UPSERT",
            "record": {
                "user_id": "u-2",
                "room_id": "general",
                "is_typing": true,
                "last_activity": "2024-05-01T12:00:05Z",
                "status": "online"
            }
        }"#;
        let event = TransportEvent::from_json(json).unwrap();
        assert_eq!(event.op, TransportOp::Upsert);
        match event.record {
            Record::Presence(p) => {
                assert!(p.is_typing);
                assert_eq!(p.status, PresenceStatus::Online);
            }
            other => panic!("expected presence, got {}", other.kind()),
        }
    }

    #[test]
    fn test_into_message_rejects_presence() {
        let record = Record::Presence(PresenceRecord {
            user_id: "u".into(),
            room_id: "r".into(),
            is_typing: false,
            last_activity: Utc::now(),
            status: PresenceStatus::Offline,
        });
        assert!(record.into_message("messages:r").is_err());
    }
}
