use serde::{Deserialize, Serialize};

// Identifiers are opaque strings assigned by the backend or the auth service.
macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(UserId);
string_id!(RoomId);
string_id!(MessageId);

impl MessageId {
    /// Fresh client-side id (UUID v4) used to deduplicate our own round-trip.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl RoomId {
    pub fn messages_topic(&self) -> String {
        format!("messages:{}", self.0)
    }

    pub fn presence_topic(&self) -> String {
        format!("presence:{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    Video,
    Audio,
}

impl MessageType {
    /// Map a MIME content type onto the media kind it is displayed as.
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let major = content_type.split('/').next()?.trim().to_ascii_lowercase();
        match major.as_str() {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "text" => Some(Self::Text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Away,
    Offline,
}

/// State of the live feeds for a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Reconnecting { attempt: u32 },
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics_are_room_scoped() {
        let room = RoomId::from("general");
        assert_eq!(room.messages_topic(), "messages:general");
        assert_eq!(room.presence_topic(), "presence:general");
    }

    #[test]
    fn test_message_type_from_content_type() {
        assert_eq!(MessageType::from_content_type("image/png"), Some(MessageType::Image));
        assert_eq!(MessageType::from_content_type("Video/mp4"), Some(MessageType::Video));
        assert_eq!(MessageType::from_content_type("audio/webm"), Some(MessageType::Audio));
        assert_eq!(MessageType::from_content_type("application/pdf"), None);
    }

    #[test]
    fn test_enums_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&MessageType::Audio).unwrap(), "\"audio\"");
        assert_eq!(serde_json::to_string(&PresenceStatus::Away).unwrap(), "\"away\"");
    }

    #[test]
    fn test_generated_ids_are_unique() {
        assert_ne!(MessageId::generate(), MessageId::generate());
    }
}
