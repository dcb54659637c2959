//! Domain models held by the store.
//!
//! Every struct derives `Serialize` so it can be handed directly to the UI
//! layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crimson_shared::crypto::SymmetricKey;
use crimson_shared::{MessageId, MessageType, RoomId, UserId};

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A chat message after decryption.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    /// Decrypted text, or a failure marker when `decryption_failed` is set.
    pub content: String,
    pub message_type: MessageType,
    /// URL of the (encrypted) media blob, owned by the blob store.
    pub media_url: Option<String>,
    /// Whether the content was encrypted on the wire.
    pub encrypted: bool,
    pub created_at: DateTime<Utc>,
    /// Set when the ciphertext could not be authenticated or decoded.
    pub decryption_failed: bool,
}

impl Message {
    /// Ordering key: creation time, then id for equal timestamps.
    pub fn sort_key(&self) -> (DateTime<Utc>, MessageId) {
        (self.created_at, self.id.clone())
    }
}

// ---------------------------------------------------------------------------
// Key slot
// ---------------------------------------------------------------------------

/// Contents of the persisted key slot.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredKey {
    /// Layout version, so rotation can be added without breaking installs.
    pub format_version: u32,
    pub key: SymmetricKey,
    pub created_at: DateTime<Utc>,
}

// Never print key material.
impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("format_version", &self.format_version)
            .field("key", &"<redacted>")
            .field("created_at", &self.created_at)
            .finish()
    }
}
