use serde::Serialize;

use crimson_shared::{ConnectionState, MessageId, RoomId, UserId};

/// What changed after one step of [`crate::SyncEngine::next_event`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    MessageAppended {
        id: MessageId,
        decryption_failed: bool,
    },
    DuplicateDropped {
        id: MessageId,
    },
    PresenceChanged {
        user_id: UserId,
    },
    PresenceExpired {
        users: Vec<UserId>,
    },
    TypingPublished {
        is_typing: bool,
    },
    ConnectionChanged {
        state: ConnectionState,
    },
    BackfillApplied {
        fetched: usize,
        inserted: usize,
        /// New records in the batch stored with the failure marker.
        decryption_failed: usize,
    },
    /// Event from a subscription that has since been replaced.
    StaleDiscarded {
        room_id: RoomId,
        generation: u64,
    },
    PublishFailed {
        reason: String,
    },
}

impl EngineEvent {
    /// Event name for UI bridges.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::MessageAppended { .. } => "message-appended",
            EngineEvent::DuplicateDropped { .. } => "duplicate-dropped",
            EngineEvent::PresenceChanged { .. } => "presence-changed",
            EngineEvent::PresenceExpired { .. } => "presence-expired",
            EngineEvent::TypingPublished { .. } => "typing-published",
            EngineEvent::ConnectionChanged { .. } => "connection-changed",
            EngineEvent::BackfillApplied { .. } => "backfill-applied",
            EngineEvent::StaleDiscarded { .. } => "stale-discarded",
            EngineEvent::PublishFailed { .. } => "publish-failed",
        }
    }
}
