//! The realtime bus as seen by the engine.
//!
//! Two topics exist per room, `messages:{room}` and `presence:{room}`. A
//! subscription yields the `{op, record}` items pushed by the bus in push
//! order; the stream ending or yielding an error means the feed dropped.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crimson_shared::{Record, RoomId, TransportEvent};

use crate::error::Result;

/// Live feed returned by [`Transport::subscribe`].
pub type FeedStream = BoxStream<'static, Result<TransportEvent>>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str, filter: &RoomFilter) -> Result<FeedStream>;

    async fn publish(&self, topic: &str, record: Record) -> Result<()>;

    /// Most recent `limit` records matching `filter`, oldest first.
    async fn fetch_recent(
        &self,
        topic: &str,
        filter: &RoomFilter,
        limit: usize,
    ) -> Result<Vec<Record>>;
}

/// Row filter scoping a feed to one room. Renders as `room_id=eq.{room}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomFilter {
    pub room_id: RoomId,
}

impl RoomFilter {
    pub fn new(room_id: RoomId) -> Self {
        Self { room_id }
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.room_id() == &self.room_id
    }
}

impl fmt::Display for RoomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room_id=eq.{}", self.room_id)
    }
}

/// Parsed topic name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Messages(RoomId),
    Presence(RoomId),
}

impl Topic {
    pub fn parse(topic: &str) -> Option<Self> {
        let (kind, room) = topic.split_once(':')?;
        if room.is_empty() {
            return None;
        }
        match kind {
            "messages" => Some(Topic::Messages(RoomId::from(room))),
            "presence" => Some(Topic::Presence(RoomId::from(room))),
            _ => None,
        }
    }

    /// Topic a record is published on.
    pub fn for_record(record: &Record) -> Self {
        match record {
            Record::Message(m) => Topic::Messages(m.room_id.clone()),
            Record::Presence(p) => Topic::Presence(p.room_id.clone()),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        match self {
            Topic::Messages(room) | Topic::Presence(room) => room,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Messages(room) => f.write_str(&room.messages_topic()),
            Topic::Presence(room) => f.write_str(&room.presence_topic()),
        }
    }
}
