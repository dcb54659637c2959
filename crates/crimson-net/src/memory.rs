//! In-process loopback bus.
//!
//! Behaves like the hosted backend closely enough to drive two engines
//! against each other: a message log with primary-key semantics, a presence
//! table with upsert semantics, and per-topic fanout in publish order. Every
//! pushed event goes through the JSON wire encoding. Faults can be injected
//! to exercise reconnect and publish-failure paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crimson_shared::{
    MessageRecord, PresenceRecord, Record, RoomId, TransportEvent, TransportOp, UserId,
};

use crate::error::{Result, TransportError};
use crate::transport::{FeedStream, RoomFilter, Topic, Transport};

struct Subscriber {
    topic: Topic,
    filter: RoomFilter,
    tx: mpsc::UnboundedSender<Result<String>>,
}

#[derive(Default)]
struct Inner {
    messages: Vec<MessageRecord>,
    presence: HashMap<(RoomId, UserId), PresenceRecord>,
    subscribers: Vec<Subscriber>,
    published: HashMap<String, usize>,
    fail_publishes: u32,
    fail_subscribes: u32,
}

/// Cloning shares the same bus.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every live feed. Each subscriber sees one error, then the end of
    /// its stream. Returns the number of feeds dropped.
    pub fn disconnect_all(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.subscribers.len();
        for sub in inner.subscribers.drain(..) {
            let _ = sub
                .tx
                .send(Err(TransportError::Disconnected("loopback reset".into())));
        }
        info!(feeds = dropped, "loopback feeds disconnected");
        dropped
    }

    /// Make the next publish fail.
    pub fn fail_next_publish(&self) {
        self.lock().fail_publishes += 1;
    }

    /// Make the next `n` subscribe calls fail.
    pub fn fail_subscribes(&self, n: u32) {
        self.lock().fail_subscribes = n;
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.tx.is_closed());
        inner.subscribers.len()
    }

    /// Successful publishes on `topic` so far.
    pub fn published(&self, topic: &str) -> usize {
        self.lock().published.get(topic).copied().unwrap_or(0)
    }

    /// Message log of a room, in insertion order.
    pub fn messages(&self, room_id: &RoomId) -> Vec<MessageRecord> {
        self.lock()
            .messages
            .iter()
            .filter(|m| &m.room_id == room_id)
            .cloned()
            .collect()
    }

    pub fn presence(&self, room_id: &RoomId, user_id: &UserId) -> Option<PresenceRecord> {
        self.lock()
            .presence
            .get(&(room_id.clone(), user_id.clone()))
            .cloned()
    }
}

fn parse_topic(topic: &str) -> Result<Topic> {
    Topic::parse(topic).ok_or_else(|| TransportError::UnknownTopic(topic.to_string()))
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str, filter: &RoomFilter) -> Result<FeedStream> {
        let parsed = parse_topic(topic)?;
        let mut inner = self.lock();

        if inner.fail_subscribes > 0 {
            inner.fail_subscribes -= 1;
            return Err(TransportError::Subscribe {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(Subscriber {
            topic: parsed,
            filter: filter.clone(),
            tx,
        });
        debug!(topic, filter = %filter, "loopback subscription opened");

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            let event = item.and_then(|json| Ok(TransportEvent::from_json(&json)?));
            Some((event, rx))
        });
        Ok(stream.boxed())
    }

    async fn publish(&self, topic: &str, record: Record) -> Result<()> {
        let parsed = parse_topic(topic)?;
        let mut guard = self.lock();
        let inner = &mut *guard;

        if inner.fail_publishes > 0 {
            inner.fail_publishes -= 1;
            return Err(TransportError::Publish {
                topic: topic.to_string(),
                reason: "injected failure".into(),
            });
        }

        if record.room_id() != parsed.room_id() {
            return Err(TransportError::Rejected(format!(
                "record for room {} published on {}",
                record.room_id(),
                topic
            )));
        }

        let op = match (&parsed, &record) {
            (Topic::Messages(_), Record::Message(m)) => {
                if inner.messages.iter().any(|existing| existing.id == m.id) {
                    return Err(TransportError::Rejected(format!("duplicate message id {}", m.id)));
                }
                inner.messages.push(m.clone());
                TransportOp::Insert
            }
            (Topic::Presence(_), Record::Presence(p)) => {
                inner
                    .presence
                    .insert((p.room_id.clone(), p.user_id.clone()), p.clone());
                TransportOp::Upsert
            }
            (_, other) => {
                return Err(TransportError::Rejected(format!(
                    "{} record published on {}",
                    other.kind(),
                    topic
                )));
            }
        };

        *inner.published.entry(topic.to_string()).or_default() += 1;

        inner.subscribers.retain(|s| !s.tx.is_closed());
        let matches: Vec<bool> = inner
            .subscribers
            .iter()
            .map(|s| s.topic == parsed && s.filter.matches(&record))
            .collect();
        let json = TransportEvent::new(op, record).to_json()?;

        let mut delivered = 0;
        for (sub, matched) in inner.subscribers.iter().zip(matches) {
            if matched && sub.tx.send(Ok(json.clone())).is_ok() {
                delivered += 1;
            }
        }
        debug!(topic, delivered, "loopback publish");

        Ok(())
    }

    async fn fetch_recent(
        &self,
        topic: &str,
        filter: &RoomFilter,
        limit: usize,
    ) -> Result<Vec<Record>> {
        let parsed = parse_topic(topic)?;
        let inner = self.lock();

        let records = match parsed {
            Topic::Messages(_) => {
                let mut rows: Vec<&MessageRecord> = inner
                    .messages
                    .iter()
                    .filter(|m| m.room_id == filter.room_id)
                    .collect();
                rows.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
                let skip = rows.len().saturating_sub(limit);
                rows.into_iter()
                    .skip(skip)
                    .cloned()
                    .map(Record::Message)
                    .collect()
            }
            Topic::Presence(_) => {
                let mut rows: Vec<&PresenceRecord> = inner
                    .presence
                    .values()
                    .filter(|p| p.room_id == filter.room_id)
                    .collect();
                rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
                rows.into_iter()
                    .take(limit)
                    .cloned()
                    .map(Record::Presence)
                    .collect()
            }
        };

        Ok(records)
    }
}
