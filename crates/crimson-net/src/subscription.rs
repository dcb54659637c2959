//! Per-room feed supervision.
//!
//! [`SubscriptionManager::subscribe`] spawns one supervisor task per room.
//! The task opens the message and presence feeds, fetches a backfill window,
//! then forwards live events in push order. When either feed drops it waits
//! out the backoff, re-subscribes and backfills again before resuming, so the
//! gap left by the outage is closed by the next backfill. Backfill and live
//! records may overlap; deduplication belongs to the consumer.
//!
//! Every event carries the generation of the subscription that produced it.
//! Unsubscribing aborts the task immediately, and events already queued from
//! an older generation are recognisable with [`SubscriptionManager::is_current`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crimson_shared::constants::{
    DEFAULT_BACKFILL_LIMIT, PRESENCE_SNAPSHOT_LIMIT, RECONNECT_INITIAL_MS, RECONNECT_MAX_MS,
};
use crimson_shared::{
    ConnectionState, MessageRecord, PresenceRecord, Record, RoomId, TransportOp,
};

use crate::backoff::Backoff;
use crate::error::{Result, TransportError};
use crate::transport::{FeedStream, RoomFilter, Topic, Transport};

const FEED_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Messages fetched after every (re)subscribe.
    pub backfill_limit: usize,
    pub presence_limit: usize,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            presence_limit: PRESENCE_SNAPSHOT_LIMIT,
            initial_backoff: Duration::from_millis(RECONNECT_INITIAL_MS),
            max_backoff: Duration::from_millis(RECONNECT_MAX_MS),
        }
    }
}

/// Something a room supervisor observed.
#[derive(Debug, Clone)]
pub struct FeedEvent {
    pub generation: u64,
    pub room_id: RoomId,
    pub kind: FeedEventKind,
}

#[derive(Debug, Clone)]
pub enum FeedEventKind {
    Message {
        op: TransportOp,
        record: MessageRecord,
    },
    Presence {
        op: TransportOp,
        record: PresenceRecord,
    },
    /// Fetched right after the feeds were (re)opened.
    Backfill {
        messages: Vec<MessageRecord>,
        presence: Vec<PresenceRecord>,
    },
    Connection(ConnectionState),
}

struct ActiveSubscription {
    generation: u64,
    task: JoinHandle<()>,
}

pub struct SubscriptionManager {
    transport: Arc<dyn Transport>,
    config: SubscriptionConfig,
    events_tx: mpsc::Sender<FeedEvent>,
    active: HashMap<RoomId, ActiveSubscription>,
    next_generation: u64,
}

impl SubscriptionManager {
    /// Returns the manager and the receiving end of the shared event channel.
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SubscriptionConfig,
    ) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (events_tx, events_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        let manager = Self {
            transport,
            config,
            events_tx,
            active: HashMap::new(),
            next_generation: 0,
        };
        (manager, events_rx)
    }

    /// Open both feeds for `room_id` and return the subscription generation.
    /// Subscribing to a room that is already active returns its generation.
    pub fn subscribe(&mut self, room_id: RoomId) -> u64 {
        if let Some(active) = self.active.get(&room_id) {
            debug!(room = %room_id, generation = active.generation, "already subscribed");
            return active.generation;
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        let feed = RoomFeed {
            transport: Arc::clone(&self.transport),
            room_id: room_id.clone(),
            generation,
            config: self.config.clone(),
            tx: self.events_tx.clone(),
        };
        let task = tokio::spawn(feed.run());

        info!(room = %room_id, generation, "subscribed");
        self.active.insert(room_id, ActiveSubscription { generation, task });
        generation
    }

    /// Release both feeds. Returns `false` when the room was not subscribed.
    pub fn unsubscribe(&mut self, room_id: &RoomId) -> bool {
        match self.active.remove(room_id) {
            Some(active) => {
                active.task.abort();
                info!(room = %room_id, generation = active.generation, "unsubscribed");
                true
            }
            None => {
                debug!(room = %room_id, "unsubscribe on inactive room");
                false
            }
        }
    }

    pub fn generation(&self, room_id: &RoomId) -> Option<u64> {
        self.active.get(room_id).map(|a| a.generation)
    }

    /// Whether `generation` is the live subscription for `room_id`.
    pub fn is_current(&self, room_id: &RoomId, generation: u64) -> bool {
        self.generation(room_id) == Some(generation)
    }

    pub fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.active.contains_key(room_id)
    }

    /// Fetch the most recent `limit` messages of a room, oldest first.
    pub async fn backfill(&self, room_id: &RoomId, limit: usize) -> Result<Vec<MessageRecord>> {
        fetch_messages(self.transport.as_ref(), room_id, limit).await
    }

    /// Publish on the topic the record belongs to.
    pub async fn publish(&self, record: Record) -> Result<()> {
        let topic = Topic::for_record(&record).to_string();
        self.transport.publish(&topic, record).await.map_err(|e| {
            warn!(topic = %topic, error = %e, "publish failed");
            e
        })
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for (_, active) in self.active.drain() {
            active.task.abort();
        }
    }
}

async fn fetch_messages(
    transport: &dyn Transport,
    room_id: &RoomId,
    limit: usize,
) -> Result<Vec<MessageRecord>> {
    let topic = room_id.messages_topic();
    let filter = RoomFilter::new(room_id.clone());
    transport
        .fetch_recent(&topic, &filter, limit)
        .await?
        .into_iter()
        .map(|r| r.into_message(&topic).map_err(TransportError::from))
        .collect()
}

async fn fetch_presence(
    transport: &dyn Transport,
    room_id: &RoomId,
    limit: usize,
) -> Result<Vec<PresenceRecord>> {
    let topic = room_id.presence_topic();
    let filter = RoomFilter::new(room_id.clone());
    transport
        .fetch_recent(&topic, &filter, limit)
        .await?
        .into_iter()
        .map(|r| r.into_presence(&topic).map_err(TransportError::from))
        .collect()
}

enum FeedExit {
    Dropped(TransportError),
    /// The consumer went away; nothing left to do.
    ReceiverGone,
}

struct Connected {
    messages: FeedStream,
    presence: FeedStream,
    backlog: Vec<MessageRecord>,
    snapshot: Vec<PresenceRecord>,
}

struct RoomFeed {
    transport: Arc<dyn Transport>,
    room_id: RoomId,
    generation: u64,
    config: SubscriptionConfig,
    tx: mpsc::Sender<FeedEvent>,
}

impl RoomFeed {
    async fn run(self) {
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            let exit = match self.connect().await {
                Ok(connected) => {
                    backoff.reset();
                    self.serve(connected).await
                }
                Err(e) => FeedExit::Dropped(e),
            };

            match exit {
                FeedExit::ReceiverGone => {
                    debug!(room = %self.room_id, generation = self.generation, "feed consumer gone");
                    return;
                }
                FeedExit::Dropped(e) => {
                    let delay = backoff.next_delay();
                    let attempt = backoff.attempt();
                    warn!(
                        room = %self.room_id,
                        generation = self.generation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "feed dropped, reconnecting"
                    );
                    let state = ConnectionState::Reconnecting { attempt };
                    if !self.emit(FeedEventKind::Connection(state)).await {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Subscribe both feeds, then backfill. Anything published between the
    /// two steps shows up in the live feed, the backfill or both.
    async fn connect(&self) -> Result<Connected> {
        let filter = RoomFilter::new(self.room_id.clone());
        let messages = self
            .transport
            .subscribe(&self.room_id.messages_topic(), &filter)
            .await?;
        let presence = self
            .transport
            .subscribe(&self.room_id.presence_topic(), &filter)
            .await?;

        let backlog =
            fetch_messages(self.transport.as_ref(), &self.room_id, self.config.backfill_limit)
                .await?;
        let snapshot =
            fetch_presence(self.transport.as_ref(), &self.room_id, self.config.presence_limit)
                .await?;

        info!(
            room = %self.room_id,
            generation = self.generation,
            backfill = backlog.len(),
            presence = snapshot.len(),
            "feeds connected"
        );

        Ok(Connected {
            messages,
            presence,
            backlog,
            snapshot,
        })
    }

    async fn serve(&self, connected: Connected) -> FeedExit {
        let Connected {
            mut messages,
            mut presence,
            backlog,
            snapshot,
        } = connected;

        if !self
            .emit(FeedEventKind::Connection(ConnectionState::Connected))
            .await
        {
            return FeedExit::ReceiverGone;
        }
        let backfill = FeedEventKind::Backfill {
            messages: backlog,
            presence: snapshot,
        };
        if !self.emit(backfill).await {
            return FeedExit::ReceiverGone;
        }

        let messages_topic = self.room_id.messages_topic();
        let presence_topic = self.room_id.presence_topic();

        loop {
            let kind = tokio::select! {
                item = messages.next() => match item {
                    Some(Ok(event)) => match event.record.into_message(&messages_topic) {
                        Ok(record) => FeedEventKind::Message { op: event.op, record },
                        Err(e) => {
                            warn!(room = %self.room_id, error = %e, "skipping record");
                            continue;
                        }
                    },
                    Some(Err(e)) => return FeedExit::Dropped(e),
                    None => {
                        return FeedExit::Dropped(TransportError::Disconnected(
                            "message feed closed".into(),
                        ))
                    }
                },
                item = presence.next() => match item {
                    Some(Ok(event)) => match event.record.into_presence(&presence_topic) {
                        Ok(record) => FeedEventKind::Presence { op: event.op, record },
                        Err(e) => {
                            warn!(room = %self.room_id, error = %e, "skipping record");
                            continue;
                        }
                    },
                    Some(Err(e)) => return FeedExit::Dropped(e),
                    None => {
                        return FeedExit::Dropped(TransportError::Disconnected(
                            "presence feed closed".into(),
                        ))
                    }
                },
            };

            if !self.emit(kind).await {
                return FeedExit::ReceiverGone;
            }
        }
    }

    async fn emit(&self, kind: FeedEventKind) -> bool {
        let event = FeedEvent {
            generation: self.generation,
            room_id: self.room_id.clone(),
            kind,
        };
        self.tx.send(event).await.is_ok()
    }
}
