//! The sync engine consumed by the UI.
//!
//! A [`SyncEngine`] is driven from a single task. Inbound feed events, the
//! typing deadline and the presence timers are all processed inside
//! [`SyncEngine::next_event`], and every outbound call takes `&mut self`, so
//! the message store and the presence register only ever change on that one
//! sequence, in arrival order.
//!
//! Sent messages are not echoed locally. They appear once they come back
//! through the live feed like anybody else's.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crimson_net::{FeedEvent, FeedEventKind, SubscriptionManager, Transport};
use crimson_shared::crypto::SymmetricKey;
use crimson_shared::{
    CipherEngine, CipherSuite, ConnectionState, CryptoFailurePolicy, MessageId, MessageRecord,
    MessageType, PresenceRecord, PresenceStatus, Record, RoomId, TransportOp, UserId,
};
use crimson_store::{
    AppendOutcome, ApplyOutcome, ExtendSummary, KeyManager, KeyStatus, Message, MessageStore,
    PresenceReconciler,
};

use crate::auth::{AuthService, Session};
use crate::config::ClientConfig;
use crate::error::SyncError;
use crate::events::EngineEvent;
use crate::media::{BlobStore, MediaError, MediaPolicy};
use crate::typing::TypingDebouncer;

const MIN_TICK: Duration = Duration::from_millis(10);

/// Snapshot returned by [`SyncEngine::encryption_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptionStatus {
    pub enabled: bool,
    pub suite: CipherSuite,
    pub key_len: usize,
    pub key_status: Option<KeyStatus>,
    pub fingerprint: Option<String>,
}

pub struct SyncEngine {
    config: ClientConfig,
    cipher: CipherEngine,
    keys: KeyManager,
    key: Arc<SymmetricKey>,
    session: Session,
    room_id: RoomId,
    generation: u64,
    subscriptions: SubscriptionManager,
    feed_rx: mpsc::Receiver<FeedEvent>,
    messages: MessageStore,
    presence: PresenceReconciler,
    typing: TypingDebouncer,
    connection: ConnectionState,
    blobs: Option<Arc<dyn BlobStore>>,
    media_policy: MediaPolicy,
    sweep: Interval,
    heartbeat: Interval,
}

fn ticker(period: Duration) -> Interval {
    let period = period.max(MIN_TICK);
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl SyncEngine {
    /// Acquire the session and key, subscribe to the configured room, seed
    /// the message log from a backfill and announce the local user online.
    ///
    /// Only a missing session is fatal. A failed backfill or announce is
    /// logged; the feed supervisor backfills again once it connects.
    pub async fn start(
        config: ClientConfig,
        mut keys: KeyManager,
        transport: Arc<dyn Transport>,
        auth: &dyn AuthService,
        blobs: Option<Arc<dyn BlobStore>>,
    ) -> Result<Self, SyncError> {
        let session = auth.acquire_session().await?;
        let key = keys.acquire();

        let cipher = config.cipher();
        let room_id = config.default_room.clone();
        let (mut subscriptions, feed_rx) =
            SubscriptionManager::new(transport, config.subscription_config());
        let generation = subscriptions.subscribe(room_id.clone());

        info!(
            user = %session.user_id,
            room = %room_id,
            encryption = cipher.is_enabled(),
            suite = %cipher.suite(),
            key_persisted = keys.is_persisted(),
            "sync engine starting"
        );

        let mut engine = Self {
            messages: MessageStore::new(
                room_id.clone(),
                cipher,
                config.crypto_failure_policy,
                Arc::clone(&key),
            ),
            presence: PresenceReconciler::new(
                room_id.clone(),
                session.user_id.clone(),
                config.presence_ttl,
            ),
            typing: TypingDebouncer::new(config.typing_debounce),
            media_policy: config.media_policy(),
            sweep: ticker(config.presence_sweep_interval),
            heartbeat: ticker(config.presence_heartbeat_interval),
            connection: ConnectionState::Disconnected,
            config,
            cipher,
            keys,
            key,
            session,
            room_id,
            generation,
            subscriptions,
            feed_rx,
            blobs,
        };

        if let Err(e) = engine.backfill_now().await {
            warn!(room = %engine.room_id, error = %e, "initial backfill failed");
        }
        engine.announce(PresenceStatus::Online).await;

        Ok(engine)
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Wait for the next state change and apply it.
    pub async fn next_event(&mut self) -> EngineEvent {
        loop {
            let typing_deadline = self.typing.next_deadline();

            tokio::select! {
                feed = self.feed_rx.recv() => {
                    let Some(feed) = feed else {
                        self.connection = ConnectionState::Disconnected;
                        return EngineEvent::ConnectionChanged {
                            state: ConnectionState::Disconnected,
                        };
                    };
                    if let Some(event) = self.handle_feed(feed) {
                        return event;
                    }
                }
                _ = sleep_until(typing_deadline) => {
                    if let Some(value) = self.typing.poll(Instant::now()) {
                        return match self.publish_typing(value).await {
                            Ok(()) => EngineEvent::TypingPublished { is_typing: value },
                            Err(e) => EngineEvent::PublishFailed { reason: e.to_string() },
                        };
                    }
                }
                _ = self.sweep.tick() => {
                    let users = self.presence.sweep(Utc::now());
                    if !users.is_empty() {
                        info!(room = %self.room_id, expired = users.len(), "presence expired");
                        return EngineEvent::PresenceExpired { users };
                    }
                }
                _ = self.heartbeat.tick() => {
                    if let Some(event) = self.announce(PresenceStatus::Online).await {
                        return event;
                    }
                }
            }
        }
    }

    /// Apply every feed event already queued, without waiting.
    pub fn drain_pending(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        while let Ok(feed) = self.feed_rx.try_recv() {
            if let Some(event) = self.handle_feed(feed) {
                events.push(event);
            }
        }
        events
    }

    fn handle_feed(&mut self, feed: FeedEvent) -> Option<EngineEvent> {
        let FeedEvent {
            generation,
            room_id,
            kind,
        } = feed;

        if room_id != self.room_id || !self.subscriptions.is_current(&room_id, generation) {
            debug!(room = %room_id, generation, "discarding event from replaced subscription");
            return Some(EngineEvent::StaleDiscarded {
                room_id,
                generation,
            });
        }

        match kind {
            FeedEventKind::Message { op, record } => {
                if op == TransportOp::Delete {
                    debug!(msg_id = %record.id, "ignoring message delete");
                    return None;
                }
                let id = record.id.clone();
                match self.messages.append(record) {
                    AppendOutcome::Inserted { decryption_failed } => {
                        Some(EngineEvent::MessageAppended {
                            id,
                            decryption_failed,
                        })
                    }
                    AppendOutcome::Duplicate => Some(EngineEvent::DuplicateDropped { id }),
                    AppendOutcome::WrongRoom => None,
                }
            }
            FeedEventKind::Presence { op, record } => {
                if op == TransportOp::Delete {
                    debug!(user = %record.user_id, "ignoring presence delete");
                    return None;
                }
                let user_id = record.user_id.clone();
                match self.presence.apply(record) {
                    ApplyOutcome::Applied => Some(EngineEvent::PresenceChanged { user_id }),
                    ApplyOutcome::Stale | ApplyOutcome::WrongRoom => None,
                }
            }
            FeedEventKind::Backfill { messages, presence } => {
                let fetched = messages.len();
                let ExtendSummary {
                    inserted,
                    decryption_failed,
                } = self.messages.extend(messages);
                for record in presence {
                    self.presence.apply(record);
                }
                info!(
                    room = %self.room_id,
                    fetched,
                    inserted,
                    decryption_failed,
                    "feed backfill applied"
                );
                Some(EngineEvent::BackfillApplied {
                    fetched,
                    inserted,
                    decryption_failed,
                })
            }
            FeedEventKind::Connection(state) => {
                info!(room = %self.room_id, state = ?state, "connection state changed");
                self.connection = state.clone();
                Some(EngineEvent::ConnectionChanged { state })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Encrypt (when enabled) and publish a message. Returns its id.
    ///
    /// On `PublishFailed` nothing is stored; calling again retries with a
    /// fresh id.
    pub async fn send_message(
        &mut self,
        text: &str,
        message_type: MessageType,
        media_url: Option<String>,
    ) -> Result<MessageId, SyncError> {
        let (content, encrypted) = self.seal_content(text)?;

        let record = MessageRecord {
            id: MessageId::generate(),
            room_id: self.room_id.clone(),
            sender_id: self.session.user_id.clone(),
            content,
            message_type,
            media_url,
            encrypted,
            created_at: Utc::now(),
        };
        let id = record.id.clone();

        self.subscriptions
            .publish(Record::Message(record))
            .await
            .map_err(SyncError::PublishFailed)?;

        debug!(msg_id = %id, room = %self.room_id, encrypted, "message published");
        Ok(id)
    }

    fn seal_content(&self, text: &str) -> Result<(String, bool), SyncError> {
        if !self.cipher.is_enabled() {
            return Ok((text.to_string(), false));
        }
        match self.cipher.encrypt(text, &self.key) {
            Ok(blob) => Ok((blob, true)),
            Err(e) => match self.config.crypto_failure_policy {
                CryptoFailurePolicy::HardFail => {
                    warn!(room = %self.room_id, error = %e, "encryption failed, message not sent");
                    Err(e.into())
                }
                CryptoFailurePolicy::PlaintextFallback => {
                    warn!(room = %self.room_id, error = %e, "encryption failed, sending plaintext");
                    Ok((text.to_string(), false))
                }
            },
        }
    }

    /// Validate, encrypt and upload a file, then publish a message pointing
    /// at it with `caption` as its text.
    pub async fn send_media(
        &mut self,
        bytes: &[u8],
        content_type: &str,
        caption: &str,
    ) -> Result<MessageId, SyncError> {
        let message_type = self.media_policy.validate(bytes.len(), content_type)?;
        let blobs = self.blobs.clone().ok_or(MediaError::NoBlobStore)?;

        let payload = self.cipher.encrypt_file(bytes, &self.key)?;
        let url = blobs.put(payload, content_type).await?;
        info!(room = %self.room_id, url = %url, size = bytes.len(), "media uploaded");

        self.send_message(caption, message_type, Some(url)).await
    }

    /// Decrypt a blob downloaded from a message's `media_url`.
    pub fn decrypt_media(&self, data: &[u8]) -> Result<Vec<u8>, SyncError> {
        Ok(self.cipher.decrypt_file(data, &self.key)?)
    }

    /// Report whether the local user is typing. Debounced; see
    /// [`TypingDebouncer`].
    pub async fn set_typing(&mut self, is_typing: bool) -> Result<(), SyncError> {
        match self.typing.set_typing(is_typing, Instant::now()) {
            Some(value) => self.publish_typing(value).await,
            None => Ok(()),
        }
    }

    async fn publish_typing(&mut self, value: bool) -> Result<(), SyncError> {
        match self.publish_presence(PresenceStatus::Online, value).await {
            Ok(()) => {
                debug!(room = %self.room_id, is_typing = value, "typing published");
                Ok(())
            }
            Err(e) => {
                self.typing.publish_failed();
                Err(e)
            }
        }
    }

    async fn publish_presence(
        &self,
        status: PresenceStatus,
        is_typing: bool,
    ) -> Result<(), SyncError> {
        let record = PresenceRecord {
            user_id: self.session.user_id.clone(),
            room_id: self.room_id.clone(),
            is_typing,
            last_activity: Utc::now(),
            status,
        };
        self.subscriptions
            .publish(Record::Presence(record))
            .await
            .map_err(SyncError::PublishFailed)
    }

    /// Best-effort presence announce; a failure is logged and reported.
    async fn announce(&mut self, status: PresenceStatus) -> Option<EngineEvent> {
        let is_typing = status == PresenceStatus::Online && self.typing.published();
        match self.publish_presence(status, is_typing).await {
            Ok(()) => None,
            Err(e) => {
                warn!(room = %self.room_id, status = ?status, error = %e, "presence announce failed");
                Some(EngineEvent::PublishFailed {
                    reason: e.to_string(),
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    /// Fetch the backfill window for the current room and merge it.
    pub async fn backfill_now(&mut self) -> Result<ExtendSummary, SyncError> {
        let room_id = self.room_id.clone();
        let generation = self.generation;

        let records = self
            .subscriptions
            .backfill(&room_id, self.config.backfill_limit)
            .await?;

        if room_id != self.room_id || !self.subscriptions.is_current(&room_id, generation) {
            debug!(room = %room_id, generation, "discarding backfill for replaced subscription");
            return Ok(ExtendSummary::default());
        }

        let fetched = records.len();
        let summary = self.messages.extend(records);
        info!(
            room = %room_id,
            fetched,
            inserted = summary.inserted,
            decryption_failed = summary.decryption_failed,
            "backfill applied"
        );
        Ok(summary)
    }

    /// Leave the current room and join `room_id` with empty state.
    pub async fn switch_room(&mut self, room_id: RoomId) {
        if room_id == self.room_id {
            return;
        }

        self.announce(PresenceStatus::Offline).await;
        self.subscriptions.unsubscribe(&self.room_id);
        info!(from = %self.room_id, to = %room_id, "switching room");

        self.room_id = room_id.clone();
        self.messages.reset(room_id.clone());
        self.presence.reset(room_id.clone());
        self.typing.reset();
        self.connection = ConnectionState::Disconnected;
        self.generation = self.subscriptions.subscribe(room_id);

        if let Err(e) = self.backfill_now().await {
            warn!(room = %self.room_id, error = %e, "backfill after room switch failed");
        }
        self.announce(PresenceStatus::Online).await;
    }

    /// Announce offline (best effort) and release the feeds.
    pub async fn shutdown(mut self) {
        self.announce(PresenceStatus::Offline).await;
        self.subscriptions.unsubscribe(&self.room_id);
        info!(room = %self.room_id, user = %self.session.user_id, "sync engine stopped");
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Messages of the current room, ordered by `(created_at, id)`.
    pub fn messages(&self) -> impl Iterator<Item = &Message> + Clone + '_ {
        self.messages.iter()
    }

    pub fn message_store(&self) -> &MessageStore {
        &self.messages
    }

    pub fn presence(&self) -> &PresenceReconciler {
        &self.presence
    }

    /// Other users currently online in the room.
    pub fn online_users(&self) -> Vec<UserId> {
        self.presence
            .online_set(Utc::now())
            .into_iter()
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn typing_users(&self) -> Vec<UserId> {
        self.presence
            .typing_set(Utc::now())
            .into_iter()
            .map(|p| p.user_id.clone())
            .collect()
    }

    pub fn connection_state(&self) -> &ConnectionState {
        &self.connection
    }

    pub fn key_status(&self) -> Option<&KeyStatus> {
        self.keys.status()
    }

    pub fn encryption_status(&self) -> EncryptionStatus {
        EncryptionStatus {
            enabled: self.cipher.is_enabled(),
            suite: self.cipher.suite(),
            key_len: self.key.len(),
            key_status: self.keys.status().cloned(),
            fingerprint: self.keys.fingerprint(),
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Generation of the live subscription; bumps on every room switch.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
