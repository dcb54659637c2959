//! Deduplicated, time-ordered log of decrypted messages for one room.
//!
//! Backfill and the live feed overlap after every reconnect, so the same
//! record routinely arrives twice. Membership is checked against a hash index
//! before any decryption work is done; the ordered view is a `BTreeMap` keyed
//! by `(created_at, id)`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crimson_shared::constants::DECRYPTION_FAILED_MARKER;
use crimson_shared::crypto::SymmetricKey;
use crimson_shared::{CipherEngine, CryptoFailurePolicy, MessageId, MessageRecord, RoomId};

use crate::models::Message;

/// Result of [`MessageStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted { decryption_failed: bool },
    Duplicate,
    /// The record belongs to another room and was ignored.
    WrongRoom,
}

/// Result of [`MessageStore::extend`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtendSummary {
    pub inserted: usize,
    /// Inserted records whose content could not be decrypted.
    pub decryption_failed: usize,
}

pub struct MessageStore {
    room_id: RoomId,
    cipher: CipherEngine,
    policy: CryptoFailurePolicy,
    key: Arc<SymmetricKey>,
    index: HashMap<MessageId, DateTime<Utc>>,
    ordered: BTreeMap<(DateTime<Utc>, MessageId), Message>,
}

impl MessageStore {
    pub fn new(
        room_id: RoomId,
        cipher: CipherEngine,
        policy: CryptoFailurePolicy,
        key: Arc<SymmetricKey>,
    ) -> Self {
        Self {
            room_id,
            cipher,
            policy,
            key,
            index: HashMap::new(),
            ordered: BTreeMap::new(),
        }
    }

    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Insert a wire record unless its id is already present.
    ///
    /// Encrypted content is decrypted first. A record that fails to decrypt is
    /// still stored, flagged with `decryption_failed`, so the loss is visible.
    pub fn append(&mut self, record: MessageRecord) -> AppendOutcome {
        if record.room_id != self.room_id {
            debug!(
                msg_id = %record.id,
                room = %record.room_id,
                expected = %self.room_id,
                "ignoring message for another room"
            );
            return AppendOutcome::WrongRoom;
        }

        if self.index.contains_key(&record.id) {
            debug!(msg_id = %record.id, "duplicate message dropped");
            return AppendOutcome::Duplicate;
        }

        let (content, decryption_failed) = self.open_content(&record);

        let message = Message {
            id: record.id,
            room_id: record.room_id,
            sender_id: record.sender_id,
            content,
            message_type: record.message_type,
            media_url: record.media_url,
            encrypted: record.encrypted,
            created_at: record.created_at,
            decryption_failed,
        };

        self.index.insert(message.id.clone(), message.created_at);
        self.ordered.insert(message.sort_key(), message);

        AppendOutcome::Inserted { decryption_failed }
    }

    /// Append every record of a backfill batch.
    pub fn extend(&mut self, records: impl IntoIterator<Item = MessageRecord>) -> ExtendSummary {
        let mut summary = ExtendSummary::default();
        for record in records {
            if let AppendOutcome::Inserted { decryption_failed } = self.append(record) {
                summary.inserted += 1;
                if decryption_failed {
                    summary.decryption_failed += 1;
                }
            }
        }
        summary
    }

    fn open_content(&self, record: &MessageRecord) -> (String, bool) {
        if !record.encrypted {
            return (record.content.clone(), false);
        }

        match self.cipher.decrypt(&record.content, &self.key) {
            Ok(plaintext) => (plaintext, false),
            Err(e) => {
                warn!(
                    msg_id = %record.id,
                    sender = %record.sender_id,
                    error = %e,
                    "failed to decrypt message"
                );
                let content = match self.policy {
                    CryptoFailurePolicy::HardFail => DECRYPTION_FAILED_MARKER.to_string(),
                    CryptoFailurePolicy::PlaintextFallback => record.content.clone(),
                };
                (content, true)
            }
        }
    }

    /// Messages ordered by `(created_at, id)`. The iterator is lazy, finite
    /// and can be cloned to restart from the beginning.
    pub fn iter(&self) -> impl Iterator<Item = &Message> + Clone + DoubleEndedIterator + '_ {
        self.ordered.values()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let created_at = self.index.get(id)?;
        self.ordered.get(&(*created_at, id.clone()))
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    pub fn latest(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Number of stored messages flagged as undecryptable.
    pub fn failed_count(&self) -> usize {
        self.ordered.values().filter(|m| m.decryption_failed).count()
    }

    /// Drop everything and start over for `room_id`.
    pub fn reset(&mut self, room_id: RoomId) {
        self.room_id = room_id;
        self.index.clear();
        self.ordered.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use crimson_shared::crypto::generate_symmetric_key;
    use crimson_shared::MessageType;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(id: &str, secs: i64, content: &str) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            room_id: "general".into(),
            sender_id: "alice".into(),
            content: content.to_string(),
            message_type: MessageType::Text,
            media_url: None,
            encrypted: false,
            created_at: ts(secs),
        }
    }

    fn store_with(policy: CryptoFailurePolicy) -> (MessageStore, Arc<SymmetricKey>) {
        let key = Arc::new(generate_symmetric_key());
        let store = MessageStore::new(
            "general".into(),
            CipherEngine::default(),
            policy,
            Arc::clone(&key),
        );
        (store, key)
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_duplicate_append_keeps_one_entry() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        assert_eq!(
            store.append(record("b", 10, "first")),
            AppendOutcome::Inserted { decryption_failed: false }
        );
        store.append(record("a", 5, "earlier"));
        assert_eq!(store.append(record("b", 10, "again")), AppendOutcome::Duplicate);

        assert_eq!(store.len(), 2);
        assert_eq!(ids(&store), vec!["a", "b"]);
        assert_eq!(store.get(&"b".into()).unwrap().content, "first");
    }

    #[test]
    fn test_out_of_order_arrival_is_sorted() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        for (id, secs) in [("c", 30), ("a", 10), ("b", 20)] {
            store.append(record(id, secs, id));
        }
        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        assert_eq!(store.latest().unwrap().id.as_str(), "c");
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_id() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        store.append(record("m-2", 0, ""));
        store.append(record("m-1", 0, ""));
        store.append(record("m-3", 0, ""));
        assert_eq!(ids(&store), vec!["m-1", "m-2", "m-3"]);
    }

    #[test]
    fn test_backfill_and_live_overlap() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        let backfill: Vec<_> = (0..5).map(|i| record(&format!("m{i}"), i, "x")).collect();
        assert_eq!(store.extend(backfill).inserted, 5);

        // live stream replays m3, m4 and adds m5
        let live: Vec<_> = (3..6).map(|i| record(&format!("m{i}"), i, "x")).collect();
        assert_eq!(store.extend(live).inserted, 1);
        assert_eq!(store.len(), 6);
    }

    #[test]
    fn test_encrypted_content_is_decrypted() {
        let (mut store, key) = store_with(CryptoFailurePolicy::HardFail);
        let mut rec = record("e", 1, "");
        rec.content = CipherEngine::default().encrypt("hello", &key).unwrap();
        rec.encrypted = true;

        store.append(rec);
        let msg = store.get(&"e".into()).unwrap();
        assert_eq!(msg.content, "hello");
        assert!(!msg.decryption_failed);
    }

    #[test]
    fn test_decryption_failure_is_visible() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        let mut rec = record("bad", 1, "");
        rec.content = CipherEngine::default()
            .encrypt("for someone else", &generate_symmetric_key())
            .unwrap();
        rec.encrypted = true;

        assert_eq!(
            store.append(rec),
            AppendOutcome::Inserted { decryption_failed: true }
        );
        let msg = store.get(&"bad".into()).unwrap();
        assert_eq!(msg.content, DECRYPTION_FAILED_MARKER);
        assert!(msg.decryption_failed);
        assert_eq!(store.failed_count(), 1);
    }

    #[test]
    fn test_extend_counts_failures_among_new_records() {
        let (mut store, key) = store_with(CryptoFailurePolicy::HardFail);
        let cipher = CipherEngine::default();

        let mut good = record("good", 1, "");
        good.content = cipher.encrypt("hi", &key).unwrap();
        good.encrypted = true;
        let mut bad = record("bad", 2, "");
        bad.content = cipher.encrypt("hi", &generate_symmetric_key()).unwrap();
        bad.encrypted = true;

        let batch = vec![good, bad.clone(), record("plain", 3, "hello")];
        assert_eq!(
            store.extend(batch),
            ExtendSummary {
                inserted: 3,
                decryption_failed: 1
            }
        );

        // a replayed failure is a duplicate, not a second failure
        assert_eq!(store.extend(vec![bad]), ExtendSummary::default());
        assert_eq!(store.failed_count(), 1);
    }

    #[test]
    fn test_fallback_policy_keeps_raw_content_flagged() {
        let (mut store, _) = store_with(CryptoFailurePolicy::PlaintextFallback);
        let mut rec = record("raw", 1, "bm90IGEgYmxvYg==");
        rec.encrypted = true;

        store.append(rec);
        let msg = store.get(&"raw".into()).unwrap();
        assert_eq!(msg.content, "bm90IGEgYmxvYg==");
        assert!(msg.decryption_failed);
    }

    #[test]
    fn test_foreign_room_ignored() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        let mut rec = record("x", 1, "");
        rec.room_id = "random".into();
        assert_eq!(store.append(rec), AppendOutcome::WrongRoom);
        assert!(store.is_empty());
    }

    #[test]
    fn test_iterator_is_restartable() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        store.append(record("a", 1, ""));
        store.append(record("b", 2, ""));

        let iter = store.iter();
        let first_pass: Vec<_> = iter.clone().map(|m| m.id.clone()).collect();
        let second_pass: Vec<_> = iter.map(|m| m.id.clone()).collect();
        assert_eq!(first_pass, second_pass);
    }

    #[test]
    fn test_reset_clears_for_new_room() {
        let (mut store, _) = store_with(CryptoFailurePolicy::HardFail);
        store.append(record("a", 1, ""));
        store.reset("random".into());
        assert!(store.is_empty());
        assert_eq!(store.room_id().as_str(), "random");

        let mut rec = record("a", 1, "");
        rec.room_id = "random".into();
        rec.created_at = ts(1) + Duration::seconds(1);
        assert!(matches!(store.append(rec), AppendOutcome::Inserted { .. }));
    }
}
