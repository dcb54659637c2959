//! Last-write-wins presence register, one record per user.
//!
//! Records are ordered by their own `last_activity` timestamp, never by
//! arrival order: a record that shows up late but carries an older timestamp
//! is rejected. Abrupt disconnects never produce an explicit offline upsert,
//! so anything older than the TTL is treated as offline. Once the sweep has
//! expired a user, only a strictly newer record brings them back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crimson_shared::constants::PRESENCE_TTL_SECS;
use crimson_shared::{PresenceRecord, PresenceStatus, RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Older than the stored record, or a replay of one already expired;
    /// dropped.
    Stale,
    WrongRoom,
}

pub struct PresenceReconciler {
    room_id: RoomId,
    local_user: UserId,
    ttl: chrono::Duration,
    records: HashMap<UserId, PresenceRecord>,
    swept: HashSet<UserId>,
}

impl PresenceReconciler {
    pub fn new(room_id: RoomId, local_user: UserId, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl)
            .unwrap_or_else(|_| chrono::Duration::seconds(PRESENCE_TTL_SECS as i64));
        Self {
            room_id,
            local_user,
            ttl,
            records: HashMap::new(),
            swept: HashSet::new(),
        }
    }

    pub fn apply(&mut self, record: PresenceRecord) -> ApplyOutcome {
        if record.room_id != self.room_id {
            return ApplyOutcome::WrongRoom;
        }

        if let Some(current) = self.records.get(&record.user_id) {
            let replayed_expiry = record.last_activity == current.last_activity
                && self.swept.contains(&record.user_id);
            if record.last_activity < current.last_activity || replayed_expiry {
                debug!(
                    user = %record.user_id,
                    incoming = %record.last_activity,
                    stored = %current.last_activity,
                    "stale presence rejected"
                );
                return ApplyOutcome::Stale;
            }
        }

        self.swept.remove(&record.user_id);
        self.records.insert(record.user_id.clone(), record);
        ApplyOutcome::Applied
    }

    pub fn get(&self, user_id: &UserId) -> Option<&PresenceRecord> {
        self.records.get(user_id)
    }

    fn is_expired(&self, record: &PresenceRecord, now: DateTime<Utc>) -> bool {
        now - record.last_activity > self.ttl
    }

    /// Status with the TTL applied, without mutating the register.
    pub fn effective_status(&self, user_id: &UserId, now: DateTime<Utc>) -> Option<PresenceStatus> {
        let record = self.records.get(user_id)?;
        if self.is_expired(record, now) {
            Some(PresenceStatus::Offline)
        } else {
            Some(record.status)
        }
    }

    /// Online users other than the local one, sorted by user id.
    pub fn online_set(&self, now: DateTime<Utc>) -> Vec<&PresenceRecord> {
        let mut online: Vec<_> = self
            .records
            .values()
            .filter(|r| r.user_id != self.local_user)
            .filter(|r| r.status == PresenceStatus::Online && !self.is_expired(r, now))
            .collect();
        online.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        online
    }

    /// Subset of [`Self::online_set`] that is currently typing.
    pub fn typing_set(&self, now: DateTime<Utc>) -> Vec<&PresenceRecord> {
        self.online_set(now)
            .into_iter()
            .filter(|r| r.is_typing)
            .collect()
    }

    /// Mark every record older than the TTL as offline. Returns the users that
    /// changed. `last_activity` is left alone so any newer upsert still wins.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<UserId> {
        let ttl = self.ttl;
        let mut expired: Vec<UserId> = self
            .records
            .values_mut()
            .filter(|r| r.status != PresenceStatus::Offline && now - r.last_activity > ttl)
            .map(|r| {
                r.status = PresenceStatus::Offline;
                r.is_typing = false;
                r.user_id.clone()
            })
            .collect();
        expired.sort();
        self.swept.extend(expired.iter().cloned());

        if !expired.is_empty() {
            debug!(count = expired.len(), "presence records expired");
        }
        expired
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn reset(&mut self, room_id: RoomId) {
        self.room_id = room_id;
        self.records.clear();
        self.swept.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn presence(user: &str, secs: i64, status: PresenceStatus, typing: bool) -> PresenceRecord {
        PresenceRecord {
            user_id: user.into(),
            room_id: "general".into(),
            is_typing: typing,
            last_activity: ts(secs),
            status,
        }
    }

    fn reconciler() -> PresenceReconciler {
        PresenceReconciler::new("general".into(), "me".into(), Duration::from_secs(30))
    }

    #[test]
    fn test_lww_converges_in_either_order() {
        let older = presence("bob", 1, PresenceStatus::Away, false);
        let newer = presence("bob", 2, PresenceStatus::Online, true);

        let mut in_order = reconciler();
        in_order.apply(older.clone());
        in_order.apply(newer.clone());

        let mut reversed = reconciler();
        assert_eq!(reversed.apply(newer.clone()), ApplyOutcome::Applied);
        assert_eq!(reversed.apply(older), ApplyOutcome::Stale);

        assert_eq!(in_order.get(&"bob".into()), Some(&newer));
        assert_eq!(reversed.get(&"bob".into()), Some(&newer));
        assert_eq!(reversed.len(), 1);
    }

    #[test]
    fn test_equal_timestamp_replaces() {
        let mut r = reconciler();
        r.apply(presence("bob", 5, PresenceStatus::Online, false));
        assert_eq!(
            r.apply(presence("bob", 5, PresenceStatus::Online, true)),
            ApplyOutcome::Applied
        );
        assert!(r.get(&"bob".into()).unwrap().is_typing);
    }

    #[test]
    fn test_online_and_typing_sets_exclude_local_user() {
        let mut r = reconciler();
        r.apply(presence("me", 10, PresenceStatus::Online, true));
        r.apply(presence("bob", 10, PresenceStatus::Online, true));
        r.apply(presence("carol", 10, PresenceStatus::Online, false));
        r.apply(presence("dave", 10, PresenceStatus::Away, true));

        let now = ts(11);
        let online: Vec<_> = r.online_set(now).iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(online, vec!["bob", "carol"]);

        let typing: Vec<_> = r.typing_set(now).iter().map(|p| p.user_id.as_str()).collect();
        assert_eq!(typing, vec!["bob"]);
    }

    #[test]
    fn test_ttl_hides_and_sweep_marks_offline() {
        let mut r = reconciler();
        r.apply(presence("bob", 0, PresenceStatus::Online, true));
        r.apply(presence("carol", 25, PresenceStatus::Online, false));

        let now = ts(31);
        assert_eq!(r.effective_status(&"bob".into(), now), Some(PresenceStatus::Offline));
        assert_eq!(r.online_set(now).len(), 1);

        assert_eq!(r.sweep(now), vec![UserId::from("bob")]);
        let bob = r.get(&"bob".into()).unwrap();
        assert_eq!(bob.status, PresenceStatus::Offline);
        assert!(!bob.is_typing);

        // already offline: nothing new to report
        assert!(r.sweep(ts(32)).is_empty());
    }

    #[test]
    fn test_newer_record_revives_swept_user() {
        let mut r = reconciler();
        r.apply(presence("bob", 0, PresenceStatus::Online, false));
        r.sweep(ts(40));

        assert_eq!(
            r.apply(presence("bob", 41, PresenceStatus::Online, false)),
            ApplyOutcome::Applied
        );
        assert_eq!(r.online_set(ts(42)).len(), 1);
    }

    #[test]
    fn test_replayed_record_does_not_revive_swept_user() {
        let mut r = reconciler();
        let bob = presence("bob", 0, PresenceStatus::Online, true);
        r.apply(bob.clone());
        assert_eq!(r.sweep(ts(40)), vec![UserId::from("bob")]);

        // the reconnect snapshot carries the same row again
        assert_eq!(r.apply(bob), ApplyOutcome::Stale);
        let stored = r.get(&"bob".into()).unwrap();
        assert_eq!(stored.status, PresenceStatus::Offline);
        assert!(!stored.is_typing);
        assert!(r.sweep(ts(45)).is_empty());

        assert_eq!(
            r.apply(presence("bob", 44, PresenceStatus::Online, false)),
            ApplyOutcome::Applied
        );
        assert_eq!(r.online_set(ts(45)).len(), 1);
    }

    #[test]
    fn test_wrong_room_and_reset() {
        let mut r = reconciler();
        let mut rec = presence("bob", 0, PresenceStatus::Online, false);
        rec.room_id = "random".into();
        assert_eq!(r.apply(rec.clone()), ApplyOutcome::WrongRoom);

        r.reset("random".into());
        assert_eq!(r.apply(rec), ApplyOutcome::Applied);
        assert!(!r.is_empty());
    }
}
