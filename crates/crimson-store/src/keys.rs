//! Symmetric key lifecycle.
//!
//! One key per installation: generated on first use, persisted in the key
//! slot, and reused by every later session. If the slot cannot be read or
//! written the manager still hands out a key, but only for the lifetime of
//! the process, and reports that through [`KeyStatus::Ephemeral`].

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use tracing::{info, warn};

use crimson_shared::constants::{KEY_FORMAT_VERSION, SYMMETRIC_KEY_SIZE};
use crimson_shared::crypto::{generate_symmetric_key, key_fingerprint, SymmetricKey};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::StoredKey;

/// Backing storage for the key slot.
pub trait KeyStore: Send {
    /// Read the slot. `Ok(None)` means the slot is empty.
    fn load_key(&self) -> Result<Option<StoredKey>>;

    /// Fill the slot if it is empty and return whatever the slot now holds.
    ///
    /// An existing key is never overwritten, so two clients racing on the
    /// same storage converge on the first key written.
    fn store_key_if_empty(&self, key: &StoredKey) -> Result<StoredKey>;
}

impl KeyStore for Database {
    fn load_key(&self) -> Result<Option<StoredKey>> {
        let row = self
            .conn()
            .query_row(
                "SELECT format_version, key_material, created_at FROM key_slot WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, u32>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((format_version, material, created_at)) = row else {
            return Ok(None);
        };

        if format_version > KEY_FORMAT_VERSION {
            return Err(StoreError::UnsupportedKeyFormat {
                found: format_version,
                supported: KEY_FORMAT_VERSION,
            });
        }
        if material.len() != SYMMETRIC_KEY_SIZE {
            return Err(StoreError::InvalidKeyMaterial(material.len()));
        }

        let mut key = [0u8; SYMMETRIC_KEY_SIZE];
        key.copy_from_slice(&material);
        let created_at: DateTime<Utc> =
            DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc);

        Ok(Some(StoredKey {
            format_version,
            key,
            created_at,
        }))
    }

    fn store_key_if_empty(&self, key: &StoredKey) -> Result<StoredKey> {
        self.conn().execute(
            "INSERT OR IGNORE INTO key_slot (id, format_version, key_material, created_at)
             VALUES (1, ?1, ?2, ?3)",
            params![
                key.format_version,
                &key.key[..],
                key.created_at.to_rfc3339(),
            ],
        )?;

        self.load_key()?.ok_or(StoreError::NotFound)
    }
}

/// In-process key slot. Clones share the same slot, which lets tests model
/// "a fresh engine against the same storage".
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyStore {
    slot: Arc<Mutex<Option<StoredKey>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load_key(&self) -> Result<Option<StoredKey>> {
        let guard = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.clone())
    }

    fn store_key_if_empty(&self, key: &StoredKey) -> Result<StoredKey> {
        let mut guard = self.slot.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get_or_insert_with(|| key.clone()).clone())
    }
}

/// Where the key handed out by [`KeyManager::acquire`] came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyStatus {
    /// Read from the key slot.
    Loaded,
    /// Generated on this run and persisted.
    Generated,
    /// Storage unavailable; the key dies with the process.
    Ephemeral { reason: String },
}

/// Owns the installation key. Construct one at the application root and pass
/// it to the engine.
pub struct KeyManager {
    store: Option<Box<dyn KeyStore>>,
    unavailable_reason: Option<String>,
    key: Option<Arc<SymmetricKey>>,
    status: Option<KeyStatus>,
}

impl KeyManager {
    pub fn new(store: impl KeyStore + 'static) -> Self {
        Self {
            store: Some(Box::new(store)),
            unavailable_reason: None,
            key: None,
            status: None,
        }
    }

    /// Manager with no storage at all; every acquire yields an ephemeral key.
    pub fn without_storage(reason: impl Into<String>) -> Self {
        Self {
            store: None,
            unavailable_reason: Some(reason.into()),
            key: None,
            status: None,
        }
    }

    /// Open the SQLite key slot in `dir`, degrading to an ephemeral key when
    /// the directory or database cannot be opened.
    pub fn open_in(dir: &Path) -> Self {
        match Database::open_in(dir) {
            Ok(db) => Self::new(db),
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "key storage unavailable");
                Self::without_storage(e.to_string())
            }
        }
    }

    /// Return the installation key, loading or generating it on first call.
    ///
    /// Never fails: storage problems are reported through [`Self::status`].
    pub fn acquire(&mut self) -> Arc<SymmetricKey> {
        if let Some(key) = &self.key {
            return Arc::clone(key);
        }

        let (key, status) = self.load_or_generate();
        let key = Arc::new(key);

        match &status {
            KeyStatus::Ephemeral { reason } => warn!(
                fingerprint = %key_fingerprint(&key),
                reason = %reason,
                "using in-memory key; it will not survive a restart"
            ),
            other => info!(
                fingerprint = %key_fingerprint(&key),
                status = ?other,
                "symmetric key ready"
            ),
        }

        self.key = Some(Arc::clone(&key));
        self.status = Some(status);
        key
    }

    fn load_or_generate(&self) -> (SymmetricKey, KeyStatus) {
        let Some(store) = self.store.as_ref() else {
            let reason = self
                .unavailable_reason
                .clone()
                .unwrap_or_else(|| "no key storage configured".to_string());
            return (generate_symmetric_key(), KeyStatus::Ephemeral { reason });
        };

        match store.load_key() {
            Ok(Some(stored)) => return (stored.key, KeyStatus::Loaded),
            Ok(None) => {}
            Err(e) => {
                // Leave an unreadable slot untouched; a newer client may own it.
                return (
                    generate_symmetric_key(),
                    KeyStatus::Ephemeral {
                        reason: e.to_string(),
                    },
                );
            }
        }

        let fresh = StoredKey {
            format_version: KEY_FORMAT_VERSION,
            key: generate_symmetric_key(),
            created_at: Utc::now(),
        };

        match store.store_key_if_empty(&fresh) {
            Ok(stored) if stored.key == fresh.key => (stored.key, KeyStatus::Generated),
            Ok(stored) => (stored.key, KeyStatus::Loaded),
            Err(e) => (
                fresh.key,
                KeyStatus::Ephemeral {
                    reason: e.to_string(),
                },
            ),
        }
    }

    /// Status of the last acquire, `None` before the first call.
    pub fn status(&self) -> Option<&KeyStatus> {
        self.status.as_ref()
    }

    pub fn is_persisted(&self) -> bool {
        matches!(
            self.status,
            Some(KeyStatus::Loaded) | Some(KeyStatus::Generated)
        )
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.key.as_deref().map(key_fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    impl KeyStore for BrokenStore {
        fn load_key(&self) -> Result<Option<StoredKey>> {
            Err(StoreError::NoDataDir)
        }

        fn store_key_if_empty(&self, _key: &StoredKey) -> Result<StoredKey> {
            Err(StoreError::NoDataDir)
        }
    }

    struct ReadOnlyStore;

    impl KeyStore for ReadOnlyStore {
        fn load_key(&self) -> Result<Option<StoredKey>> {
            Ok(None)
        }

        fn store_key_if_empty(&self, _key: &StoredKey) -> Result<StoredKey> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }
    }

    #[test]
    fn test_empty_storage_generates_and_persists() {
        let store = MemoryKeyStore::new();
        let mut manager = KeyManager::new(store.clone());

        let key = manager.acquire();
        assert_eq!(key.len(), 32);
        assert_eq!(manager.status(), Some(&KeyStatus::Generated));
        assert!(manager.is_persisted());

        let stored = store.load_key().unwrap().expect("slot filled");
        assert_eq!(stored.key, *key);
        assert_eq!(stored.format_version, KEY_FORMAT_VERSION);
    }

    #[test]
    fn test_fresh_manager_same_storage_same_key() {
        let store = MemoryKeyStore::new();
        let first = KeyManager::new(store.clone()).acquire();

        let mut second = KeyManager::new(store);
        assert_eq!(*second.acquire(), *first);
        assert_eq!(second.status(), Some(&KeyStatus::Loaded));
    }

    #[test]
    fn test_repeated_acquire_is_cached() {
        let mut manager = KeyManager::new(MemoryKeyStore::new());
        let a = manager.acquire();
        let b = manager.acquire();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_sqlite_slot_survives_restart() {
        let dir = tempfile::tempdir().unwrap();

        let first = KeyManager::open_in(dir.path()).acquire();
        let mut reopened = KeyManager::open_in(dir.path());
        let second = reopened.acquire();

        assert_eq!(*first, *second);
        assert_eq!(reopened.status(), Some(&KeyStatus::Loaded));
    }

    #[test]
    fn test_sqlite_insert_never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();

        let original = StoredKey {
            format_version: KEY_FORMAT_VERSION,
            key: [1u8; 32],
            created_at: Utc::now(),
        };
        let other = StoredKey {
            key: [2u8; 32],
            ..original.clone()
        };

        assert_eq!(db.store_key_if_empty(&original).unwrap().key, [1u8; 32]);
        assert_eq!(db.store_key_if_empty(&other).unwrap().key, [1u8; 32]);
    }

    #[test]
    fn test_newer_format_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        db.conn()
            .execute(
                "INSERT INTO key_slot (id, format_version, key_material, created_at)
                 VALUES (1, ?1, ?2, ?3)",
                params![KEY_FORMAT_VERSION + 1, &[9u8; 32][..], Utc::now().to_rfc3339()],
            )
            .unwrap();

        let mut manager = KeyManager::new(db);
        let key = manager.acquire();
        assert_ne!(*key, [9u8; 32]);
        assert!(matches!(manager.status(), Some(KeyStatus::Ephemeral { .. })));
        assert!(!manager.is_persisted());
    }

    #[test]
    fn test_corrupt_timestamp_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        db.conn()
            .execute(
                "INSERT INTO key_slot (id, format_version, key_material, created_at)
                 VALUES (1, ?1, ?2, 'yesterday')",
                params![KEY_FORMAT_VERSION, &[7u8; 32][..]],
            )
            .unwrap();

        assert!(matches!(db.load_key(), Err(StoreError::Timestamp(_))));

        let mut manager = KeyManager::new(db);
        assert_ne!(*manager.acquire(), [7u8; 32]);
        assert!(matches!(manager.status(), Some(KeyStatus::Ephemeral { .. })));
    }

    #[test]
    fn test_broken_storage_degrades() {
        let mut manager = KeyManager::new(BrokenStore);
        let key = manager.acquire();
        assert_eq!(key.len(), 32);
        match manager.status() {
            Some(KeyStatus::Ephemeral { reason }) => assert!(!reason.is_empty()),
            other => panic!("expected ephemeral, got {other:?}"),
        }
    }

    #[test]
    fn test_unwritable_storage_degrades() {
        let mut manager = KeyManager::new(ReadOnlyStore);
        manager.acquire();
        assert!(matches!(manager.status(), Some(KeyStatus::Ephemeral { .. })));
    }

    #[test]
    fn test_unopenable_dir_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not-a-dir");
        std::fs::write(&file, b"occupied").unwrap();

        let mut manager = KeyManager::open_in(&file);
        manager.acquire();
        assert!(matches!(manager.status(), Some(KeyStatus::Ephemeral { .. })));
    }

    #[test]
    fn test_debug_redacts_key() {
        let stored = StoredKey {
            format_version: 1,
            key: [0xAB; 32],
            created_at: Utc::now(),
        };
        let printed = format!("{stored:?}");
        assert!(printed.contains("redacted"));
        assert!(!printed.contains("[171"));
    }
}
