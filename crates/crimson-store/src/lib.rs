//! # crimson-store
//!
//! Local state for the crimson client.
//!
//! - [`KeyManager`] owns the installation's symmetric key, persisted in a
//!   single SQLite key slot (or an in-memory slot when no storage is
//!   available).
//! - [`MessageStore`] is the deduplicated, time-ordered log of decrypted
//!   messages for one room.
//! - [`PresenceReconciler`] keeps one last-write-wins presence record per
//!   user.

pub mod database;
pub mod keys;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod presence;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use keys::{KeyManager, KeyStatus, KeyStore, MemoryKeyStore};
pub use messages::{AppendOutcome, ExtendSummary, MessageStore};
pub use models::*;
pub use presence::{ApplyOutcome, PresenceReconciler};
