use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// The key slot was written by a newer client.
    #[error("Unsupported key format version {found} (supported up to {supported})")]
    UnsupportedKeyFormat { found: u32, supported: u32 },

    /// The key slot holds something other than a 32-byte key.
    #[error("Stored key has invalid length {0}")]
    InvalidKeyMaterial(usize),

    /// A shared in-memory slot was poisoned by a panicking holder.
    #[error("Key slot lock poisoned")]
    Poisoned,

    /// The key slot's `created_at` is not RFC 3339.
    #[error("Invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
