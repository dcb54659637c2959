/// AEAD nonce size in bytes (AES-256-GCM and ChaCha20-Poly1305)
pub const NONCE_SIZE: usize = 12;

/// AEAD authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Symmetric key size in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Version of the persisted key-slot layout
pub const KEY_FORMAT_VERSION: u32 = 1;

/// Number of fingerprint bytes shown in logs
pub const KEY_FINGERPRINT_LEN: usize = 8;

/// Content shown in place of a message whose ciphertext failed to verify
pub const DECRYPTION_FAILED_MARKER: &str = "[decryption failed]";

/// Default backfill window after (re)subscribing
pub const DEFAULT_BACKFILL_LIMIT: usize = 50;

/// Default typing debounce window in milliseconds
pub const TYPING_DEBOUNCE_MS: u64 = 1_000;

/// Presence records older than this are treated as offline
pub const PRESENCE_TTL_SECS: u64 = 30;

/// Interval between stale-presence sweeps
pub const PRESENCE_SWEEP_SECS: u64 = 5;

/// Interval between local presence heartbeats (must stay below the TTL)
pub const PRESENCE_HEARTBEAT_SECS: u64 = 15;

/// Reconnect backoff bounds in milliseconds
pub const RECONNECT_INITIAL_MS: u64 = 1_000;
pub const RECONNECT_MAX_MS: u64 = 30_000;

/// Maximum media upload size in MiB
pub const MAX_FILE_SIZE_MB: u64 = 50;

/// Default room joined on start
pub const DEFAULT_ROOM: &str = "general";

/// Key derivation context for key fingerprints (BLAKE3)
pub const KDF_CONTEXT_KEY_FINGERPRINT: &str = "crimson-key-fingerprint-v1";

/// Upper bound on presence rows fetched when a room feed (re)connects
pub const PRESENCE_SNAPSHOT_LIMIT: usize = 200;
