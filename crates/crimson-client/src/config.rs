//! Client configuration loaded from environment variables.
//!
//! Every setting has a default, so an engine can start with zero
//! configuration. Invalid values are logged and ignored.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crimson_net::SubscriptionConfig;
use crimson_shared::constants::{
    DEFAULT_BACKFILL_LIMIT, DEFAULT_ROOM, MAX_FILE_SIZE_MB, PRESENCE_HEARTBEAT_SECS,
    PRESENCE_SNAPSHOT_LIMIT, PRESENCE_SWEEP_SECS, PRESENCE_TTL_SECS, RECONNECT_INITIAL_MS,
    RECONNECT_MAX_MS, TYPING_DEBOUNCE_MS,
};
use crimson_shared::{CipherEngine, CipherSuite, CryptoFailurePolicy, RoomId};
use crimson_store::database::default_data_dir;
use crimson_store::StoreError;

use crate::media::MediaPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Env: `CRIMSON_ENCRYPTION` (true/false). Default: `true`
    pub encryption_enabled: bool,

    /// Env: `CRIMSON_CIPHER`. Default: `aes-256-gcm`
    pub cipher_suite: CipherSuite,

    /// Env: `CRIMSON_CRYPTO_FAILURE` (`hard-fail` / `plaintext-fallback`).
    /// Default: `hard-fail`
    pub crypto_failure_policy: CryptoFailurePolicy,

    /// Env: `CRIMSON_ROOM`. Default: `general`
    pub default_room: RoomId,

    /// Env: `CRIMSON_BACKFILL_LIMIT`. Default: `50`
    pub backfill_limit: usize,

    /// Env: `CRIMSON_TYPING_DEBOUNCE_MS`. Default: 1s
    pub typing_debounce: Duration,

    /// Env: `CRIMSON_PRESENCE_TTL_SECS`. Default: 30s
    pub presence_ttl: Duration,

    /// Env: `CRIMSON_PRESENCE_SWEEP_SECS`. Default: 5s
    pub presence_sweep_interval: Duration,

    /// Env: `CRIMSON_PRESENCE_HEARTBEAT_SECS`. Default: 15s
    pub presence_heartbeat_interval: Duration,

    /// Env: `CRIMSON_RECONNECT_INITIAL_MS`. Default: 1s
    pub reconnect_initial_backoff: Duration,

    /// Env: `CRIMSON_RECONNECT_MAX_MS`. Default: 30s
    pub reconnect_max_backoff: Duration,

    /// Env: `CRIMSON_MAX_FILE_SIZE_MB`. Default: `50`
    pub max_file_size_mb: u64,

    /// Env: `CRIMSON_ALLOWED_FILE_TYPES` (comma separated).
    /// Default: `image/*,video/*,audio/*`
    pub allowed_file_types: Vec<String>,

    /// Env: `CRIMSON_DATA_DIR`. Default: the platform data directory.
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            encryption_enabled: true,
            cipher_suite: CipherSuite::default(),
            crypto_failure_policy: CryptoFailurePolicy::default(),
            default_room: RoomId::from(DEFAULT_ROOM),
            backfill_limit: DEFAULT_BACKFILL_LIMIT,
            typing_debounce: Duration::from_millis(TYPING_DEBOUNCE_MS),
            presence_ttl: Duration::from_secs(PRESENCE_TTL_SECS),
            presence_sweep_interval: Duration::from_secs(PRESENCE_SWEEP_SECS),
            presence_heartbeat_interval: Duration::from_secs(PRESENCE_HEARTBEAT_SECS),
            reconnect_initial_backoff: Duration::from_millis(RECONNECT_INITIAL_MS),
            reconnect_max_backoff: Duration::from_millis(RECONNECT_MAX_MS),
            max_file_size_mb: MAX_FILE_SIZE_MB,
            allowed_file_types: vec!["image/*".into(), "video/*".into(), "audio/*".into()],
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("CRIMSON_ENCRYPTION") {
            config.encryption_enabled = val != "false" && val != "0";
        }

        parse_into(&lookup, "CRIMSON_CIPHER", &mut config.cipher_suite);
        parse_into(
            &lookup,
            "CRIMSON_CRYPTO_FAILURE",
            &mut config.crypto_failure_policy,
        );

        if let Some(room) = lookup("CRIMSON_ROOM") {
            let room = room.trim();
            if room.is_empty() {
                warn!("Empty CRIMSON_ROOM, using default");
            } else {
                config.default_room = RoomId::from(room);
            }
        }

        parse_into(&lookup, "CRIMSON_BACKFILL_LIMIT", &mut config.backfill_limit);
        parse_duration(
            &lookup,
            "CRIMSON_TYPING_DEBOUNCE_MS",
            Duration::from_millis,
            &mut config.typing_debounce,
        );
        parse_duration(
            &lookup,
            "CRIMSON_PRESENCE_TTL_SECS",
            Duration::from_secs,
            &mut config.presence_ttl,
        );
        parse_duration(
            &lookup,
            "CRIMSON_PRESENCE_SWEEP_SECS",
            Duration::from_secs,
            &mut config.presence_sweep_interval,
        );
        parse_duration(
            &lookup,
            "CRIMSON_PRESENCE_HEARTBEAT_SECS",
            Duration::from_secs,
            &mut config.presence_heartbeat_interval,
        );
        parse_duration(
            &lookup,
            "CRIMSON_RECONNECT_INITIAL_MS",
            Duration::from_millis,
            &mut config.reconnect_initial_backoff,
        );
        parse_duration(
            &lookup,
            "CRIMSON_RECONNECT_MAX_MS",
            Duration::from_millis,
            &mut config.reconnect_max_backoff,
        );

        parse_into(&lookup, "CRIMSON_MAX_FILE_SIZE_MB", &mut config.max_file_size_mb);

        if let Some(val) = lookup("CRIMSON_ALLOWED_FILE_TYPES") {
            let types: Vec<String> = val
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
            if types.is_empty() {
                warn!(value = %val, "Invalid CRIMSON_ALLOWED_FILE_TYPES, using default");
            } else {
                config.allowed_file_types = types;
            }
        }

        if let Some(path) = lookup("CRIMSON_DATA_DIR") {
            config.data_dir = Some(PathBuf::from(path));
        }

        if config.presence_heartbeat_interval >= config.presence_ttl {
            warn!(
                heartbeat_secs = config.presence_heartbeat_interval.as_secs(),
                ttl_secs = config.presence_ttl.as_secs(),
                "Presence heartbeat is not shorter than the TTL"
            );
        }

        config
    }

    pub fn cipher(&self) -> CipherEngine {
        CipherEngine::new(self.encryption_enabled, self.cipher_suite)
    }

    pub fn subscription_config(&self) -> SubscriptionConfig {
        SubscriptionConfig {
            backfill_limit: self.backfill_limit,
            presence_limit: PRESENCE_SNAPSHOT_LIMIT,
            initial_backoff: self.reconnect_initial_backoff,
            max_backoff: self.reconnect_max_backoff,
        }
    }

    pub fn media_policy(&self) -> MediaPolicy {
        MediaPolicy {
            max_bytes: self.max_file_size_mb.saturating_mul(1024 * 1024),
            allowed_types: self.allowed_file_types.clone(),
        }
    }

    /// Directory holding the key slot database.
    pub fn resolve_data_dir(&self) -> Result<PathBuf, StoreError> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_data_dir(),
        }
    }
}

fn parse_into<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T)
where
    T: FromStr,
    T::Err: Display,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(e) => warn!(var = name, value = %raw, error = %e, "Invalid value, using default"),
    }
}

fn parse_duration(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    unit: fn(u64) -> Duration,
    target: &mut Duration,
) {
    let Some(raw) = lookup(name) else {
        return;
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => warn!(var = name, "Duration must be positive, using default"),
        Ok(amount) => *target = unit(amount),
        Err(e) => warn!(var = name, value = %raw, error = %e, "Invalid value, using default"),
    }
}
