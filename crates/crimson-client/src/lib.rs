pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod media;
pub mod typing;

use tracing_subscriber::{fmt, EnvFilter};

pub use auth::{AuthError, AuthService, Session, StaticAuth};
pub use config::ClientConfig;
pub use engine::{EncryptionStatus, SyncEngine};
pub use error::SyncError;
pub use events::EngineEvent;
pub use media::{BlobStore, MediaError, MediaPolicy, MemoryBlobStore};

/// Install the global `tracing` subscriber. Honours `RUST_LOG`; safe to call
/// more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("crimson_client=debug,crimson_net=debug,crimson_store=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
