//! # crimson-loopback
//!
//! Two engines chatting over the in-process loopback bus. Both share the
//! installation key from the configured data directory, exchange a few
//! messages and a media attachment, survive a forced disconnect, and print
//! the resulting log.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

use crimson_client::{
    BlobStore, ClientConfig, EngineEvent, MemoryBlobStore, StaticAuth, SyncEngine,
};
use crimson_net::{MemoryTransport, Transport};
use crimson_shared::MessageType;
use crimson_store::KeyManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    crimson_client::init_tracing();

    info!("Starting crimson loopback v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let data_dir = config.resolve_data_dir()?;
    let bus = MemoryTransport::new();
    let transport: Arc<dyn Transport> = Arc::new(bus.clone());
    let blobs = MemoryBlobStore::new();
    let blob_store: Arc<dyn BlobStore> = Arc::new(blobs.clone());

    let mut alice = SyncEngine::start(
        config.clone(),
        KeyManager::open_in(&data_dir),
        Arc::clone(&transport),
        &StaticAuth::new("alice", Some("Alice")),
        Some(Arc::clone(&blob_store)),
    )
    .await?;
    let mut bob = SyncEngine::start(
        config,
        KeyManager::open_in(&data_dir),
        transport,
        &StaticAuth::new("bob", Some("Bob")),
        None,
    )
    .await?;

    info!(status = ?alice.encryption_status(), "alice encryption");

    alice.set_typing(true).await?;
    alice
        .send_message("hello bob", MessageType::Text, None)
        .await?;
    bob.send_message("hi alice", MessageType::Text, None).await?;
    alice
        .send_media(b"\x89PNG\r\n\x1a\n", "image/png", "tiny picture")
        .await?;
    settle(&mut alice, &mut bob, Duration::from_secs(2)).await;

    bus.disconnect_all();
    bob.send_message("sent while the feeds were down", MessageType::Text, None)
        .await?;
    settle(&mut alice, &mut bob, Duration::from_secs(3)).await;

    for message in alice.messages() {
        println!("{}", serde_json::to_string(message)?);
    }

    if let Some(url) = alice.messages().find_map(|m| m.media_url.clone()) {
        if let Some(blob) = blobs.get(&url) {
            let plain = alice.decrypt_media(&blob)?;
            info!(url = %url, size = plain.len(), "attachment decrypted");
        }
    }

    println!("{}", serde_json::to_string_pretty(&alice.encryption_status())?);
    info!(online = ?bob.online_users(), "bob sees");

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}

/// Drive both engines until `window` has elapsed.
async fn settle(alice: &mut SyncEngine, bob: &mut SyncEngine, window: Duration) {
    let deadline = Instant::now() + window;
    loop {
        tokio::select! {
            event = alice.next_event() => log_event("alice", &event),
            event = bob.next_event() => log_event("bob", &event),
            _ = tokio::time::sleep_until(deadline) => break,
        }
    }
}

fn log_event(who: &str, event: &EngineEvent) {
    let payload = serde_json::to_string(event).unwrap_or_default();
    info!(who, event = event.name(), %payload, "engine event");
}
