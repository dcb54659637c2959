// Realtime transport seam: the Transport trait, per-room feed supervision
// with reconnect and backfill, and an in-process loopback transport.

pub mod backoff;
pub mod error;
pub mod memory;
pub mod subscription;
pub mod transport;

pub use backoff::Backoff;
pub use error::TransportError;
pub use memory::MemoryTransport;
pub use subscription::{FeedEvent, FeedEventKind, SubscriptionConfig, SubscriptionManager};
pub use transport::{FeedStream, RoomFilter, Topic, Transport};
