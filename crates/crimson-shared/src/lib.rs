// Domain types, wire records and authenticated encryption shared by every crimson crate.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod protocol;
pub mod types;

pub use crypto::{CipherEngine, CipherSuite, CryptoFailurePolicy, SymmetricKey};
pub use error::{CryptoError, ProtocolError};
pub use protocol::{MessageRecord, PresenceRecord, Record, TransportEvent, TransportOp};
pub use types::{ConnectionState, MessageId, MessageType, PresenceStatus, RoomId, UserId};
