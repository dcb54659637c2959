use thiserror::Error;

use crimson_shared::ProtocolError;

#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Fetch from {topic} failed: {reason}")]
    Fetch { topic: String, reason: String },

    #[error("Feed disconnected: {0}")]
    Disconnected(String),

    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Record rejected: {0}")]
    Rejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl From<ProtocolError> for TransportError {
    fn from(e: ProtocolError) -> Self {
        TransportError::Protocol(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
