use thiserror::Error;

use crimson_net::TransportError;
use crimson_shared::CryptoError;

use crate::auth::AuthError;
use crate::media::MediaError;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The bus rejected an outbound record. Nothing was stored locally; the
    /// caller may retry.
    #[error("Publish failed: {0}")]
    PublishFailed(#[source] TransportError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
