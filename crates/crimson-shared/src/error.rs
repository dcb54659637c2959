use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Malformed ciphertext blob: {0}")]
    MalformedBlob(String),

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::MalformedBlob(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unexpected record on topic {topic}: {kind}")]
    UnexpectedRecord { topic: String, kind: &'static str },
}
