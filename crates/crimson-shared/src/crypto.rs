use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce as AesNonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{ChaCha20Poly1305, Nonce as ChaChaNonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::{KDF_CONTEXT_KEY_FINGERPRINT, KEY_FINGERPRINT_LEN, NONCE_SIZE, TAG_SIZE};
use crate::error::CryptoError;

pub type SymmetricKey = [u8; 32];

pub fn generate_symmetric_key() -> SymmetricKey {
    let mut key = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

// Every seal draws a fresh nonce from the OS RNG; there is no counter to
// persist, so restarts can never replay a nonce under the same key.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// AEAD algorithm used for payloads. Both take a 256-bit key and a 96-bit nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

impl std::str::FromStr for CipherSuite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aes-256-gcm" | "aes256gcm" => Ok(Self::Aes256Gcm),
            "chacha20-poly1305" | "chacha20poly1305" => Ok(Self::ChaCha20Poly1305),
            other => Err(format!("unknown cipher suite: {other}")),
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Aes256Gcm => f.write_str("aes-256-gcm"),
            Self::ChaCha20Poly1305 => f.write_str("chacha20-poly1305"),
        }
    }
}

/// What to do when an encrypt/decrypt call fails.
///
/// With `PlaintextFallback` a failed encrypt publishes the plaintext as an
/// unencrypted record and a failed decrypt keeps the raw wire content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CryptoFailurePolicy {
    #[default]
    HardFail,
    PlaintextFallback,
}

impl std::str::FromStr for CryptoFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hard-fail" | "hardfail" => Ok(Self::HardFail),
            "plaintext-fallback" | "fallback" => Ok(Self::PlaintextFallback),
            other => Err(format!("unknown crypto failure policy: {other}")),
        }
    }
}

// Returns nonce || ciphertext || tag (12 bytes nonce prepended)
pub fn seal(
    suite: CipherSuite,
    key: &SymmetricKey,
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let nonce_bytes = generate_nonce();

    let ciphertext = match suite {
        CipherSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new(key.into());
            cipher.encrypt(AesNonce::from_slice(&nonce_bytes), plaintext)
        }
        CipherSuite::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(key.into());
            cipher.encrypt(ChaChaNonce::from_slice(&nonce_bytes), plaintext)
        }
    }
    .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn open(suite: CipherSuite, key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedBlob(format!(
            "{} bytes is shorter than nonce and tag",
            data.len()
        )));
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);

    match suite {
        CipherSuite::Aes256Gcm => {
            let cipher = Aes256Gcm::new(key.into());
            cipher.decrypt(AesNonce::from_slice(nonce_bytes), ciphertext)
        }
        CipherSuite::ChaCha20Poly1305 => {
            let cipher = ChaCha20Poly1305::new(key.into());
            cipher.decrypt(ChaChaNonce::from_slice(nonce_bytes), ciphertext)
        }
    }
    .map_err(|_| CryptoError::DecryptionFailed)
}

/// Short BLAKE3 fingerprint used to refer to a key in logs without revealing it.
pub fn key_fingerprint(key: &SymmetricKey) -> String {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_KEY_FINGERPRINT);
    hasher.update(key);
    let hash = hasher.finalize();
    hex::encode(&hash.as_bytes()[..KEY_FINGERPRINT_LEN])
}

/// Applies the configured AEAD to chat payloads.
///
/// Text is framed as `base64(nonce || ciphertext || tag)` so it fits the
/// `content` column of a message record; files use the same framing as raw
/// bytes. When encryption is disabled every call is an identity passthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherEngine {
    enabled: bool,
    suite: CipherSuite,
}

impl CipherEngine {
    pub fn new(enabled: bool, suite: CipherSuite) -> Self {
        Self { enabled, suite }
    }

    pub fn disabled() -> Self {
        Self::new(false, CipherSuite::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    pub fn encrypt(&self, plaintext: &str, key: &SymmetricKey) -> Result<String, CryptoError> {
        if !self.enabled {
            return Ok(plaintext.to_string());
        }
        let sealed = seal(self.suite, key, plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, blob: &str, key: &SymmetricKey) -> Result<String, CryptoError> {
        if !self.enabled {
            return Ok(blob.to_string());
        }
        let data = STANDARD.decode(blob.trim())?;
        let plaintext = open(self.suite, key, &data)?;
        String::from_utf8(plaintext).map_err(|_| CryptoError::InvalidUtf8)
    }

    pub fn encrypt_file(&self, data: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
        if !self.enabled {
            return Ok(data.to_vec());
        }
        seal(self.suite, key, data)
    }

    pub fn decrypt_file(&self, data: &[u8], key: &SymmetricKey) -> Result<Vec<u8>, CryptoError> {
        if !self.enabled {
            return Ok(data.to_vec());
        }
        open(self.suite, key, data)
    }
}

impl Default for CipherEngine {
    fn default() -> Self {
        Self::new(true, CipherSuite::default())
    }
}
