//! Media attachments: upload validation and the blob store seam.
//!
//! The engine encrypts a file before it reaches the blob store and publishes
//! a message whose `media_url` points at the stored blob. Blob contents are
//! never inspected beyond that.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crimson_shared::constants::MAX_FILE_SIZE_MB;
use crimson_shared::MessageType;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("File is {size} bytes, limit is {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("Unsupported content type: {0}")]
    UnsupportedType(String),

    #[error("No blob store configured")]
    NoBlobStore,

    #[error("Upload failed: {0}")]
    Upload(String),
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` and return the URL they can be fetched from.
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError>;
}

/// What may be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPolicy {
    pub max_bytes: u64,
    /// Exact types (`image/png`) or prefix wildcards (`image/*`).
    pub allowed_types: Vec<String>,
}

impl Default for MediaPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_FILE_SIZE_MB * 1024 * 1024,
            allowed_types: vec!["image/*".into(), "video/*".into(), "audio/*".into()],
        }
    }
}

impl MediaPolicy {
    /// Check size and type, returning the message type to publish under.
    pub fn validate(&self, size: usize, content_type: &str) -> Result<MessageType, MediaError> {
        let size = size as u64;
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }

        if !self.is_allowed(content_type) {
            return Err(MediaError::UnsupportedType(content_type.to_string()));
        }

        MessageType::from_content_type(content_type)
            .ok_or_else(|| MediaError::UnsupportedType(content_type.to_string()))
    }

    pub fn is_allowed(&self, content_type: &str) -> bool {
        let content_type = content_type.trim().to_ascii_lowercase();
        self.allowed_types.iter().any(|pattern| {
            let pattern = pattern.trim().to_ascii_lowercase();
            match pattern.strip_suffix('*') {
                Some(prefix) => content_type.starts_with(prefix),
                None => content_type == pattern,
            }
        })
    }
}

/// Blob store kept in process memory. URLs look like `memory://blobs/{n}`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<HashMap<String, (String, Vec<u8>)>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored bytes for `url`, exactly as uploaded.
    pub fn get(&self, url: &str) -> Option<Vec<u8>> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.get(url).map(|(_, bytes)| bytes.clone())
    }

    pub fn content_type(&self, url: &str) -> Option<String> {
        let blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        blobs.get(url).map(|(ct, _)| ct.clone())
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: Vec<u8>, content_type: &str) -> Result<String, MediaError> {
        let mut blobs = self.blobs.lock().unwrap_or_else(PoisonError::into_inner);
        let url = format!("memory://blobs/{}", blobs.len() + 1);
        blobs.insert(url.clone(), (content_type.to_string(), bytes));
        Ok(url)
    }
}
