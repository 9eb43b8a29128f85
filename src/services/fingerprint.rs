use bytes::Bytes;

use crate::error::UploadError;
use crate::utils::hash::fingerprint_bytes;

/// Content-fingerprint capability. Implementations must be deterministic
/// for identical bytes; the returned string is the dedup key.
#[async_trait::async_trait]
pub trait Fingerprinter: Send + Sync {
    async fn fingerprint(&self, blob: &Bytes) -> Result<String, UploadError>;
}

/// Blobs at or above this size are hashed on the blocking pool.
const BLOCKING_HASH_THRESHOLD: usize = 512 * 1024;

/// Hex-encoded SHA-256 fingerprinter.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Fingerprinter;

#[async_trait::async_trait]
impl Fingerprinter for Sha256Fingerprinter {
    async fn fingerprint(&self, blob: &Bytes) -> Result<String, UploadError> {
        if blob.len() < BLOCKING_HASH_THRESHOLD {
            return Ok(fingerprint_bytes(blob));
        }

        let data = blob.clone();
        tokio::task::spawn_blocking(move || fingerprint_bytes(&data))
            .await
            .map_err(|e| UploadError::Hashing(format!("hash worker failed: {}", e)))
    }
}
