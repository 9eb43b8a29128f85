use sha2::{Digest, Sha256};

/// Computes the hex-encoded SHA-256 content fingerprint of a blob.
/// Deterministic for identical bytes; this is the dedup key for the whole
/// scheduling layer.
pub fn fingerprint_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}
