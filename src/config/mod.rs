use std::env;

use anyhow::Context;

/// Configuration for the upload scheduler
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum blob size in bytes (default: 256 MB)
    pub max_blob_size: usize,

    /// Capacity of the task change-event channel (default: 256)
    pub event_capacity: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_blob_size: 256 * 1024 * 1024, // 256 MB
            event_capacity: 256,
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_blob_size: env::var("MAX_BLOB_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_blob_size),

            event_capacity: env::var("TASK_EVENT_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.event_capacity),
        }
    }

    /// Create config for development (relaxed limits, small event buffer)
    pub fn development() -> Self {
        Self {
            max_blob_size: 1024 * 1024 * 1024, // 1 GB
            event_capacity: 64,
        }
    }
}

/// Connection settings for the backing object store. The scheduler itself
/// never reads these; they drive [`crate::infrastructure::storage`].
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint_url: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,

    /// Region label the store expects (default: "us-east-1"; MinIO ignores
    /// it)
    pub region: String,

    /// Base the key→URL resolver prepends to object keys (default:
    /// `<endpoint>/<bucket>`)
    pub public_base_url: String,
}

impl StorageConfig {
    /// Load connection settings from environment variables. Credentials
    /// have no sensible default, so missing variables are an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let endpoint_url = env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT must be set")?;
        let access_key = env::var("MINIO_ACCESS_KEY").context("MINIO_ACCESS_KEY must be set")?;
        let secret_key = env::var("MINIO_SECRET_KEY").context("MINIO_SECRET_KEY must be set")?;
        let bucket = env::var("MINIO_BUCKET").context("MINIO_BUCKET must be set")?;

        let region = env::var("MINIO_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let public_base_url = env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| default_public_base_url(&endpoint_url, &bucket));

        Ok(Self {
            endpoint_url,
            access_key,
            secret_key,
            bucket,
            region,
            public_base_url,
        })
    }
}

/// Bucket-style URL base used when no explicit public base is configured.
fn default_public_base_url(endpoint_url: &str, bucket: &str) -> String {
    format!("{}/{}", endpoint_url.trim_end_matches('/'), bucket)
}
