use std::sync::Arc;

use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use tracing::info;

use crate::config::StorageConfig;
use crate::services::storage::S3ObjectStore;

/// Builds the S3/MinIO-backed object store from connection settings.
/// Path-style addressing is forced so bucket names never have to resolve
/// through DNS.
pub fn setup_storage(config: &StorageConfig) -> Arc<S3ObjectStore> {
    info!(
        "☁️  Object store at {} (bucket: {}, public base: {})",
        config.endpoint_url, config.bucket, config.public_base_url
    );

    let credentials = Credentials::new(
        config.access_key.clone(),
        config.secret_key.clone(),
        None,
        None,
        "storage-config",
    );

    let s3_config = aws_sdk_s3::config::Builder::new()
        .behavior_version(BehaviorVersion::latest())
        .endpoint_url(&config.endpoint_url)
        .region(Region::new(config.region.clone()))
        .credentials_provider(credentials)
        .force_path_style(true)
        .build();

    let client = aws_sdk_s3::Client::from_conf(s3_config);
    Arc::new(S3ObjectStore::new(
        client,
        config.bucket.clone(),
        config.public_base_url.clone(),
    ))
}
