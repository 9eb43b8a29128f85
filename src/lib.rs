pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use config::{StorageConfig, UploadConfig};
pub use error::UploadError;
pub use models::{MediaKind, StoredObject, TaskPatch, TaskStatus, UploadOutcome, UploadTask};
pub use services::cache::{CachedUpload, ResultCache};
pub use services::fingerprint::{Fingerprinter, Sha256Fingerprinter};
pub use services::registry::{RuntimeRegistry, UploadRuntime};
pub use services::scheduler::{EnqueueOptions, UploadScheduler, UploadTicket};
pub use services::storage::{ObjectStorage, ProgressFn, S3ObjectStore, UploadContext};
pub use services::tasks::TaskStore;
