use thiserror::Error;

/// Errors surfaced by the upload scheduling layer.
///
/// `Clone` is required because a shared upload's outcome is fanned out to
/// every task referencing the same fingerprint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    #[error("Hashing failed: {0}")]
    Hashing(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Upload canceled")]
    Canceled,

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Invalid upload: {0}")]
    Invalid(String),
}

impl UploadError {
    /// True when this error is a cancellation signal rather than a real
    /// failure. Cancellation is never surfaced as an error through
    /// `UploadTicket::wait`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, UploadError::Canceled)
    }
}
