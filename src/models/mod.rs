use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of media an upload task carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaKind {
    Image,
    Video,
    VideoCover,
}

/// Lifecycle state of an upload task.
///
/// Transitions are strictly monotonic: `Hashing → Pending → Uploading →
/// {Success | Error}`, with `Canceled` reachable from any non-terminal
/// state and `Pending → Success` directly on a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Hashing,
    Pending,
    Uploading,
    Success,
    Error,
    Canceled,
}

impl TaskStatus {
    /// Terminal states never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Error | TaskStatus::Canceled
        )
    }
}

/// One caller-visible upload request. Created by `enqueue`, mutated only by
/// the scheduler, removed only by an explicit `remove`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTask {
    pub id: String,
    pub file_name: String,
    pub size: usize,
    pub kind: MediaKind,
    pub status: TaskStatus,
    /// 0–100; reaches 100 only together with `Success`.
    pub progress: u8,
    /// Set once hashing completes.
    pub fingerprint: Option<String>,
    /// True when the task was satisfied without a network call.
    pub from_cache: bool,
    /// Set only on `Error`.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A stored object as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub object_key: String,
    pub url: String,
    pub from_cache: bool,
}

/// Terminal outcome of an awaited upload. Cancellation is a normal outcome,
/// distinct from failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Stored(StoredObject),
    Canceled,
}

/// Caller-supplied patch for display metadata. Status and progress stay
/// under scheduler control.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub file_name: Option<String>,
    pub kind: Option<MediaKind>,
}
