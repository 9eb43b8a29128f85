use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashSet;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::models::{MediaKind, StoredObject, TaskPatch, TaskStatus, UploadOutcome, UploadTask};
use crate::services::cache::{CachedUpload, ResultCache};
use crate::services::fingerprint::Fingerprinter;
use crate::services::registry::RuntimeRegistry;
use crate::services::storage::{ObjectStorage, ProgressFn};
use crate::services::tasks::TaskStore;
use crate::utils::validation::{matches_kind, sanitize_file_name, validate_blob};

/// Options for a single enqueue call.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub file_name: Option<String>,
    /// Task id to use instead of a generated one. Must be unique for the
    /// task's lifetime.
    pub task_id: Option<String>,
}

/// Handle returned by [`UploadScheduler::enqueue`]. Holds the task id, the
/// awaitable outcome, and cancellation bound to this specific task.
pub struct UploadTicket {
    task_id: String,
    scheduler: UploadScheduler,
    outcome: oneshot::Receiver<Result<UploadOutcome, UploadError>>,
}

impl std::fmt::Debug for UploadTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadTicket")
            .field("task_id", &self.task_id)
            .finish()
    }
}

impl UploadTicket {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Cancels this ticket's task. Tasks sharing the same content keep
    /// their upload.
    pub fn cancel(&self) {
        let _ = self.scheduler.cancel(&self.task_id);
    }

    /// Waits for the task's terminal outcome. Cancellation resolves to
    /// `UploadOutcome::Canceled`, never to an error.
    pub async fn wait(self) -> Result<UploadOutcome, UploadError> {
        match self.outcome.await {
            Ok(result) => result,
            Err(_) => Err(UploadError::Upload(
                "upload task dropped before settling".to_string(),
            )),
        }
    }
}

struct SchedulerInner {
    config: UploadConfig,
    fingerprinter: Arc<dyn Fingerprinter>,
    storage: Arc<dyn ObjectStorage>,
    registry: RuntimeRegistry,
    cache: ResultCache,
    tasks: TaskStore,
    /// Task ids with a cancel request in flight. Entries are cleared when
    /// the task's pipeline finishes.
    canceled: DashSet<String>,
}

/// Deduplicating upload scheduler: one network transfer per content
/// fingerprint, progress and terminal state multiplexed back to every task
/// independently. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct UploadScheduler {
    inner: Arc<SchedulerInner>,
}

impl UploadScheduler {
    pub fn new(
        config: UploadConfig,
        fingerprinter: Arc<dyn Fingerprinter>,
        storage: Arc<dyn ObjectStorage>,
    ) -> Self {
        let tasks = TaskStore::new(config.event_capacity);
        Self {
            inner: Arc::new(SchedulerInner {
                registry: RuntimeRegistry::new(storage.clone()),
                cache: ResultCache::new(),
                tasks,
                canceled: DashSet::new(),
                config,
                fingerprinter,
                storage,
            }),
        }
    }

    /// Registers a new upload task and starts its pipeline. Returns
    /// immediately; only the returned ticket suspends, and only for its
    /// holder.
    pub fn enqueue(
        &self,
        blob: Bytes,
        kind: MediaKind,
        options: EnqueueOptions,
    ) -> Result<UploadTicket, UploadError> {
        validate_blob(&blob, self.inner.config.max_blob_size)
            .map_err(|e| UploadError::Invalid(e.to_string()))?;

        if !matches_kind(&blob, kind) {
            tracing::debug!(?kind, "no signature match for media kind, allowing anyway");
        }

        let task_id = options.task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let file_name = sanitize_file_name(options.file_name.as_deref().unwrap_or_default());

        let now = Utc::now();
        self.inner.tasks.insert(UploadTask {
            id: task_id.clone(),
            file_name,
            size: blob.len(),
            kind,
            status: TaskStatus::Hashing,
            progress: 0,
            fingerprint: None,
            from_cache: false,
            error_message: None,
            created_at: now,
            updated_at: now,
        });

        let (tx, rx) = oneshot::channel();
        let scheduler = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let result = scheduler.run_pipeline(&id, blob).await;
            scheduler.inner.canceled.remove(&id);
            // Receiver may have been dropped; the task record still holds
            // the terminal state.
            let _ = tx.send(result);
        });

        Ok(UploadTicket {
            task_id,
            scheduler: self.clone(),
            outcome: rx,
        })
    }

    /// Marks the task canceled and releases its runtime reference. Safe to
    /// call at any point in the task's life; repeat calls and calls after
    /// settlement are no-ops.
    pub fn cancel(&self, task_id: &str) -> Result<(), UploadError> {
        let inner = &self.inner;

        let Some(task) = inner.tasks.get(task_id) else {
            return Err(UploadError::NotFound(task_id.to_string()));
        };
        if task.status.is_terminal() {
            return Ok(());
        }
        if !inner.canceled.insert(task_id.to_string()) {
            return Ok(());
        }

        inner.tasks.transition(task_id, TaskStatus::Canceled, |_| {});
        tracing::info!(task_id, "upload task canceled");

        // Re-read: hashing may have attached a fingerprint since the first
        // snapshot.
        let fingerprint = inner.tasks.get(task_id).and_then(|task| task.fingerprint);
        if let Some(fingerprint) = fingerprint {
            if let Some(runtime) = inner.registry.get(&fingerprint) {
                inner.registry.leave(&runtime, task_id);
            }
        }

        Ok(())
    }

    /// Drops the task record. An in-flight shared upload is not affected;
    /// tasks are never garbage-collected implicitly.
    pub fn remove(&self, task_id: &str) -> Result<(), UploadError> {
        self.inner.canceled.remove(task_id);
        match self.inner.tasks.remove(task_id) {
            Some(_) => Ok(()),
            None => Err(UploadError::NotFound(task_id.to_string())),
        }
    }

    /// Administrative patch for display metadata. The state machine is not
    /// reachable from here.
    pub fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<UploadTask, UploadError> {
        let applied = self.inner.tasks.patch(task_id, |task| {
            if let Some(file_name) = patch.file_name {
                task.file_name = sanitize_file_name(&file_name);
            }
            if let Some(kind) = patch.kind {
                task.kind = kind;
            }
        });

        if !applied {
            return Err(UploadError::NotFound(task_id.to_string()));
        }
        self.get_task(task_id)
    }

    /// Read-only projection of a task for UIs and observers.
    pub fn get_task(&self, task_id: &str) -> Result<UploadTask, UploadError> {
        self.inner
            .tasks
            .get(task_id)
            .ok_or_else(|| UploadError::NotFound(task_id.to_string()))
    }

    /// All task records, oldest first.
    pub fn list_tasks(&self) -> Vec<UploadTask> {
        self.inner.tasks.list()
    }

    /// Snapshot stream of task mutations.
    pub fn subscribe(&self) -> broadcast::Receiver<UploadTask> {
        self.inner.tasks.subscribe()
    }

    /// Number of fingerprints with a live network upload.
    pub fn active_upload_count(&self) -> usize {
        self.inner.registry.active_count()
    }

    fn is_canceled(&self, task_id: &str) -> bool {
        self.inner.canceled.contains(task_id)
    }

    async fn run_pipeline(
        &self,
        task_id: &str,
        blob: Bytes,
    ) -> Result<UploadOutcome, UploadError> {
        let inner = &self.inner;

        let fingerprint = match inner.fingerprinter.fingerprint(&blob).await {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                tracing::warn!(task_id, error = %e, "fingerprinting failed");
                inner.tasks.transition(task_id, TaskStatus::Error, |task| {
                    task.error_message = Some(e.to_string());
                });
                return Err(e);
            }
        };

        // Canceled while hashing: never touch cache or network.
        if self.is_canceled(task_id) {
            return Ok(UploadOutcome::Canceled);
        }

        if !inner.tasks.transition(task_id, TaskStatus::Pending, |task| {
            task.fingerprint = Some(fingerprint.clone());
        }) {
            // Terminal (canceled) or removed in the meantime.
            return Ok(UploadOutcome::Canceled);
        }

        if let Some(hit) = inner.cache.get(&fingerprint) {
            tracing::debug!(task_id, %fingerprint, "content already stored, skipping upload");
            inner.tasks.transition(task_id, TaskStatus::Success, |task| {
                task.from_cache = true;
            });
            return Ok(UploadOutcome::Stored(StoredObject {
                url: inner.storage.object_url(&hit.object_key),
                object_key: hit.object_key,
                from_cache: true,
            }));
        }

        let on_progress: ProgressFn = {
            let scheduler = self.clone();
            let fingerprint = fingerprint.clone();
            Arc::new(move |pct| scheduler.inner.tasks.record_progress(&fingerprint, pct))
        };

        let runtime = inner.registry.acquire(&fingerprint, blob, on_progress);
        inner.registry.join(&runtime, task_id);

        // Cancel may have landed between hashing and join.
        if self.is_canceled(task_id) {
            inner.registry.leave(&runtime, task_id);
            return Ok(UploadOutcome::Canceled);
        }

        // Late joiners pick up the progress the shared transfer already made.
        let current = runtime.progress();
        inner.tasks.transition(task_id, TaskStatus::Uploading, |task| {
            task.progress = task.progress.max(current);
        });

        let shared = runtime.outcome().await;
        inner.registry.leave(&runtime, task_id);

        match shared {
            Ok(object_key) => {
                inner.cache.insert(
                    &fingerprint,
                    CachedUpload {
                        object_key: object_key.clone(),
                    },
                );

                if self.is_canceled(task_id) {
                    return Ok(UploadOutcome::Canceled);
                }

                inner.tasks.transition(task_id, TaskStatus::Success, |task| {
                    task.from_cache = false;
                });
                Ok(UploadOutcome::Stored(StoredObject {
                    url: inner.storage.object_url(&object_key),
                    object_key,
                    from_cache: false,
                }))
            }
            Err(e) if e.is_cancellation() => {
                inner.tasks.transition(task_id, TaskStatus::Canceled, |_| {});
                Ok(UploadOutcome::Canceled)
            }
            Err(e) => {
                // A task that canceled while others kept the upload alive
                // resolves Canceled, not the shared failure.
                if self.is_canceled(task_id) {
                    return Ok(UploadOutcome::Canceled);
                }

                tracing::warn!(task_id, error = %e, "shared upload failed");
                inner.tasks.transition(task_id, TaskStatus::Error, |task| {
                    task.error_message = Some(e.to_string());
                });
                Err(e)
            }
        }
    }
}
