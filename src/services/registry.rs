use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::services::storage::{ObjectStorage, ProgressFn, UploadContext};

/// In-flight progress is clamped below this; 100 is reserved for confirmed
/// terminal success.
const INFLIGHT_PROGRESS_CEILING: u8 = 99;

/// Shared in-flight state for one fingerprint's network upload: the
/// cancellation handle, the set of referencing tasks, and the outcome every
/// referencing task awaits.
pub struct UploadRuntime {
    fingerprint: String,
    cancel: CancellationToken,
    task_ids: Mutex<HashSet<String>>,
    settled: AtomicBool,
    progress: watch::Sender<u8>,
    result: watch::Sender<Option<Result<String, UploadError>>>,
}

impl UploadRuntime {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Progress last reported by the transfer, clamped to 0..=99. Late
    /// joiners seed their task's progress bar from this.
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Waits for the shared upload to settle. Every referencing task
    /// receives the same outcome.
    pub async fn outcome(&self) -> Result<String, UploadError> {
        let mut rx = self.result.subscribe();
        loop {
            {
                let current = rx.borrow_and_update();
                if let Some(outcome) = current.as_ref() {
                    return outcome.clone();
                }
            }
            if rx.changed().await.is_err() {
                return Err(UploadError::Upload("upload driver dropped".to_string()));
            }
        }
    }

    fn members(&self) -> MutexGuard<'_, HashSet<String>> {
        self.task_ids
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Guarantees at most one live network upload per fingerprint, and tears
/// the transfer down when the last referencing task leaves before
/// settlement.
pub struct RuntimeRegistry {
    storage: Arc<dyn ObjectStorage>,
    runtimes: Arc<DashMap<String, Arc<UploadRuntime>>>,
}

impl RuntimeRegistry {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self {
            storage,
            runtimes: Arc::new(DashMap::new()),
        }
    }

    /// Number of fingerprints with a live upload.
    pub fn active_count(&self) -> usize {
        self.runtimes.len()
    }

    pub fn get(&self, fingerprint: &str) -> Option<Arc<UploadRuntime>> {
        self.runtimes.get(fingerprint).map(|entry| entry.value().clone())
    }

    /// Returns the live runtime for `fingerprint`, creating it and starting
    /// the single network upload if none exists. Concurrent callers for the
    /// same fingerprint all receive the same runtime while it is live.
    pub fn acquire(
        &self,
        fingerprint: &str,
        blob: Bytes,
        on_progress: ProgressFn,
    ) -> Arc<UploadRuntime> {
        self.runtimes
            .entry(fingerprint.to_string())
            .or_insert_with(|| self.spawn_runtime(fingerprint, blob, on_progress))
            .value()
            .clone()
    }

    /// Adds `task_id` to the runtime's referencing set. Idempotent.
    pub fn join(&self, runtime: &UploadRuntime, task_id: &str) {
        runtime.members().insert(task_id.to_string());
    }

    /// Removes `task_id` from the runtime's referencing set. When the
    /// departing task was the last member and the upload has not settled,
    /// the transfer is aborted: last one out turns off the lights.
    pub fn leave(&self, runtime: &UploadRuntime, task_id: &str) {
        let (removed, empty) = {
            let mut members = runtime.members();
            let removed = members.remove(task_id);
            (removed, members.is_empty())
        };

        if removed && empty && !runtime.is_settled() {
            tracing::debug!(
                fingerprint = %runtime.fingerprint,
                "last referencing task left, aborting shared upload"
            );
            runtime.cancel.cancel();
        }
    }

    fn spawn_runtime(
        &self,
        fingerprint: &str,
        blob: Bytes,
        on_progress: ProgressFn,
    ) -> Arc<UploadRuntime> {
        let (progress_tx, _) = watch::channel(0u8);
        let (result_tx, _) = watch::channel(None);

        let runtime = Arc::new(UploadRuntime {
            fingerprint: fingerprint.to_string(),
            cancel: CancellationToken::new(),
            task_ids: Mutex::new(HashSet::new()),
            settled: AtomicBool::new(false),
            progress: progress_tx,
            result: result_tx,
        });

        tracing::info!(fingerprint, size = blob.len(), "starting shared upload");

        let driver = runtime.clone();
        let storage = self.storage.clone();
        let runtimes = self.runtimes.clone();
        let token = runtime.cancel.clone();

        tokio::spawn(async move {
            let progress_cb: ProgressFn = {
                let driver = driver.clone();
                Arc::new(move |pct: u8| {
                    let clamped = pct.min(INFLIGHT_PROGRESS_CEILING);
                    driver.progress.send_if_modified(|current| {
                        if clamped > *current {
                            *current = clamped;
                            true
                        } else {
                            false
                        }
                    });
                    (on_progress)(clamped);
                })
            };

            let ctx = UploadContext {
                on_progress: progress_cb,
                cancel: token.clone(),
            };

            let result = tokio::select! {
                result = storage.upload(blob, ctx) => result,
                _ = token.cancelled() => Err(UploadError::Canceled),
            };

            match &result {
                Ok(key) => {
                    tracing::info!(fingerprint = %driver.fingerprint, %key, "shared upload settled")
                }
                Err(e) if e.is_cancellation() => {
                    tracing::info!(fingerprint = %driver.fingerprint, "shared upload aborted")
                }
                Err(e) => {
                    tracing::warn!(fingerprint = %driver.fingerprint, error = %e, "shared upload failed")
                }
            }

            // Deregister before publishing: a subsequent acquire for this
            // fingerprint must never observe a settled runtime.
            runtimes.remove(&driver.fingerprint);
            driver.settled.store(true, Ordering::Release);
            let _ = driver.result.send(Some(result));
        });

        runtime
    }
}
