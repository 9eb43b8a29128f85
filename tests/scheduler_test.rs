use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use media_upload_scheduler::utils::hash::fingerprint_bytes;
use media_upload_scheduler::{
    EnqueueOptions, Fingerprinter, MediaKind, ObjectStorage, Sha256Fingerprinter, TaskStatus,
    UploadConfig, UploadContext, UploadError, UploadOutcome, UploadScheduler,
};
use tokio::sync::Notify;

/// Object-store double. Uploads emit a scripted progress sequence, then
/// optionally park until the test releases them, so tests control exactly
/// when the shared transfer settles.
struct MockStore {
    calls: AtomicUsize,
    gate: Notify,
    hold: bool,
    progress_script: Vec<u8>,
    fail_with: Option<&'static str>,
}

impl MockStore {
    fn instant() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            hold: false,
            progress_script: Vec::new(),
            fail_with: None,
        })
    }

    fn held(progress_script: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            hold: true,
            progress_script,
            fail_with: None,
        })
    }

    fn failing(message: &'static str) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            hold: false,
            progress_script: Vec::new(),
            fail_with: Some(message),
        })
    }

    fn release(&self) {
        self.gate.notify_one();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MockStore {
    async fn upload(&self, blob: Bytes, ctx: UploadContext) -> Result<String, UploadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        for pct in &self.progress_script {
            (ctx.on_progress)(*pct);
        }

        if self.hold {
            tokio::select! {
                _ = self.gate.notified() => {}
                _ = ctx.cancel.cancelled() => return Err(UploadError::Canceled),
            }
        }

        if let Some(message) = self.fail_with {
            return Err(UploadError::Upload(message.to_string()));
        }

        Ok(format!("media/{}", fingerprint_bytes(&blob)))
    }

    fn object_url(&self, key: &str) -> String {
        format!("https://cdn.test/{}", key)
    }
}

fn scheduler_with(store: Arc<MockStore>) -> UploadScheduler {
    UploadScheduler::new(
        UploadConfig::default(),
        Arc::new(Sha256Fingerprinter),
        store,
    )
}

async fn eventually(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_dedup_single_flight_and_fan_out() {
    let store = MockStore::held(Vec::new());
    let scheduler = scheduler_with(store.clone());
    let blob = Bytes::from_static(b"identical video bytes");

    let mut tickets = Vec::new();
    for n in 0..4 {
        let ticket = scheduler
            .enqueue(
                blob.clone(),
                MediaKind::Video,
                EnqueueOptions {
                    file_name: Some(format!("slot-{}.mp4", n)),
                    ..Default::default()
                },
            )
            .unwrap();
        tickets.push(ticket);
    }
    let task_ids: Vec<String> = tickets.iter().map(|t| t.task_id().to_string()).collect();

    // All four tasks converge on one in-flight transfer.
    eventually("all tasks to reach Uploading", || {
        task_ids
            .iter()
            .all(|id| scheduler.get_task(id).unwrap().status == TaskStatus::Uploading)
    })
    .await;
    assert_eq!(store.calls(), 1);
    assert_eq!(scheduler.active_upload_count(), 1);

    store.release();

    let mut keys = Vec::new();
    for ticket in tickets {
        match ticket.wait().await.unwrap() {
            UploadOutcome::Stored(stored) => {
                assert!(!stored.from_cache);
                assert_eq!(stored.url, format!("https://cdn.test/{}", stored.object_key));
                keys.push(stored.object_key);
            }
            UploadOutcome::Canceled => panic!("no task was canceled"),
        }
    }

    keys.dedup();
    assert_eq!(keys.len(), 1, "all tasks must resolve to the same object key");
    assert_eq!(store.calls(), 1);

    for id in &task_ids {
        let task = scheduler.get_task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Success);
        assert_eq!(task.progress, 100);
        assert!(!task.from_cache);
    }

    eventually("registry to drain", || scheduler.active_upload_count() == 0).await;
}

#[tokio::test]
async fn test_cache_short_circuit_skips_uploading() {
    let store = MockStore::instant();
    let scheduler = scheduler_with(store.clone());
    let blob = Bytes::from_static(b"cover image bytes");

    let first = scheduler
        .enqueue(blob.clone(), MediaKind::VideoCover, EnqueueOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();
    let first_key = match first {
        UploadOutcome::Stored(stored) => {
            assert!(!stored.from_cache);
            stored.object_key
        }
        UploadOutcome::Canceled => panic!("first upload was canceled"),
    };
    assert_eq!(store.calls(), 1);

    // Watch the second task's whole lifecycle through the event stream.
    let mut events = scheduler.subscribe();
    let second_ticket = scheduler
        .enqueue(blob, MediaKind::VideoCover, EnqueueOptions::default())
        .unwrap();
    let second_id = second_ticket.task_id().to_string();

    match second_ticket.wait().await.unwrap() {
        UploadOutcome::Stored(stored) => {
            assert!(stored.from_cache);
            assert_eq!(stored.object_key, first_key);
        }
        UploadOutcome::Canceled => panic!("second upload was canceled"),
    }

    // The upload primitive was never invoked again.
    assert_eq!(store.calls(), 1);

    let task = scheduler.get_task(&second_id).unwrap();
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.progress, 100);
    assert!(task.from_cache);

    while let Ok(event) = events.try_recv() {
        if event.id == second_id {
            assert_ne!(
                event.status,
                TaskStatus::Uploading,
                "a cache hit must never pass through Uploading"
            );
        }
    }
}

#[tokio::test]
async fn test_upload_failure_marks_error() {
    let store = MockStore::failing("bucket unavailable");
    let scheduler = scheduler_with(store.clone());

    let ticket = scheduler
        .enqueue(
            Bytes::from_static(b"doomed bytes"),
            MediaKind::Image,
            EnqueueOptions::default(),
        )
        .unwrap();
    let task_id = ticket.task_id().to_string();

    let err = ticket.wait().await.unwrap_err();
    assert!(matches!(err, UploadError::Upload(_)));
    assert!(err.to_string().contains("bucket unavailable"));

    let task = scheduler.get_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(
        task.error_message
            .as_deref()
            .unwrap()
            .contains("bucket unavailable")
    );
}

struct FailingFingerprinter;

#[async_trait]
impl Fingerprinter for FailingFingerprinter {
    async fn fingerprint(&self, _blob: &Bytes) -> Result<String, UploadError> {
        Err(UploadError::Hashing("simulated digest failure".to_string()))
    }
}

#[tokio::test]
async fn test_hashing_failure_marks_error_without_network() {
    let store = MockStore::instant();
    let scheduler = UploadScheduler::new(
        UploadConfig::default(),
        Arc::new(FailingFingerprinter),
        store.clone(),
    );

    let ticket = scheduler
        .enqueue(
            Bytes::from_static(b"unhashable"),
            MediaKind::Image,
            EnqueueOptions::default(),
        )
        .unwrap();
    let task_id = ticket.task_id().to_string();

    let err = ticket.wait().await.unwrap_err();
    assert!(matches!(err, UploadError::Hashing(_)));

    let task = scheduler.get_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(store.calls(), 0);
    assert_eq!(scheduler.active_upload_count(), 0);
}

#[tokio::test]
async fn test_progress_is_clamped_and_monotonic() {
    // The primitive reports 100 before returning; the task must not show
    // 100 until Success is committed.
    let store = MockStore::held(vec![30, 100]);
    let scheduler = scheduler_with(store.clone());

    let mut events = scheduler.subscribe();
    let ticket = scheduler
        .enqueue(
            Bytes::from_static(b"progress bytes"),
            MediaKind::Video,
            EnqueueOptions::default(),
        )
        .unwrap();
    let task_id = ticket.task_id().to_string();

    eventually("progress to reach the in-flight ceiling", || {
        scheduler.get_task(&task_id).unwrap().progress == 99
    })
    .await;
    let task = scheduler.get_task(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Uploading);

    store.release();
    assert!(matches!(
        ticket.wait().await.unwrap(),
        UploadOutcome::Stored(_)
    ));

    let mut last_progress = 0u8;
    while let Ok(event) = events.try_recv() {
        if event.id != task_id {
            continue;
        }
        assert!(
            event.progress >= last_progress,
            "progress went backwards: {} -> {}",
            last_progress,
            event.progress
        );
        if event.progress == 100 {
            assert_eq!(event.status, TaskStatus::Success);
        }
        last_progress = event.progress;
    }
    assert_eq!(last_progress, 100);
}

#[tokio::test]
async fn test_late_joiner_inherits_runtime_progress() {
    let store = MockStore::held(vec![42]);
    let scheduler = scheduler_with(store.clone());
    let blob = Bytes::from_static(b"shared content");

    let first = scheduler
        .enqueue(blob.clone(), MediaKind::Image, EnqueueOptions::default())
        .unwrap();
    let first_id = first.task_id().to_string();

    eventually("first task to show transfer progress", || {
        scheduler.get_task(&first_id).unwrap().progress == 42
    })
    .await;

    let second = scheduler
        .enqueue(blob, MediaKind::Image, EnqueueOptions::default())
        .unwrap();
    let second_id = second.task_id().to_string();

    // The joiner reflects what the transfer already did, not a fresh 0.
    eventually("second task to join the runtime", || {
        scheduler.get_task(&second_id).unwrap().status == TaskStatus::Uploading
    })
    .await;
    assert_eq!(scheduler.get_task(&second_id).unwrap().progress, 42);
    assert_eq!(store.calls(), 1);

    store.release();
    let first_key = match first.wait().await.unwrap() {
        UploadOutcome::Stored(stored) => stored.object_key,
        UploadOutcome::Canceled => panic!("first task was canceled"),
    };
    match second.wait().await.unwrap() {
        UploadOutcome::Stored(stored) => assert_eq!(stored.object_key, first_key),
        UploadOutcome::Canceled => panic!("second task was canceled"),
    }
}

#[tokio::test]
async fn test_enqueue_rejects_empty_blob() {
    let store = MockStore::instant();
    let scheduler = scheduler_with(store.clone());

    let err = scheduler
        .enqueue(Bytes::new(), MediaKind::Image, EnqueueOptions::default())
        .unwrap_err();
    assert!(matches!(err, UploadError::Invalid(_)));

    // No task record is created for rejected input.
    assert!(scheduler.list_tasks().is_empty());
    assert_eq!(store.calls(), 0);
}

#[tokio::test]
async fn test_no_negative_caching_after_failure() {
    let store = MockStore::failing("transient outage");
    let scheduler = scheduler_with(store.clone());
    let blob = Bytes::from_static(b"flaky bytes");

    let err = scheduler
        .enqueue(blob.clone(), MediaKind::Image, EnqueueOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Upload(_)));

    // A fresh enqueue retries against the network instead of a cached
    // failure.
    let _ = scheduler
        .enqueue(blob, MediaKind::Image, EnqueueOptions::default())
        .unwrap()
        .wait()
        .await;
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn test_update_task_patches_display_metadata_only() {
    let store = MockStore::instant();
    let scheduler = scheduler_with(store);

    let ticket = scheduler
        .enqueue(
            Bytes::from_static(b"rename me"),
            MediaKind::Image,
            EnqueueOptions {
                file_name: Some("before.png".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    let task_id = ticket.task_id().to_string();
    ticket.wait().await.unwrap();

    let updated = scheduler
        .update_task(
            &task_id,
            media_upload_scheduler::TaskPatch {
                file_name: Some("after.png".to_string()),
                kind: None,
            },
        )
        .unwrap();
    assert_eq!(updated.file_name, "after.png");
    assert_eq!(updated.status, TaskStatus::Success);
    assert_eq!(updated.progress, 100);

    let err = scheduler
        .update_task("missing", media_upload_scheduler::TaskPatch::default())
        .unwrap_err();
    assert!(matches!(err, UploadError::NotFound(_)));
}

#[tokio::test]
async fn test_caller_supplied_task_id_is_used() {
    let store = MockStore::instant();
    let scheduler = scheduler_with(store);

    let ticket = scheduler
        .enqueue(
            Bytes::from_static(b"pinned id"),
            MediaKind::Image,
            EnqueueOptions {
                task_id: Some("tab-3-slot-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(ticket.task_id(), "tab-3-slot-1");
    ticket.wait().await.unwrap();

    let task = scheduler.get_task("tab-3-slot-1").unwrap();
    assert_eq!(task.status, TaskStatus::Success);
}
