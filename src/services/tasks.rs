use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::models::{TaskStatus, UploadTask};

/// Observable sink for task records. The scheduler is the only writer;
/// callers read snapshots or subscribe to change events.
pub struct TaskStore {
    tasks: DashMap<String, UploadTask>,
    events: broadcast::Sender<UploadTask>,
}

impl TaskStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            tasks: DashMap::new(),
            events,
        }
    }

    pub fn get(&self, task_id: &str) -> Option<UploadTask> {
        self.tasks.get(task_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<UploadTask> {
        let mut tasks: Vec<UploadTask> = self
            .tasks
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Snapshot of every task mutation, in publish order. Slow subscribers
    /// drop the oldest events (broadcast semantics).
    pub fn subscribe(&self) -> broadcast::Receiver<UploadTask> {
        self.events.subscribe()
    }

    pub(crate) fn insert(&self, task: UploadTask) {
        self.tasks.insert(task.id.clone(), task.clone());
        self.publish(&task);
    }

    pub(crate) fn remove(&self, task_id: &str) -> Option<UploadTask> {
        self.tasks.remove(task_id).map(|(_, task)| task)
    }

    /// Moves the task to `next` unless it is already terminal, applying
    /// `apply` under the same entry lock. `Success` implies progress 100.
    /// Returns false when the task is unknown or terminal.
    pub(crate) fn transition(
        &self,
        task_id: &str,
        next: TaskStatus,
        apply: impl FnOnce(&mut UploadTask),
    ) -> bool {
        let Some(mut entry) = self.tasks.get_mut(task_id) else {
            return false;
        };

        let task = entry.value_mut();
        if task.status.is_terminal() {
            return false;
        }

        task.status = next;
        apply(task);
        if task.status == TaskStatus::Success {
            task.progress = 100;
        }
        task.updated_at = Utc::now();

        let snapshot = task.clone();
        drop(entry);
        self.publish(&snapshot);
        true
    }

    /// Administrative patch path; does not touch status or progress.
    pub(crate) fn patch(&self, task_id: &str, apply: impl FnOnce(&mut UploadTask)) -> bool {
        let Some(mut entry) = self.tasks.get_mut(task_id) else {
            return false;
        };

        let task = entry.value_mut();
        apply(task);
        task.updated_at = Utc::now();

        let snapshot = task.clone();
        drop(entry);
        self.publish(&snapshot);
        true
    }

    /// Progress tick fan-out: every non-terminal task carrying
    /// `fingerprint` is moved to `Uploading` with the new percentage.
    /// Values are clamped below 100 and never move backwards.
    pub(crate) fn record_progress(&self, fingerprint: &str, progress: u8) {
        let clamped = progress.min(99);
        let mut snapshots = Vec::new();

        for mut entry in self.tasks.iter_mut() {
            let task = entry.value_mut();
            if task.fingerprint.as_deref() != Some(fingerprint) || task.status.is_terminal() {
                continue;
            }
            if task.status == TaskStatus::Uploading && clamped <= task.progress {
                continue;
            }

            task.status = TaskStatus::Uploading;
            task.progress = task.progress.max(clamped);
            task.updated_at = Utc::now();
            snapshots.push(task.clone());
        }

        for snapshot in snapshots {
            self.publish(&snapshot);
        }
    }

    fn publish(&self, task: &UploadTask) {
        // Nobody listening is fine
        let _ = self.events.send(task.clone());
    }
}
