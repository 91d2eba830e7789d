use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{DiscoveryError, Result};
use crate::model::{DiscoveryTask, TaskId, TaskStatus};

struct TaskEntry {
    task: DiscoveryTask,
    cancel: CancellationToken,
    status: watch::Sender<TaskStatus>,
}

/// Discovery tasks by id.
///
/// Only the worker that owns a task mutates it; everyone else reads cloned
/// snapshots.
#[derive(Default)]
pub struct TaskStore {
    entries: RwLock<HashMap<TaskId, TaskEntry>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a new task and hand back its cancellation token.
    pub fn insert(&self, task: DiscoveryTask) -> CancellationToken {
        let cancel = CancellationToken::new();
        let (status, _) = watch::channel(task.status);
        self.entries.write().insert(
            task.id,
            TaskEntry {
                task,
                cancel: cancel.clone(),
                status,
            },
        );
        cancel
    }

    /// Apply `f` to the task, publishing any status change to waiters.
    pub fn update<R>(&self, id: TaskId, f: impl FnOnce(&mut DiscoveryTask) -> R) -> Option<R> {
        let mut entries = self.entries.write();
        let entry = entries.get_mut(&id)?;
        let result = f(&mut entry.task);
        if *entry.status.borrow() != entry.task.status {
            entry.status.send_replace(entry.task.status);
        }
        Some(result)
    }

    pub fn snapshot(&self, id: TaskId) -> Option<DiscoveryTask> {
        self.entries.read().get(&id).map(|e| e.task.clone())
    }

    /// All tasks, oldest first.
    pub fn snapshots(&self) -> Vec<DiscoveryTask> {
        let mut tasks: Vec<_> = self.entries.read().values().map(|e| e.task.clone()).collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn subscribe(&self, id: TaskId) -> Result<watch::Receiver<TaskStatus>> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.status.subscribe())
            .ok_or_else(|| DiscoveryError::TaskNotFound(id.to_string()))
    }

    /// Signal the task's worker to stop. Terminal tasks are left alone.
    pub fn cancel(&self, id: TaskId) -> Result<TaskStatus> {
        let entries = self.entries.read();
        let entry = entries
            .get(&id)
            .ok_or_else(|| DiscoveryError::TaskNotFound(id.to_string()))?;
        if !entry.task.status.is_terminal() {
            entry.cancel.cancel();
        }
        Ok(entry.task.status)
    }

    /// Drop terminal tasks finished at least `retention` ago.
    pub fn cleanup(&self, retention: Duration) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| {
            let task = &entry.task;
            !task.status.is_terminal() || task.age(now).to_std().unwrap_or_default() < retention
        });
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Cleaned up discovery tasks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
