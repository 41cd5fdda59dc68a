use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::models::task::{Task, TaskId};
use crate::utils::error::{AppError, AppResult};

/// Where tasks live for the lifetime of the process.
///
/// Writes to one task are serialized; different tasks never contend on the same lock.
pub trait TaskStore: Send + Sync {
    fn insert(&self, task: Task);

    /// Copy of the task as it is right now
    fn snapshot(&self, id: &str) -> Option<Task>;

    /// Run `change` with exclusive access to the task
    fn modify(&self, id: &str, change: &mut dyn FnMut(&mut Task) -> AppResult<()>) -> AppResult<()>;

    fn len(&self) -> usize;
}

/// Sharded in-memory store, one mutex per task
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<TaskId, Arc<Mutex<Task>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Option<Arc<Mutex<Task>>> {
        // Clone the handle so the shard lock is released before the task lock is taken
        self.tasks.get(id).map(|entry| entry.value().clone())
    }
}

impl TaskStore for MemoryTaskStore {
    fn insert(&self, task: Task) {
        self.tasks.insert(task.id.clone(), Arc::new(Mutex::new(task)));
    }

    fn snapshot(&self, id: &str) -> Option<Task> {
        self.entry(id).map(|task| task.lock().clone())
    }

    fn modify(&self, id: &str, change: &mut dyn FnMut(&mut Task) -> AppResult<()>) -> AppResult<()> {
        let task = self
            .entry(id)
            .ok_or_else(|| AppError::InternalStateError(format!("unknown task {}", id)))?;
        let mut guard = task.lock();
        change(&mut guard)
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::request::{CaptureRequest, IssueType};
    use crate::models::task::TaskState;

    #[test]
    fn snapshot_is_a_copy() {
        let store = MemoryTaskStore::new();
        let task = Task::new(CaptureRequest::new(IssueType::General, 5));
        let id = task.id.clone();
        store.insert(task);

        let mut copy = store.snapshot(&id).unwrap();
        copy.state = TaskState::Done;
        assert_eq!(store.snapshot(&id).unwrap().state, TaskState::Pending);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn modify_applies_under_lock() {
        let store = MemoryTaskStore::new();
        let task = Task::new(CaptureRequest::new(IssueType::General, 5));
        let id = task.id.clone();
        store.insert(task);

        store
            .modify(&id, &mut |t| t.transition(TaskState::Capturing))
            .unwrap();
        assert_eq!(store.snapshot(&id).unwrap().state, TaskState::Capturing);

        let err = store
            .modify(&id, &mut |t| t.transition(TaskState::Done))
            .unwrap_err();
        assert!(matches!(err, AppError::InternalStateError(_)));
    }

    #[test]
    fn unknown_task_is_an_error() {
        let store = MemoryTaskStore::new();
        assert!(store.snapshot("nope").is_none());
        assert!(store.modify("nope", &mut |_| Ok(())).is_err());
    }

    #[test]
    fn concurrent_writers_on_different_tasks() {
        let store = Arc::new(MemoryTaskStore::new());
        let ids: Vec<String> = (0..8)
            .map(|_| {
                let task = Task::new(CaptureRequest::new(IssueType::General, 5));
                let id = task.id.clone();
                store.insert(task);
                id
            })
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .cloned()
            .map(|id| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .modify(&id, &mut |t| t.transition(TaskState::Capturing))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(ids
            .iter()
            .all(|id| store.snapshot(id).unwrap().state == TaskState::Capturing));
    }
}
