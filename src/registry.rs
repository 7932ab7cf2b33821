use std::collections::HashMap;
use std::sync::Mutex;

use tracing::trace;

use crate::task::id::TaskId;
use crate::task::object::Task;

/// In-memory map of active tasks keyed by task-id (4.A). Generalises the
/// teacher's `CancellationRegistry` (a `lazy_static` `Mutex<HashMap<TaskId,
/// CancellationToken>>` holding only cancellation handles) into the full
/// Task Registry: it owns the `Task` itself, since §3 states the registry
/// is what `register`/`get`/`remove` operate on.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry { tasks: Mutex::new(HashMap::new()) }
    }

    /// Loops drawing random 6-char ids until one is absent from the map
    /// (§4.A, §8 property 1), matching `task_manager.py::generate_task_id`.
    pub fn new_id(&self) -> TaskId {
        let tasks = self.tasks.lock().unwrap();
        loop {
            let candidate = TaskId::random();
            if !tasks.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    pub fn register(&self, task: Task) {
        trace!("registering task {}", task.id);
        let mut tasks = self.tasks.lock().unwrap();
        tasks.insert(task.id, task);
    }

    pub fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&Task) -> R) -> Option<R> {
        let tasks = self.tasks.lock().unwrap();
        tasks.get(&id).map(f)
    }

    pub fn with_task_mut<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut tasks = self.tasks.lock().unwrap();
        tasks.get_mut(&id).map(f)
    }

    /// Idempotent; does not touch `work_dir` (§4.A) — that is the pipeline's
    /// duty on terminal transitions.
    pub fn remove(&self, id: TaskId) -> Option<Task> {
        trace!("removing task {id}");
        self.tasks.lock().unwrap().remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.lock().unwrap().contains_key(&id)
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.lock().unwrap().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static::lazy_static! {
    pub static ref TASK_REGISTRY: TaskRegistry = TaskRegistry::new();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::kind::TaskKind;
    use teloxide::types::{ChatId, UserId};

    fn make_task(registry: &TaskRegistry, dir: &tempfile::TempDir) -> Task {
        let id = registry.new_id();
        let work_dir = dir.path().join(id.as_str());
        std::fs::create_dir_all(&work_dir).unwrap();
        Task::new_for_test(id, UserId(1), ChatId(1), TaskKind::Leech, work_dir)
    }

    #[test]
    fn register_calls_produce_pairwise_distinct_ids() {
        let registry = TaskRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..50 {
            let task = make_task(&registry, &dir);
            assert!(seen.insert(task.id));
            registry.register(task);
        }
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn remove_then_register_may_reuse_the_freed_slot() {
        let registry = TaskRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let task = make_task(&registry, &dir);
        let id = task.id;
        registry.register(task);
        assert!(registry.contains(id));
        registry.remove(id);
        assert!(!registry.contains(id));
    }
}
