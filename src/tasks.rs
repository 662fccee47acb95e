//! In-process bookkeeping of in-flight scan tasks.
//!
//! The registry enforces at-most-one-active-scan-per-`(endpoint, kind)`
//! via [`TaskRegistry::find`] and gates destructive operations (such as
//! removing an endpoint while a scan against it runs) via
//! [`TaskRegistry::empty`]. It performs no network or index I/O; the
//! coordinator is its single logical owner and performs all mutations.

use std::collections::BTreeMap;

use crate::models::{Task, TaskKind, TaskState};

pub struct TaskRegistry {
    next_id: u64,
    tasks: BTreeMap<u64, Task>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            tasks: BTreeMap::new(),
        }
    }

    /// Allocate a task with a strictly increasing id and store it.
    pub fn create_task(&mut self, endpoint_name: &str, owner: &str, kind: TaskKind) -> Task {
        let task = Task {
            id: self.next_id,
            endpoint_name: endpoint_name.to_string(),
            owner: owner.to_string(),
            kind,
            state: TaskState::Idle,
            started: None,
            ended: None,
        };
        self.next_id += 1;
        self.tasks.insert(task.id, task.clone());
        task
    }

    /// Insert or replace a task by id.
    pub fn set(&mut self, task: Task) {
        self.tasks.insert(task.id, task);
    }

    pub fn get(&self, id: u64) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn delete(&mut self, id: u64) -> Option<Task> {
        self.tasks.remove(&id)
    }

    /// First stored task matching `(endpoint_name, kind)`, in id order.
    ///
    /// This is the dedup guard: callers check it before creating a task so
    /// a second scan request attaches to the running one instead of
    /// duplicating work.
    pub fn find(&self, endpoint_name: &str, kind: TaskKind) -> Option<&Task> {
        self.tasks
            .values()
            .find(|t| t.endpoint_name == endpoint_name && t.kind == kind)
    }

    /// True iff no stored task matches `owner` and, if given,
    /// `endpoint_name`.
    pub fn empty(&self, owner: &str, endpoint_name: Option<&str>) -> bool {
        !self.tasks.values().any(|t| {
            t.owner == owner && endpoint_name.map_or(true, |name| t.endpoint_name == name)
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_strictly_increasing() {
        let mut registry = TaskRegistry::new();
        let mut last = 0;
        for i in 0..20 {
            let task = registry.create_task(&format!("ep{}", i % 3), "cli", TaskKind::ScanEndpoint);
            assert!(task.id > last, "id {} not greater than {}", task.id, last);
            last = task.id;
        }
    }

    #[test]
    fn test_ids_survive_deletion() {
        let mut registry = TaskRegistry::new();
        let a = registry.create_task("ep", "cli", TaskKind::ScanEndpoint);
        registry.delete(a.id);
        let b = registry.create_task("ep", "cli", TaskKind::ScanEndpoint);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_find_until_deleted() {
        let mut registry = TaskRegistry::new();
        let task = registry.create_task("plant", "cli", TaskKind::ScanEndpoint);

        let found = registry.find("plant", TaskKind::ScanEndpoint).unwrap();
        assert_eq!(found.id, task.id);

        // A different kind against the same endpoint is a different key.
        assert!(registry.find("plant", TaskKind::ScanTemplates).is_none());

        registry.delete(task.id);
        assert!(registry.find("plant", TaskKind::ScanEndpoint).is_none());
    }

    #[test]
    fn test_empty_by_owner_and_name() {
        let mut registry = TaskRegistry::new();
        assert!(registry.empty("cli", None));

        registry.create_task("files", "cli", TaskKind::ScanEndpoint);
        assert!(!registry.empty("cli", None));
        assert!(!registry.empty("cli", Some("files")));
        assert!(registry.empty("cli", Some("plant")));
        assert!(registry.empty("scheduler", None));
    }

    #[test]
    fn test_set_replaces() {
        let mut registry = TaskRegistry::new();
        let mut task = registry.create_task("files", "cli", TaskKind::ScanEndpoint);
        task.state = TaskState::InProgress;
        registry.set(task.clone());
        assert_eq!(
            registry.get(task.id).unwrap().state,
            TaskState::InProgress
        );
    }
}
