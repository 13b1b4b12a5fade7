//! In-process task queue.
//!
//! Keeps created tasks in memory and enforces name uniqueness the same way
//! the managed queue does. Used for local development and tests; it never
//! delivers anything.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use enqueuer_core::{QueueError, TaskHandle, TaskQueue, TaskSpec};
use parking_lot::Mutex;

#[derive(Default)]
struct State {
    tasks: HashMap<String, TaskSpec>,
    failures: VecDeque<QueueError>,
    create_calls: usize,
}

/// [`TaskQueue`] backed by a map of task name to spec.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    state: Mutex<State>,
}

impl InMemoryTaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next create call fail with `err`. Calls queue up.
    pub fn fail_next(&self, err: QueueError) {
        self.state.lock().failures.push_back(err);
    }

    /// Number of create calls received, including failed ones.
    #[must_use]
    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<TaskSpec> {
        self.state.lock().tasks.get(name).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().tasks.is_empty()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn create_task(&self, task: &TaskSpec) -> Result<TaskHandle, QueueError> {
        let mut state = self.state.lock();
        state.create_calls += 1;

        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }

        let name = match &task.identity {
            Some(identity) => identity.as_str().to_string(),
            None => format!("{}/tasks/{}", task.parent, uuid::Uuid::new_v4().simple()),
        };
        if state.tasks.contains_key(&name) {
            return Err(QueueError::AlreadyExists { name });
        }
        state.tasks.insert(name.clone(), task.clone());

        Ok(TaskHandle { name })
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
