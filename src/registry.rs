use crate::prelude::Result;
use crate::task::TaskHandle;
use futures::future::join_all;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Jobs that were submitted without waiting and still have to be awaited
/// before the session is torn down.
///
#[derive(Debug, Default)]
pub struct PendingTasks {
    handles: Mutex<Vec<TaskHandle>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle. Registering the same job twice waits on it twice.
    ///
    pub fn register(&self, handle: TaskHandle) {
        tracing::debug!(target: "registry", task = %handle.job().value, "Registered pending task");
        self.lock().push(handle);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Waits for every registered job and empties the registry.
    ///
    /// All jobs are awaited concurrently, and all of them are awaited even
    /// when some wait fails. The registry is empty afterwards either way;
    /// the first failure, in registration order, is returned.
    ///
    /// Handles registered while the drain is running are kept for the next
    /// drain.
    ///
    #[tracing::instrument(level = "debug", target = "registry", skip(self))]
    pub async fn drain_all(&self) -> Result<Vec<TaskHandle>> {
        let handles = std::mem::take(&mut *self.lock());
        if handles.is_empty() {
            return Ok(handles);
        }
        tracing::info!(target: "registry", count = handles.len(), "Waiting for pending tasks");

        let outcomes = join_all(handles.iter().map(TaskHandle::wait)).await;
        let mut first_error = None;
        for (handle, outcome) in handles.iter().zip(outcomes) {
            if let Err(error) = outcome {
                tracing::error!(target: "registry", task = %handle.job().value, %error, "Pending task could not be awaited");
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(handles),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TaskHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prelude::Error;
    use crate::task::WaitPolicy;
    use crate::testing::{ScriptedVim, Step};
    use crate::vim::types::TaskState;
    use std::sync::Arc;
    use crate::vim::Vim;
    use crate::vim::types::{MoRef, ServiceContent, TaskInfo};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tokio::time::Instant;

    /// Yields to the scheduler before every call, so concurrent waits on one
    /// job interleave their polls.
    ///
    struct YieldingVim(Arc<ScriptedVim>);

    #[async_trait]
    impl Vim for YieldingVim {
        async fn login(&self) -> Result<()> {
            self.0.login().await
        }

        async fn logout(&self) -> Result<()> {
            self.0.logout().await
        }

        async fn content(&self) -> Result<ServiceContent> {
            self.0.content().await
        }

        async fn invoke(&self, object: &MoRef, method: &str, args: Value) -> Result<Value> {
            self.0.invoke(object, method, args).await
        }

        async fn property(&self, object: &MoRef, name: &str) -> Result<Value> {
            self.0.property(object, name).await
        }

        async fn task_info(&self, task: &MoRef) -> Result<TaskInfo> {
            tokio::task::yield_now().await;
            self.0.task_info(task).await
        }
    }

    fn running(polls: usize) -> Vec<Step> {
        let mut steps = vec![Step::State(TaskState::Running); polls - 1];
        steps.push(Step::State(TaskState::Success));
        steps
    }

    #[tokio::test(start_paused = true)]
    async fn drain_all_waits_for_every_task() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let registry = PendingTasks::new();
        for (task, polls) in [("task-1", 1), ("task-2", 2), ("task-3", 3)] {
            let job = vim.script(task, running(polls));
            registry.register(TaskHandle::submit(vim.clone(), job, WaitPolicy::default()));
        }
        let started = Instant::now();

        // Act
        let drained = registry.drain_all().await.unwrap();

        // Assert
        assert_eq!(drained.len(), 3);
        assert!(drained.iter().all(TaskHandle::is_terminal));
        assert_eq!(vim.polls("task-1"), 1);
        assert_eq!(vim.polls("task-2"), 2);
        assert_eq!(vim.polls("task-3"), 3);
        assert!(registry.is_empty());
        // Waited concurrently: the slowest job bounds the drain.
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_all_on_empty_registry_returns_immediately() {
        // Arrange
        let registry = PendingTasks::new();

        // Act
        let drained = registry.drain_all().await.unwrap();

        // Assert
        assert!(drained.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn second_drain_does_not_poll() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let registry = PendingTasks::new();
        let job = vim.script("task-1", running(2));
        registry.register(TaskHandle::submit(vim.clone(), job, WaitPolicy::default()));
        registry.drain_all().await.unwrap();

        // Act
        let drained = registry.drain_all().await.unwrap();

        // Assert
        assert!(drained.is_empty());
        assert_eq!(vim.total_polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_wait_still_empties_registry() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let registry = PendingTasks::new();
        let broken = vim.script("task-1", [Step::Broken]);
        let healthy = vim.script("task-2", running(3));
        registry.register(TaskHandle::submit(vim.clone(), broken, WaitPolicy::default()));
        let survivor = TaskHandle::submit(vim.clone(), healthy, WaitPolicy::default());
        registry.register(survivor.clone());

        // Act
        let result = registry.drain_all().await;

        // Assert
        assert!(matches!(result.unwrap_err(), Error::Any(_)));
        assert!(registry.is_empty());
        assert_eq!(survivor.state(), Some(TaskState::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_tasks_count_as_finished() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let registry = PendingTasks::new();
        let job = vim.script("task-1", [Step::Missing]);
        registry.register(TaskHandle::submit(vim.clone(), job, WaitPolicy::default()));

        // Act
        let drained = registry.drain_all().await.unwrap();

        // Assert
        assert!(drained[0].is_vanished());
    }

    #[tokio::test(start_paused = true)]
    async fn handle_registered_twice_keeps_its_terminal_state() {
        // Arrange
        let scripted = Arc::new(ScriptedVim::default());
        let fault = json!({"fault": {"_typeName": "DuplicateName"}, "localizedMessage": "The name 'web-01' already exists."});
        let job = scripted.script("task-1", [Step::Finished(TaskState::Error, fault), Step::Missing]);
        let vim = Arc::new(YieldingVim(scripted.clone()));
        let registry = PendingTasks::new();
        let handle = TaskHandle::submit(vim, job, WaitPolicy::default());
        registry.register(handle.clone());
        registry.register(handle.clone());

        // Act
        registry.drain_all().await.unwrap();

        // Assert
        assert_eq!(scripted.polls("task-1"), 2);
        assert_eq!(handle.state(), Some(TaskState::Error));
        assert!(!handle.is_vanished());
        assert_eq!(handle.error().unwrap().kind(), Some("DuplicateName"));
    }
}
