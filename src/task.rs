use crate::prelude::{Error, Result};
use crate::vim::Vim;
use crate::vim::types::{LocalizedFault, MoRef, TaskInfo, TaskState};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::{Debug, Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Placeholder rendered by [`TaskHandle::describe`] before the first poll.
///
pub const NO_DETAILS: &str = "No task details available";

/// What a wait does when the task object can no longer be found.
///
/// vCenter garbage-collects finished tasks, so by default a task that
/// disappeared while being polled is assumed to have completed.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingObjectPolicy {
    #[default]
    AssumeSuccess,
    Fail,
}

/// What a wait does when the task ends in the `error` state.
///
/// `Report` returns normally and leaves the failure to be inspected through
/// [`TaskHandle::error`] or [`TaskHandle::describe`]. Callers expecting a
/// failed task to surface as `Err` must opt into `Raise`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorPolicy {
    #[default]
    Report,
    Raise,
}

/// How a [`TaskHandle`] polls its job.
///
/// # Fields
///
/// * `poll_interval`: Fixed pause between two polls.
/// * `timeout`: Total time after which a wait gives up with
///   `Error::Timeout`. `None` waits for as long as it takes.
/// * `missing_object`: See [`MissingObjectPolicy`].
/// * `on_error`: See [`TaskErrorPolicy`].
///
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
    pub missing_object: MissingObjectPolicy,
    pub on_error: TaskErrorPolicy,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: None,
            missing_object: MissingObjectPolicy::default(),
            on_error: TaskErrorPolicy::default(),
        }
    }
}

/// What a handle last learned about its job.
///
#[derive(Debug, Clone, Default)]
pub enum Observation {
    /// Never polled.
    #[default]
    Unknown,
    Reported(TaskInfo),
    /// The task object disappeared while being polled.
    Vanished,
}

impl Observation {
    fn rank(&self) -> u8 {
        match self {
            Observation::Unknown => 0,
            Observation::Reported(info) => match info.state {
                TaskState::Pending => 1,
                TaskState::Running => 2,
                TaskState::Success | TaskState::Error => 3,
            },
            Observation::Vanished => 3,
        }
    }

    fn is_terminal(&self) -> bool {
        self.rank() == 3
    }
}

/// Local handle over one asynchronous remote operation.
///
/// Clones share what has been observed, so a handle kept by the caller and
/// its copy in the pending registry agree once either of them was waited on.
///
#[derive(Clone)]
pub struct TaskHandle {
    vim: Arc<dyn Vim + Send + Sync>,
    job: MoRef,
    policy: WaitPolicy,
    observation: Arc<Mutex<Observation>>,
}

impl TaskHandle {
    /// Wraps a job reference returned by the remote. Does not poll.
    ///
    pub fn submit(vim: Arc<dyn Vim + Send + Sync>, job: MoRef, policy: WaitPolicy) -> Self {
        Self {
            vim,
            job,
            policy,
            observation: Arc::new(Mutex::new(Observation::Unknown)),
        }
    }

    /// Replaces the wait policy of this handle.
    ///
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn job(&self) -> &MoRef {
        &self.job
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    pub fn observation(&self) -> Observation {
        self.lock().clone()
    }

    /// Last observed state. A vanished task reads as `Success`.
    ///
    pub fn state(&self) -> Option<TaskState> {
        match &*self.lock() {
            Observation::Unknown => None,
            Observation::Reported(info) => Some(info.state),
            Observation::Vanished => Some(TaskState::Success),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state().is_some_and(TaskState::is_terminal)
    }

    /// Whether the wait ended because the task object disappeared.
    ///
    pub fn is_vanished(&self) -> bool {
        matches!(&*self.lock(), Observation::Vanished)
    }

    /// Payload of the task as last observed. Never polls.
    ///
    pub fn result(&self) -> Option<Value> {
        match &*self.lock() {
            Observation::Reported(info) => info.result.clone(),
            _ => None,
        }
    }

    /// Fault of a task that ended in the `error` state.
    ///
    pub fn error(&self) -> Option<LocalizedFault> {
        match &*self.lock() {
            Observation::Reported(info) => info.error.clone(),
            _ => None,
        }
    }

    /// Renders the last observed status object for diagnostics.
    ///
    pub fn describe(&self) -> String {
        match &*self.lock() {
            Observation::Unknown => NO_DETAILS.to_owned(),
            Observation::Reported(info) => info.to_string(),
            Observation::Vanished => format!(
                "{}: no longer on the server, assumed completed",
                self.job.value
            ),
        }
    }

    /// Polls the job once, unless it is already terminal.
    ///
    pub async fn refresh(&self) -> Result<Option<TaskState>> {
        if !self.is_terminal() {
            self.poll().await?;
        }
        Ok(self.state())
    }

    /// Blocks until the job reaches a terminal state, using the timeout of
    /// the handle's policy.
    ///
    /// A job ending in `error` is returned normally unless the policy says
    /// [`TaskErrorPolicy::Raise`].
    ///
    pub async fn wait(&self) -> Result<&Self> {
        self.wait_timeout(self.policy.timeout).await
    }

    /// Like [`TaskHandle::wait`], with an explicit timeout.
    ///
    #[tracing::instrument(level = "debug", target = "task", skip(self), fields(task = %self.job.value))]
    pub async fn wait_timeout(&self, timeout: Option<Duration>) -> Result<&Self> {
        let started = Instant::now();

        while !self.poll_unless_terminal().await? {
            let elapsed = started.elapsed();
            let pause = match timeout {
                Some(timeout) if elapsed >= timeout => {
                    tracing::warn!(target: "task", task = %self.job.value, ?elapsed, "Gave up waiting for task");
                    return Err(Error::Timeout(elapsed.as_secs_f32()));
                }
                Some(timeout) => self.policy.poll_interval.min(timeout - elapsed),
                None => self.policy.poll_interval,
            };
            tracing::trace!(target: "task", task = %self.job.value, state = ?self.state(), "Task not finished yet");
            tokio::time::sleep(pause).await;
        }

        self.finish()
    }

    async fn poll_unless_terminal(&self) -> Result<bool> {
        if self.is_terminal() {
            return Ok(true);
        }
        self.poll().await
    }

    /// Fetches the job status once. Returns whether it is terminal.
    ///
    async fn poll(&self) -> Result<bool> {
        match self.vim.task_info(&self.job).await {
            Ok(info) => Ok(self.record(info)),
            Err(error)
                if error.is_missing_object()
                    && self.policy.missing_object == MissingObjectPolicy::AssumeSuccess =>
            {
                self.vanish();
                Ok(true)
            }
            Err(error) => Err(error),
        }
    }

    /// Stores a fresh status, refusing any backward transition.
    ///
    fn record(&self, info: TaskInfo) -> bool {
        let mut observation = self.lock();
        let incoming = Observation::Reported(info);
        if observation.is_terminal() {
            tracing::debug!(target: "task", task = %self.job.value, "Task already terminal, ignoring late status");
        } else if incoming.rank() < observation.rank() {
            tracing::warn!(target: "task", task = %self.job.value, "Ignoring task state regression");
        } else {
            *observation = incoming;
        }
        observation.is_terminal()
    }

    /// Marks the job as garbage-collected, unless a terminal status was
    /// already observed.
    ///
    fn vanish(&self) {
        let mut observation = self.lock();
        if !observation.is_terminal() {
            tracing::warn!(target: "task", task = %self.job.value, "Task no longer exists on the server, assuming it completed");
            *observation = Observation::Vanished;
        }
    }

    fn finish(&self) -> Result<&Self> {
        match self.state() {
            Some(TaskState::Error) if self.policy.on_error == TaskErrorPolicy::Raise => {
                Err(Error::TaskFailed(self.describe()))
            }
            Some(TaskState::Error) => {
                tracing::warn!(target: "task", task = %self.job.value, details = %self.describe(), "Task finished with error");
                Ok(self)
            }
            _ => {
                tracing::info!(target: "task", task = %self.job.value, "Task finished");
                Ok(self)
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Observation> {
        self.observation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Display for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("job", &self.job)
            .field("policy", &self.policy)
            .field("observation", &*self.lock())
            .field("vim", &"Arc<dyn Vim>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedVim, Step};
    use serde_json::json;

    fn policy() -> WaitPolicy {
        WaitPolicy::default()
    }

    fn handle(vim: &Arc<ScriptedVim>, job: MoRef, policy: WaitPolicy) -> TaskHandle {
        TaskHandle::submit(vim.clone(), job, policy)
    }

    #[tokio::test(start_paused = true)]
    async fn submit_does_not_poll() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::State(TaskState::Success)]);

        // Act
        let task = handle(&vim, job, policy());

        // Assert
        assert_eq!(vim.polls("task-1"), 0);
        assert_eq!(task.state(), None);
        assert_eq!(task.describe(), NO_DETAILS);
        assert_eq!(task.result(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_then_success_polls_twice() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let payload = json!({"type": "VirtualMachine", "value": "vm-43"});
        let job = vim.script(
            "task-1",
            [
                Step::State(TaskState::Pending),
                Step::Finished(TaskState::Success, payload.clone()),
            ],
        );
        let task = handle(&vim, job, policy());
        let started = Instant::now();

        // Act
        let result = task.wait().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(vim.polls("task-1"), 2);
        assert_eq!(task.state(), Some(TaskState::Success));
        assert_eq!(task.result(), Some(payload));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_only_after_success_is_observed() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script(
            "task-1",
            [
                Step::State(TaskState::Pending),
                Step::State(TaskState::Running),
                Step::State(TaskState::Running),
                Step::State(TaskState::Success),
            ],
        );
        let task = handle(&vim, job, policy());

        // Act
        task.wait().await.unwrap();

        // Assert
        assert_eq!(vim.polls("task-1"), 4);
        assert!(task.is_terminal());
        assert!(!task.is_vanished());
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_is_reported_not_raised() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let fault = json!({
            "fault": {"_typeName": "InvalidPowerState"},
            "localizedMessage": "The attempted operation cannot be performed in the current state."
        });
        let job = vim.script(
            "task-1",
            [
                Step::State(TaskState::Running),
                Step::Finished(TaskState::Error, fault),
            ],
        );
        let task = handle(&vim, job, policy());

        // Act
        let result = task.wait().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(task.state(), Some(TaskState::Error));
        assert_eq!(task.error().unwrap().kind(), Some("InvalidPowerState"));
        assert!(task.describe().contains("InvalidPowerState"));
        assert_eq!(task.result(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn error_state_is_raised_in_strict_mode() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let fault = json!({"fault": {"_typeName": "DuplicateName"}});
        let job = vim.script("task-1", [Step::Finished(TaskState::Error, fault)]);
        let strict = WaitPolicy {
            on_error: TaskErrorPolicy::Raise,
            ..policy()
        };
        let task = handle(&vim, job, strict);

        // Act
        let result = task.wait().await;

        // Assert
        match result.unwrap_err() {
            Error::TaskFailed(details) => assert!(details.contains("DuplicateName")),
            error => panic!("unexpected error: {}", error),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missing_task_on_first_poll_is_success() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::Missing]);
        let task = handle(&vim, job, policy());

        // Act
        let result = task.wait().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(vim.polls("task-1"), 1);
        assert!(task.is_vanished());
        assert_eq!(task.state(), Some(TaskState::Success));
        assert!(task.describe().contains("assumed completed"));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_task_mid_poll_is_success() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script(
            "task-1",
            [Step::State(TaskState::Running), Step::Missing],
        );
        let task = handle(&vim, job, policy());

        // Act
        let result = task.wait().await;

        // Assert
        assert!(result.is_ok());
        assert_eq!(vim.polls("task-1"), 2);
        assert!(task.is_vanished());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_task_fails_when_policy_says_so() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::Missing]);
        let fail = WaitPolicy {
            missing_object: MissingObjectPolicy::Fail,
            ..policy()
        };
        let task = handle(&vim, job, fail);

        // Act
        let result = task.wait().await;

        // Assert
        assert!(matches!(result.unwrap_err(), Error::NotFound(_)));
        assert!(!task.is_vanished());
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_propagated() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::State(TaskState::Running), Step::Broken]);
        let task = handle(&vim, job, policy());

        // Act
        let result = task.wait().await;

        // Assert
        assert!(matches!(result.unwrap_err(), Error::Any(_)));
        assert_eq!(task.state(), Some(TaskState::Running));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_opt_in() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::State(TaskState::Running)]);
        let task = handle(&vim, job, policy());
        let started = Instant::now();

        // Act
        let result = task.wait_timeout(Some(Duration::from_secs(5))).await;

        // Assert
        assert!(matches!(result.unwrap_err(), Error::Timeout(_)));
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        // Polls at 0, 2, 4 and 5 seconds.
        assert_eq!(vim.polls("task-1"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_handle_is_not_polled_again() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::State(TaskState::Success)]);
        let task = handle(&vim, job, policy());
        task.wait().await.unwrap();

        // Act
        task.wait().await.unwrap();
        let state = task.refresh().await.unwrap();

        // Assert
        assert_eq!(vim.polls("task-1"), 1);
        assert_eq!(state, Some(TaskState::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn state_never_moves_backward() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script(
            "task-1",
            [
                Step::State(TaskState::Running),
                Step::State(TaskState::Pending),
                Step::State(TaskState::Success),
            ],
        );
        let task = handle(&vim, job, policy());

        // Act
        let first = task.refresh().await.unwrap();
        let second = task.refresh().await.unwrap();
        let third = task.refresh().await.unwrap();

        // Assert
        assert_eq!(first, Some(TaskState::Running));
        assert_eq!(second, Some(TaskState::Running));
        assert_eq!(third, Some(TaskState::Success));
    }

    #[tokio::test(start_paused = true)]
    async fn result_before_terminal_exposes_partial_data() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let partial = json!({"folderPath": "[datastore1] ", "file": []});
        let job = vim.script(
            "task-1",
            [Step::Finished(TaskState::Running, partial.clone())],
        );
        let task = handle(&vim, job, policy());

        // Act
        task.refresh().await.unwrap();

        // Assert
        assert!(!task.is_terminal());
        assert_eq!(task.result(), Some(partial));
    }

    #[tokio::test(start_paused = true)]
    async fn clones_share_observations() {
        // Arrange
        let vim = Arc::new(ScriptedVim::default());
        let job = vim.script("task-1", [Step::State(TaskState::Success)]);
        let task = handle(&vim, job, policy());
        let copy = task.clone();

        // Act
        copy.wait().await.unwrap();

        // Assert
        assert_eq!(task.state(), Some(TaskState::Success));
    }
}
