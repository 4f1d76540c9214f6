use crate::helpers::{TestVcenter, api_path};
use vcenter::prelude::{Error, TaskErrorPolicy, WaitPolicy};
use vcenter::task::NO_DETAILS;
use vcenter::vim::types::{MoRef, TaskState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn collected_task_counts_as_finished() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    let job = MoRef::task("task-201");
    Mock::given(method("GET"))
        .and(path(api_path(&job, "info")))
        .respond_with(
            ResponseTemplate::new(500)
                .set_body_string(r#"{"_typeName":"ManagedObjectNotFound","obj":"task-201"}"#),
        )
        .mount(&vcenter.server)
        .await;

    // Act
    let handle = vcenter.session.wait_for(job).await.unwrap();

    // Assert
    assert!(handle.is_vanished());
    assert_eq!(handle.state(), Some(TaskState::Success));
    assert_eq!(handle.result(), None);
}

#[tokio::test]
async fn tracked_jobs_are_waited_together() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .task_states("task-202", &["running", "running", "success"])
        .await;
    vcenter.task_states("task-203", &["success"]).await;

    // Act
    let first = vcenter.session.track(MoRef::task("task-202"));
    let second = vcenter.session.track(MoRef::task("task-203"));
    let describe_before = first.describe();
    let drained = vcenter.session.wait_for_all().await.unwrap();

    // Assert
    assert_eq!(describe_before, NO_DETAILS);
    assert_eq!(drained.len(), 2);
    assert!(first.is_terminal());
    assert!(second.is_terminal());
    assert_eq!(vcenter.polls("task-202").await, 3);
    assert_eq!(vcenter.polls("task-203").await, 1);
    assert!(vcenter.session.pending().is_empty());
}

#[tokio::test]
async fn strict_policy_raises_failed_task() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter.task_states("task-204", &["running", "error"]).await;
    let policy = WaitPolicy {
        on_error: TaskErrorPolicy::Raise,
        ..vcenter.session.settings().wait.clone()
    };
    let handle = vcenter
        .session
        .handle(MoRef::task("task-204"))
        .with_policy(policy);

    // Act
    let result = handle.wait().await;

    // Assert
    assert!(matches!(result, Err(Error::TaskFailed(_))));
}
