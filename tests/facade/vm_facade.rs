use crate::helpers::{TestVcenter, api_path, vm_config, vm_summary};
use serde_json::json;
use vcenter::inventory::vm::Vm;
use vcenter::prelude::{Dispatch, Error, VimError};
use vcenter::vim::types::{MoRef, PowerState, TaskState};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

fn vm_ref() -> MoRef {
    MoRef::new("VirtualMachine", "vm-42")
}

async fn load_vm(vcenter: &TestVcenter) -> Vm {
    Vm::load(vcenter.session.clone(), vm_ref(), MoRef::new("Folder", "group-v3"))
        .await
        .unwrap()
}

#[tokio::test]
async fn power_on_waits_and_refreshes() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .property_times(&vm_ref(), "summary", vm_summary("web-01", "poweredOff"), 2)
        .await;
    vcenter
        .property(&vm_ref(), "summary", vm_summary("web-01", "poweredOn"))
        .await;
    vcenter.property(&vm_ref(), "config", vm_config()).await;
    vcenter
        .task_method(&vm_ref(), "PowerOnVM_Task", "task-101")
        .await;
    vcenter
        .task_states("task-101", &["queued", "running", "success"])
        .await;
    let mut vm = load_vm(&vcenter).await;

    // Act
    let handle = vm.power_on(Dispatch::Wait).await.unwrap().unwrap();

    // Assert
    assert_eq!(handle.state(), Some(TaskState::Success));
    assert_eq!(vcenter.polls("task-101").await, 3);
    assert_eq!(vm.power_state(), PowerState::PoweredOn);
}

#[tokio::test]
async fn deferred_power_off_is_drained_later() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .property(&vm_ref(), "summary", vm_summary("web-01", "poweredOn"))
        .await;
    vcenter.property(&vm_ref(), "config", vm_config()).await;
    vcenter
        .task_method(&vm_ref(), "PowerOffVM_Task", "task-102")
        .await;
    vcenter
        .task_states("task-102", &["running", "success"])
        .await;
    let mut vm = load_vm(&vcenter).await;

    // Act
    let handle = vm.power_off(Dispatch::Defer).await.unwrap().unwrap();
    let polls_before_drain = vcenter.polls("task-102").await;
    let drained = vcenter.session.wait_for_all().await.unwrap();

    // Assert
    assert_eq!(polls_before_drain, 0);
    assert_eq!(drained.len(), 1);
    assert_eq!(handle.state(), Some(TaskState::Success));
    assert!(vcenter.session.pending().is_empty());
}

#[tokio::test]
async fn failed_rename_is_reported_not_raised() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .property(&vm_ref(), "summary", vm_summary("web-01", "poweredOff"))
        .await;
    vcenter.property(&vm_ref(), "config", vm_config()).await;
    Mock::given(method("POST"))
        .and(path(api_path(&vm_ref(), "ReconfigVM_Task")))
        .and(body_partial_json(json!({"spec": {"name": "web-02"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(MoRef::task("task-103")))
        .expect(1)
        .mount(&vcenter.server)
        .await;
    let mut info = crate::helpers::task_info("task-103", "error");
    info["error"] = json!({
        "_typeName": "LocalizedMethodFault",
        "fault": {"_typeName": "DuplicateName"},
        "localizedMessage": "The name 'web-02' already exists."
    });
    vcenter
        .property(&MoRef::task("task-103"), "info", info)
        .await;
    let mut vm = load_vm(&vcenter).await;

    // Act
    let handle = vm.rename("web-02", Dispatch::Wait).await.unwrap();

    // Assert
    assert_eq!(handle.state(), Some(TaskState::Error));
    assert_eq!(handle.error().unwrap().kind(), Some("DuplicateName"));
    assert!(handle.describe().contains("already exists"));
}

#[tokio::test]
async fn rejected_submission_propagates() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .property(&vm_ref(), "summary", vm_summary("web-01", "poweredOff"))
        .await;
    vcenter.property(&vm_ref(), "config", vm_config()).await;
    Mock::given(method("POST"))
        .and(path(api_path(&vm_ref(), "PowerOnVM_Task")))
        .respond_with(ResponseTemplate::new(500).set_body_string(r#"{"_typeName":"InvalidState"}"#))
        .mount(&vcenter.server)
        .await;
    let mut vm = load_vm(&vcenter).await;

    // Act
    let result = vm.power_on(Dispatch::Defer).await;

    // Assert
    match result {
        Err(Error::Vim(VimError::Invoke, status, body)) => {
            assert_eq!(status.as_u16(), 500);
            assert!(body.contains("InvalidState"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(vcenter.session.pending().is_empty());
}
