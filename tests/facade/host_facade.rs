use crate::helpers::{TestVcenter, api_path};
use serde_json::json;
use vcenter::inventory::datacenter::Datacenter;
use vcenter::prelude::Dispatch;
use vcenter::vim::specs::HostConnectSpec;
use vcenter::vim::types::{ComputeResource, MoRef};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

fn datacenter_ref() -> MoRef {
    MoRef::new("Datacenter", "datacenter-3")
}

async fn mount_datacenter(vcenter: &TestVcenter) {
    let datacenter = datacenter_ref();
    vcenter.property(&datacenter, "name", json!("lab")).await;
    vcenter
        .property(&datacenter, "hostFolder", json!(MoRef::new("Folder", "group-h4")))
        .await;
    vcenter
        .property(&datacenter, "vmFolder", json!(MoRef::new("Folder", "group-v3")))
        .await;
    vcenter
        .property(&datacenter, "networkFolder", json!(MoRef::new("Folder", "group-n5")))
        .await;
}

async fn mount_host(vcenter: &TestVcenter) {
    let host = MoRef::new("HostSystem", "host-9");
    vcenter
        .property(
            &MoRef::new("ComputeResource", "domain-s8"),
            "host",
            json!([host.clone()]),
        )
        .await;
    vcenter
        .property(
            &host,
            "summary",
            json!({"config": {"name": "esx-01.lab"}, "runtime": {"connectionState": "connected"}}),
        )
        .await;
    vcenter
        .property(&host, "parent", json!(MoRef::new("ComputeResource", "domain-s8")))
        .await;
    vcenter
        .property(
            &host,
            "configManager",
            json!({"networkSystem": MoRef::new("HostNetworkSystem", "networkSystem-9")}),
        )
        .await;
}

#[tokio::test]
async fn add_host_returns_the_added_host() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    mount_datacenter(&vcenter).await;
    let host_folder = MoRef::new("Folder", "group-h4");
    vcenter
        .property_times(&host_folder, "childEntity", json!([]), 1)
        .await;
    vcenter
        .property(
            &host_folder,
            "childEntity",
            json!([MoRef::new("ComputeResource", "domain-s8")]),
        )
        .await;
    mount_host(&vcenter).await;
    Mock::given(method("POST"))
        .and(path(api_path(&host_folder, "AddStandaloneHost_Task")))
        .and(body_partial_json(json!({
            "spec": {"_typeName": "HostConnectSpec", "hostName": "esx-01.lab", "password": "s3cret"},
            "addConnected": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(MoRef::task("task-401")))
        .expect(1)
        .mount(&vcenter.server)
        .await;
    vcenter.task_states("task-401", &["running", "success"]).await;
    let mut datacenter = Datacenter::load(vcenter.session.clone(), datacenter_ref())
        .await
        .unwrap();
    let spec = HostConnectSpec::new("esx-01.lab", "root", "s3cret".into());

    // Act
    let submitted = datacenter.add_host(spec, Dispatch::Wait).await.unwrap();

    // Assert
    let host = submitted.finished().unwrap();
    assert_eq!(host.name(), "esx-01.lab");
    assert!(matches!(host.parent(), ComputeResource::Standalone(_)));
}

#[tokio::test]
async fn known_host_is_not_added_again() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    mount_datacenter(&vcenter).await;
    vcenter
        .property(
            &MoRef::new("Folder", "group-h4"),
            "childEntity",
            json!([MoRef::new("ComputeResource", "domain-s8")]),
        )
        .await;
    mount_host(&vcenter).await;
    let mut datacenter = Datacenter::load(vcenter.session.clone(), datacenter_ref())
        .await
        .unwrap();
    let spec = HostConnectSpec::new("esx-01.lab", "root", "s3cret".into());

    // Act
    let submitted = datacenter.add_host(spec, Dispatch::Defer).await.unwrap();

    // Assert
    assert!(submitted.finished().is_some());
    assert!(vcenter.session.pending().is_empty());
}
