use crate::helpers::{TestVcenter, api_path};
use serde_json::json;
use vcenter::inventory::dvs::Dvs;
use vcenter::vim::types::{MoRef, TaskState};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

fn dvs_ref() -> MoRef {
    MoRef::new("VmwareDistributedVirtualSwitch", "dvs-21")
}

fn dvs_config(version: &str, name: &str) -> serde_json::Value {
    json!({
        "_typeName": "VMwareDVSConfigInfo",
        "name": name,
        "uuid": "50 2a 8c 11 9e 3f 4d 60-b1 aa 12 34 56 78 9a bc",
        "configVersion": version,
        "uplinkPortgroup": [MoRef::new("DistributedVirtualPortgroup", "dvportgroup-22")]
    })
}

#[tokio::test]
async fn rename_echoes_latest_config_version() {
    // Arrange
    let vcenter = TestVcenter::new().await;
    vcenter
        .property_times(&dvs_ref(), "config", dvs_config("11", "dvs-lab"), 1)
        .await;
    vcenter
        .property_times(&dvs_ref(), "config", dvs_config("12", "dvs-lab"), 1)
        .await;
    vcenter
        .property(&dvs_ref(), "config", dvs_config("13", "dvs-prod"))
        .await;
    Mock::given(method("POST"))
        .and(path(api_path(&dvs_ref(), "ReconfigureDvs_Task")))
        .and(body_partial_json(
            json!({"spec": {"_typeName": "VMwareDVSConfigSpec", "configVersion": "12", "name": "dvs-prod"}}),
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(MoRef::task("task-301")))
        .expect(1)
        .mount(&vcenter.server)
        .await;
    vcenter.task_states("task-301", &["running", "success"]).await;
    let mut dvs = Dvs::load(vcenter.session.clone(), dvs_ref()).await.unwrap();

    // Act
    let handle = dvs.rename("dvs-prod").await.unwrap();

    // Assert
    assert_eq!(handle.state(), Some(TaskState::Success));
    assert_eq!(dvs.name(), "dvs-prod");
    assert_eq!(dvs.config_version(), "13");
}
