use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use vcenter::prelude::{Session, SessionSettings, WaitPolicy};
use vcenter::vim::client::VimClient;
use vcenter::vim::types::MoRef;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const RELEASE: &str = "8.0.2.0";

/// Poll interval of test sessions, short enough to keep the suite fast.
///
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Test helper that runs a fake vCenter in the background and provides a
/// `Session` talking to it.
///
pub struct TestVcenter {
    pub server: MockServer,
    pub session: Session,
}

impl TestVcenter {
    pub async fn new() -> Self {
        let server = MockServer::start().await;
        let client = VimClient::new(
            &server.uri(),
            RELEASE,
            "administrator@vsphere.local",
            "secret".into(),
        );
        let settings = SessionSettings {
            wait: WaitPolicy {
                poll_interval: POLL_INTERVAL,
                ..Default::default()
            },
            ..Default::default()
        };

        TestVcenter {
            server,
            session: Session::new(Arc::new(client), settings),
        }
    }

    /// Serves `value` for every read of the property.
    ///
    pub async fn property(&self, object: &MoRef, name: &str, value: Value) {
        Mock::given(method("GET"))
            .and(path(api_path(object, name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(value))
            .mount(&self.server)
            .await;
    }

    /// Serves `value` for the next `times` reads of the property only.
    /// Later reads fall through to mocks mounted afterwards.
    ///
    pub async fn property_times(&self, object: &MoRef, name: &str, value: Value, times: u64) {
        Mock::given(method("GET"))
            .and(path(api_path(object, name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(value))
            .up_to_n_times(times)
            .mount(&self.server)
            .await;
    }

    /// Makes `method_name` on `object` return the task `task`.
    ///
    pub async fn task_method(&self, object: &MoRef, method_name: &str, task: &str) {
        Mock::given(method("POST"))
            .and(path(api_path(object, method_name)))
            .respond_with(ResponseTemplate::new(200).set_body_json(MoRef::task(task)))
            .mount(&self.server)
            .await;
    }

    /// Reports the task through `states` in order; the last one repeats.
    ///
    pub async fn task_states(&self, task: &str, states: &[&str]) {
        let Some((last, leading)) = states.split_last() else {
            return;
        };
        for state in leading {
            self.property_times(&MoRef::task(task), "info", task_info(task, state), 1)
                .await;
        }
        self.property(&MoRef::task(task), "info", task_info(task, last))
            .await;
    }

    /// Number of times the task status was read.
    ///
    pub async fn polls(&self, task: &str) -> usize {
        let info = api_path(&MoRef::task(task), "info");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|request| request.method.as_str() == "GET" && request.url.path() == info)
            .count()
    }
}

pub fn api_path(object: &MoRef, member: &str) -> String {
    format!("/sdk/vim25/{RELEASE}/{}/{}/{}", object.kind, object.value, member)
}

pub fn task_info(task: &str, state: &str) -> Value {
    json!({
        "_typeName": "TaskInfo",
        "key": task,
        "task": MoRef::task(task),
        "descriptionId": "scripted",
        "state": state,
    })
}

// -----------------------------------------------------------------------------

pub fn vm_summary(name: &str, power_state: &str) -> Value {
    json!({
        "_typeName": "VirtualMachineSummary",
        "config": {"name": name, "vmPathName": format!("[ds1] {name}/{name}.vmx")},
        "runtime": {"powerState": power_state, "maxMemoryUsage": 4096}
    })
}

pub fn vm_config() -> Value {
    json!({
        "_typeName": "VirtualMachineConfigInfo",
        "hardware": {"device": [
            {"_typeName": "VirtualE1000", "key": 4000,
             "deviceInfo": {"label": "Network adapter 1", "summary": "VM Network"},
             "macAddress": "00:50:56:01:02:03", "addressType": "generated"}
        ]}
    })
}
