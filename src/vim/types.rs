use crate::prelude::{Error, Result};
use chrono::{DateTime, Utc};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Type-safe representation of a vSphere managed object reference ("mor").
///
/// Every remote entity, including asynchronous tasks, is addressed by its
/// type (e.g. `VirtualMachine`) and its server-assigned identifier
/// (e.g. `vm-42`).
///
/// # Example JSON
///
/// ```json
/// {"_typeName": "ManagedObjectReference", "type": "Task", "value": "task-17"}
/// ```
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct MoRef {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl MoRef {
    /// Creates a new reference to the given managed object.
    ///
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.to_owned(),
            value: value.to_owned(),
        }
    }

    /// Creates a new reference to a `Task` managed object.
    ///
    pub fn task(value: &str) -> Self {
        Self::new("Task", value)
    }

    /// Percent-encode the identifier to make it safe for use in a URL path.
    ///
    pub fn encoded_value(&self) -> String {
        utf8_percent_encode(&self.value, NON_ALPHANUMERIC).to_string()
    }

    /// Decodes the reported type name into the closed set of kinds the
    /// façade distinguishes.
    ///
    pub fn entity_kind(&self) -> EntityKind {
        EntityKind::from(self.kind.as_str())
    }
}

impl Serialize for MoRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("ManagedObjectReference", 3)?;
        state.serialize_field("_typeName", "ManagedObjectReference")?;
        state.serialize_field("type", &self.kind)?;
        state.serialize_field("value", &self.value)?;
        state.end()
    }
}

impl Display for MoRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// Managed object kinds the façade branches on.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Folder,
    Datacenter,
    Cluster,
    ComputeResource,
    Host,
    VirtualMachine,
    Datastore,
    Network,
    DistributedSwitch,
    DistributedPortgroup,
    Task,
    Other,
}

impl From<&str> for EntityKind {
    fn from(value: &str) -> Self {
        match value {
            "Folder" => Self::Folder,
            "Datacenter" => Self::Datacenter,
            "ClusterComputeResource" => Self::Cluster,
            "ComputeResource" => Self::ComputeResource,
            "HostSystem" => Self::Host,
            "VirtualMachine" => Self::VirtualMachine,
            "Datastore" => Self::Datastore,
            "Network" | "OpaqueNetwork" => Self::Network,
            "DistributedVirtualSwitch" | "VmwareDistributedVirtualSwitch" => {
                Self::DistributedSwitch
            }
            "DistributedVirtualPortgroup" => Self::DistributedPortgroup,
            "Task" => Self::Task,
            _ => Self::Other,
        }
    }
}

/// Parent of a host: either a cluster or the standalone compute resource
/// that vCenter creates around a host added directly to a datacenter.
///
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeResource {
    Cluster(MoRef),
    Standalone(MoRef),
}

impl ComputeResource {
    pub fn moref(&self) -> &MoRef {
        match self {
            ComputeResource::Cluster(moref) | ComputeResource::Standalone(moref) => moref,
        }
    }
}

impl TryFrom<MoRef> for ComputeResource {
    type Error = Error;

    fn try_from(moref: MoRef) -> Result<Self> {
        match moref.entity_kind() {
            EntityKind::Cluster => Ok(Self::Cluster(moref)),
            EntityKind::ComputeResource => Ok(Self::Standalone(moref)),
            _ => Err(Error::NotSupported(format!("{moref} is not a compute resource"))),
        }
    }
}

/// Network a virtual NIC can be attached to.
///
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkRef {
    Standard(MoRef),
    Distributed(MoRef),
}

impl NetworkRef {
    pub fn moref(&self) -> &MoRef {
        match self {
            NetworkRef::Standard(moref) | NetworkRef::Distributed(moref) => moref,
        }
    }
}

impl From<MoRef> for NetworkRef {
    fn from(moref: MoRef) -> Self {
        match moref.entity_kind() {
            EntityKind::DistributedPortgroup => Self::Distributed(moref),
            _ => Self::Standard(moref),
        }
    }
}

// -----------------------------------------------------------------------------

/// State of an asynchronous vSphere task.
///
/// `Pending` is reported by the server as `queued`.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    #[serde(rename = "queued", alias = "pending")]
    Pending,
    Running,
    Success,
    Error,
}

impl TaskState {
    /// Whether no further transition can happen from this state.
    ///
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error)
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Success => "success",
            TaskState::Error => "error",
        };
        f.write_str(state)
    }
}

/// Status object of a task, as returned by its `info` property.
///
/// # Fields
///
/// * `state`: Current lifecycle state.
/// * `result`: Method specific payload, present once the task succeeded
///   (and for some methods, partially while it runs).
/// * `error`: Fault that made the task fail.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInfo {
    pub key: String,
    pub task: Option<MoRef>,
    pub name: Option<String>,
    pub description_id: Option<String>,
    pub entity_name: Option<String>,
    pub state: TaskState,
    pub progress: Option<i32>,
    pub result: Option<Value>,
    pub error: Option<LocalizedFault>,
    pub queue_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub complete_time: Option<DateTime<Utc>>,
}

impl Display for TaskInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let operation = self
            .description_id
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("task");
        write!(f, "{} ({})", self.key, operation)?;
        if let Some(entity) = &self.entity_name {
            write!(f, " on '{entity}'")?;
        }
        write!(f, ": {}", self.state)?;
        if let Some(progress) = self.progress {
            write!(f, " {progress}%")?;
        }
        if let Some(completed) = self.complete_time {
            write!(f, ", completed at {}", completed.to_rfc3339())?;
        }
        if let Some(error) = &self.error {
            write!(f, ", error: {error}")?;
        }
        Ok(())
    }
}

/// Fault with a human readable message attached.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalizedFault {
    pub fault: Option<Value>,
    pub localized_message: Option<String>,
}

impl LocalizedFault {
    /// Type name of the underlying fault, e.g. `InvalidPowerState`.
    ///
    pub fn kind(&self) -> Option<&str> {
        self.fault.as_ref()?.get("_typeName")?.as_str()
    }
}

impl Display for LocalizedFault {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.localized_message.as_deref(), self.kind()) {
            (Some(message), Some(kind)) => write!(f, "{kind}: {message}"),
            (Some(message), None) => f.write_str(message),
            (None, Some(kind)) => f.write_str(kind),
            (None, None) => f.write_str("unknown fault"),
        }
    }
}

// -----------------------------------------------------------------------------

/// Root object of the API, giving access to the inventory and managers.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceContent {
    pub root_folder: MoRef,
    pub session_manager: Option<MoRef>,
    pub setting: Option<MoRef>,
    pub license_manager: Option<MoRef>,
    pub about: AboutInfo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AboutInfo {
    pub full_name: Option<String>,
    pub api_version: Option<String>,
    pub instance_uuid: Option<String>,
}

/// One entry of an option manager (vCenter advanced settings).
///
#[derive(Debug, Clone, Deserialize)]
pub struct OptionEntry {
    pub key: String,
    pub value: Option<Value>,
}

impl OptionEntry {
    /// Unwraps the `{"_typeName": .., "_value": ..}` boxing of primitive
    /// values.
    ///
    pub fn plain_value(&self) -> Option<Value> {
        let value = self.value.as_ref()?;
        Some(value.get("_value").unwrap_or(value).clone())
    }
}

// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    NotResponding,
}

/// Subset of `VirtualMachineSummary` the VM handle keeps.
///
#[derive(Debug, Clone, Deserialize)]
pub struct VmSummary {
    pub config: VmSummaryConfig,
    pub runtime: VmRuntime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummaryConfig {
    pub name: String,
    pub vm_path_name: Option<String>,
    pub num_cpu: Option<i32>,
    #[serde(rename = "memorySizeMB")]
    pub memory_size_mb: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmRuntime {
    pub power_state: PowerState,
    pub host: Option<MoRef>,
    pub max_memory_usage: Option<i64>,
}

/// Subset of `VirtualMachineConfigInfo`: the device list.
///
#[derive(Debug, Clone, Deserialize)]
pub struct VmConfigInfo {
    pub hardware: VirtualHardware,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualHardware {
    #[serde(default)]
    pub device: Vec<DeviceInfo>,
}

/// A virtual device as reported by the server.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    #[serde(rename = "_typeName")]
    pub type_name: String,
    pub key: i32,
    pub device_info: Option<Description>,
    pub mac_address: Option<String>,
    pub address_type: Option<String>,
}

impl DeviceInfo {
    pub fn label(&self) -> Option<&str> {
        self.device_info.as_ref().map(|info| info.label.as_str())
    }

    pub fn summary(&self) -> Option<&str> {
        self.device_info.as_ref().map(|info| info.summary.as_str())
    }

    /// Whether this device is a network adapter (any adapter model).
    ///
    pub fn is_ethernet_card(&self) -> bool {
        self.mac_address.is_some()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Description {
    pub label: String,
    pub summary: String,
}

/// Subset of `HostListSummary` the host handle keeps.
///
#[derive(Debug, Clone, Deserialize)]
pub struct HostSummary {
    pub config: HostSummaryConfig,
    pub runtime: HostRuntime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSummaryConfig {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRuntime {
    pub connection_state: ConnectionState,
    #[serde(default)]
    pub in_maintenance_mode: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostConfigManager {
    pub network_system: Option<MoRef>,
    pub datastore_system: Option<MoRef>,
    pub virtual_nic_manager: Option<MoRef>,
}

/// Standard switches and portgroups of a host.
///
/// The specs are kept as raw JSON: reconfiguration starts from a copy of
/// the current spec, so every field has to survive the round trip.
///
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostNetworkConfig {
    #[serde(default)]
    pub vswitch: Vec<VswitchConfig>,
    #[serde(default)]
    pub portgroup: Vec<PortgroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VswitchConfig {
    pub name: String,
    pub spec: Value,
}

impl VswitchConfig {
    pub fn num_ports(&self) -> Option<i64> {
        self.spec.get("numPorts")?.as_i64()
    }

    /// First physical NIC bridged to the switch.
    ///
    pub fn uplink(&self) -> Option<&str> {
        self.spec.get("bridge")?.get("nicDevice")?.get(0)?.as_str()
    }

    pub fn allows_promiscuous(&self) -> Option<bool> {
        self.spec
            .get("policy")?
            .get("security")?
            .get("allowPromiscuous")?
            .as_bool()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PortgroupConfig {
    pub spec: Value,
}

impl PortgroupConfig {
    pub fn name(&self) -> Option<&str> {
        self.spec.get("name")?.as_str()
    }

    pub fn vswitch_name(&self) -> Option<&str> {
        self.spec.get("vswitchName")?.as_str()
    }

    pub fn vlan_id(&self) -> i32 {
        self.spec
            .get("vlanId")
            .and_then(Value::as_i64)
            .and_then(|vlan| i32::try_from(vlan).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhysicalNic {
    pub device: String,
    pub mac: Option<String>,
    pub driver: Option<String>,
}

// -----------------------------------------------------------------------------

/// Subset of `VMwareDVSConfigInfo`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DvsConfigInfo {
    pub name: String,
    pub uuid: String,
    pub config_version: String,
    #[serde(default)]
    pub uplink_portgroup: Vec<MoRef>,
}

/// Subset of `DVPortgroupConfigInfo`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DvPortgroupConfigInfo {
    pub key: String,
    pub name: String,
    pub config_version: String,
    pub distributed_virtual_switch: Option<MoRef>,
}

// -----------------------------------------------------------------------------

/// Result payload of a `SearchDatastore_Task`.
///
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub folder_path: String,
    #[serde(default)]
    pub file: Vec<FileInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileInfo {
    pub path: String,
}
