//! Request payloads ("specs") sent to the vSphere API.
//!
//! Data objects carry their vSphere type in the `_typeName` member; the
//! struct level `tag` attribute writes it ahead of the real fields.

use crate::vim::types::MoRef;
use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};
use serde_json::{Value, json};

/// Temporary device key for devices that do not exist yet. The server
/// assigns the real key when the reconfiguration is applied.
///
pub const NEW_DEVICE_KEY: i32 = -1;

fn expose<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Advanced setting value for `OptionManager.UpdateOptions`.
///
#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "OptionValue")]
pub struct OptionValue {
    pub key: String,
    pub value: Value,
}

impl OptionValue {
    pub fn string(key: &str, value: &str) -> Self {
        Self {
            key: key.to_owned(),
            value: json!({"_typeName": "string", "_value": value}),
        }
    }
}

// -----------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "ClusterConfigSpecEx", rename_all = "camelCase")]
pub struct ClusterConfigSpecEx {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drs_config: Option<ClusterDrsConfigInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dpm_config: Option<ClusterDpmConfigInfo>,
}

impl ClusterConfigSpecEx {
    /// DRS in manual mode with power management off.
    ///
    pub fn with_drs(enabled: bool) -> Self {
        Self {
            drs_config: Some(ClusterDrsConfigInfo {
                enabled,
                enable_vm_behavior_overrides: true,
                default_vm_behavior: "manual".to_owned(),
                vmotion_rate: 3,
            }),
            dpm_config: Some(ClusterDpmConfigInfo {
                enabled: false,
                default_dpm_behavior: "automated".to_owned(),
                host_power_action_rate: 3,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "ClusterDrsConfigInfo", rename_all = "camelCase")]
pub struct ClusterDrsConfigInfo {
    pub enabled: bool,
    pub enable_vm_behavior_overrides: bool,
    pub default_vm_behavior: String,
    pub vmotion_rate: i32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "ClusterDpmConfigInfo", rename_all = "camelCase")]
pub struct ClusterDpmConfigInfo {
    pub enabled: bool,
    pub default_dpm_behavior: String,
    pub host_power_action_rate: i32,
}

// -----------------------------------------------------------------------------

/// Connection parameters for adding an ESX host to the inventory.
///
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "_typeName", rename = "HostConnectSpec", rename_all = "camelCase")]
pub struct HostConnectSpec {
    pub host_name: String,
    pub user_name: String,
    #[serde(serialize_with = "expose")]
    pub password: SecretString,
    pub force: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssl_thumbprint: Option<String>,
}

impl HostConnectSpec {
    pub fn new(host_name: &str, user_name: &str, password: SecretString) -> Self {
        Self {
            host_name: host_name.to_owned(),
            user_name: user_name.to_owned(),
            password,
            force: true,
            ssl_thumbprint: None,
        }
    }

    /// SHA-1 fingerprint of the host certificate, colon separated.
    ///
    pub fn with_thumbprint(mut self, thumbprint: &str) -> Self {
        self.ssl_thumbprint = Some(thumbprint.to_owned());
        self
    }
}

// -----------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualMachineConfigSpec", rename_all = "camelCase")]
pub struct VirtualMachineConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "memoryMB", skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<i64>,
    #[serde(rename = "numCPUs", skip_serializing_if = "Option::is_none")]
    pub num_cpus: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<VirtualMachineFileInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub device_change: Vec<VirtualDeviceConfigSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_allocation: Option<ResourceAllocationInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_allocation: Option<ResourceAllocationInfo>,
}

impl VirtualMachineConfigSpec {
    /// Spec carrying only device changes.
    ///
    pub fn devices(device_change: Vec<VirtualDeviceConfigSpec>) -> Self {
        Self {
            device_change,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualMachineFileInfo", rename_all = "camelCase")]
pub struct VirtualMachineFileInfo {
    pub vm_path_name: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "ResourceAllocationInfo")]
pub struct ResourceAllocationInfo {
    pub reservation: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceOperation {
    Add,
    Remove,
    Edit,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FileOperation {
    Create,
    Destroy,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualDeviceConfigSpec", rename_all = "camelCase")]
pub struct VirtualDeviceConfigSpec {
    pub operation: DeviceOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_operation: Option<FileOperation>,
    pub device: VirtualDevice,
}

impl VirtualDeviceConfigSpec {
    pub fn new(operation: DeviceOperation, device: VirtualDevice) -> Self {
        Self {
            operation,
            file_operation: None,
            device,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VirtualDevice {
    EthernetCard(VirtualEthernetCard),
    Disk(VirtualDisk),
    SasController(VirtualLsiLogicSasController),
    SerialPort(VirtualSerialPort),
}

/// Network adapter. The adapter model (`VirtualE1000`, `VirtualVmxnet3`…)
/// is the `_typeName`, so edits reuse the model of the existing device.
///
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualEthernetCard {
    #[serde(rename = "_typeName")]
    pub adapter_type: String,
    pub key: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backing: Option<EthernetBacking>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connectable: Option<VirtualDeviceConnectInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

impl VirtualEthernetCard {
    /// Default adapter model for new NICs.
    ///
    pub const E1000: &'static str = "VirtualE1000";

    pub fn new(adapter_type: &str, key: i32) -> Self {
        Self {
            adapter_type: adapter_type.to_owned(),
            key,
            backing: None,
            connectable: None,
            address_type: None,
            mac_address: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum EthernetBacking {
    Network(NetworkBackingInfo),
    Distributed(DistributedPortBackingInfo),
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VirtualEthernetCardNetworkBackingInfo",
    rename_all = "camelCase"
)]
pub struct NetworkBackingInfo {
    pub device_name: String,
    pub network: MoRef,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VirtualEthernetCardDistributedVirtualPortBackingInfo"
)]
pub struct DistributedPortBackingInfo {
    pub port: DistributedVirtualSwitchPortConnection,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "DistributedVirtualSwitchPortConnection",
    rename_all = "camelCase"
)]
pub struct DistributedVirtualSwitchPortConnection {
    pub switch_uuid: String,
    pub portgroup_key: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualDeviceConnectInfo", rename_all = "camelCase")]
pub struct VirtualDeviceConnectInfo {
    pub connected: bool,
    pub start_connected: bool,
    pub allow_guest_control: bool,
}

impl VirtualDeviceConnectInfo {
    pub fn all(value: bool) -> Self {
        Self {
            connected: value,
            start_connected: value,
            allow_guest_control: value,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualDisk", rename_all = "camelCase")]
pub struct VirtualDisk {
    pub key: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_key: Option<i32>,
    pub unit_number: i32,
    #[serde(rename = "capacityInKB")]
    pub capacity_in_kb: i64,
    pub backing: VirtualDiskFlatVer2BackingInfo,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VirtualDiskFlatVer2BackingInfo",
    rename_all = "camelCase"
)]
pub struct VirtualDiskFlatVer2BackingInfo {
    pub file_name: String,
    pub disk_mode: String,
    pub split: bool,
    pub write_through: bool,
    pub thin_provisioned: bool,
}

impl VirtualDiskFlatVer2BackingInfo {
    /// Thin provisioned persistent disk stored at `file_name`.
    ///
    pub fn thin(file_name: String) -> Self {
        Self {
            file_name,
            disk_mode: "persistent".to_owned(),
            split: false,
            write_through: false,
            thin_provisioned: true,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualLsiLogicSASController", rename_all = "camelCase")]
pub struct VirtualLsiLogicSasController {
    pub key: i32,
    pub bus_number: i32,
    pub shared_bus: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualSerialPort")]
pub struct VirtualSerialPort {
    pub key: i32,
    pub backing: VirtualSerialPortUriBackingInfo,
}

/// Serial port exposed as a network service, e.g. `telnet://:9001`.
///
#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualSerialPortURIBackingInfo")]
pub struct VirtualSerialPortUriBackingInfo {
    #[serde(rename = "serviceURI")]
    pub service_uri: String,
    pub direction: String,
}

impl VirtualSerialPortUriBackingInfo {
    /// Backing where the VM listens on `uri`.
    ///
    pub fn server(uri: &str) -> Self {
        Self {
            service_uri: uri.to_owned(),
            direction: "server".to_owned(),
        }
    }
}

// -----------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualMachineRelocateSpec")]
pub struct VirtualMachineRelocateSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<MoRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<MoRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datastore: Option<MoRef>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VirtualMachineCloneSpec", rename_all = "camelCase")]
pub struct VirtualMachineCloneSpec {
    pub location: VirtualMachineRelocateSpec,
    pub power_on: bool,
    pub template: bool,
}

// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "HostDatastoreBrowserSearchSpec",
    rename_all = "camelCase"
)]
pub struct HostDatastoreBrowserSearchSpec {
    pub match_pattern: Vec<String>,
}

/// NAS mount for `HostDatastoreSystem.CreateNasDatastore`.
///
#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "HostNasVolumeSpec", rename_all = "camelCase")]
pub struct HostNasVolumeSpec {
    pub access_mode: String,
    pub local_path: String,
    pub remote_host: String,
    pub remote_path: String,
    #[serde(rename = "type")]
    pub volume_type: NasType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "expose_optional"
    )]
    pub password: Option<SecretString>,
}

impl HostNasVolumeSpec {
    /// Read-write mount of `remote_host:remote_path`, named `local_path` on
    /// the host.
    ///
    pub fn new(local_path: &str, remote_host: &str, remote_path: &str, volume_type: NasType) -> Self {
        Self {
            access_mode: "readWrite".to_owned(),
            local_path: local_path.to_owned(),
            remote_host: remote_host.to_owned(),
            remote_path: remote_path.to_owned(),
            volume_type,
            user_name: None,
            password: None,
        }
    }

    /// Credentials for CIFS shares.
    ///
    pub fn with_credentials(mut self, user_name: &str, password: SecretString) -> Self {
        self.user_name = Some(user_name.to_owned());
        self.password = Some(password);
        self
    }
}

fn expose_optional<S: Serializer>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(secret) => expose(secret, serializer),
        None => serializer.serialize_none(),
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum NasType {
    #[serde(rename = "NFS")]
    Nfs,
    #[serde(rename = "CIFS")]
    Cifs,
}

// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "HostVirtualSwitchSpec", rename_all = "camelCase")]
pub struct HostVirtualSwitchSpec {
    pub num_ports: i32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "HostPortGroupSpec", rename_all = "camelCase")]
pub struct HostPortGroupSpec {
    pub name: String,
    pub vlan_id: i32,
    pub vswitch_name: String,
    pub policy: Value,
}

/// Empty `HostNetworkPolicy`, inheriting everything from the switch.
///
pub fn inherited_network_policy() -> Value {
    json!({"_typeName": "HostNetworkPolicy"})
}

// -----------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "DVSCreateSpec", rename_all = "camelCase")]
pub struct DvsCreateSpec {
    pub config_spec: DvsConfigSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_info: Option<DistributedVirtualSwitchProductSpec>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "DistributedVirtualSwitchProductSpec")]
pub struct DistributedVirtualSwitchProductSpec {
    pub version: String,
}

/// Reconfiguration of a distributed switch.
///
/// `config_version` must echo the switch's current configuration version,
/// otherwise the server rejects the change as concurrent modification.
///
#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "VMwareDVSConfigSpec", rename_all = "camelCase")]
pub struct DvsConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_mtu: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_discovery_protocol_config: Option<LinkDiscoveryProtocolConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<DvsHostMemberConfigSpec>,
}

impl DvsConfigSpec {
    pub fn versioned(config_version: &str) -> Self {
        Self {
            config_version: Some(config_version.to_owned()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "LinkDiscoveryProtocolConfig")]
pub struct LinkDiscoveryProtocolConfig {
    pub protocol: String,
    pub operation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MemberOperation {
    Add,
    Edit,
    Remove,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "DistributedVirtualSwitchHostMemberConfigSpec"
)]
pub struct DvsHostMemberConfigSpec {
    pub operation: MemberOperation,
    pub host: MoRef,
    pub backing: DvsHostMemberPnicBacking,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "DistributedVirtualSwitchHostMemberPnicBacking",
    rename_all = "camelCase"
)]
pub struct DvsHostMemberPnicBacking {
    pub pnic_spec: Vec<DvsHostMemberPnicSpec>,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "DistributedVirtualSwitchHostMemberPnicSpec",
    rename_all = "camelCase"
)]
pub struct DvsHostMemberPnicSpec {
    pub pnic_device: String,
}

// -----------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "DVPortgroupConfigSpec", rename_all = "camelCase")]
pub struct DvPortgroupConfigSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_ports: Option<i32>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub binding: Option<PortBinding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_port_config: Option<DvsPortSetting>,
}

impl DvPortgroupConfigSpec {
    pub fn versioned(config_version: &str) -> Self {
        Self {
            config_version: Some(config_version.to_owned()),
            ..Default::default()
        }
    }
}

/// When ports of a distributed portgroup are bound to a VM NIC.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PortBinding {
    EarlyBinding,
    LateBinding,
    Ephemeral,
}

#[derive(Debug, Default, Serialize)]
#[serde(tag = "_typeName", rename = "VMwareDVSPortSetting", rename_all = "camelCase")]
pub struct DvsPortSetting {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vlan: Option<VlanSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<DvsSecurityPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uplink_teaming_policy: Option<UplinkTeamingPolicy>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VlanSpec {
    Id(VlanIdSpec),
    Trunk(TrunkVlanSpec),
}

impl VlanSpec {
    pub fn id(vlan_id: i32) -> Self {
        Self::Id(VlanIdSpec {
            vlan_id,
            inherited: false,
        })
    }

    pub fn trunk(start: i32, end: i32) -> Self {
        Self::Trunk(TrunkVlanSpec {
            vlan_id: vec![NumericRange { start, end }],
            inherited: false,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VmwareDistributedVirtualSwitchVlanIdSpec",
    rename_all = "camelCase"
)]
pub struct VlanIdSpec {
    pub vlan_id: i32,
    pub inherited: bool,
}

#[derive(Debug, Serialize)]
#[serde(
    tag = "_typeName",
    rename = "VmwareDistributedVirtualSwitchTrunkVlanSpec",
    rename_all = "camelCase"
)]
pub struct TrunkVlanSpec {
    pub vlan_id: Vec<NumericRange>,
    pub inherited: bool,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "NumericRange")]
pub struct NumericRange {
    pub start: i32,
    pub end: i32,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "DVSSecurityPolicy", rename_all = "camelCase")]
pub struct DvsSecurityPolicy {
    pub inherited: bool,
    pub allow_promiscuous: BoolPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_changes: Option<BoolPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forged_transmits: Option<BoolPolicy>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "BoolPolicy")]
pub struct BoolPolicy {
    pub inherited: bool,
    pub value: bool,
}

impl From<bool> for BoolPolicy {
    fn from(value: bool) -> Self {
        Self {
            inherited: false,
            value,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "VmwareUplinkPortTeamingPolicy")]
pub struct UplinkTeamingPolicy {
    pub policy: StringPolicy,
}

#[derive(Debug, Serialize)]
#[serde(tag = "_typeName", rename = "StringPolicy")]
pub struct StringPolicy {
    pub inherited: bool,
    pub value: String,
}
