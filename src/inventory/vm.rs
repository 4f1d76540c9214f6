use crate::inventory::Dispatch;
use crate::inventory::datastore::Datastore;
use crate::inventory::host::Host;
use crate::inventory::network::Network;
use crate::prelude::{Error, Result};
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::{
    DeviceOperation, FileOperation, NEW_DEVICE_KEY, ResourceAllocationInfo, VirtualDevice,
    VirtualDeviceConfigSpec, VirtualDeviceConnectInfo, VirtualDisk, VirtualDiskFlatVer2BackingInfo,
    VirtualEthernetCard, VirtualLsiLogicSasController, VirtualMachineCloneSpec,
    VirtualMachineConfigSpec, VirtualMachineRelocateSpec, VirtualSerialPort,
    VirtualSerialPortUriBackingInfo,
};
use crate::vim::types::{ComputeResource, DeviceInfo, MoRef, PowerState, VmConfigInfo, VmSummary};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Label prefix of the SCSI controllers new disks are attached to.
///
const SCSI_LABEL: &str = "SCSI";

/// Picks the network adapter [`Vm::remove_nic`] removes.
///
#[derive(Debug, Clone, Copy)]
pub enum NicSelector<'a> {
    /// First adapter attached to the network of that name.
    Network(&'a str),
    /// Adapter with that device label, e.g. `Network adapter 2`.
    Label(&'a str),
}

impl NicSelector<'_> {
    fn matches(&self, device: &DeviceInfo) -> bool {
        match self {
            NicSelector::Network(name) => device.summary() == Some(*name),
            NicSelector::Label(label) => device.label() == Some(*label),
        }
    }
}

/// New address of one network adapter, see [`Vm::change_macs`].
///
/// # Fields
///
/// * `label`: Device label of the adapter, e.g. `Network adapter 1`.
/// * `address_type`: `manual`, `generated` or `assigned`.
/// * `mac`: MAC address to set; only meaningful with `manual`.
///
#[derive(Debug, Clone, Copy)]
pub struct NicAddress<'a> {
    pub label: &'a str,
    pub address_type: &'a str,
    pub mac: Option<&'a str>,
}

/// A virtual machine.
///
#[derive(Debug, Clone)]
pub struct Vm {
    session: Session,
    moref: MoRef,
    vm_folder: MoRef,
    summary: VmSummary,
    config: VmConfigInfo,
}

impl Vm {
    /// # Arguments
    ///
    /// * `vm_folder`: VM folder of the datacenter holding the VM. Clones
    ///   land there.
    ///
    pub async fn load(session: Session, moref: MoRef, vm_folder: MoRef) -> Result<Self> {
        let summary = session.property(&moref, "summary").await?;
        let config = session.property(&moref, "config").await?;

        Ok(Self {
            session,
            moref,
            vm_folder,
            summary,
            config,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.summary.config.name
    }

    pub fn power_state(&self) -> PowerState {
        self.summary.runtime.power_state
    }

    pub async fn update(&mut self) -> Result<()> {
        *self = Self::load(self.session.clone(), self.moref.clone(), self.vm_folder.clone()).await?;
        Ok(())
    }

    // -------------------------------------------------------------------------

    /// Powers the VM on. Returns `None` when it already runs.
    ///
    pub async fn power_on(&mut self, dispatch: Dispatch) -> Result<Option<TaskHandle>> {
        self.power_task(PowerState::PoweredOn, "PowerOnVM_Task", dispatch)
            .await
    }

    /// Powers the VM off. Returns `None` when it is already off.
    ///
    pub async fn power_off(&mut self, dispatch: Dispatch) -> Result<Option<TaskHandle>> {
        self.power_task(PowerState::PoweredOff, "PowerOffVM_Task", dispatch)
            .await
    }

    /// Suspends the VM. Returns `None` when it is already suspended.
    ///
    pub async fn suspend(&mut self, dispatch: Dispatch) -> Result<Option<TaskHandle>> {
        self.power_task(PowerState::Suspended, "SuspendVM_Task", dispatch)
            .await
    }

    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(vm = %self.name()))]
    async fn power_task(
        &mut self,
        target: PowerState,
        method: &str,
        dispatch: Dispatch,
    ) -> Result<Option<TaskHandle>> {
        self.update().await?;
        if self.power_state() == target {
            tracing::debug!(target: "inventory", vm = %self.name(), state = ?target, "Already in the requested power state");
            return Ok(None);
        }

        let handle = self
            .session
            .execute(&self.moref, method, Value::Null, dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(Some(handle))
    }

    /// Clones the VM, powered off, into the datacenter's VM folder.
    ///
    /// # Arguments
    ///
    /// * `name`: Name of the clone.
    /// * `host`: Host of the clone, the VM's own resource pool when `None`.
    /// * `datastore`: Datastore of the clone, the VM's own when `None`.
    /// * `dispatch`: Wait for the job or defer it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, host, datastore), fields(vm = %self.name()))]
    pub async fn clone_to(
        &self,
        name: &str,
        host: Option<&Host>,
        datastore: Option<&Datastore>,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let location = match host {
            Some(host) => VirtualMachineRelocateSpec {
                host: Some(host.moref().clone()),
                pool: Some(host.resource_pool().await?),
                datastore: datastore.map(|datastore| datastore.moref().clone()),
            },
            None => VirtualMachineRelocateSpec {
                host: None,
                pool: Some(self.session.property(&self.moref, "resourcePool").await?),
                datastore: datastore.map(|datastore| datastore.moref().clone()),
            },
        };
        let spec = VirtualMachineCloneSpec {
            location,
            power_on: false,
            template: false,
        };
        let args = json!({"name": name, "folder": &self.vm_folder, "spec": spec});

        self.session
            .execute(&self.moref, "CloneVM_Task", args, dispatch)
            .await
    }

    /// Powers the VM off, waiting for that, and deletes it with its files.
    ///
    pub async fn destroy(mut self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.power_off(Dispatch::Wait).await?;
        self.session
            .execute(&self.moref, "Destroy_Task", Value::Null, dispatch)
            .await
    }

    /// Powers the VM off and removes it from the inventory, keeping its
    /// files.
    ///
    pub async fn unregister(mut self) -> Result<()> {
        self.power_off(Dispatch::Wait).await?;
        self.session
            .invoke(&self.moref, "UnregisterVM", Value::Null)
            .await?;
        tracing::info!(target: "inventory", vm = %self.name(), "VM unregistered");
        Ok(())
    }

    pub async fn rename(&mut self, name: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        let spec = VirtualMachineConfigSpec {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        self.reconfigure(spec, dispatch).await
    }

    /// Applies a configuration change. Refreshes the VM after waiting.
    ///
    pub async fn reconfigure(
        &mut self,
        spec: VirtualMachineConfigSpec,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let handle = self
            .session
            .execute(&self.moref, "ReconfigVM_Task", json!({"spec": spec}), dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(handle)
    }

    // -------------------------------------------------------------------------

    /// Network adapters of the VM.
    ///
    pub fn nics(&self) -> Vec<&DeviceInfo> {
        self.config
            .hardware
            .device
            .iter()
            .filter(|device| device.is_ethernet_card())
            .collect()
    }

    /// MAC addresses of the network adapters by the network they are on.
    ///
    pub fn macs(&self) -> BTreeMap<String, String> {
        self.nics()
            .into_iter()
            .filter_map(|nic| Some((nic.summary()?.to_owned(), nic.mac_address.clone()?)))
            .collect()
    }

    /// E1000 adapter attached to `network`, by label.
    ///
    pub fn present_nic(&self, network: &Network) -> Option<&str> {
        self.nics()
            .into_iter()
            .filter(|nic| nic.type_name == VirtualEthernetCard::E1000)
            .find(|nic| nic.summary() == Some(network.name()))
            .and_then(DeviceInfo::label)
    }

    fn device(&self, label: &str) -> Result<&DeviceInfo> {
        self.config
            .hardware
            .device
            .iter()
            .find(|device| device.label() == Some(label))
            .ok_or_else(|| Error::NotFound(format!("{label} of VM {}", self.name())))
    }

    fn nic(&self, label: &str) -> Result<&DeviceInfo> {
        self.nics()
            .into_iter()
            .find(|nic| nic.label() == Some(label))
            .ok_or_else(|| Error::NotFound(format!("{label} of VM {}", self.name())))
    }

    /// Edit of an existing adapter keeping its model and address.
    ///
    fn edited_nic(nic: &DeviceInfo) -> VirtualEthernetCard {
        let mut card = VirtualEthernetCard::new(&nic.type_name, nic.key);
        card.address_type = nic.address_type.clone();
        card.mac_address = nic.mac_address.clone();
        card
    }

    /// Adds an E1000 adapter attached to `network`.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, network), fields(vm = %self.name(), network = %network.name()))]
    pub async fn add_nic(&mut self, network: &Network, dispatch: Dispatch) -> Result<TaskHandle> {
        let mut card = VirtualEthernetCard::new(VirtualEthernetCard::E1000, NEW_DEVICE_KEY);
        card.backing = Some(network.backing().await?);
        card.connectable = Some(VirtualDeviceConnectInfo::all(true));

        let change = VirtualDeviceConfigSpec::new(DeviceOperation::Add, VirtualDevice::EthernetCard(card));
        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await
    }

    /// Removes the first adapter matching `selector`. Returns `None` when
    /// no adapter matches.
    ///
    pub async fn remove_nic(
        &mut self,
        selector: NicSelector<'_>,
        dispatch: Dispatch,
    ) -> Result<Option<TaskHandle>> {
        let Some(nic) = self.nics().into_iter().find(|nic| selector.matches(nic)) else {
            return Ok(None);
        };

        let card = VirtualEthernetCard::new(&nic.type_name, nic.key);
        let change = VirtualDeviceConfigSpec::new(DeviceOperation::Remove, VirtualDevice::EthernetCard(card));
        let handle = self
            .reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await?;
        Ok(Some(handle))
    }

    pub async fn connect_nic(&mut self, label: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        self.set_nic_connected(label, true, dispatch).await
    }

    pub async fn disconnect_nic(&mut self, label: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        self.set_nic_connected(label, false, dispatch).await
    }

    async fn set_nic_connected(
        &mut self,
        label: &str,
        connected: bool,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let mut card = Self::edited_nic(self.nic(label)?);
        card.connectable = Some(VirtualDeviceConnectInfo::all(connected));

        let change = VirtualDeviceConfigSpec::new(DeviceOperation::Edit, VirtualDevice::EthernetCard(card));
        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await
    }

    /// Moves the adapter labelled `label` to `network` and connects it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, network), fields(vm = %self.name(), network = %network.name()))]
    pub async fn change_nic(&mut self, label: &str, network: &Network, dispatch: Dispatch) -> Result<TaskHandle> {
        let mut card = Self::edited_nic(self.nic(label)?);
        card.backing = Some(network.backing().await?);
        card.connectable = Some(VirtualDeviceConnectInfo::all(true));

        let change = VirtualDeviceConfigSpec::new(DeviceOperation::Edit, VirtualDevice::EthernetCard(card));
        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await
    }

    /// Moves several adapters to other networks in one reconfiguration.
    ///
    /// # Arguments
    ///
    /// * `nics`: Adapter label and the network it moves to.
    /// * `dispatch`: Wait for the job or defer it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, nics), fields(vm = %self.name(), count = nics.len()))]
    pub async fn change_nics(&mut self, nics: &[(&str, &Network)], dispatch: Dispatch) -> Result<TaskHandle> {
        let mut changes = vec![];
        for (label, network) in nics {
            let mut card = Self::edited_nic(self.nic(label)?);
            card.backing = Some(network.backing().await?);
            card.connectable = Some(VirtualDeviceConnectInfo::all(true));
            changes.push(VirtualDeviceConfigSpec::new(
                DeviceOperation::Edit,
                VirtualDevice::EthernetCard(card),
            ));
        }

        self.reconfigure(VirtualMachineConfigSpec::devices(changes), dispatch)
            .await
    }

    /// Changes the address type, and the MAC where given, of several
    /// adapters in one reconfiguration.
    ///
    pub async fn change_macs(&mut self, addresses: &[NicAddress<'_>], dispatch: Dispatch) -> Result<TaskHandle> {
        let mut changes = vec![];
        for address in addresses {
            let nic = self.nic(address.label)?;
            let mut card = VirtualEthernetCard::new(&nic.type_name, nic.key);
            card.address_type = Some(address.address_type.to_owned());
            card.mac_address = address.mac.map(str::to_owned);
            changes.push(VirtualDeviceConfigSpec::new(
                DeviceOperation::Edit,
                VirtualDevice::EthernetCard(card),
            ));
        }

        self.reconfigure(VirtualMachineConfigSpec::devices(changes), dispatch)
            .await
    }

    /// Backs the serial port labelled `label` with a network service the
    /// VM listens on.
    ///
    pub async fn change_serial(&mut self, label: &str, uri: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        let port = VirtualSerialPort {
            key: self.device(label)?.key,
            backing: VirtualSerialPortUriBackingInfo::server(uri),
        };
        let change = VirtualDeviceConfigSpec::new(DeviceOperation::Edit, VirtualDevice::SerialPort(port));
        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await
    }

    // -------------------------------------------------------------------------

    /// Adds a thin provisioned disk next to the VM's configuration file,
    /// on the first SCSI controller.
    ///
    /// # Arguments
    ///
    /// * `size_kb`: Capacity in kilobytes.
    /// * `name`: File name without `.vmdk`, the VM name when `None`.
    /// * `unit`: Unit number on the controller.
    /// * `dispatch`: Wait for the job or defer it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(vm = %self.name()))]
    pub async fn add_disk(
        &mut self,
        size_kb: i64,
        name: Option<&str>,
        unit: i32,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let vmx = self
            .summary
            .config
            .vm_path_name
            .as_deref()
            .ok_or_else(|| Error::NotFound(format!("configuration file of VM {}", self.name())))?;
        let disk_name = name.unwrap_or(self.name());
        let file_name = match vmx.rsplit_once('/') {
            Some((folder, _)) => format!("{folder}/{disk_name}.vmdk"),
            // Configuration file in the datastore root.
            None => {
                let datastore = vmx.split_once(']').map_or(vmx, |(datastore, _)| datastore);
                format!("{datastore}] {disk_name}.vmdk")
            }
        };

        let controller_key = self
            .config
            .hardware
            .device
            .iter()
            .find(|device| device.label().is_some_and(|label| label.starts_with(SCSI_LABEL)))
            .map(|controller| controller.key);

        let disk = VirtualDisk {
            key: NEW_DEVICE_KEY,
            controller_key,
            unit_number: unit,
            capacity_in_kb: size_kb,
            backing: VirtualDiskFlatVer2BackingInfo::thin(file_name),
        };
        let mut change = VirtualDeviceConfigSpec::new(DeviceOperation::Add, VirtualDevice::Disk(disk));
        change.file_operation = Some(FileOperation::Create);

        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), dispatch)
            .await
    }

    /// Adds an LSI Logic SAS controller on `bus_number`. Always waits.
    ///
    pub async fn add_sas_controller(&mut self, bus_number: i32) -> Result<TaskHandle> {
        let controller = VirtualLsiLogicSasController {
            key: NEW_DEVICE_KEY,
            bus_number,
            shared_bus: "noSharing".to_owned(),
        };
        let change = VirtualDeviceConfigSpec::new(
            DeviceOperation::Add,
            VirtualDevice::SasController(controller),
        );
        self.reconfigure(VirtualMachineConfigSpec::devices(vec![change]), Dispatch::Wait)
            .await
    }

    pub async fn reserve_cpu(&mut self, mhz: i64, dispatch: Dispatch) -> Result<TaskHandle> {
        let spec = VirtualMachineConfigSpec {
            cpu_allocation: Some(ResourceAllocationInfo { reservation: mhz }),
            ..Default::default()
        };
        self.reconfigure(spec, dispatch).await
    }

    /// Reserves `mb` of memory; `0` reserves everything the VM may use.
    ///
    pub async fn reserve_memory(&mut self, mb: i64, dispatch: Dispatch) -> Result<TaskHandle> {
        let reservation = match mb {
            0 => self.summary.runtime.max_memory_usage.unwrap_or_default(),
            mb => mb,
        };
        let spec = VirtualMachineConfigSpec {
            memory_allocation: Some(ResourceAllocationInfo { reservation }),
            ..Default::default()
        };
        self.reconfigure(spec, dispatch).await
    }

    // -------------------------------------------------------------------------

    /// Moves the running VM to another host. Refreshes both after waiting.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, host), fields(vm = %self.name(), host = %host.name()))]
    pub async fn migrate(&mut self, host: &mut Host, dispatch: Dispatch) -> Result<TaskHandle> {
        let mut args = json!({
            "pool": host.resource_pool().await?,
            "priority": "defaultPriority",
        });
        if let ComputeResource::Cluster(_) = host.parent() {
            args["host"] = json!(host.moref());
        }

        let handle = self
            .session
            .execute(&self.moref, "MigrateVM_Task", args, dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            host.update().await?;
            self.update().await?;
        }
        Ok(handle)
    }

    /// Moves the VM to another host and datastore.
    ///
    pub async fn relocate(&self, host: &Host, datastore: &Datastore, dispatch: Dispatch) -> Result<TaskHandle> {
        let spec = VirtualMachineRelocateSpec {
            host: Some(host.moref().clone()),
            pool: Some(host.resource_pool().await?),
            datastore: Some(datastore.moref().clone()),
        };
        self.session
            .execute(&self.moref, "RelocateVM_Task", json!({"spec": spec}), dispatch)
            .await
    }
}
