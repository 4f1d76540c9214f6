use crate::inventory::datastore::Datastore;
use crate::inventory::network::{Network, Vswitch};
use crate::inventory::vm::Vm;
use crate::inventory::Dispatch;
use crate::prelude::{Error, Result};
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::{
    HostNasVolumeSpec, HostVirtualSwitchSpec, VirtualMachineConfigSpec, VirtualMachineFileInfo,
};
use crate::vim::types::{
    ComputeResource, ConnectionState, HostConfigManager, HostSummary, MoRef, PhysicalNic,
};
use serde_json::{Value, json};

/// Seconds a host gets to enter or leave maintenance mode.
///
const MAINTENANCE_TIMEOUT_SECS: i32 = 90;

/// Ports ESX reserves on every standard switch for uplinks.
///
const UPLINK_PORTS: i32 = 8;

/// Guest OS of VMs created with [`Host::create_vm`].
///
const GUEST_ID: &str = "centosGuest";

/// VMkernel adapter used for vMotion.
///
const VMOTION_VNIC: &str = "vmk0";

/// An ESX host.
///
#[derive(Debug, Clone)]
pub struct Host {
    session: Session,
    moref: MoRef,
    vm_folder: MoRef,
    summary: HostSummary,
    parent: ComputeResource,
    config_manager: HostConfigManager,
}

impl Host {
    /// # Arguments
    ///
    /// * `vm_folder`: VM folder of the datacenter holding the host. New and
    ///   registered VMs land there.
    ///
    pub async fn load(session: Session, moref: MoRef, vm_folder: MoRef) -> Result<Self> {
        let summary = session.property(&moref, "summary").await?;
        let parent = ComputeResource::try_from(session.property::<MoRef>(&moref, "parent").await?)?;
        let config_manager = session.property(&moref, "configManager").await?;

        Ok(Self {
            session,
            moref,
            vm_folder,
            summary,
            parent,
            config_manager,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.summary.config.name
    }

    pub fn vm_folder(&self) -> &MoRef {
        &self.vm_folder
    }

    pub fn parent(&self) -> &ComputeResource {
        &self.parent
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.summary.runtime.connection_state
    }

    pub fn in_maintenance_mode(&self) -> bool {
        self.summary.runtime.in_maintenance_mode
    }

    pub async fn update(&mut self) -> Result<()> {
        *self = Self::load(self.session.clone(), self.moref.clone(), self.vm_folder.clone()).await?;
        Ok(())
    }

    /// Root resource pool of the cluster or compute resource of the host.
    ///
    pub async fn resource_pool(&self) -> Result<MoRef> {
        self.session
            .property(self.parent.moref(), "resourcePool")
            .await
    }

    fn manager(manager: &Option<MoRef>, what: &str) -> Result<MoRef> {
        manager
            .clone()
            .ok_or_else(|| Error::NotSupported(format!("{what} of this host")))
    }

    // -------------------------------------------------------------------------

    /// Removes the host from the inventory.
    ///
    /// A standalone host is removed with its compute resource. A clustered
    /// host is disconnected first, waiting for that, then destroyed.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(host = %self.name()))]
    pub async fn destroy(self, dispatch: Dispatch) -> Result<TaskHandle> {
        match &self.parent {
            ComputeResource::Standalone(compute) => {
                self.session
                    .execute(compute, "Destroy_Task", Value::Null, dispatch)
                    .await
            }
            ComputeResource::Cluster(_) => {
                self.session
                    .execute(&self.moref, "DisconnectHost_Task", Value::Null, Dispatch::Wait)
                    .await?;
                self.session
                    .execute(&self.moref, "Destroy_Task", Value::Null, dispatch)
                    .await
            }
        }
    }

    /// Disconnects a clustered host.
    ///
    pub async fn disconnect(&self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.cluster_member_task("DisconnectHost_Task", dispatch)
            .await
    }

    /// Reconnects a clustered host.
    ///
    pub async fn reconnect(&self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.cluster_member_task("ReconnectHost_Task", dispatch)
            .await
    }

    async fn cluster_member_task(&self, method: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        match &self.parent {
            ComputeResource::Cluster(_) => {
                self.session
                    .execute(&self.moref, method, Value::Null, dispatch)
                    .await
            }
            ComputeResource::Standalone(_) => Err(Error::NotSupported(format!(
                "{method} on standalone host {}",
                self.name()
            ))),
        }
    }

    pub async fn enter_maintenance_mode(&mut self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.maintenance_task("EnterMaintenanceMode_Task", dispatch)
            .await
    }

    pub async fn exit_maintenance_mode(&mut self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.maintenance_task("ExitMaintenanceMode_Task", dispatch)
            .await
    }

    async fn maintenance_task(&mut self, method: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        let args = json!({"timeout": MAINTENANCE_TIMEOUT_SECS});
        let handle = self
            .session
            .execute(&self.moref, method, args, dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(handle)
    }

    // -------------------------------------------------------------------------

    pub async fn vms(&self) -> Result<Vec<Vm>> {
        let mut vms = vec![];
        for vm in self.session.list::<MoRef>(&self.moref, "vm").await? {
            vms.push(Vm::load(self.session.clone(), vm, self.vm_folder.clone()).await?);
        }
        Ok(vms)
    }

    pub async fn vm(&self, name: &str) -> Result<Option<Vm>> {
        Ok(self.vms().await?.into_iter().find(|vm| vm.name() == name))
    }

    /// Creates an empty VM on the host, its files in `datastore`.
    ///
    /// # Arguments
    ///
    /// * `name`: Name of the VM and of its folder on the datastore.
    /// * `datastore`: Datastore holding the VM files.
    /// * `memory_mb`: Memory in megabytes.
    /// * `cpus`: Number of virtual CPUs.
    /// * `dispatch`: Wait for the job or defer it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, datastore), fields(host = %self.name()))]
    pub async fn create_vm(
        &mut self,
        name: &str,
        datastore: &Datastore,
        memory_mb: i64,
        cpus: i32,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let config = VirtualMachineConfigSpec {
            name: Some(name.to_owned()),
            memory_mb: Some(memory_mb),
            num_cpus: Some(cpus),
            guest_id: Some(GUEST_ID.to_owned()),
            files: Some(VirtualMachineFileInfo {
                vm_path_name: format!("[{}] {}", datastore.name(), name),
            }),
            ..Default::default()
        };
        let pool = self.resource_pool().await?;
        let args = json!({"config": config, "pool": pool, "host": &self.moref});

        let handle = self
            .session
            .execute(&self.vm_folder, "CreateVM_Task", args, dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(handle)
    }

    /// Registers an existing VM with the host.
    ///
    /// A datastore path (`[datastore] folder/name.vmx`) is taken as is. A
    /// bare name is looked up as folder `name` holding `name.vmx` on the
    /// host's datastores, refreshing them once if nothing is found.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(host = %self.name()))]
    pub async fn register_vm(&mut self, name_or_path: &str, dispatch: Dispatch) -> Result<TaskHandle> {
        let path = match name_or_path.starts_with('[') {
            true => name_or_path.to_owned(),
            false => {
                let mut folders = self.search_datastores(name_or_path, None, false).await?;
                if folders.is_empty() {
                    folders = self.search_datastores(name_or_path, None, true).await?;
                }
                let folder = folders
                    .first()
                    .ok_or_else(|| Error::NotFound(format!("VM folder {name_or_path}")))?;
                format!("{folder}/{name_or_path}.vmx")
            }
        };

        let pool = self.resource_pool().await?;
        let args = json!({
            "path": path,
            "asTemplate": false,
            "pool": pool,
            "host": &self.moref,
        });
        let handle = self
            .session
            .execute(&self.vm_folder, "RegisterVM_Task", args, dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(handle)
    }

    // -------------------------------------------------------------------------

    pub async fn datastores(&self) -> Result<Vec<Datastore>> {
        let system = Self::manager(&self.config_manager.datastore_system, "datastore system")?;
        let mut datastores = vec![];
        for datastore in self.session.list::<MoRef>(&system, "datastore").await? {
            datastores.push(Datastore::load(self.session.clone(), datastore, system.clone()).await?);
        }
        Ok(datastores)
    }

    pub async fn datastore(&self, label: &str) -> Result<Option<Datastore>> {
        Ok(self
            .datastores()
            .await?
            .into_iter()
            .find(|datastore| datastore.name() == label))
    }

    /// Mounts a NAS share as a datastore, or returns the datastore already
    /// using that label.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, spec), fields(host = %self.name(), label = %spec.local_path))]
    pub async fn add_nas_datastore(&mut self, spec: HostNasVolumeSpec) -> Result<Datastore> {
        if let Some(datastore) = self.datastore(&spec.local_path).await? {
            return Ok(datastore);
        }

        let system = Self::manager(&self.config_manager.datastore_system, "datastore system")?;
        let created = self
            .session
            .invoke(&system, "CreateNasDatastore", json!({"spec": spec}))
            .await?;
        tracing::info!(target: "inventory", host = %self.name(), "NAS datastore mounted");

        self.update().await?;
        Datastore::load(self.session.clone(), serde_json::from_value(created)?, system).await
    }

    /// Searches every datastore of the host for files matching `pattern`.
    /// Returns datastore paths.
    ///
    pub async fn search_datastores(
        &self,
        pattern: &str,
        folder: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<String>> {
        let mut paths = vec![];
        for datastore in self.datastores().await? {
            paths.extend(datastore.search(pattern, folder, refresh).await?);
        }
        Ok(paths)
    }

    // -------------------------------------------------------------------------

    /// Adds a standard switch with `ports` usable ports.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(host = %self.name()))]
    pub async fn add_vswitch(&self, name: &str, ports: i32) -> Result<Vswitch> {
        let system = Self::manager(&self.config_manager.network_system, "network system")?;
        let spec = HostVirtualSwitchSpec {
            num_ports: ports + UPLINK_PORTS,
        };
        self.session
            .invoke(&system, "AddVirtualSwitch", json!({"vswitchName": name, "spec": spec}))
            .await?;

        self.vswitch(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("standard switch {name}")))
    }

    pub async fn vswitches(&self) -> Result<Vec<Vswitch>> {
        let system = Self::manager(&self.config_manager.network_system, "network system")?;
        Vswitch::all(self.session.clone(), system).await
    }

    pub async fn vswitch(&self, name: &str) -> Result<Option<Vswitch>> {
        Ok(self
            .vswitches()
            .await?
            .into_iter()
            .find(|vswitch| vswitch.name() == name))
    }

    /// Networks the host's VMs can attach to, standard or distributed.
    ///
    pub async fn networks(&self) -> Result<Vec<Network>> {
        let mut networks = vec![];
        for network in self.session.list::<MoRef>(&self.moref, "network").await? {
            networks.push(Network::load(self.session.clone(), network).await?);
        }
        Ok(networks)
    }

    pub async fn network(&self, name: &str) -> Result<Option<Network>> {
        Ok(self
            .networks()
            .await?
            .into_iter()
            .find(|network| network.name() == name))
    }

    pub async fn enable_vmotion(&self) -> Result<()> {
        self.vmotion_nic("SelectVnicForNicType").await
    }

    pub async fn disable_vmotion(&self) -> Result<()> {
        self.vmotion_nic("DeselectVnicForNicType").await
    }

    async fn vmotion_nic(&self, method: &str) -> Result<()> {
        let manager = Self::manager(&self.config_manager.virtual_nic_manager, "virtual NIC manager")?;
        let args = json!({"nicType": "vmotion", "device": VMOTION_VNIC});
        self.session.invoke(&manager, method, args).await?;
        Ok(())
    }

    /// Physical NICs of the host. Empty while the host is not connected.
    ///
    pub async fn pnics(&self) -> Result<Vec<PhysicalNic>> {
        if self.connection_state() != ConnectionState::Connected {
            return Ok(vec![]);
        }

        let config: Value = self.session.property(&self.moref, "config").await?;
        match config.get("network").and_then(|network| network.get("pnic")) {
            Some(pnics) => Ok(serde_json::from_value(pnics.clone())?),
            None => Ok(vec![]),
        }
    }
}
