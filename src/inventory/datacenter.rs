use crate::inventory::cluster::Cluster;
use crate::inventory::dvs::Dvs;
use crate::inventory::host::Host;
use crate::inventory::{Dispatch, Submitted, created_object, missing_child};
use crate::prelude::Result;
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::{
    ClusterConfigSpecEx, DistributedVirtualSwitchProductSpec, DvsConfigSpec, DvsCreateSpec,
    HostConnectSpec,
};
use crate::vim::types::{EntityKind, MoRef};
use secrecy::ExposeSecret;
use serde_json::{Value, json};

/// A datacenter and the folders holding its hosts, VMs and networks.
///
#[derive(Debug, Clone)]
pub struct Datacenter {
    session: Session,
    moref: MoRef,
    name: String,
    host_folder: MoRef,
    vm_folder: MoRef,
    network_folder: MoRef,
}

impl Datacenter {
    pub async fn load(session: Session, moref: MoRef) -> Result<Self> {
        let name = session.property(&moref, "name").await?;
        let host_folder = session.property(&moref, "hostFolder").await?;
        let vm_folder = session.property(&moref, "vmFolder").await?;
        let network_folder = session.property(&moref, "networkFolder").await?;

        Ok(Self {
            session,
            moref,
            name,
            host_folder,
            vm_folder,
            network_folder,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vm_folder(&self) -> &MoRef {
        &self.vm_folder
    }

    /// Re-fetches the datacenter's properties.
    ///
    pub async fn update(&mut self) -> Result<()> {
        *self = Self::load(self.session.clone(), self.moref.clone()).await?;
        Ok(())
    }

    /// Destroys the datacenter and everything in it. Always waits.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(datacenter = %self.name))]
    pub async fn destroy(self) -> Result<TaskHandle> {
        self.session
            .execute(&self.moref, "Destroy_Task", Value::Null, Dispatch::Wait)
            .await
    }

    // -------------------------------------------------------------------------

    pub async fn clusters(&self) -> Result<Vec<Cluster>> {
        let mut clusters = vec![];
        for child in self.session.list::<MoRef>(&self.host_folder, "childEntity").await? {
            if child.entity_kind() == EntityKind::Cluster {
                clusters.push(Cluster::load(self.session.clone(), child, self.vm_folder.clone()).await?);
            }
        }
        Ok(clusters)
    }

    pub async fn cluster(&self, name: &str) -> Result<Option<Cluster>> {
        Ok(self
            .clusters()
            .await?
            .into_iter()
            .find(|cluster| cluster.name() == name))
    }

    /// Creates a cluster, or returns the existing one of that name.
    ///
    /// With `drs` the cluster gets DRS in manual mode and power management
    /// off.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(datacenter = %self.name))]
    pub async fn add_cluster(&mut self, name: &str, drs: bool) -> Result<Cluster> {
        if let Some(cluster) = self.cluster(name).await? {
            return Ok(cluster);
        }

        let spec = match drs {
            true => ClusterConfigSpecEx::with_drs(true),
            false => ClusterConfigSpecEx::default(),
        };
        let created = self
            .session
            .invoke(&self.host_folder, "CreateClusterEx", json!({"name": name, "spec": spec}))
            .await?;
        tracing::info!(target: "inventory", name, "Cluster created");

        self.update().await?;
        Cluster::load(self.session.clone(), serde_json::from_value(created)?, self.vm_folder.clone()).await
    }

    /// Switches DRS of an existing cluster on or off. Returns `None` when
    /// there is no cluster of that name.
    ///
    pub async fn reconfigure_cluster(
        &self,
        name: &str,
        drs: bool,
        dispatch: Dispatch,
    ) -> Result<Option<TaskHandle>> {
        let Some(cluster) = self.cluster(name).await? else {
            return Ok(None);
        };

        let args = json!({"spec": ClusterConfigSpecEx::with_drs(drs), "modify": true});
        let handle = self
            .session
            .execute(cluster.moref(), "ReconfigureComputeResource_Task", args, dispatch)
            .await?;
        Ok(Some(handle))
    }

    // -------------------------------------------------------------------------

    /// Creates a distributed switch, or returns the existing one of that
    /// name. Always waits; the uplink portgroup of a new switch is renamed
    /// to `<name>-uplinks`.
    ///
    /// # Arguments
    ///
    /// * `name`: Name of the switch.
    /// * `version`: Product version of the switch, e.g. `8.0.0`.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(datacenter = %self.name))]
    pub async fn add_dvswitch(&mut self, name: &str, version: &str) -> Result<Dvs> {
        if let Some(dvs) = self.dvswitch(name).await? {
            return Ok(dvs);
        }

        let spec = DvsCreateSpec {
            config_spec: DvsConfigSpec {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            product_info: Some(DistributedVirtualSwitchProductSpec {
                version: version.to_owned(),
            }),
        };
        let handle = self
            .session
            .execute(&self.network_folder, "CreateDVS_Task", json!({"spec": spec}), Dispatch::Wait)
            .await?;
        self.update().await?;

        let mut dvs = match created_object(&handle) {
            Some(moref) => Dvs::load(self.session.clone(), moref).await?,
            None => self
                .dvswitch(name)
                .await?
                .ok_or_else(|| missing_child(&handle, &format!("distributed switch {name}")))?,
        };
        dvs.rename_uplinks(None).await?;
        Ok(dvs)
    }

    /// All distributed switches of the datacenter, including those in
    /// nested network folders.
    ///
    pub async fn dvswitches(&self) -> Result<Vec<Dvs>> {
        let mut switches = vec![];
        let mut folders = vec![self.network_folder.clone()];
        while let Some(folder) = folders.pop() {
            for child in self.session.list::<MoRef>(&folder, "childEntity").await? {
                match child.entity_kind() {
                    EntityKind::Folder => folders.push(child),
                    EntityKind::DistributedSwitch => {
                        switches.push(Dvs::load(self.session.clone(), child).await?)
                    }
                    _ => {}
                }
            }
        }
        Ok(switches)
    }

    pub async fn dvswitch(&self, name: &str) -> Result<Option<Dvs>> {
        Ok(self
            .dvswitches()
            .await?
            .into_iter()
            .find(|dvs| dvs.name() == name))
    }

    // -------------------------------------------------------------------------

    /// Adds a standalone host to the datacenter, or returns the host if it
    /// is already in the inventory.
    ///
    /// The configured ESX license is applied when there is one.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, spec), fields(datacenter = %self.name, host = %spec.host_name))]
    pub async fn add_host(&mut self, spec: HostConnectSpec, dispatch: Dispatch) -> Result<Submitted<Host>> {
        if let Some(host) = self.host(&spec.host_name).await? {
            return Ok(Submitted::Finished(host));
        }

        let mut args = json!({"spec": &spec, "addConnected": true});
        if let Some(license) = &self.session.settings().licenses.esx {
            args["license"] = json!(license.expose_secret());
        }
        let handle = self
            .session
            .execute(&self.host_folder, "AddStandaloneHost_Task", args, dispatch)
            .await?;

        match dispatch {
            Dispatch::Defer => Ok(Submitted::Pending(handle)),
            Dispatch::Wait => {
                self.update().await?;
                let host = self
                    .host(&spec.host_name)
                    .await?
                    .ok_or_else(|| missing_child(&handle, &format!("host {}", spec.host_name)))?;
                Ok(Submitted::Finished(host))
            }
        }
    }

    /// All hosts of the datacenter, clustered or standalone.
    ///
    pub async fn hosts(&self) -> Result<Vec<Host>> {
        let mut hosts = vec![];
        for child in self.session.list::<MoRef>(&self.host_folder, "childEntity").await? {
            if !matches!(child.entity_kind(), EntityKind::Cluster | EntityKind::ComputeResource) {
                continue;
            }
            for host in self.session.list::<MoRef>(&child, "host").await? {
                hosts.push(Host::load(self.session.clone(), host, self.vm_folder.clone()).await?);
            }
        }
        Ok(hosts)
    }

    pub async fn host(&self, name: &str) -> Result<Option<Host>> {
        Ok(self.hosts().await?.into_iter().find(|host| host.name() == name))
    }
}
