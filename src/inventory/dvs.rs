use crate::inventory::dvportgroup::DvPortgroup;
use crate::inventory::host::Host;
use crate::inventory::{Dispatch, Submitted, missing_child};
use crate::prelude::{Error, Result};
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::{
    DvPortgroupConfigSpec, DvsConfigSpec, DvsHostMemberConfigSpec, DvsHostMemberPnicBacking,
    DvsHostMemberPnicSpec, DvsPortSetting, LinkDiscoveryProtocolConfig, MemberOperation,
    PortBinding, VlanSpec,
};
use crate::vim::types::{DvsConfigInfo, MoRef};
use serde_json::{Value, json};

/// Ports of a portgroup created without an explicit size.
///
pub const DEFAULT_PORTGROUP_PORTS: i32 = 128;

/// A distributed virtual switch.
///
/// Every reconfiguration echoes the configuration version the switch had
/// when it was last read, so the handle refreshes itself before and after
/// each change.
///
#[derive(Debug, Clone)]
pub struct Dvs {
    session: Session,
    moref: MoRef,
    config: DvsConfigInfo,
}

impl Dvs {
    pub async fn load(session: Session, moref: MoRef) -> Result<Self> {
        let config = session.property(&moref, "config").await?;
        Ok(Self {
            session,
            moref,
            config,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn uuid(&self) -> &str {
        &self.config.uuid
    }

    pub fn config_version(&self) -> &str {
        &self.config.config_version
    }

    pub async fn update(&mut self) -> Result<()> {
        self.config = self.session.property(&self.moref, "config").await?;
        Ok(())
    }

    pub async fn destroy(self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.session
            .execute(&self.moref, "Destroy_Task", Value::Null, dispatch)
            .await
    }

    /// Applies `spec` with the current configuration version. Always waits.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, spec), fields(dvs = %self.name()))]
    async fn reconfigure(&mut self, mut spec: DvsConfigSpec) -> Result<TaskHandle> {
        self.update().await?;
        spec.config_version = Some(self.config.config_version.clone());

        let handle = self
            .session
            .execute(&self.moref, "ReconfigureDvs_Task", json!({"spec": spec}), Dispatch::Wait)
            .await?;
        self.update().await?;
        Ok(handle)
    }

    // -------------------------------------------------------------------------

    /// Adds `host` to the switch with `nics` as uplinks.
    ///
    pub async fn add_host_nics(&mut self, host: &Host, nics: &[&str]) -> Result<TaskHandle> {
        self.host_member(MemberOperation::Add, host, nics).await
    }

    /// Replaces the uplinks of a member host.
    ///
    pub async fn update_host_nics(&mut self, host: &Host, nics: &[&str]) -> Result<TaskHandle> {
        self.host_member(MemberOperation::Edit, host, nics).await
    }

    pub async fn remove_host(&mut self, host: &Host) -> Result<TaskHandle> {
        self.host_member(MemberOperation::Remove, host, &[]).await
    }

    async fn host_member(
        &mut self,
        operation: MemberOperation,
        host: &Host,
        nics: &[&str],
    ) -> Result<TaskHandle> {
        let member = DvsHostMemberConfigSpec {
            operation,
            host: host.moref().clone(),
            backing: DvsHostMemberPnicBacking {
                pnic_spec: nics
                    .iter()
                    .map(|nic| DvsHostMemberPnicSpec {
                        pnic_device: (*nic).to_owned(),
                    })
                    .collect(),
            },
        };
        let spec = DvsConfigSpec {
            host: vec![member],
            ..Default::default()
        };
        self.reconfigure(spec).await
    }

    pub async fn enable_lldp(&mut self) -> Result<TaskHandle> {
        self.link_discovery("lldp").await
    }

    pub async fn enable_cdp(&mut self) -> Result<TaskHandle> {
        self.link_discovery("cdp").await
    }

    async fn link_discovery(&mut self, protocol: &str) -> Result<TaskHandle> {
        let spec = DvsConfigSpec {
            link_discovery_protocol_config: Some(LinkDiscoveryProtocolConfig {
                protocol: protocol.to_owned(),
                operation: "both".to_owned(),
            }),
            ..Default::default()
        };
        self.reconfigure(spec).await
    }

    pub async fn set_mtu(&mut self, mtu: i32) -> Result<TaskHandle> {
        let spec = DvsConfigSpec {
            max_mtu: Some(mtu),
            ..Default::default()
        };
        self.reconfigure(spec).await
    }

    pub async fn rename(&mut self, name: &str) -> Result<TaskHandle> {
        let spec = DvsConfigSpec {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        self.reconfigure(spec).await
    }

    // -------------------------------------------------------------------------

    /// Adds an early binding portgroup to the switch.
    ///
    /// # Arguments
    ///
    /// * `name`: Name of the portgroup.
    /// * `ports`: Number of ports, see [`DEFAULT_PORTGROUP_PORTS`].
    /// * `vlan`: VLAN id, untagged when `None`.
    /// * `dispatch`: Wait for the job and return the portgroup, or defer it.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(dvs = %self.name()))]
    pub async fn add_portgroup(
        &mut self,
        name: &str,
        ports: i32,
        vlan: Option<i32>,
        dispatch: Dispatch,
    ) -> Result<Submitted<DvPortgroup>> {
        let spec = DvPortgroupConfigSpec {
            name: Some(name.to_owned()),
            num_ports: Some(ports),
            binding: Some(PortBinding::EarlyBinding),
            default_port_config: vlan.map(|vlan| DvsPortSetting {
                vlan: Some(VlanSpec::id(vlan)),
                ..Default::default()
            }),
            ..Default::default()
        };
        let handle = self
            .session
            .execute(&self.moref, "AddDVPortgroup_Task", json!({"spec": [spec]}), dispatch)
            .await?;

        match dispatch {
            Dispatch::Defer => Ok(Submitted::Pending(handle)),
            Dispatch::Wait => {
                self.update().await?;
                let portgroup = self
                    .portgroup(name)
                    .await?
                    .ok_or_else(|| missing_child(&handle, &format!("portgroup {name}")))?;
                Ok(Submitted::Finished(portgroup))
            }
        }
    }

    pub async fn portgroups(&self) -> Result<Vec<DvPortgroup>> {
        let mut portgroups = vec![];
        for portgroup in self.session.list::<MoRef>(&self.moref, "portgroup").await? {
            portgroups.push(DvPortgroup::load(self.session.clone(), portgroup).await?);
        }
        Ok(portgroups)
    }

    pub async fn portgroup(&self, name: &str) -> Result<Option<DvPortgroup>> {
        Ok(self
            .portgroups()
            .await?
            .into_iter()
            .find(|portgroup| portgroup.name() == name))
    }

    /// Renames the uplink portgroup, by default to `<switch>-uplinks`.
    ///
    pub async fn rename_uplinks(&mut self, name: Option<&str>) -> Result<TaskHandle> {
        let uplinks = self
            .config
            .uplink_portgroup
            .first()
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("uplink portgroup of {}", self.name())))?;
        let name = match name {
            Some(name) => name.to_owned(),
            None => format!("{}-uplinks", self.name()),
        };

        let mut portgroup = DvPortgroup::load(self.session.clone(), uplinks).await?;
        portgroup.rename(&name).await
    }
}
