//! Networks VMs attach to, and the standard switches of a host.
//!
//! Standard switches and their portgroups are not managed objects: they are
//! entries of the host network system's configuration, changed through
//! synchronous calls on that system.

use crate::prelude::{Error, Result};
use crate::session::Session;
use crate::vim::specs::{
    DistributedPortBackingInfo, DistributedVirtualSwitchPortConnection, EthernetBacking,
    HostPortGroupSpec, NetworkBackingInfo, inherited_network_policy,
};
use crate::vim::types::{
    DvPortgroupConfigInfo, HostNetworkConfig, MoRef, NetworkRef, PortgroupConfig, VswitchConfig,
};
use serde_json::{Value, json};

/// A network a VM NIC can be attached to: a standard portgroup network or a
/// distributed portgroup.
///
#[derive(Debug, Clone)]
pub struct Network {
    session: Session,
    network: NetworkRef,
    name: String,
}

impl Network {
    pub async fn load(session: Session, moref: MoRef) -> Result<Self> {
        let name = session.property(&moref, "name").await?;
        Ok(Self {
            session,
            network: NetworkRef::from(moref),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn network(&self) -> &NetworkRef {
        &self.network
    }

    /// NIC backing attaching a virtual adapter to this network.
    ///
    pub async fn backing(&self) -> Result<EthernetBacking> {
        match &self.network {
            NetworkRef::Standard(moref) => Ok(EthernetBacking::Network(NetworkBackingInfo {
                device_name: self.name.clone(),
                network: moref.clone(),
            })),
            NetworkRef::Distributed(moref) => {
                let config: DvPortgroupConfigInfo = self.session.property(moref, "config").await?;
                let switch = config
                    .distributed_virtual_switch
                    .ok_or_else(|| Error::NotFound(format!("switch of portgroup {}", self.name)))?;
                let switch_uuid = self.session.property(&switch, "uuid").await?;

                Ok(EthernetBacking::Distributed(DistributedPortBackingInfo {
                    port: DistributedVirtualSwitchPortConnection {
                        switch_uuid,
                        portgroup_key: config.key,
                    },
                }))
            }
        }
    }
}

// -----------------------------------------------------------------------------

async fn network_config(session: &Session, network_system: &MoRef) -> Result<HostNetworkConfig> {
    session.property(network_system, "networkConfig").await
}

/// Sets the member at `path`, creating missing intermediate objects.
///
fn set_member(spec: &mut Value, path: &[&str], value: Value) -> Result<()> {
    let mut node = spec;
    for key in path {
        node = node
            .as_object_mut()
            .ok_or_else(|| Error::Any(format!("{key} is not inside an object")))?
            .entry(*key)
            .or_insert_with(|| json!({}));
    }
    *node = value;
    Ok(())
}

fn remove_member(spec: &mut Value, parent: &str, key: &str) {
    if let Some(object) = spec.pointer_mut(parent).and_then(Value::as_object_mut) {
        object.remove(key);
    }
}

/// A standard virtual switch of a host.
///
#[derive(Debug, Clone)]
pub struct Vswitch {
    session: Session,
    network_system: MoRef,
    config: VswitchConfig,
}

impl Vswitch {
    /// All standard switches configured on the host owning
    /// `network_system`.
    ///
    pub async fn all(session: Session, network_system: MoRef) -> Result<Vec<Self>> {
        let config = network_config(&session, &network_system).await?;
        Ok(config
            .vswitch
            .into_iter()
            .map(|config| Self {
                session: session.clone(),
                network_system: network_system.clone(),
                config,
            })
            .collect())
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn num_ports(&self) -> Option<i64> {
        self.config.num_ports()
    }

    pub async fn update(&mut self) -> Result<()> {
        let config = network_config(&self.session, &self.network_system).await?;
        self.config = config
            .vswitch
            .into_iter()
            .find(|vswitch| vswitch.name == self.config.name)
            .ok_or_else(|| Error::NotFound(format!("standard switch {}", self.config.name)))?;
        Ok(())
    }

    async fn update_switch(&mut self, spec: Value) -> Result<()> {
        let args = json!({"vswitchName": self.name(), "spec": spec});
        self.session
            .invoke(&self.network_system, "UpdateVirtualSwitch", args)
            .await?;
        self.update().await
    }

    /// Resizes the switch. Does nothing when the size already matches.
    ///
    pub async fn set_num_ports(&mut self, ports: i64) -> Result<()> {
        if self.num_ports() == Some(ports) {
            return Ok(());
        }

        let mut spec = self.config.spec.clone();
        remove_member(&mut spec, "", "bridge");
        set_member(&mut spec, &["numPorts"], json!(ports))?;
        self.update_switch(spec).await
    }

    /// Bridges the physical NIC `nic` to the switch as its active uplink.
    ///
    pub async fn add_uplink(&mut self, nic: &str) -> Result<()> {
        let mut spec = self.config.spec.clone();
        set_member(
            &mut spec,
            &["bridge"],
            json!({"_typeName": "HostVirtualSwitchBondBridge", "nicDevice": [nic]}),
        )?;
        set_member(
            &mut spec,
            &["policy", "nicTeaming", "nicOrder"],
            json!({"_typeName": "HostNicOrderPolicy", "activeNic": [nic]}),
        )?;
        self.update_switch(spec).await
    }

    pub async fn remove_uplink(&mut self) -> Result<()> {
        let mut spec = self.config.spec.clone();
        set_member(&mut spec, &["bridge"], json!({"_typeName": "HostVirtualSwitchBridge"}))?;
        remove_member(&mut spec, "", "policy");
        self.update_switch(spec).await
    }

    pub async fn remove(self) -> Result<()> {
        self.session
            .invoke(&self.network_system, "RemoveVirtualSwitch", json!({"vswitchName": self.name()}))
            .await?;
        tracing::info!(target: "inventory", vswitch = %self.name(), "Standard switch removed");
        Ok(())
    }

    /// Allows or rejects promiscuous mode on the switch.
    ///
    /// The server refuses the change while an uplink is bridged, so the
    /// uplink is detached for the update and bridged again afterwards.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(vswitch = %self.name()))]
    pub async fn set_promiscuous(&mut self, enabled: bool) -> Result<()> {
        if self.config.allows_promiscuous() == Some(enabled) {
            return Ok(());
        }

        let uplink = self.config.uplink().map(str::to_owned);
        let mut spec = self.config.spec.clone();
        remove_member(&mut spec, "", "bridge");
        remove_member(&mut spec, "/policy/nicTeaming", "nicOrder");
        set_member(&mut spec, &["policy", "security", "allowPromiscuous"], json!(enabled))?;
        self.update_switch(spec).await?;

        if let Some(uplink) = uplink {
            self.add_uplink(&uplink).await?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------

    /// Adds a portgroup inheriting the switch policy.
    ///
    /// # Arguments
    ///
    /// * `name`: Name of the portgroup.
    /// * `vlan`: VLAN id, `0` for none, `4095` for all.
    ///
    pub async fn add_portgroup(&self, name: &str, vlan: i32) -> Result<Portgroup> {
        let spec = HostPortGroupSpec {
            name: name.to_owned(),
            vlan_id: vlan,
            vswitch_name: self.name().to_owned(),
            policy: inherited_network_policy(),
        };
        self.session
            .invoke(&self.network_system, "AddPortGroup", json!({"portgrp": spec}))
            .await?;

        self.portgroup(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("portgroup {name}")))
    }

    pub async fn portgroups(&self) -> Result<Vec<Portgroup>> {
        let config = network_config(&self.session, &self.network_system).await?;
        Ok(config
            .portgroup
            .into_iter()
            .filter(|portgroup| portgroup.vswitch_name() == Some(self.name()))
            .map(|config| Portgroup::new(self.session.clone(), self.network_system.clone(), config))
            .collect())
    }

    pub async fn portgroup(&self, name: &str) -> Result<Option<Portgroup>> {
        Ok(self
            .portgroups()
            .await?
            .into_iter()
            .find(|portgroup| portgroup.name() == name))
    }
}

/// A portgroup of a standard switch.
///
#[derive(Debug, Clone)]
pub struct Portgroup {
    session: Session,
    network_system: MoRef,
    name: String,
    config: PortgroupConfig,
}

impl Portgroup {
    fn new(session: Session, network_system: MoRef, config: PortgroupConfig) -> Self {
        Self {
            session,
            network_system,
            name: config.name().unwrap_or_default().to_owned(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vlan_id(&self) -> i32 {
        self.config.vlan_id()
    }

    pub async fn update(&mut self) -> Result<()> {
        let config = network_config(&self.session, &self.network_system).await?;
        self.config = config
            .portgroup
            .into_iter()
            .find(|portgroup| portgroup.name() == Some(self.name.as_str()))
            .ok_or_else(|| Error::NotFound(format!("portgroup {}", self.name)))?;
        Ok(())
    }

    async fn update_portgroup(&mut self, vlan_id: i32, policy: Value) -> Result<()> {
        let spec = HostPortGroupSpec {
            name: self.name.clone(),
            vlan_id,
            vswitch_name: self.config.vswitch_name().unwrap_or_default().to_owned(),
            policy,
        };
        let args = json!({"pgName": self.name, "portgrp": spec});
        self.session
            .invoke(&self.network_system, "UpdatePortGroup", args)
            .await?;
        self.update().await
    }

    pub async fn remove(self) -> Result<()> {
        self.session
            .invoke(&self.network_system, "RemovePortGroup", json!({"pgName": self.name}))
            .await?;
        tracing::info!(target: "inventory", portgroup = %self.name, "Portgroup removed");
        Ok(())
    }

    /// Tags the portgroup with `vlan`, keeping its policy.
    ///
    pub async fn set_vlan(&mut self, vlan: i32) -> Result<()> {
        let policy = self
            .config
            .spec
            .get("policy")
            .cloned()
            .unwrap_or_else(inherited_network_policy);
        self.update_portgroup(vlan, policy).await
    }

    /// Overrides promiscuous mode; the rest of the policy is inherited from
    /// the switch.
    ///
    pub async fn set_promiscuous(&mut self, enabled: bool) -> Result<()> {
        let policy = json!({
            "_typeName": "HostNetworkPolicy",
            "security": {"_typeName": "HostNetworkSecurityPolicy", "allowPromiscuous": enabled},
        });
        self.update_portgroup(self.vlan_id(), policy).await
    }
}
