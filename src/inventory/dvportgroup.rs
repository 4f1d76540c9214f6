use crate::inventory::Dispatch;
use crate::prelude::Result;
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::{
    BoolPolicy, DvPortgroupConfigSpec, DvsPortSetting, DvsSecurityPolicy, PortBinding,
    StringPolicy, UplinkTeamingPolicy, VlanSpec,
};
use crate::vim::types::{DvPortgroupConfigInfo, MoRef};
use serde_json::{Value, json};

/// Teaming policy balancing on the source MAC hash.
///
const MAC_HASH_TEAMING: &str = "loadbalance_srcmac";

/// A portgroup of a distributed switch.
///
#[derive(Debug, Clone)]
pub struct DvPortgroup {
    session: Session,
    moref: MoRef,
    config: DvPortgroupConfigInfo,
}

impl DvPortgroup {
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

    /// Portgroup key, used by distributed port backings.
    ///
    pub fn key(&self) -> &str {
        &self.config.key
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

    /// Refreshes the configuration version, applies `spec` and refreshes
    /// again after waiting.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, spec), fields(portgroup = %self.name()))]
    async fn reconfigure(&mut self, mut spec: DvPortgroupConfigSpec, dispatch: Dispatch) -> Result<TaskHandle> {
        self.update().await?;
        spec.config_version = Some(self.config.config_version.clone());

        let handle = self
            .session
            .execute(&self.moref, "ReconfigureDVPortgroup_Task", json!({"spec": spec}), dispatch)
            .await?;
        if dispatch == Dispatch::Wait {
            self.update().await?;
        }
        Ok(handle)
    }

    async fn reconfigure_ports(&mut self, setting: DvsPortSetting) -> Result<TaskHandle> {
        let spec = DvPortgroupConfigSpec {
            default_port_config: Some(setting),
            ..Default::default()
        };
        self.reconfigure(spec, Dispatch::Wait).await
    }

    // -------------------------------------------------------------------------

    pub async fn rename(&mut self, name: &str) -> Result<TaskHandle> {
        let spec = DvPortgroupConfigSpec {
            name: Some(name.to_owned()),
            ..Default::default()
        };
        self.reconfigure(spec, Dispatch::Wait).await
    }

    pub async fn set_vlan(&mut self, vlan: i32) -> Result<TaskHandle> {
        self.reconfigure_ports(DvsPortSetting {
            vlan: Some(VlanSpec::id(vlan)),
            ..Default::default()
        })
        .await
    }

    /// Trunks the VLAN range `start..=end`, typically on the uplink
    /// portgroup.
    ///
    pub async fn set_vlan_trunk(&mut self, start: i32, end: i32) -> Result<TaskHandle> {
        self.reconfigure_ports(DvsPortSetting {
            vlan: Some(VlanSpec::trunk(start, end)),
            ..Default::default()
        })
        .await
    }

    pub async fn set_promiscuous(&mut self, enabled: bool) -> Result<TaskHandle> {
        self.reconfigure_ports(DvsPortSetting {
            security_policy: Some(DvsSecurityPolicy {
                inherited: false,
                allow_promiscuous: BoolPolicy::from(enabled),
                mac_changes: None,
                forged_transmits: None,
            }),
            ..Default::default()
        })
        .await
    }

    /// Allows or rejects promiscuous mode, MAC changes and forged
    /// transmits together.
    ///
    pub async fn set_security_policy(&mut self, allow: bool) -> Result<TaskHandle> {
        self.reconfigure_ports(DvsPortSetting {
            security_policy: Some(DvsSecurityPolicy {
                inherited: false,
                allow_promiscuous: BoolPolicy::from(allow),
                mac_changes: Some(BoolPolicy::from(allow)),
                forged_transmits: Some(BoolPolicy::from(allow)),
            }),
            ..Default::default()
        })
        .await
    }

    pub async fn enable_mac_hash_lb(&mut self) -> Result<TaskHandle> {
        self.reconfigure_ports(DvsPortSetting {
            uplink_teaming_policy: Some(UplinkTeamingPolicy {
                policy: StringPolicy {
                    inherited: false,
                    value: MAC_HASH_TEAMING.to_owned(),
                },
            }),
            ..Default::default()
        })
        .await
    }

    pub async fn set_binding(&mut self, binding: PortBinding, dispatch: Dispatch) -> Result<TaskHandle> {
        let spec = DvPortgroupConfigSpec {
            binding: Some(binding),
            ..Default::default()
        };
        self.reconfigure(spec, dispatch).await
    }

    pub async fn set_num_ports(&mut self, ports: i32, dispatch: Dispatch) -> Result<TaskHandle> {
        let spec = DvPortgroupConfigSpec {
            num_ports: Some(ports),
            ..Default::default()
        };
        self.reconfigure(spec, dispatch).await
    }
}
