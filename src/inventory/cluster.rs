use crate::inventory::host::Host;
use crate::inventory::{Dispatch, Submitted, missing_child};
use crate::prelude::Result;
use crate::session::Session;
use crate::task::TaskHandle;
use crate::vim::specs::HostConnectSpec;
use crate::vim::types::MoRef;
use secrecy::ExposeSecret;
use serde_json::{Value, json};

/// A cluster compute resource.
///
#[derive(Debug, Clone)]
pub struct Cluster {
    session: Session,
    moref: MoRef,
    name: String,
    vm_folder: MoRef,
}

impl Cluster {
    /// # Arguments
    ///
    /// * `vm_folder`: VM folder of the datacenter holding the cluster.
    ///
    pub async fn load(session: Session, moref: MoRef, vm_folder: MoRef) -> Result<Self> {
        let name = session.property(&moref, "name").await?;
        Ok(Self {
            session,
            moref,
            name,
            vm_folder,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn update(&mut self) -> Result<()> {
        self.name = self.session.property(&self.moref, "name").await?;
        Ok(())
    }

    pub async fn destroy(self, dispatch: Dispatch) -> Result<TaskHandle> {
        self.session
            .execute(&self.moref, "Destroy_Task", Value::Null, dispatch)
            .await
    }

    /// Adds a host to the cluster.
    ///
    /// Returns the host once added, or the pending job with
    /// `Dispatch::Defer`.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self, spec), fields(cluster = %self.name, host = %spec.host_name))]
    pub async fn add_host(&mut self, spec: HostConnectSpec, dispatch: Dispatch) -> Result<Submitted<Host>> {
        let mut args = json!({"spec": &spec, "asConnected": true});
        if let Some(license) = &self.session.settings().licenses.esx {
            args["license"] = json!(license.expose_secret());
        }
        let handle = self
            .session
            .execute(&self.moref, "AddHost_Task", args, dispatch)
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

    pub async fn hosts(&self) -> Result<Vec<Host>> {
        let mut hosts = vec![];
        for host in self.session.list::<MoRef>(&self.moref, "host").await? {
            hosts.push(Host::load(self.session.clone(), host, self.vm_folder.clone()).await?);
        }
        Ok(hosts)
    }

    pub async fn host(&self, name: &str) -> Result<Option<Host>> {
        Ok(self.hosts().await?.into_iter().find(|host| host.name() == name))
    }
}
