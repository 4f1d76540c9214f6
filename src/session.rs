use crate::config::{Config, Licenses};
use crate::inventory::Dispatch;
use crate::inventory::datacenter::Datacenter;
use crate::prelude::{Error, Result};
use crate::registry::PendingTasks;
use crate::task::{TaskHandle, WaitPolicy};
use crate::vim::Vim;
use crate::vim::client::VimClient;
use crate::vim::specs::OptionValue;
use crate::vim::types::{EntityKind, MoRef, OptionEntry, ServiceContent};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Setting read by [`Session::reconnect`] to find out whether the session
/// is still alive.
///
const PROBE_SETTING: &str = "instance.id";

/// vCenter advanced setting holding the server's fully qualified name.
///
const FQDN_SETTING: &str = "VirtualCenter.FQDN";

/// License entity of the vShield network security product.
///
const VSHIELD_ENTITY: &str = "vcloud-netsec";

/// Everything a session needs besides the connection itself.
///
#[derive(Debug, Clone, Default)]
pub struct SessionSettings {
    pub licenses: Licenses,
    pub wait: WaitPolicy,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            licenses: config.licenses.clone(),
            wait: WaitPolicy::from(&config.tasks),
        }
    }
}

/// Which products [`Session::assign_licenses`] assigns a license to.
///
#[derive(Debug, Clone, Copy)]
pub struct LicenseTargets {
    pub vcenter: bool,
    pub esx: bool,
    pub vshield: bool,
}

impl Default for LicenseTargets {
    fn default() -> Self {
        Self {
            vcenter: true,
            esx: true,
            vshield: true,
        }
    }
}

/// An authenticated connection to vCenter: the root of the entity façade.
///
/// Cheap to clone; every entity handle keeps a clone to reach the remote
/// and to register the jobs it submits without waiting.
///
#[derive(Clone)]
pub struct Session {
    vim: Arc<dyn Vim + Send + Sync>,
    settings: Arc<SessionSettings>,
    pending: Arc<PendingTasks>,
    content: Arc<OnceCell<ServiceContent>>,
}

impl Session {
    /// Connects and logs in to the vCenter described by the configuration.
    ///
    #[tracing::instrument(level = "debug", target = "session", skip(config), fields(url = %config.vcenter.url))]
    pub async fn connect(config: &Config) -> Result<Self> {
        let client = VimClient::from_env(&config.vcenter);
        client.login().await?;
        Ok(Self::new(Arc::new(client), SessionSettings::from(config)))
    }

    /// Wraps an already authenticated remote.
    ///
    pub fn new(vim: Arc<dyn Vim + Send + Sync>, settings: SessionSettings) -> Self {
        Self {
            vim,
            settings: Arc::new(settings),
            pending: Arc::new(PendingTasks::new()),
            content: Arc::new(OnceCell::new()),
        }
    }

    pub fn vim(&self) -> &Arc<dyn Vim + Send + Sync> {
        &self.vim
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn pending(&self) -> &PendingTasks {
        &self.pending
    }

    /// Root `ServiceContent`, fetched once per session.
    ///
    pub async fn content(&self) -> Result<&ServiceContent> {
        self.content.get_or_try_init(|| self.vim.content()).await
    }

    /// Reads one property of a managed object into `T`.
    ///
    pub async fn property<T>(&self, object: &MoRef, name: &str) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let value = self.vim.property(object, name).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Reads an array property. An unset array reads as empty.
    ///
    pub async fn list<T>(&self, object: &MoRef, name: &str) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        match self.vim.property(object, name).await? {
            Value::Null => Ok(vec![]),
            value => Ok(serde_json::from_value(value)?),
        }
    }

    /// Invokes a synchronous method and returns its raw result.
    ///
    pub async fn invoke(&self, object: &MoRef, method: &str, args: Value) -> Result<Value> {
        tracing::debug!(target: "session", %object, method, "Invoking method");
        self.vim.invoke(object, method, args).await
    }

    /// Invokes a `*_Task` method and wraps the returned job. Does not poll.
    ///
    pub async fn start_task(&self, object: &MoRef, method: &str, args: Value) -> Result<TaskHandle> {
        let job: MoRef = serde_json::from_value(self.invoke(object, method, args).await?)?;
        tracing::debug!(target: "session", %object, method, task = %job.value, "Task submitted");
        Ok(self.handle(job))
    }

    /// Submits a `*_Task` method and waits for it or defers it.
    ///
    pub async fn execute(
        &self,
        object: &MoRef,
        method: &str,
        args: Value,
        dispatch: Dispatch,
    ) -> Result<TaskHandle> {
        let handle = self.start_task(object, method, args).await?;
        self.dispatch(handle, dispatch).await
    }

    /// Applies the wait flag of a façade method to a submitted job.
    ///
    /// `Wait` blocks until the job is terminal, `Defer` registers the job
    /// for [`Session::wait_for_all`] and returns without polling.
    ///
    pub async fn dispatch(&self, handle: TaskHandle, dispatch: Dispatch) -> Result<TaskHandle> {
        match dispatch {
            Dispatch::Wait => {
                handle.wait().await?;
            }
            Dispatch::Defer => self.pending.register(handle.clone()),
        }
        Ok(handle)
    }

    /// Wraps a job reference with the session's wait policy.
    ///
    pub fn handle(&self, job: MoRef) -> TaskHandle {
        TaskHandle::submit(self.vim.clone(), job, self.settings.wait.clone())
    }

    /// Registers a job to be awaited later by [`Session::wait_for_all`].
    ///
    pub fn track(&self, job: MoRef) -> TaskHandle {
        let handle = self.handle(job);
        self.pending.register(handle.clone());
        handle
    }

    /// Waits for the given job.
    ///
    pub async fn wait_for(&self, job: MoRef) -> Result<TaskHandle> {
        self.dispatch(self.handle(job), Dispatch::Wait).await
    }

    /// Waits for every job submitted with `Dispatch::Defer` or
    /// [`Session::track`] and forgets them.
    ///
    pub async fn wait_for_all(&self) -> Result<Vec<TaskHandle>> {
        self.pending.drain_all().await
    }

    // -------------------------------------------------------------------------

    /// All datacenters below the root folder.
    ///
    #[tracing::instrument(level = "trace", target = "session", skip(self))]
    pub async fn datacenters(&self) -> Result<Vec<Datacenter>> {
        let root = self.content().await?.root_folder.clone();
        let mut datacenters = vec![];
        for child in self.list::<MoRef>(&root, "childEntity").await? {
            if child.entity_kind() == EntityKind::Datacenter {
                datacenters.push(Datacenter::load(self.clone(), child).await?);
            }
        }
        Ok(datacenters)
    }

    pub async fn datacenter(&self, name: &str) -> Result<Option<Datacenter>> {
        Ok(self
            .datacenters()
            .await?
            .into_iter()
            .find(|datacenter| datacenter.name() == name))
    }

    /// Creates a datacenter in the root folder, or returns the existing one
    /// of that name.
    ///
    #[tracing::instrument(level = "trace", target = "session", skip(self))]
    pub async fn add_datacenter(&self, name: &str) -> Result<Datacenter> {
        if let Some(datacenter) = self.datacenter(name).await? {
            return Ok(datacenter);
        }

        let root = self.content().await?.root_folder.clone();
        let created = self
            .invoke(&root, "CreateDatacenter", json!({"name": name}))
            .await?;
        tracing::info!(target: "session", name, "Datacenter created");
        Datacenter::load(self.clone(), serde_json::from_value(created)?).await
    }

    // -------------------------------------------------------------------------

    async fn setting_manager(&self) -> Result<MoRef> {
        self.content()
            .await?
            .setting
            .clone()
            .ok_or_else(|| Error::NotSupported("vCenter settings".to_owned()))
    }

    /// Changes a vCenter advanced setting.
    ///
    pub async fn change_setting(&self, key: &str, value: &str) -> Result<()> {
        let manager = self.setting_manager().await?;
        let args = json!({"changedValue": [OptionValue::string(key, value)]});
        self.invoke(&manager, "UpdateOptions", args).await?;
        tracing::info!(target: "session", key, value, "Setting changed");
        Ok(())
    }

    pub async fn change_fqdn(&self, fqdn: &str) -> Result<()> {
        self.change_setting(FQDN_SETTING, fqdn).await
    }

    /// Values of the settings matching `key`. A key ending with a dot
    /// selects a whole subtree.
    ///
    pub async fn setting(&self, key: &str) -> Result<Vec<Value>> {
        let manager = self.setting_manager().await?;
        let entries = match self.invoke(&manager, "QueryOptions", json!({"name": key})).await? {
            Value::Null => vec![],
            entries => serde_json::from_value::<Vec<OptionEntry>>(entries)?,
        };
        Ok(entries.iter().filter_map(OptionEntry::plain_value).collect())
    }

    /// Logs in again if the session no longer works.
    ///
    pub async fn reconnect(&self) -> Result<()> {
        if let Err(error) = self.setting(PROBE_SETTING).await {
            tracing::warn!(target: "session", %error, "Session probe failed, logging in again");
            self.vim.login().await?;
        }
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.vim.logout().await
    }

    // -------------------------------------------------------------------------

    async fn license_manager(&self) -> Result<MoRef> {
        self.content()
            .await?
            .license_manager
            .clone()
            .ok_or_else(|| Error::NotSupported("license management".to_owned()))
    }

    fn license<'a>(product: &str, key: &'a Option<SecretString>) -> Result<&'a str> {
        key.as_ref()
            .map(|key| key.expose_secret())
            .ok_or_else(|| Error::NotFound(format!("{product} license key")))
    }

    /// Adds every configured license key to the license manager.
    ///
    #[tracing::instrument(level = "trace", target = "session", skip(self))]
    pub async fn add_licenses(&self) -> Result<()> {
        let manager = self.license_manager().await?;
        let licenses = &self.settings.licenses;
        for key in [&licenses.vcenter, &licenses.esx, &licenses.vshield]
            .into_iter()
            .flatten()
        {
            self.invoke(&manager, "AddLicense", json!({"licenseKey": key.expose_secret()}))
                .await?;
        }
        Ok(())
    }

    /// Assigns the configured licenses to vCenter itself, to every host of
    /// every datacenter and to vShield.
    ///
    #[tracing::instrument(level = "trace", target = "session", skip(self))]
    pub async fn assign_licenses(&self, targets: LicenseTargets) -> Result<()> {
        let manager: MoRef = self
            .property(&self.license_manager().await?, "licenseAssignmentManager")
            .await?;
        let licenses = &self.settings.licenses;

        if targets.vcenter {
            let key = Self::license("vCenter", &licenses.vcenter)?;
            let instance = self
                .content()
                .await?
                .about
                .instance_uuid
                .clone()
                .ok_or_else(|| Error::NotFound("vCenter instance uuid".to_owned()))?;
            self.assign_license(&manager, &instance, key).await?;
        }
        if targets.esx {
            let key = Self::license("ESX", &licenses.esx)?;
            for datacenter in self.datacenters().await? {
                for host in datacenter.hosts().await? {
                    self.assign_license(&manager, &host.moref().value, key).await?;
                }
            }
        }
        if targets.vshield {
            let key = Self::license("vShield", &licenses.vshield)?;
            self.assign_license(&manager, VSHIELD_ENTITY, key).await?;
        }
        Ok(())
    }

    async fn assign_license(&self, manager: &MoRef, entity: &str, key: &str) -> Result<()> {
        let args = json!({"entity": entity, "licenseKey": key});
        self.invoke(manager, "UpdateAssignedLicense", args).await?;
        tracing::info!(target: "session", entity, "License assigned");
        Ok(())
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("settings", &self.settings)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}
