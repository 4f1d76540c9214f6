use crate::inventory::Dispatch;
use crate::prelude::Result;
use crate::session::Session;
use crate::vim::specs::HostDatastoreBrowserSearchSpec;
use crate::vim::types::{MoRef, SearchResults};
use serde_json::{Value, json};

/// A datastore as seen from one host.
///
#[derive(Debug, Clone)]
pub struct Datastore {
    session: Session,
    moref: MoRef,
    datastore_system: MoRef,
    name: String,
    browser: MoRef,
}

impl Datastore {
    /// # Arguments
    ///
    /// * `datastore_system`: Datastore system of the host the datastore was
    ///   found on. Removal goes through it.
    ///
    pub async fn load(session: Session, moref: MoRef, datastore_system: MoRef) -> Result<Self> {
        let name = session.property(&moref, "name").await?;
        let browser = session.property(&moref, "browser").await?;

        Ok(Self {
            session,
            moref,
            datastore_system,
            name,
            browser,
        })
    }

    pub fn moref(&self) -> &MoRef {
        &self.moref
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn update(&mut self) -> Result<()> {
        *self = Self::load(
            self.session.clone(),
            self.moref.clone(),
            self.datastore_system.clone(),
        )
        .await?;
        Ok(())
    }

    /// Searches the datastore for files matching `pattern` and returns their
    /// datastore paths, e.g. `[datastore1] web-01`.
    ///
    /// Always waits for the search job; the paths are read from its result.
    ///
    /// # Arguments
    ///
    /// * `pattern`: File name pattern, wildcards allowed.
    /// * `folder`: Folder to search in, the datastore root when `None` or
    ///   empty.
    /// * `refresh`: Refresh the datastore before searching.
    ///
    #[tracing::instrument(level = "trace", target = "inventory", skip(self), fields(datastore = %self.name))]
    pub async fn search(&self, pattern: &str, folder: Option<&str>, refresh: bool) -> Result<Vec<String>> {
        if refresh {
            self.refresh().await?;
        }

        let folder = folder.filter(|folder| !folder.is_empty());
        let spec = HostDatastoreBrowserSearchSpec {
            match_pattern: vec![pattern.to_owned()],
        };
        let datastore_path = format!("[{}]{}", self.name, folder.unwrap_or_default());
        let args = json!({"datastorePath": datastore_path, "searchSpec": spec});
        let handle = self
            .session
            .execute(&self.browser, "SearchDatastore_Task", args, Dispatch::Wait)
            .await?;

        let Some(result) = handle.result() else {
            return Ok(vec![]);
        };
        let results: SearchResults = serde_json::from_value(result)?;
        let separator = match folder {
            Some(_) => "",
            None => " ",
        };

        Ok(results
            .file
            .iter()
            .map(|file| format!("{}{}{}", results.folder_path, separator, file.path))
            .collect())
    }

    /// Makes the server rescan the datastore's files and capacity.
    ///
    pub async fn refresh(&self) -> Result<()> {
        self.session
            .invoke(&self.moref, "RefreshDatastore", Value::Null)
            .await?;
        self.session
            .invoke(&self.moref, "RefreshDatastoreStorageInfo", Value::Null)
            .await?;
        Ok(())
    }

    /// Unmounts the datastore from its host.
    ///
    pub async fn remove(self) -> Result<()> {
        self.session
            .invoke(&self.datastore_system, "RemoveDatastore", json!({"datastore": &self.moref}))
            .await?;
        tracing::info!(target: "inventory", datastore = %self.name, "Datastore removed");
        Ok(())
    }
}
