use crate::prelude::Result;
use crate::task::{MissingObjectPolicy, TaskErrorPolicy, WaitPolicy};
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory searched for the yaml layers when `APP_CONFIG_DIR` is unset.
///
const DEFAULT_CONFIG_DIR: &str = "configuration";

/// Represents the client configuration.
///
/// Built once at startup and handed to [`crate::session::Session::connect`];
/// nothing in the library reads configuration from global state.
///
#[derive(Debug, Deserialize)]
pub struct Config {
    pub vcenter: VcenterEnv,
    #[serde(default)]
    pub licenses: Licenses,
    pub tasks: TaskEnv,
}

impl Config {
    /// Loads the configuration from the yaml layers and environment variables.
    ///
    /// A `.env` file is honoured when present. `APP_ENVIRONMENT` selects the
    /// environment layer and `APP_CONFIG_DIR` the directory holding them.
    ///
    pub fn from_env() -> Result<Self> {
        match dotenv::dotenv() {
            Ok(path) => tracing::info!(target: "config", ?path, ".env loaded."),
            Err(error) => tracing::debug!(target: "config", %error, "No .env file used."),
        }

        let config_dir = std::env::var("APP_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));
        let environment = std::env::var("APP_ENVIRONMENT")
            .map(|value| Environment::from(value.as_str()))
            .unwrap_or(Environment::Local);

        Self::load(&config_dir, environment)
    }

    /// Loads `base.yaml`, then the environment specific file, then `APP__`
    /// prefixed environment variables, each layer overriding the previous.
    ///
    pub fn load(config_dir: &Path, environment: Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(config_dir.join("base.yaml")))
            .add_source(config::File::from(config_dir.join(environment.as_filename())).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize::<Config>()?;

        tracing::info!(target: "config", ?environment, ?config, "Configuration loaded.");

        Ok(config)
    }
}

// -----------------------------------------------------------------------------

/// All settings required to reach and authenticate against vCenter.
///
#[derive(Debug, Clone, Deserialize)]
pub struct VcenterEnv {
    pub url: String,
    pub release: String,
    pub username: String,
    pub password: SecretString,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// License keys assigned to vCenter, ESX hosts and vShield.
///
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Licenses {
    pub vcenter: Option<SecretString>,
    pub esx: Option<SecretString>,
    pub vshield: Option<SecretString>,
}

/// Task polling settings.
///
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEnv {
    pub poll_interval_ms: u64,
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub missing_object: MissingObjectPolicy,
    #[serde(default)]
    pub on_error: TaskErrorPolicy,
}

impl From<&TaskEnv> for WaitPolicy {
    fn from(env: &TaskEnv) -> Self {
        Self {
            poll_interval: Duration::from_millis(env.poll_interval_ms),
            timeout: env.timeout_secs.map(Duration::from_secs),
            missing_object: env.missing_object,
            on_error: env.on_error,
        }
    }
}

// -----------------------------------------------------------------------------

/// Represents the different environments the client can run in.
///
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Local,
    Production,
}

impl Environment {
    /// Returns the filename for the environment-specific configuration file.
    ///
    pub fn as_filename(&self) -> &'static str {
        match self {
            Environment::Local => "local.yaml",
            Environment::Production => "production.yaml",
        }
    }
}

impl From<&str> for Environment {
    fn from(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "local" => Self::Local,
            "production" => Self::Production,
            _ => {
                tracing::warn!(target: "config", value, "Incorrect environment format. Use either `local` or `production`.");
                Self::Local
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;

    fn config_dir(name: &str, base: &str, local: Option<&str>) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vcenter-config-{}-{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("base.yaml"), base).unwrap();
        if let Some(local) = local {
            fs::write(dir.join("local.yaml"), local).unwrap();
        }
        dir
    }

    const BASE: &str = r#"
vcenter:
  url: "https://vc.example.com"
  release: "8.0.2.0"
  username: "administrator@vsphere.local"
  password: "secret"
tasks:
  poll_interval_ms: 2000
"#;

    #[test]
    fn environment_from_str() {
        assert_eq!(Environment::from("production"), Environment::Production);
        assert_eq!(Environment::from(" Local "), Environment::Local);
        assert_eq!(Environment::from("staging"), Environment::Local);
    }

    #[test]
    fn load_base_layer_with_defaults() {
        // Arrange
        let dir = config_dir("base", BASE, None);

        // Act
        let config = Config::load(&dir, Environment::Local).unwrap();

        // Assert
        assert_eq!(config.vcenter.url, "https://vc.example.com");
        assert_eq!(config.vcenter.password.expose_secret(), "secret");
        assert!(!config.vcenter.accept_invalid_certs);
        assert!(config.licenses.esx.is_none());

        let policy = WaitPolicy::from(&config.tasks);
        assert_eq!(policy.poll_interval, Duration::from_secs(2));
        assert_eq!(policy.timeout, None);
        assert_eq!(policy.missing_object, MissingObjectPolicy::AssumeSuccess);
        assert_eq!(policy.on_error, TaskErrorPolicy::Report);
    }

    #[test]
    fn environment_layer_overrides_base() {
        // Arrange
        let local = r#"
vcenter:
  accept_invalid_certs: true
licenses:
  esx: "AAAAA-BBBBB-CCCCC-DDDDD-EEEEE"
tasks:
  timeout_secs: 60
  on_error: raise
"#;
        let dir = config_dir("layered", BASE, Some(local));

        // Act
        let config = Config::load(&dir, Environment::Local).unwrap();

        // Assert
        assert!(config.vcenter.accept_invalid_certs);
        assert_eq!(
            config.licenses.esx.unwrap().expose_secret(),
            "AAAAA-BBBBB-CCCCC-DDDDD-EEEEE"
        );
        let policy = WaitPolicy::from(&config.tasks);
        assert_eq!(policy.timeout, Some(Duration::from_secs(60)));
        assert_eq!(policy.on_error, TaskErrorPolicy::Raise);
    }
}
