//! Client configuration
//!
//! Read from `{user_config_dir}/kotak/config.toml` (or an explicit path),
//! then overridden by `KOTAK_*` environment variables.

use crate::session::SessionOptions;
use crate::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const ENV_API_HOST: &str = "KOTAK_API_HOST";
pub const ENV_API_BASE: &str = "KOTAK_API_BASE";
pub const ENV_REFRESH_INTERVAL: &str = "KOTAK_REFRESH_INTERVAL";
pub const ENV_DATA_DIR: &str = "KOTAK_DATA_DIR";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", "kotak")
}

/// Where the mailbox service lives and how the client behaves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_host: String,
    pub api_base: String,
    /// Seconds between inbox refreshes
    pub refresh_interval_secs: u64,
    /// Directory holding the local database
    pub data_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_host: "http://localhost:8080".to_string(),
            api_base: "/api".to_string(),
            refresh_interval_secs: 30,
            data_dir: None,
        }
    }
}

impl ClientConfig {
    /// Path of the config file when none is given explicitly
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load configuration
    ///
    /// An explicit `path` must exist; the default file is optional.
    /// Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_overrides(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> CoreResult<Self> {
        debug!("Reading config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|e| CoreError::ConfigError(e.to_string()))
    }

    /// Apply `KOTAK_*` overrides from a set of environment variables
    pub fn apply_overrides<I>(&mut self, vars: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                ENV_API_HOST => self.api_host = value,
                ENV_API_BASE => self.api_base = value,
                ENV_REFRESH_INTERVAL => {
                    self.refresh_interval_secs = value.trim().parse().map_err(|_| {
                        CoreError::ConfigError(format!(
                            "{} must be a whole number of seconds, got {:?}",
                            ENV_REFRESH_INTERVAL, value
                        ))
                    })?;
                }
                ENV_DATA_DIR => self.data_dir = Some(PathBuf::from(value)),
                _ => {}
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.api_host.trim().is_empty() {
            return Err(CoreError::ConfigError("api_host must not be empty".into()));
        }
        if self.refresh_interval_secs == 0 {
            return Err(CoreError::ConfigError(
                "refresh_interval_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Mailbox service root: host followed by the API base path
    pub fn base_url(&self) -> String {
        let host = self.api_host.trim_end_matches('/');
        let base = self.api_base.trim_matches('/');
        if base.is_empty() {
            host.to_string()
        } else {
            format!("{}/{}", host, base)
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        match project_dirs() {
            Some(dirs) => dirs.data_dir().to_path_buf(),
            None => PathBuf::from(".kotak"),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("kotak.db")
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            refresh_interval: self.refresh_interval(),
        }
    }
}
