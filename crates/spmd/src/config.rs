//! spm.toml configuration for the daemon.
//!
//! ```toml
//! data_dir = "/var/lib/spm"
//! api_addr = "127.0.0.1:7070"
//!
//! [health_check]
//! interval = "10s"
//! timeout = "5s"
//! max_consecutive_failures = 3
//! base_backoff_interval = "10s"
//! max_backoff_interval = "5m"
//! ```
//!
//! Every key is optional. `HEALTH_CHECK_*` environment variables override
//! the `[health_check]` table.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use spm_health::HealthCheckConfig;

const DB_FILE: &str = "providers.redb";
const DEFAULT_API_PORT: u16 = 7070;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory holding the provider database.
    pub data_dir: PathBuf,
    /// Listen address of the control API.
    pub api_addr: SocketAddr,
    pub health_check: HealthCheckConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/spm"),
            api_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_API_PORT)),
            health_check: HealthCheckConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load the optional config file, then apply the process environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    pub fn load_with_env<F>(path: Option<&Path>, lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.health_check.apply_env(lookup)?;
        config.health_check.validate()?;
        Ok(config)
    }

    /// Path of the redb provider database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE)
    }

    /// Base URL clients use to reach the control API.
    pub fn api_url(&self) -> String {
        format!("http://{}", self.api_addr)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
