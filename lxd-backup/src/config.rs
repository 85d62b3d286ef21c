//! Configuration management for the backup tool.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`LXD_BACKUP_<SECTION>__<KEY>`). Every field has a default, so
//! an empty or missing file yields a usable configuration.

use crate::job::naming::NamingScheme;
use crate::utils::{BackupError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file consulted when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/lxd-backup/config.toml";

const ENV_PREFIX: &str = "LXD_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runtime: RuntimeConfig,
    pub storage: StorageConfig,
    pub backup: BackupConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Container runtime client binary
    pub binary: PathBuf,

    /// Bridges whose DHCP leases are searched for the container's address
    pub bridges: Vec<String>,

    /// Compression passed to `lxc publish` (e.g. "gzip", "zstd", "none")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Object storage client binary
    pub binary: PathBuf,

    /// Configured rclone remote name (without the trailing colon)
    pub remote: String,

    /// Base directory on the remote; archives land in `{path}/{container}`
    pub path: String,

    /// Compare remote object size with the local archive after upload
    pub verify_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Staging directory for exported archives
    pub work_dir: PathBuf,

    /// Artifact naming scheme
    pub naming: NamingScheme,

    /// Write, upload and remove a per-run report file
    pub report: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("lxc"),
            bridges: vec!["lxdbr0".to_string()],
            compression: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("rclone"),
            remote: "backup".to_string(),
            path: "lxd-backups".to_string(),
            verify_upload: true,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/var/lib/lxd-backup"),
            naming: NamingScheme::default(),
            report: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `path` (required to exist) or from
    /// [`DEFAULT_CONFIG_PATH`] if present, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path.to_path_buf()).required(true),
            None => config::File::from(PathBuf::from(DEFAULT_CONFIG_PATH)).required(false),
        };

        let environment = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("runtime.bridges");

        config::Config::builder()
            .add_source(file.format(config::FileFormat::Toml))
            .add_source(environment)
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Remote directory that receives this container's archives.
    pub fn remote_dir(&self, container: &str) -> String {
        let base = self.storage.path.trim_matches('/');
        if base.is_empty() {
            container.to_string()
        } else {
            format!("{}/{}", base, container)
        }
    }
}
