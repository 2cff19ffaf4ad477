use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fetch::CoreVariant;
use crate::release::ReleaseSource;

pub const DEFAULT_INSTALL_DIR: &str = "/usr/bin";

/// Which releases count as "latest".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseChannel {
    #[default]
    Stable,
    Prerelease,
}

impl ReleaseChannel {
    #[must_use]
    pub fn includes_prerelease(self) -> bool {
        matches!(self, Self::Prerelease)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Prerelease => "prerelease",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "stable" | "release" | "master" | "" => Some(Self::Stable),
            "prerelease" | "beta" | "dev" => Some(Self::Prerelease),
            _ => None,
        }
    }
}

impl fmt::Display for ReleaseChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the update workflow reads from the persisted configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    pub source: ReleaseSource,
    pub proxy_url: Option<String>,
    pub install_dir: PathBuf,
    pub target_arch: Option<String>,
    pub channel: ReleaseChannel,
    pub variant: CoreVariant,
    /// Program and arguments used to restart the service after an update.
    /// Empty disables the restart step.
    pub restart_command: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            source: ReleaseSource::default(),
            proxy_url: None,
            install_dir: PathBuf::from(DEFAULT_INSTALL_DIR),
            target_arch: None,
            channel: ReleaseChannel::Stable,
            variant: CoreVariant::Standard,
            restart_command: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write config {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("config {path} is not valid JSON: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("unknown config key '{0}'")]
    UnknownKey(String),
    #[error("invalid value '{value}' for config key '{key}'")]
    InvalidValue { key: String, value: String },
}

/// Persistent key/value configuration the updater reads from and records the
/// install location into.
pub trait ConfigStore: Send + Sync {
    /// # Errors
    /// Returns an error when the backing store cannot be read or parsed.
    fn load(&self) -> Result<UpdaterConfig, ConfigError>;

    /// # Errors
    /// Returns an error when the new location cannot be persisted.
    fn save_install_dir(&self, install_dir: &Path) -> Result<(), ConfigError>;
}
