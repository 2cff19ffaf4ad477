use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable that relocates every updater directory under one root.
pub const HOME_OVERRIDE_ENV: &str = "OPENLIST_UPDATER_HOME";

const APP_DIR_NAME: &str = "openlist-updater";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AppPathsError {
    #[error("Could not determine config directory")]
    ConfigDirUnavailable,
    #[error("Could not determine cache directory")]
    CacheDirUnavailable,
    #[error("Could not determine data directory")]
    DataDirUnavailable,
}

#[derive(Debug, Clone)]
pub struct AppPaths {
    pub config_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl AppPaths {
    /// Build updater paths for the current host.
    ///
    /// `OPENLIST_UPDATER_HOME` wins when set; otherwise the XDG-style base
    /// directories are used.
    ///
    /// # Errors
    /// Returns an error when a required base directory cannot be determined.
    pub fn new() -> Result<Self, AppPathsError> {
        if let Some(root) = std::env::var_os(HOME_OVERRIDE_ENV).filter(|value| !value.is_empty())
        {
            return Ok(Self::rooted_at(Path::new(&root)));
        }

        Ok(Self {
            config_dir: dirs::config_dir()
                .ok_or(AppPathsError::ConfigDirUnavailable)?
                .join(APP_DIR_NAME),
            cache_dir: dirs::cache_dir()
                .ok_or(AppPathsError::CacheDirUnavailable)?
                .join(APP_DIR_NAME),
            data_dir: dirs::data_dir()
                .ok_or(AppPathsError::DataDirUnavailable)?
                .join(APP_DIR_NAME),
        })
    }

    #[must_use]
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            config_dir: root.join("config"),
            cache_dir: root.join("cache"),
            data_dir: root.join("data"),
        }
    }

    #[must_use]
    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join("settings.json")
    }

    /// Fixed location artifacts are downloaded to before installation.
    #[must_use]
    pub fn download_dir(&self) -> PathBuf {
        self.cache_dir.join("downloads")
    }

    #[must_use]
    pub fn log_file(&self) -> PathBuf {
        self.data_dir.join("openlist-updater.log")
    }

    #[must_use]
    pub fn install_lock_file(&self) -> PathBuf {
        self.data_dir.join("install.lock")
    }

    /// Ensure all updater directories exist on disk.
    ///
    /// # Errors
    /// Returns an error if any directory cannot be created.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.cache_dir)?;
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
