use std::io::Write;
use std::path::{Path, PathBuf};

use openlist_core::{
    ConfigError, ConfigStore, CoreVariant, DEFAULT_API_BASE, DEFAULT_HTML_BASE,
    DEFAULT_INSTALL_DIR, DEFAULT_REPOSITORY, ReleaseChannel, ReleaseSource, UpdaterConfig,
};
use serde::{Deserialize, Serialize};

/// Persisted updater settings, one JSON document per host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub proxy_url: Option<String>,

    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    #[serde(default)]
    pub target_arch: Option<String>,

    #[serde(default)]
    pub release_branch: ReleaseChannel,

    #[serde(default)]
    pub core_type: CoreVariant,

    #[serde(default = "default_repository")]
    pub repository: String,

    #[serde(default = "default_api_base")]
    pub api_base: String,

    #[serde(default = "default_html_base")]
    pub html_base: String,

    #[serde(default = "default_restart_command")]
    pub restart_command: Vec<String>,

    #[serde(default)]
    pub debug_logging: bool,

    #[serde(default = "default_max_log_size_bytes")]
    pub max_log_size_bytes: u64,
}

fn default_install_dir() -> PathBuf {
    PathBuf::from(DEFAULT_INSTALL_DIR)
}

fn default_repository() -> String {
    DEFAULT_REPOSITORY.to_string()
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_html_base() -> String {
    DEFAULT_HTML_BASE.to_string()
}

fn default_restart_command() -> Vec<String> {
    vec!["/etc/init.d/openlist".to_string(), "restart".to_string()]
}

fn default_max_log_size_bytes() -> u64 {
    1024 * 1024
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            proxy_url: None,
            auth_token: None,
            install_dir: default_install_dir(),
            target_arch: None,
            release_branch: ReleaseChannel::Stable,
            core_type: CoreVariant::Standard,
            repository: default_repository(),
            api_base: default_api_base(),
            html_base: default_html_base(),
            restart_command: default_restart_command(),
            debug_logging: false,
            max_log_size_bytes: default_max_log_size_bytes(),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

impl Settings {
    pub const KEYS: &'static [&'static str] = &[
        "proxy_url",
        "auth_token",
        "install_dir",
        "target_arch",
        "release_branch",
        "core_type",
        "repository",
        "api_base",
        "html_base",
        "restart_command",
        "debug_logging",
        "max_log_size_bytes",
    ];

    /// Update one setting from its string form. Empty strings clear optional
    /// values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            "proxy_url" => self.proxy_url = non_empty(value),
            "auth_token" => self.auth_token = non_empty(value),
            "install_dir" => self.install_dir = non_empty(value).map(PathBuf::from).ok_or_else(invalid)?,
            "target_arch" => self.target_arch = non_empty(value),
            "release_branch" => self.release_branch = ReleaseChannel::from_name(value).ok_or_else(invalid)?,
            "core_type" => self.core_type = CoreVariant::from_name(value).ok_or_else(invalid)?,
            "repository" => {
                self.repository = non_empty(value)
                    .filter(|repo| repo.split('/').filter(|part| !part.is_empty()).count() == 2)
                    .ok_or_else(invalid)?;
            }
            "api_base" => self.api_base = non_empty(value).ok_or_else(invalid)?,
            "html_base" => self.html_base = non_empty(value).ok_or_else(invalid)?,
            "restart_command" => {
                self.restart_command = value.split_whitespace().map(ToString::to_string).collect();
            }
            "debug_logging" => {
                self.debug_logging = match value.trim().to_ascii_lowercase().as_str() {
                    "1" | "true" | "yes" | "on" => true,
                    "0" | "false" | "no" | "off" | "" => false,
                    _ => return Err(invalid()),
                };
            }
            "max_log_size_bytes" => {
                self.max_log_size_bytes = value.trim().parse().map_err(|_| invalid())?;
            }
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Copy safe to print: the auth token is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.auth_token.is_some() {
            copy.auth_token = Some("********".to_string());
        }
        copy
    }

    #[must_use]
    pub fn to_updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            source: ReleaseSource {
                repository: self.repository.clone(),
                api_base: self.api_base.clone(),
                html_base: self.html_base.clone(),
                auth_token: self.auth_token.clone(),
            },
            proxy_url: self.proxy_url.clone(),
            install_dir: self.install_dir.clone(),
            target_arch: self.target_arch.clone(),
            channel: self.release_branch,
            variant: self.core_type,
            restart_command: self.restart_command.clone(),
        }
    }
}

/// [`ConfigStore`] backed by a JSON file.
#[derive(Debug, Clone)]
pub struct SettingsFile {
    path: PathBuf,
}

impl SettingsFile {
    #[must_use]
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings; a missing file yields defaults.
    pub fn read(&self) -> Result<Settings, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Settings::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.display().to_string(),
                    source,
                });
            }
        };

        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: self.path.display().to_string(),
            source,
        })
    }

    pub fn write(&self, settings: &Settings) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::Write {
            path: self.path.display().to_string(),
            source,
        };
        let data = serde_json::to_vec_pretty(settings)
            .map_err(|error| write_error(std::io::Error::other(error)))?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        write_atomic(&self.path, &data).map_err(write_error)
    }
}

impl ConfigStore for SettingsFile {
    fn load(&self) -> Result<UpdaterConfig, ConfigError> {
        self.read().map(|settings| settings.to_updater_config())
    }

    fn save_install_dir(&self, install_dir: &Path) -> Result<(), ConfigError> {
        let mut settings = self.read()?;
        if settings.install_dir == install_dir {
            return Ok(());
        }
        settings.install_dir = install_dir.to_path_buf();
        self.write(&settings)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "settings path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("settings");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique settings temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}
