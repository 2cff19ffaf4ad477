//! End-to-end update flow: resolve, map arch, fetch, install, then restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::arch::{is_known_arch, map_arch};
use crate::cache::ResponseCache;
use crate::config::{ConfigStore, UpdaterConfig};
use crate::fetch::{ArtifactFetcher, FetchError};
use crate::http;
use crate::install::{BINARY_NAME, InstallError, InstallOutcome, Installer, self_test};
use crate::release::{ReleaseInfo, ReleaseResolver, ResolveError};
use crate::version::{is_newer_version, normalize_version, release_tag};

#[derive(Debug, Error)]
pub enum UpdateFlowError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// `{success, message}` result handed back to the host UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl OperationResult {
    #[must_use]
    pub fn ok(message: impl Into<String>, data: impl Serialize) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: serde_json::to_value(data).ok(),
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub installed_version: Option<String>,
    pub latest: ReleaseInfo,
    pub latest_version: String,
    pub update_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateReport {
    pub version: String,
    pub tag: String,
    pub arch_suffix: &'static str,
    pub artifact_url: String,
    pub artifact_size: u64,
    pub artifact_sha256: String,
    pub install: InstallOutcome,
    pub restarted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct InstallStatus {
    pub install_dir: PathBuf,
    pub binary_path: PathBuf,
    pub installed: bool,
    pub installed_version: Option<String>,
    /// Architecture reported by the host.
    pub host_arch: String,
    /// Configured override, when one is set.
    pub target_arch: Option<String>,
    /// Suffix for whichever of the two is in effect.
    pub arch_suffix: &'static str,
    pub arch_recognized: bool,
    pub channel: String,
    pub variant: String,
}

pub struct Updater {
    config: UpdaterConfig,
    host_arch: String,
    resolver: ReleaseResolver,
    fetcher: ArtifactFetcher,
    installer: Installer,
}

impl Updater {
    /// Wire up the resolver, fetcher and installer from a loaded config.
    ///
    /// # Errors
    /// Returns an error when an HTTP client cannot be constructed.
    pub fn new(
        config: UpdaterConfig,
        config_store: Arc<dyn ConfigStore>,
        cache: Arc<ResponseCache>,
        download_dir: PathBuf,
        host_arch: String,
    ) -> Result<Self, UpdateFlowError> {
        let api_client = http::api_client().map_err(UpdateFlowError::Client)?;
        let probe_client = http::probe_client().map_err(UpdateFlowError::Client)?;
        let download_client = http::download_client().map_err(UpdateFlowError::Client)?;

        let resolver = ReleaseResolver::new(api_client, config.source.clone(), cache.clone());
        let fetcher = ArtifactFetcher::new(
            probe_client,
            download_client,
            config.source.download_base(),
            download_dir,
            cache,
        )
        .with_proxy(config.proxy_url.clone());

        Ok(Self {
            config,
            host_arch,
            resolver,
            fetcher,
            installer: Installer::new(config_store),
        })
    }

    #[must_use]
    pub fn config(&self) -> &UpdaterConfig {
        &self.config
    }

    /// The architecture the release asset is chosen for: the configured
    /// override when set, otherwise the detected host architecture.
    #[must_use]
    pub fn effective_arch(&self) -> &str {
        self.config
            .target_arch
            .as_deref()
            .map(str::trim)
            .filter(|arch| !arch.is_empty())
            .unwrap_or(&self.host_arch)
    }

    fn binary_path(&self) -> PathBuf {
        self.config.install_dir.join(BINARY_NAME)
    }

    async fn installed_version(&self) -> Option<String> {
        let binary = self.binary_path();
        if !binary.is_file() {
            return None;
        }
        match self_test(&binary).await {
            Ok(version) => version,
            Err(error) => {
                warn!("{error}");
                None
            }
        }
    }

    pub async fn status(&self) -> InstallStatus {
        let arch = self.effective_arch();
        let binary_path = self.binary_path();
        InstallStatus {
            install_dir: self.config.install_dir.clone(),
            installed: binary_path.is_file(),
            installed_version: self.installed_version().await,
            binary_path,
            host_arch: self.host_arch.clone(),
            target_arch: self
                .config
                .target_arch
                .as_deref()
                .map(str::trim)
                .filter(|arch| !arch.is_empty())
                .map(ToString::to_string),
            arch_suffix: map_arch(arch),
            arch_recognized: is_known_arch(arch),
            channel: self.config.channel.to_string(),
            variant: self.config.variant.to_string(),
        }
    }

    /// Compare the installed binary against the latest release.
    ///
    /// # Errors
    /// Returns an error when the latest release cannot be resolved.
    pub async fn check(&self) -> Result<UpdateCheck, UpdateFlowError> {
        let latest = self
            .resolver
            .resolve_latest(self.config.channel.includes_prerelease())
            .await?;
        let installed_version = self.installed_version().await;
        let latest_version = latest.version().to_string();
        let update_available = installed_version
            .as_deref()
            .is_none_or(|installed| is_newer_version(&latest_version, installed));

        Ok(UpdateCheck {
            installed_version,
            latest,
            latest_version,
            update_available,
        })
    }

    /// Download and install `version`, or the latest release when `None`.
    ///
    /// # Errors
    /// Returns an error when resolution, download or installation fails. The
    /// service restart is best-effort and never fails the update.
    pub async fn update(&self, version: Option<&str>) -> Result<UpdateReport, UpdateFlowError> {
        let tag = match version.map(str::trim).filter(|v| !v.is_empty()) {
            Some(requested) => requested.to_string(),
            None => {
                self.resolver
                    .resolve_latest(self.config.channel.includes_prerelease())
                    .await?
                    .tag
            }
        };

        let arch = self.effective_arch();
        let arch_suffix = map_arch(arch);
        if !is_known_arch(arch) {
            warn!("Unrecognized architecture '{arch}', falling back to {arch_suffix}");
        }
        info!(
            "Updating OpenList to {tag} for {arch} ({arch_suffix}, {} build)",
            self.config.variant
        );

        let artifact = self
            .fetcher
            .fetch(&tag, arch_suffix, self.config.variant)
            .await?;
        let install = self
            .installer
            .install(&artifact.path, &self.config.install_dir)
            .await;
        discard_download(&artifact.path);
        let install = install?;

        let restarted = restart_service(&self.config.restart_command).await;

        Ok(UpdateReport {
            version: normalize_version(&tag).to_string(),
            tag: release_tag(&tag),
            arch_suffix,
            artifact_url: artifact.url,
            artifact_size: artifact.size,
            artifact_sha256: artifact.sha256,
            install,
            restarted,
        })
    }

    /// Install a locally supplied artifact into the configured directory.
    ///
    /// # Errors
    /// Returns an error when the artifact cannot be installed.
    pub async fn install_local(&self, artifact: &Path) -> Result<InstallOutcome, UpdateFlowError> {
        let outcome = self
            .installer
            .install(artifact, &self.config.install_dir)
            .await?;
        restart_service(&self.config.restart_command).await;
        Ok(outcome)
    }
}

fn discard_download(path: &Path) {
    if let Err(error) = std::fs::remove_file(path)
        && error.kind() != std::io::ErrorKind::NotFound
    {
        warn!("Failed to remove downloaded artifact {}: {error}", path.display());
    }
}

/// Run the configured restart command. Returns whether it succeeded.
async fn restart_service(command: &[String]) -> bool {
    let Some((program, args)) = command.split_first() else {
        return false;
    };

    info!("Restarting service: {}", command.join(" "));
    match tokio::process::Command::new(program).args(args).status().await {
        Ok(status) if status.success() => true,
        Ok(status) => {
            warn!("Service restart exited with {status}");
            false
        }
        Err(error) => {
            warn!("Failed to run service restart: {error}");
            false
        }
    }
}
