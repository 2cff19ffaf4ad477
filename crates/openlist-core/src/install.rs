use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigStore;
use crate::version::extract_version;

pub const BINARY_NAME: &str = "openlist";

const STAGING_DIR_NAME: &str = ".openlist-staging";
const SELF_TEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("artifact not found at {path}")]
    NotFound { path: String },
    #[error("failed to extract {artifact}: {details}")]
    ExtractFailed { artifact: String, details: String },
    #[error("self-test of {binary} failed: {details}")]
    VerifyFailed { binary: String, details: String },
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl InstallError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.display().to_string(),
            source,
        }
    }

    fn extract(artifact: &Path, details: impl Into<String>) -> Self {
        Self::ExtractFailed {
            artifact: artifact.display().to_string(),
            details: details.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    TarGz,
    Zip,
    Binary,
}

impl ArtifactKind {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Self::TarGz
        } else if name.ends_with(".zip") {
            Self::Zip
        } else {
            Self::Binary
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub binary_path: PathBuf,
    /// Version the binary printed during the self-test, when it printed one.
    pub reported_version: Option<String>,
    /// Non-fatal problems: a failed self-test or an install location that
    /// could not be recorded.
    pub warnings: Vec<String>,
}

pub struct Installer {
    config_store: Arc<dyn ConfigStore>,
}

impl Installer {
    #[must_use]
    pub fn new(config_store: Arc<dyn ConfigStore>) -> Self {
        Self { config_store }
    }

    /// Place the binary contained in (or consisting of) `artifact` at
    /// `install_dir/openlist`.
    ///
    /// Re-running with the same inputs overwrites the previous binary.
    ///
    /// # Errors
    /// Returns [`InstallError::NotFound`] when the artifact is missing,
    /// [`InstallError::ExtractFailed`] when the archive cannot be unpacked or
    /// does not contain `openlist`, and [`InstallError::Io`] when the install
    /// directory cannot be prepared. A failing self-test is only a warning.
    pub async fn install(
        &self,
        artifact: &Path,
        install_dir: &Path,
    ) -> Result<InstallOutcome, InstallError> {
        if !artifact.is_file() {
            return Err(InstallError::NotFound {
                path: artifact.display().to_string(),
            });
        }

        std::fs::create_dir_all(install_dir).map_err(|error| {
            InstallError::io("failed to create install directory", install_dir, error)
        })?;

        let kind = ArtifactKind::from_path(artifact);
        info!(
            "Installing {} ({kind:?}) into {}",
            artifact.display(),
            install_dir.display()
        );

        let binary_path = install_dir.join(BINARY_NAME);
        match kind {
            ArtifactKind::TarGz | ArtifactKind::Zip => {
                let staging = install_dir.join(STAGING_DIR_NAME);
                let result = unpack_and_promote(artifact, kind, &staging, install_dir);
                if let Err(error) = std::fs::remove_dir_all(&staging)
                    && error.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("Failed to remove staging dir {}: {error}", staging.display());
                }
                result?;
            }
            ArtifactKind::Binary => replace_file_from(artifact, &binary_path, true)
                .map_err(|error| InstallError::extract(artifact, error.to_string()))?,
        }

        if !binary_path.is_file() {
            return Err(InstallError::extract(
                artifact,
                format!("no '{BINARY_NAME}' binary at {}", binary_path.display()),
            ));
        }

        set_executable(&binary_path)?;

        let mut warnings = Vec::new();
        let reported_version = match self_test(&binary_path).await {
            Ok(version) => version,
            Err(error) => {
                warn!("{error}");
                warnings.push(error.to_string());
                None
            }
        };

        if let Err(error) = self.config_store.save_install_dir(install_dir) {
            warn!("Installed binary but failed to record install location: {error}");
            warnings.push(error.to_string());
        }

        info!("Installed {}", binary_path.display());
        Ok(InstallOutcome {
            binary_path,
            reported_version,
            warnings,
        })
    }
}

/// Unpack an archive into `staging` and move its top-level files into
/// `install_dir`, replacing existing ones.
fn unpack_and_promote(
    artifact: &Path,
    kind: ArtifactKind,
    staging: &Path,
    install_dir: &Path,
) -> Result<(), InstallError> {
    if staging.exists() {
        std::fs::remove_dir_all(staging)
            .map_err(|error| InstallError::io("failed to clear staging directory", staging, error))?;
    }
    std::fs::create_dir_all(staging)
        .map_err(|error| InstallError::io("failed to create staging directory", staging, error))?;

    match kind {
        ArtifactKind::TarGz => extract_tar_gz(artifact, staging),
        ArtifactKind::Zip => extract_zip(artifact, staging),
        ArtifactKind::Binary => Ok(()),
    }
    .map_err(|details| InstallError::extract(artifact, details))?;

    if !staging.join(BINARY_NAME).is_file() {
        return Err(InstallError::extract(
            artifact,
            format!("archive does not contain '{BINARY_NAME}' at its top level"),
        ));
    }

    let entries = std::fs::read_dir(staging)
        .map_err(|error| InstallError::io("failed to read staging directory", staging, error))?;
    for entry in entries {
        let entry = entry
            .map_err(|error| InstallError::io("failed to read staging entry", staging, error))?;
        let source = entry.path();
        if !source.is_file() {
            debug!("Leaving non-file archive entry {} behind", source.display());
            continue;
        }
        let target = install_dir.join(entry.file_name());
        replace_file_from(&source, &target, false)
            .map_err(|error| InstallError::io("failed to move extracted file to", &target, error))?;
    }
    Ok(())
}

/// Swap `target` for the contents of `source` via a rename, so a running
/// binary at `target` keeps its old inode instead of failing with "text file
/// busy".
fn replace_file_from(source: &Path, target: &Path, copy: bool) -> std::io::Result<()> {
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| BINARY_NAME.to_string());
    let temp = target.with_file_name(format!(".{file_name}.{}.new", std::process::id()));

    let staged = if copy {
        std::fs::copy(source, &temp).map(|_| ())
    } else {
        std::fs::rename(source, &temp).or_else(|_| std::fs::copy(source, &temp).map(|_| ()))
    };
    if let Err(error) = staged.and_then(|()| std::fs::rename(&temp, target)) {
        let _ = std::fs::remove_file(&temp);
        return Err(error);
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), String> {
    let file = std::fs::File::open(archive_path)
        .map_err(|error| format!("failed to open archive: {error}"))?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    let entries = archive
        .entries()
        .map_err(|error| format!("failed to read tar entries: {error}"))?;
    for entry in entries {
        let mut entry = entry.map_err(|error| format!("failed to read tar entry: {error}"))?;
        let path = entry
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        match entry.unpack_in(dest) {
            Ok(true) => {}
            Ok(false) => warn!("Skipping tar entry with unsafe path: {path}"),
            Err(error) => return Err(format!("failed to extract {path}: {error}")),
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

fn extract_zip(zip_path: &Path, dest: &Path) -> Result<(), String> {
    let file =
        std::fs::File::open(zip_path).map_err(|error| format!("failed to open archive: {error}"))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|error| format!("failed to read zip archive: {error}"))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|error| format!("failed to read zip entry: {error}"))?;
        let Some(name) = entry.enclosed_name() else {
            warn!("Skipping zip entry with unsafe path");
            continue;
        };
        let out_path = dest.join(name);

        if entry.is_dir() {
            std::fs::create_dir_all(&out_path)
                .map_err(|error| format!("failed to create {}: {error}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
        }
        let mut outfile = std::fs::File::create(&out_path)
            .map_err(|error| format!("failed to create {}: {error}", out_path.display()))?;
        std::io::copy(&mut entry, &mut outfile)
            .map_err(|error| format!("failed to extract {}: {error}", out_path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                let _ = std::fs::set_permissions(&out_path, std::fs::Permissions::from_mode(mode));
            }
        }
    }

    debug!("Extraction complete to {}", dest.display());
    Ok(())
}

fn set_executable(path: &Path) -> Result<(), InstallError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
            .map_err(|error| InstallError::io("failed to mark executable", path, error))?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Run `<binary> --version` and return the version it reports.
///
/// # Errors
/// Returns [`InstallError::VerifyFailed`] when the binary cannot be spawned,
/// times out, or exits non-zero.
pub async fn self_test(binary: &Path) -> Result<Option<String>, InstallError> {
    let verify_failed = |details: String| InstallError::VerifyFailed {
        binary: binary.display().to_string(),
        details,
    };

    let run = move || async move {
        tokio::time::timeout(
            SELF_TEST_TIMEOUT,
            tokio::process::Command::new(binary)
                .arg("--version")
                .kill_on_drop(true)
                .output(),
        )
        .await
    };

    let mut result = run().await;
    // A freshly written executable can briefly report ETXTBSY while another
    // process still holds an inherited write handle.
    if let Ok(Err(error)) = &result
        && error.kind() == std::io::ErrorKind::ExecutableFileBusy
    {
        tokio::time::sleep(Duration::from_millis(200)).await;
        result = run().await;
    }

    let output = result
        .map_err(|_| verify_failed(format!("timed out after {}s", SELF_TEST_TIMEOUT.as_secs())))?
        .map_err(|error| verify_failed(error.to_string()))?;

    if !output.status.success() {
        return Err(verify_failed(format!("exited with {}", output.status)));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let version = extract_version(&stdout).or_else(|| extract_version(&stderr));
    debug!("Self-test of {} reported {version:?}", binary.display());
    Ok(version)
}
