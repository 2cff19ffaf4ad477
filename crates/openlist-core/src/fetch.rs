use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::cache::ResponseCache;
use crate::version::{is_sentinel_version, release_tag};

/// Anything smaller is treated as a failed transfer (an HTML error page saved
/// under the artifact name, a truncated body, ...).
pub const MIN_ARTIFACT_BYTES: u64 = 1000;

const ARTIFACT_URL_KEY: &str = "openlist_artifact_url";

/// Which OpenList build to install.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoreVariant {
    #[default]
    Standard,
    Lite,
}

impl CoreVariant {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Lite => "lite",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "standard" | "full" | "" => Some(Self::Standard),
            "lite" => Some(Self::Lite),
            _ => None,
        }
    }

    fn asset_base(self, arch_suffix: &str) -> String {
        match self {
            Self::Standard => format!("openlist-{arch_suffix}"),
            Self::Lite => format!("openlist-{arch_suffix}-lite"),
        }
    }
}

impl fmt::Display for CoreVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("refusing to download invalid version '{version}'")]
    InvalidVersion { version: String },
    #[error("no download candidate for {tag} ({asset}) was reachable: {details}")]
    Unreachable {
        tag: String,
        asset: String,
        details: String,
    },
    #[error(
        "artifact downloaded from {url} is only {size} bytes (minimum {min})",
        min = MIN_ARTIFACT_BYTES
    )]
    TooSmall { url: String, size: u64 },
    #[error("failed to prepare download directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A downloaded artifact that passed size validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub url: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error("probe failed: {0}")]
    Probe(#[source] reqwest::Error),
    #[error("probe returned HTTP {0}")]
    ProbeStatus(reqwest::StatusCode),
    #[error("download failed: {0}")]
    Download(#[source] reqwest::Error),
    #[error("download returned HTTP {0}")]
    DownloadStatus(reqwest::StatusCode),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("only {0} bytes received")]
    TooSmall(u64),
}

/// Ordered download URLs for one release asset.
///
/// Releases have not always been published under a single naming scheme, so
/// both archive formats are tried under the exact tag and then under
/// `releases/latest`.
#[must_use]
pub fn candidate_urls(
    download_base: &str,
    tag: &str,
    arch_suffix: &str,
    variant: CoreVariant,
) -> Vec<String> {
    let base = download_base.trim_end_matches('/');
    let asset = variant.asset_base(arch_suffix);
    vec![
        format!("{base}/releases/download/{tag}/{asset}.tar.gz"),
        format!("{base}/releases/download/{tag}/{asset}.zip"),
        format!("{base}/releases/latest/download/{asset}.tar.gz"),
        format!("{base}/releases/latest/download/{asset}.zip"),
    ]
}

/// Route a download URL through a prefix-style mirror proxy.
#[must_use]
pub fn apply_proxy(proxy_url: Option<&str>, url: &str) -> String {
    match proxy_url.map(str::trim).filter(|proxy| !proxy.is_empty()) {
        Some(proxy) => format!("{}/{url}", proxy.trim_end_matches('/')),
        None => url.to_string(),
    }
}

fn file_name_from_url(url: &str) -> &str {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty() && !name.contains(".."))
        .unwrap_or("openlist-download")
}

pub struct ArtifactFetcher {
    probe_client: reqwest::Client,
    download_client: reqwest::Client,
    download_base: String,
    proxy_url: Option<String>,
    download_dir: PathBuf,
    cache: Arc<ResponseCache>,
}

impl ArtifactFetcher {
    #[must_use]
    pub fn new(
        probe_client: reqwest::Client,
        download_client: reqwest::Client,
        download_base: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        cache: Arc<ResponseCache>,
    ) -> Self {
        Self {
            probe_client,
            download_client,
            download_base: download_base.into(),
            proxy_url: None,
            download_dir: download_dir.into(),
            cache,
        }
    }

    #[must_use]
    pub fn with_proxy(mut self, proxy_url: Option<String>) -> Self {
        self.proxy_url = proxy_url.filter(|proxy| !proxy.trim().is_empty());
        self
    }

    #[must_use]
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn cache_key(tag: &str, arch_suffix: &str, variant: CoreVariant) -> String {
        format!("{ARTIFACT_URL_KEY}:{tag}:{arch_suffix}:{variant}")
    }

    /// Candidates in the order they will be tried, with the last URL that
    /// worked for this asset moved to the front.
    #[must_use]
    pub fn ordered_candidates(&self, tag: &str, arch_suffix: &str, variant: CoreVariant) -> Vec<String> {
        let mut candidates = candidate_urls(&self.download_base, tag, arch_suffix, variant);
        if let Some(known_good) = self.cache.get(&Self::cache_key(tag, arch_suffix, variant))
            && let Some(index) = candidates.iter().position(|url| *url == known_good)
        {
            let url = candidates.remove(index);
            candidates.insert(0, url);
        }
        candidates
    }

    /// Download the release asset for `version`/`arch_suffix`/`variant`.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidVersion`] for sentinel versions without
    /// touching the network, [`FetchError::TooSmall`] when a transfer
    /// completed but was implausibly small, and [`FetchError::Unreachable`]
    /// when every candidate failed.
    pub async fn fetch(
        &self,
        version: &str,
        arch_suffix: &str,
        variant: CoreVariant,
    ) -> Result<FetchedArtifact, FetchError> {
        if is_sentinel_version(version) {
            return Err(FetchError::InvalidVersion {
                version: version.to_string(),
            });
        }

        let tag = release_tag(version);
        let candidates = self.ordered_candidates(&tag, arch_suffix, variant);

        tokio::fs::create_dir_all(&self.download_dir)
            .await
            .map_err(|source| FetchError::Io {
                path: self.download_dir.display().to_string(),
                source,
            })?;

        let mut failures = Vec::new();
        let mut first_too_small = None;

        for candidate in &candidates {
            let url = apply_proxy(self.proxy_url.as_deref(), candidate);
            let dest = self.download_dir.join(file_name_from_url(candidate));
            info!("Trying download candidate {url}");

            match self.try_candidate(&url, &dest).await {
                Ok((size, sha256)) => {
                    self.cache
                        .put(Self::cache_key(&tag, arch_suffix, variant), candidate.clone());
                    info!("Downloaded {url} ({size} bytes, sha256 {sha256})");
                    return Ok(FetchedArtifact {
                        path: dest,
                        url,
                        size,
                        sha256,
                    });
                }
                Err(error) => {
                    warn!("Download candidate {url} failed: {error}");
                    remove_partial(&dest).await;
                    if let AttemptError::TooSmall(size) = error
                        && first_too_small.is_none()
                    {
                        first_too_small = Some(FetchError::TooSmall {
                            url: url.clone(),
                            size,
                        });
                    }
                    failures.push(format!("{url}: {error}"));
                }
            }
        }

        if let Some(too_small) = first_too_small {
            return Err(too_small);
        }

        Err(FetchError::Unreachable {
            tag,
            asset: variant.asset_base(arch_suffix),
            details: failures.join("; "),
        })
    }

    async fn try_candidate(&self, url: &str, dest: &Path) -> Result<(u64, String), AttemptError> {
        let probe = self
            .probe_client
            .head(url)
            .send()
            .await
            .map_err(AttemptError::Probe)?;
        let status = probe.status();
        if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::FOUND {
            return Err(AttemptError::ProbeStatus(status));
        }
        debug!("Probe for {url} returned {status}");

        let (size, sha256) = self.download_to(url, dest).await?;
        if size < MIN_ARTIFACT_BYTES {
            return Err(AttemptError::TooSmall(size));
        }
        Ok((size, sha256))
    }

    async fn download_to(&self, url: &str, dest: &Path) -> Result<(u64, String), AttemptError> {
        use futures_util::StreamExt;

        let response = self
            .download_client
            .get(url)
            .send()
            .await
            .map_err(AttemptError::Download)?;
        if !response.status().is_success() {
            return Err(AttemptError::DownloadStatus(response.status()));
        }

        let write_error = |source| AttemptError::Write {
            path: dest.display().to_string(),
            source,
        };

        let mut file = tokio::fs::File::create(dest).await.map_err(write_error)?;
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(AttemptError::Download)?;
            file.write_all(&chunk).await.map_err(write_error)?;
            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }
        file.flush().await.map_err(write_error)?;

        Ok((downloaded, format!("{:x}", hasher.finalize())))
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial download {}", path.display()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!("Failed to remove partial download {}: {error}", path.display()),
    }
}
