//! Update workflow for the OpenList file-listing service.
//!
//! This crate holds the logic that is independent of the command-line front
//! end and of where settings are persisted:
//! - Latest-release resolution with a TTL cache and an HTML fallback.
//! - Host architecture to release asset mapping.
//! - Candidate URL probing and size-checked artifact downloads.
//! - Archive extraction, binary placement and self-test.

mod arch;
mod cache;
mod config;
mod fetch;
pub mod http;
mod install;
mod release;
mod updater;
mod version;

/// Architecture table lookup with a fixed default.
pub use arch::{DEFAULT_ARCH_SUFFIX, is_known_arch, map_arch};
/// Process-local response cache and its clock abstraction.
pub use cache::{CacheEntry, Clock, ManualClock, RELEASE_CACHE_TTL, ResponseCache, SystemClock};
/// Settings the workflow consumes and the store they come from.
pub use config::{ConfigError, ConfigStore, DEFAULT_INSTALL_DIR, ReleaseChannel, UpdaterConfig};
/// Candidate URL construction and artifact download.
pub use fetch::{
    ArtifactFetcher, CoreVariant, FetchError, FetchedArtifact, MIN_ARTIFACT_BYTES, apply_proxy,
    candidate_urls,
};
/// Artifact extraction and binary placement.
pub use install::{ArtifactKind, BINARY_NAME, InstallError, InstallOutcome, Installer, self_test};
/// Release metadata model and resolver.
pub use release::{
    DEFAULT_API_BASE, DEFAULT_HTML_BASE, DEFAULT_REPOSITORY, LATEST_VERSION_KEY, ReleaseInfo,
    ReleaseResolver, ReleaseSource, ResolveError,
};
/// The composed update workflow and its result types.
pub use updater::{
    InstallStatus, OperationResult, UpdateCheck, UpdateFlowError, UpdateReport, Updater,
};
/// Version normalization and comparison helpers.
pub use version::{extract_version, is_newer_version, is_sentinel_version, normalize_version, release_tag};
