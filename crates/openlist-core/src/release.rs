use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::ResponseCache;
use crate::http::response_snippet;
use crate::version::normalize_version;

pub const DEFAULT_REPOSITORY: &str = "OpenListTeam/OpenList";
pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_HTML_BASE: &str = "https://github.com";

/// Cache namespace for "latest release" lookups.
pub const LATEST_VERSION_KEY: &str = "openlist_latest_version";

const RELEASES_PER_PAGE: &str = "10";

static TAG_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"/releases/tag/([^"'<>\s?#/]+)"#).expect("tag link pattern is valid")
});

/// Where release metadata comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseSource {
    pub repository: String,
    pub api_base: String,
    pub html_base: String,
    pub auth_token: Option<String>,
}

impl Default for ReleaseSource {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            html_base: DEFAULT_HTML_BASE.to_string(),
            auth_token: None,
        }
    }
}

impl ReleaseSource {
    #[must_use]
    pub fn releases_api_url(&self) -> String {
        format!(
            "{}/repos/{}/releases",
            self.api_base.trim_end_matches('/'),
            self.repository
        )
    }

    #[must_use]
    pub fn releases_page_url(&self) -> String {
        format!("{}/releases", self.download_base())
    }

    /// Base that `releases/download/...` asset paths hang off.
    #[must_use]
    pub fn download_base(&self) -> String {
        format!(
            "{}/{}",
            self.html_base.trim_end_matches('/'),
            self.repository
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub tag: String,
    pub display_name: String,
    pub published_at: Option<DateTime<Utc>>,
    pub prerelease: bool,
    pub draft: bool,
}

impl ReleaseInfo {
    /// Minimal release synthesized from a bare tag, e.g. one scraped from HTML.
    #[must_use]
    pub fn from_tag(tag: &str) -> Self {
        Self {
            tag: tag.to_string(),
            display_name: tag.to_string(),
            published_at: None,
            prerelease: false,
            draft: false,
        }
    }

    /// Version with any leading `v` stripped. Use [`ReleaseInfo::tag`] for URLs.
    #[must_use]
    pub fn version(&self) -> &str {
        normalize_version(&self.tag)
    }

    #[must_use]
    pub fn published_display(&self) -> String {
        self.published_at
            .map_or_else(|| "unknown".to_string(), |at| at.to_rfc3339())
    }

    #[must_use]
    pub fn is_selectable(&self, include_prerelease: bool) -> bool {
        !self.draft && (include_prerelease || !self.prerelease)
    }

    fn to_cache_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.tag.clone())
    }

    /// Decode a cached payload: either a serialized release or a bare tag.
    fn from_cache_payload(payload: &str) -> Option<Self> {
        if let Ok(release) = serde_json::from_str::<Self>(payload) {
            return Some(release);
        }
        let tag = payload.trim();
        if tag.is_empty() || tag.contains(char::is_whitespace) {
            None
        } else {
            Some(Self::from_tag(tag))
        }
    }
}

impl fmt::Display for ReleaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (published {})", self.tag, self.published_display())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GitHubReleaseEntry {
    tag_name: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    draft: bool,
}

impl From<GitHubReleaseEntry> for ReleaseInfo {
    fn from(entry: GitHubReleaseEntry) -> Self {
        let display_name = entry
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| entry.tag_name.clone());
        Self {
            tag: entry.tag_name,
            display_name,
            published_at: entry.published_at,
            prerelease: entry.prerelease,
            draft: entry.draft,
        }
    }
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no published release found for {repository}")]
    NotFound { repository: String },
    #[error("failed to reach release sources for {repository}: {details}")]
    NetworkFailure { repository: String, details: String },
}

#[derive(Debug, Error)]
enum ListingError {
    #[error("request failed: {0}")]
    Request(#[source] reqwest::Error),
    #[error("HTTP {status}{body_snippet}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body_snippet: String,
    },
    #[error("failed to parse response: {0}")]
    Parse(#[source] reqwest::Error),
}

/// First release in listing order that is not a draft and, unless asked for,
/// not a pre-release.
fn select_release(
    entries: impl IntoIterator<Item = ReleaseInfo>,
    include_prerelease: bool,
) -> Option<ReleaseInfo> {
    entries
        .into_iter()
        .find(|release| release.is_selectable(include_prerelease))
}

/// First `/releases/tag/<TAG>` link on a releases HTML page.
fn scrape_first_tag(html: &str) -> Option<String> {
    TAG_LINK
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|tag| tag.as_str().to_string())
}

pub struct ReleaseResolver {
    client: reqwest::Client,
    source: ReleaseSource,
    cache: Arc<ResponseCache>,
}

impl ReleaseResolver {
    #[must_use]
    pub fn new(client: reqwest::Client, source: ReleaseSource, cache: Arc<ResponseCache>) -> Self {
        Self {
            client,
            source,
            cache,
        }
    }

    #[must_use]
    pub fn source(&self) -> &ReleaseSource {
        &self.source
    }

    /// Cache key for a "latest release" lookup against this source.
    #[must_use]
    pub fn cache_key(&self, include_prerelease: bool) -> String {
        let fingerprint = ResponseCache::fingerprint(
            &self.source.releases_api_url(),
            &[
                ("per_page", RELEASES_PER_PAGE),
                ("include_prerelease", if include_prerelease { "true" } else { "false" }),
            ],
        );
        format!("{LATEST_VERSION_KEY}:{fingerprint}")
    }

    /// Resolve the newest release, consulting the cache first.
    ///
    /// The structured API is tried first; the human-facing releases page is
    /// scraped only when the API fails or lists nothing selectable.
    ///
    /// # Errors
    /// Returns [`ResolveError::NetworkFailure`] when a source could not be
    /// reached and no release was found, and [`ResolveError::NotFound`] when
    /// both sources answered but neither yielded a release.
    pub async fn resolve_latest(
        &self,
        include_prerelease: bool,
    ) -> Result<ReleaseInfo, ResolveError> {
        let key = self.cache_key(include_prerelease);
        if let Some(payload) = self.cache.get(&key) {
            if let Some(release) = ReleaseInfo::from_cache_payload(&payload) {
                info!("Release cache hit for {}: {}", self.source.repository, release.tag);
                return Ok(release);
            }
            warn!("Ignoring unreadable cached release payload for {key}");
        }

        let mut failures = Vec::new();

        info!("Resolving latest release from {}", self.source.releases_api_url());
        match self.fetch_listing().await {
            Ok(entries) => {
                debug!("Release listing returned {} entries", entries.len());
                if let Some(release) = select_release(entries, include_prerelease) {
                    return Ok(self.remember(&key, release));
                }
                info!("Release listing had no selectable release, scraping releases page");
            }
            Err(error) => {
                warn!("Release API request failed: {error}");
                failures.push(format!("api: {error}"));
            }
        }

        match self.scrape_releases_page().await {
            Ok(Some(tag)) => {
                info!("Scraped release tag {tag} from releases page");
                return Ok(self.remember(&key, ReleaseInfo::from_tag(&tag)));
            }
            Ok(None) => debug!("Releases page contained no tag links"),
            Err(error) => {
                warn!("Releases page request failed: {error}");
                failures.push(format!("releases page: {error}"));
            }
        }

        let repository = self.source.repository.clone();
        if failures.is_empty() {
            Err(ResolveError::NotFound { repository })
        } else {
            Err(ResolveError::NetworkFailure {
                repository,
                details: failures.join("; "),
            })
        }
    }

    fn remember(&self, key: &str, release: ReleaseInfo) -> ReleaseInfo {
        self.cache.put(key, release.to_cache_payload());
        info!("Resolved latest release {release}");
        release
    }

    async fn fetch_listing(&self) -> Result<Vec<ReleaseInfo>, ListingError> {
        let mut request = self
            .client
            .get(format!(
                "{}?per_page={RELEASES_PER_PAGE}",
                self.source.releases_api_url()
            ))
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = self.source.auth_token.as_deref().filter(|t| !t.is_empty()) {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(ListingError::Request)?;
        if !response.status().is_success() {
            let status = response.status();
            let body_snippet = response
                .text()
                .await
                .ok()
                .map(|body| response_snippet(&body, 160))
                .unwrap_or_default();
            return Err(ListingError::HttpStatus {
                status,
                body_snippet,
            });
        }

        let entries: Vec<GitHubReleaseEntry> =
            response.json().await.map_err(ListingError::Parse)?;
        Ok(entries.into_iter().map(ReleaseInfo::from).collect())
    }

    async fn scrape_releases_page(&self) -> Result<Option<String>, ListingError> {
        let response = self
            .client
            .get(self.source.releases_page_url())
            .header(reqwest::header::ACCEPT, "text/html")
            .send()
            .await
            .map_err(ListingError::Request)?;
        if !response.status().is_success() {
            return Err(ListingError::HttpStatus {
                status: response.status(),
                body_snippet: String::new(),
            });
        }

        let html = response.text().await.map_err(ListingError::Parse)?;
        Ok(scrape_first_tag(&html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tag: &str, prerelease: bool, draft: bool) -> ReleaseInfo {
        ReleaseInfo {
            tag: tag.to_string(),
            display_name: tag.to_string(),
            published_at: None,
            prerelease,
            draft,
        }
    }

    #[test]
    fn select_release_skips_drafts_and_prereleases() {
        let listing = vec![
            entry("v4.3.0", false, true),
            entry("v4.3.0-rc.1", true, false),
            entry("v4.2.0", false, false),
        ];

        let stable = select_release(listing.clone(), false).expect("stable release");
        assert_eq!(stable.tag, "v4.2.0");

        let any = select_release(listing, true).expect("pre-release allowed");
        assert_eq!(any.tag, "v4.3.0-rc.1");
    }

    #[test]
    fn select_release_never_returns_drafts() {
        let listing = vec![entry("v5.0.0", true, true), entry("v4.9.0", false, true)];
        assert!(select_release(listing.clone(), true).is_none());
        assert!(select_release(listing, false).is_none());
    }

    #[test]
    fn github_entry_maps_to_release_info() {
        let json = r#"[{
            "tag_name": "v4.2.0",
            "name": "",
            "published_at": "2025-06-01T10:00:00Z",
            "prerelease": false,
            "draft": false,
            "assets": [{"name": "openlist-linux-musl-amd64.tar.gz", "uploader": {"login": "bot"}}]
        }]"#;
        let entries: Vec<GitHubReleaseEntry> =
            serde_json::from_str(json).expect("listing should parse");
        let release = ReleaseInfo::from(entries[0].clone());

        assert_eq!(release.tag, "v4.2.0");
        assert_eq!(release.version(), "4.2.0");
        assert_eq!(release.display_name, "v4.2.0");
        assert_eq!(
            release.published_display(),
            "2025-06-01T10:00:00+00:00"
        );
    }

    #[test]
    fn scrape_first_tag_finds_first_link() {
        let html = r#"
            <a href="/OpenListTeam/OpenList/releases/tag/v4.2.0" class="Link">v4.2.0</a>
            <a href="/OpenListTeam/OpenList/releases/tag/v4.1.9">v4.1.9</a>
        "#;
        assert_eq!(scrape_first_tag(html).as_deref(), Some("v4.2.0"));
        assert_eq!(scrape_first_tag("<html>rate limited</html>"), None);
    }

    #[test]
    fn cache_payload_accepts_json_or_bare_tag() {
        let release = entry("v4.2.0", false, false);
        let decoded = ReleaseInfo::from_cache_payload(&release.to_cache_payload())
            .expect("json payload should decode");
        assert_eq!(decoded, release);

        let bare = ReleaseInfo::from_cache_payload("4.2.0").expect("bare tag should decode");
        assert_eq!(bare.version(), "4.2.0");
        assert_eq!(bare.published_display(), "unknown");

        assert!(ReleaseInfo::from_cache_payload("  ").is_none());
        assert!(ReleaseInfo::from_cache_payload("<html> error").is_none());
    }

    #[test]
    fn source_urls_are_built_from_bases() {
        let source = ReleaseSource {
            api_base: "http://127.0.0.1:9000/".to_string(),
            html_base: "http://127.0.0.1:9001".to_string(),
            ..ReleaseSource::default()
        };

        assert_eq!(
            source.releases_api_url(),
            "http://127.0.0.1:9000/repos/OpenListTeam/OpenList/releases"
        );
        assert_eq!(
            source.releases_page_url(),
            "http://127.0.0.1:9001/OpenListTeam/OpenList/releases"
        );
    }
}
