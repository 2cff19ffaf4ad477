use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, TimeZone, Utc};
use openlist_core::{
    ArtifactFetcher, ConfigError, ConfigStore, CoreVariant, FetchError, ManualClock,
    RELEASE_CACHE_TTL, ReleaseChannel, ReleaseResolver, ReleaseSource, ResolveError,
    ResponseCache, UpdaterConfig, Updater, http, map_arch,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RELEASES_API_PATH: &str = "/repos/OpenListTeam/OpenList/releases";
const RELEASES_PAGE_PATH: &str = "/OpenListTeam/OpenList/releases";
const CANONICAL_ASSET_PATH: &str =
    "/OpenListTeam/OpenList/releases/download/v4.2.0/openlist-linux-musl-amd64.tar.gz";

#[derive(Default)]
struct MemoryStore {
    install_dirs: Mutex<Vec<PathBuf>>,
}

impl ConfigStore for MemoryStore {
    fn load(&self) -> Result<UpdaterConfig, ConfigError> {
        Ok(UpdaterConfig::default())
    }

    fn save_install_dir(&self, install_dir: &Path) -> Result<(), ConfigError> {
        self.install_dirs
            .lock()
            .expect("store lock should not be poisoned")
            .push(install_dir.to_path_buf());
        Ok(())
    }
}

fn source_for(server: &MockServer) -> ReleaseSource {
    ReleaseSource {
        api_base: server.uri(),
        html_base: server.uri(),
        ..ReleaseSource::default()
    }
}

fn manual_cache() -> (Arc<ResponseCache>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp"),
    ));
    (
        Arc::new(ResponseCache::new(RELEASE_CACHE_TTL, clock.clone())),
        clock,
    )
}

fn resolver_for(server: &MockServer, cache: Arc<ResponseCache>) -> ReleaseResolver {
    ReleaseResolver::new(
        http::api_client().expect("client should build"),
        source_for(server),
        cache,
    )
}

fn fetcher_for(server: &MockServer, download_dir: &Path) -> ArtifactFetcher {
    ArtifactFetcher::new(
        http::probe_client().expect("client should build"),
        http::download_client().expect("client should build"),
        source_for(server).download_base(),
        download_dir,
        Arc::new(ResponseCache::default()),
    )
}

fn listing_json() -> serde_json::Value {
    serde_json::json!([
        {"tag_name": "v4.3.0", "name": "draft", "published_at": null, "prerelease": false, "draft": true},
        {"tag_name": "v4.3.0-beta.1", "name": "beta", "published_at": "2025-06-02T00:00:00Z", "prerelease": true, "draft": false},
        {"tag_name": "v4.2.0", "name": "OpenList v4.2.0", "published_at": "2025-06-01T10:00:00Z", "prerelease": false, "draft": false}
    ])
}

/// Shell script that prints a version banner, padded with incompressible
/// filler so the packed archive is realistically sized.
fn fake_openlist_binary(filler_len: usize) -> Vec<u8> {
    let mut contents = b"#!/bin/sh\necho 'Version: v4.2.0'\nexit 0\n# ".to_vec();
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    for _ in 0..filler_len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        contents.push(b"0123456789abcdef"[(state % 16) as usize]);
    }
    contents.push(b'\n');
    contents
}

fn tar_gz_bytes(entry_name: &str, contents: &[u8]) -> Vec<u8> {
    let encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, entry_name, contents)
        .expect("entry should be appended");
    builder
        .into_inner()
        .expect("tar should finish")
        .finish()
        .expect("gzip should finish")
}

fn zip_bytes(entry_name: &str, contents: &[u8]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored)
        .unix_permissions(0o755);
    writer
        .start_file(entry_name, options)
        .expect("zip entry should start");
    writer.write_all(contents).expect("zip entry should be written");
    writer
        .finish()
        .expect("zip should finish")
        .into_inner()
}

#[tokio::test]
async fn resolve_twice_within_ttl_hits_network_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json()))
        .expect(1)
        .mount(&server)
        .await;

    let (cache, clock) = manual_cache();
    let resolver = resolver_for(&server, cache);

    let first = resolver.resolve_latest(false).await.expect("first resolve");
    clock.advance(TimeDelta::hours(11));
    let second = resolver.resolve_latest(false).await.expect("second resolve");

    assert_eq!(first.tag, "v4.2.0");
    assert_eq!(second, first);
    assert_eq!(second.version(), "4.2.0");
}

#[tokio::test]
async fn resolve_refetches_after_ttl_expires() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json()))
        .expect(2)
        .mount(&server)
        .await;

    let (cache, clock) = manual_cache();
    let resolver = resolver_for(&server, cache);

    resolver.resolve_latest(false).await.expect("first resolve");
    clock.advance(TimeDelta::hours(12));
    resolver.resolve_latest(false).await.expect("second resolve");
}

#[tokio::test]
async fn stable_channel_skips_drafts_and_prereleases() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json()))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(ResponseCache::default()));

    let stable = resolver.resolve_latest(false).await.expect("stable release");
    assert!(!stable.prerelease && !stable.draft);
    assert_eq!(stable.tag, "v4.2.0");

    let beta = resolver.resolve_latest(true).await.expect("pre-release");
    assert_eq!(beta.tag, "v4.3.0-beta.1");
    assert!(!beta.draft);
}

#[tokio::test]
async fn auth_token_is_sent_as_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .and(header("authorization", "Bearer secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json()))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = ReleaseResolver::new(
        http::api_client().expect("client should build"),
        ReleaseSource {
            auth_token: Some("secret-token".to_string()),
            ..source_for(&server)
        },
        Arc::new(ResponseCache::default()),
    );

    let release = resolver.resolve_latest(false).await.expect("resolve");
    assert_eq!(release.tag, "v4.2.0");
}

#[tokio::test]
async fn api_failure_falls_back_to_releases_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(403).set_body_string("API rate limit exceeded"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RELEASES_PAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/OpenListTeam/OpenList/releases/tag/v4.1.9">v4.1.9</a>
               <a href="/OpenListTeam/OpenList/releases/tag/v4.1.8">v4.1.8</a>"#,
        ))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(ResponseCache::default()));
    let release = resolver.resolve_latest(false).await.expect("fallback resolve");

    assert_eq!(release.tag, "v4.1.9");
    assert_eq!(release.published_display(), "unknown");
}

#[tokio::test]
async fn empty_listing_falls_back_to_releases_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RELEASES_PAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<a href="/OpenListTeam/OpenList/releases/tag/v4.2.0">v4.2.0</a>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(ResponseCache::default()));
    let release = resolver.resolve_latest(false).await.expect("fallback resolve");

    assert_eq!(release.tag, "v4.2.0");
}

#[tokio::test]
async fn both_sources_down_is_network_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(ResponseCache::default()));
    let result = resolver.resolve_latest(false).await;

    assert!(matches!(result, Err(ResolveError::NetworkFailure { .. })));
}

#[tokio::test]
async fn reachable_sources_without_tags_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(RELEASES_PAGE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>no releases</html>"))
        .mount(&server)
        .await;

    let resolver = resolver_for(&server, Arc::new(ResponseCache::default()));
    let result = resolver.resolve_latest(false).await;

    assert!(matches!(result, Err(ResolveError::NotFound { .. })));
}

#[tokio::test]
async fn hour_old_cached_version_is_served_without_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let (cache, clock) = manual_cache();
    let resolver = resolver_for(&server, cache.clone());
    cache.put(resolver.cache_key(false), "4.2.0");
    clock.advance(TimeDelta::hours(1));

    let release = resolver.resolve_latest(false).await.expect("cache hit");
    assert_eq!(release.version(), "4.2.0");
}

#[tokio::test]
async fn undersized_download_is_too_small_and_removed() {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path(CANONICAL_ASSET_PATH))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CANONICAL_ASSET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>Not Found</html>"))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let fetcher = fetcher_for(&server, temp.path());

    let result = fetcher
        .fetch("4.2.0", "linux-musl-amd64", CoreVariant::Standard)
        .await;

    assert!(matches!(result, Err(FetchError::TooSmall { size, .. }) if size < 1000));
    assert!(!temp.path().join("openlist-linux-musl-amd64.tar.gz").exists());
}

#[tokio::test]
async fn all_candidates_missing_is_unreachable() {
    let server = MockServer::start().await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let fetcher = fetcher_for(&server, temp.path());

    let result = fetcher
        .fetch("v4.2.0", "linux-musl-amd64", CoreVariant::Standard)
        .await;

    assert!(matches!(result, Err(FetchError::Unreachable { .. })));
    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().all(|request| request.method.as_str() == "HEAD"));
}

#[tokio::test]
async fn redirected_probe_falls_through_to_zip_candidate() {
    let server = MockServer::start().await;
    let zip_path = "/OpenListTeam/OpenList/releases/download/v4.2.0/openlist-linux-musl-arm64.zip";
    let archive = zip_bytes("openlist", &fake_openlist_binary(4096));
    Mock::given(method("HEAD"))
        .and(path(zip_path))
        .respond_with(ResponseTemplate::new(302))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(zip_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let fetcher = fetcher_for(&server, temp.path());

    let fetched = fetcher
        .fetch("4.2.0", "linux-musl-arm64", CoreVariant::Standard)
        .await
        .expect("zip candidate should download");

    assert!(fetched.url.ends_with(zip_path));
    assert_eq!(fetched.size, archive.len() as u64);
    assert_eq!(std::fs::read(&fetched.path).expect("artifact readable"), archive);
}

#[cfg(unix)]
#[tokio::test]
async fn end_to_end_update_installs_canonical_artifact() {
    let server = MockServer::start().await;
    let archive = tar_gz_bytes("openlist", &fake_openlist_binary(230 * 1024));
    assert!(archive.len() > 100 * 1024);

    Mock::given(method("HEAD"))
        .and(path(CANONICAL_ASSET_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CANONICAL_ASSET_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let install_dir = temp.path().join("usr-bin");
    let download_dir = temp.path().join("downloads");
    let store = Arc::new(MemoryStore::default());
    let config = UpdaterConfig {
        source: source_for(&server),
        install_dir: install_dir.clone(),
        target_arch: Some("x86_64".to_string()),
        ..UpdaterConfig::default()
    };
    assert_eq!(map_arch("x86_64"), "linux-musl-amd64");

    let updater = Updater::new(
        config,
        store.clone(),
        Arc::new(ResponseCache::default()),
        download_dir.clone(),
        "mipsel".to_string(),
    )
    .expect("updater should build");

    let report = updater.update(Some("4.2.0")).await.expect("update should succeed");

    assert_eq!(report.tag, "v4.2.0");
    assert_eq!(report.version, "4.2.0");
    assert_eq!(report.arch_suffix, "linux-musl-amd64");
    assert!(report.artifact_url.ends_with(CANONICAL_ASSET_PATH));
    assert_eq!(report.artifact_size, archive.len() as u64);
    assert_eq!(report.install.binary_path, install_dir.join("openlist"));
    assert_eq!(report.install.reported_version.as_deref(), Some("4.2.0"));
    assert!(!report.restarted);
    assert!(install_dir.join("openlist").is_file());
    assert!(!download_dir.join("openlist-linux-musl-amd64.tar.gz").exists());
    assert_eq!(
        store.install_dirs.lock().expect("lock").as_slice(),
        &[install_dir]
    );

    let result = openlist_core::OperationResult::ok("updated", &report);
    assert!(result.success);
}

#[cfg(unix)]
#[tokio::test]
async fn tag_without_v_prefix_is_downloaded_as_published() {
    let server = MockServer::start().await;
    let beta_path = "/OpenListTeam/OpenList/releases/download/beta/openlist-linux-musl-amd64.tar.gz";
    let archive = tar_gz_bytes("openlist", &fake_openlist_binary(8 * 1024));

    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"tag_name": "beta", "name": "Rolling beta", "published_at": "2025-06-03T00:00:00Z", "prerelease": true, "draft": false},
            {"tag_name": "v4.2.0", "name": "OpenList v4.2.0", "published_at": "2025-06-01T10:00:00Z", "prerelease": false, "draft": false}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(beta_path))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(beta_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let install_dir = temp.path().join("usr-bin");
    let config = UpdaterConfig {
        source: source_for(&server),
        install_dir: install_dir.clone(),
        target_arch: Some("x86_64".to_string()),
        channel: ReleaseChannel::Prerelease,
        ..UpdaterConfig::default()
    };
    let updater = Updater::new(
        config,
        Arc::new(MemoryStore::default()),
        Arc::new(ResponseCache::default()),
        temp.path().join("downloads"),
        "x86_64".to_string(),
    )
    .expect("updater should build");

    let report = updater.update(None).await.expect("beta update should succeed");

    assert_eq!(report.tag, "beta");
    assert!(report.artifact_url.ends_with(beta_path));
    assert_eq!(report.artifact_size, archive.len() as u64);
    assert!(install_dir.join("openlist").is_file());

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    assert!(
        requests
            .iter()
            .all(|request| !request.url.path().contains("/releases/download/vbeta/")
                && !request.url.path().contains("/releases/latest/"))
    );
}

#[cfg(unix)]
#[tokio::test]
async fn proxy_rewrites_downloads_but_not_release_listing() {
    let server = MockServer::start().await;
    let proxied_asset_path = format!("/{}{CANONICAL_ASSET_PATH}", server.uri());
    let archive = tar_gz_bytes("openlist", &fake_openlist_binary(8 * 1024));

    Mock::given(method("GET"))
        .and(path(RELEASES_API_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(listing_json()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path(proxied_asset_path.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(proxied_asset_path.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(archive))
        .expect(1)
        .mount(&server)
        .await;

    let temp = tempfile::tempdir().expect("tempdir should be created");
    let config = UpdaterConfig {
        source: source_for(&server),
        proxy_url: Some(server.uri()),
        install_dir: temp.path().join("usr-bin"),
        target_arch: Some("amd64".to_string()),
        ..UpdaterConfig::default()
    };
    let updater = Updater::new(
        config,
        Arc::new(MemoryStore::default()),
        Arc::new(ResponseCache::default()),
        temp.path().join("downloads"),
        "x86_64".to_string(),
    )
    .expect("updater should build");

    let report = updater.update(None).await.expect("proxied update should succeed");

    assert_eq!(report.tag, "v4.2.0");
    assert_eq!(
        report.artifact_url,
        format!("{}/{}{CANONICAL_ASSET_PATH}", server.uri(), server.uri())
    );

    let requests = server
        .received_requests()
        .await
        .expect("request recording is enabled");
    for request in &requests {
        let request_path = request.url.path();
        match request.method.as_str() {
            "HEAD" => assert_eq!(request_path, proxied_asset_path),
            "GET" if request_path == RELEASES_API_PATH => {}
            "GET" => assert_eq!(request_path, proxied_asset_path),
            other => panic!("unexpected {other} request to {request_path}"),
        }
    }
    assert!(
        requests
            .iter()
            .any(|request| request.url.path() == RELEASES_API_PATH)
    );
}
