use std::time::Duration;

pub const API_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const API_TIMEOUT: Duration = Duration::from_secs(30);
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

#[must_use]
pub fn user_agent() -> String {
    format!("openlist-updater/{}", env!("CARGO_PKG_VERSION"))
}

/// Client for release listings: short connect timeout, bounded total time.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn api_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(API_TIMEOUT)
        .user_agent(user_agent())
        .build()
}

/// Client for existence probes. Redirects are not followed so a `302` from a
/// release asset is observable.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn probe_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(API_TIMEOUT)
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(user_agent())
        .build()
}

/// Client for artifact downloads, which may take minutes on slow uplinks.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn download_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .connect_timeout(API_CONNECT_TIMEOUT)
        .timeout(DOWNLOAD_TIMEOUT)
        .user_agent(user_agent())
        .build()
}

pub(crate) fn response_snippet(body: &str, max_chars: usize) -> String {
    let snippet: String = body.chars().take(max_chars).collect();
    if snippet.is_empty() {
        String::new()
    } else {
        format!(": {snippet}")
    }
}
