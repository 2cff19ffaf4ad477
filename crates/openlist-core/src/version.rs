use semver::Version;

/// Version strings that stand for "we don't know" and must never be used to
/// build a download URL.
const SENTINEL_VERSIONS: &[&str] = &["", "unknown", "network error"];

/// Strip a single leading `v`/`V` from a release tag.
#[must_use]
pub fn normalize_version(tag: &str) -> &str {
    let trimmed = tag.trim();
    trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed)
}

/// Release tag for a version. Bare numeric versions (`4.2.0`) get the
/// leading `v` the vendor uses; any other tag is kept as published.
#[must_use]
pub fn release_tag(version: &str) -> String {
    let trimmed = version.trim();
    if trimmed.starts_with(|ch: char| ch.is_ascii_digit()) {
        format!("v{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[must_use]
pub fn is_sentinel_version(version: &str) -> bool {
    let lowered = version.trim().to_ascii_lowercase();
    SENTINEL_VERSIONS.contains(&lowered.as_str())
}

#[must_use]
pub fn is_newer_version(latest: &str, current: &str) -> bool {
    let latest = normalize_version(latest);
    let current = normalize_version(current);
    match (parse_semver(latest), parse_semver(current)) {
        (Some(latest), Some(current)) => latest > current,
        _ => latest != current,
    }
}

/// Pull the first version-looking token out of `openlist --version` output.
///
/// The binary prints a multi-line banner (`Version: v4.2.0`, build info, ...),
/// so the first token that parses as a version wins.
#[must_use]
pub fn extract_version(output: &str) -> Option<String> {
    output
        .split(|ch: char| ch.is_whitespace() || ch == ':' || ch == ',')
        .map(|token| token.trim_matches(|ch: char| ch == '"' || ch == '\''))
        .map(normalize_version)
        .filter(|token| token.starts_with(|ch: char| ch.is_ascii_digit()) && token.contains('.'))
        .find(|token| parse_semver(token).is_some())
        .map(ToString::to_string)
}

fn parse_semver(version: &str) -> Option<Version> {
    if let Ok(parsed) = Version::parse(version) {
        return Some(parsed);
    }

    let (core, suffix) = split_semver_core_and_suffix(version);
    let mut parts = core.split('.');
    let major = parts.next()?.parse::<u64>().ok()?;
    let minor = parts.next().and_then(|part| part.parse::<u64>().ok());
    let patch = parts.next().and_then(|part| part.parse::<u64>().ok());

    if parts.next().is_some() {
        return None;
    }

    let normalized = match (minor, patch) {
        (None, None) => format!("{major}.0.0{suffix}"),
        (Some(minor), None) => format!("{major}.{minor}.0{suffix}"),
        (Some(minor), Some(patch)) => format!("{major}.{minor}.{patch}{suffix}"),
        (None, Some(_)) => return None,
    };

    Version::parse(&normalized).ok()
}

fn split_semver_core_and_suffix(version: &str) -> (&str, &str) {
    let suffix_idx = version.find(['-', '+']).unwrap_or(version.len());
    (&version[..suffix_idx], &version[suffix_idx..])
}
