//! Input resolution: validate the URL, canonicalise it and pick a branch.
//!
//! The canonical URL is what ends up in the page's URL property, so it is
//! resolved once up front with a single redirect-following GET. Shortened
//! links (t.co and friends) arrive this way from the inbox watcher.

use crate::error::ArchiveError;
use crate::output::SourceKind;
use std::time::Duration;
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Parse `input` as an absolute http(s) URL with a host.
pub fn validate_url(input: &str) -> Result<reqwest::Url, ArchiveError> {
    let invalid = || ArchiveError::InvalidUrl {
        input: input.to_string(),
    };
    let url = reqwest::Url::parse(input.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}

/// Build the HTTP client shared by the download stages.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ArchiveError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(concat!("notion-archive/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ArchiveError::Internal(format!("HTTP client: {e}")))
}

/// Follow redirects once and return the final URL.
pub async fn resolve_url(client: &reqwest::Client, url: &str) -> Result<String, ArchiveError> {
    let parsed = validate_url(url)?;
    let response = client
        .get(parsed)
        .send()
        .await
        .map_err(|e| ArchiveError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
    let resolved = response.url().to_string();
    if resolved != url {
        info!("Resolved {} → {}", url, resolved);
    }
    Ok(resolved)
}

/// Select the extraction branch for `url`.
///
/// A URL matching one of `academic_prefixes` with a non-empty identifier
/// after the prefix is an arXiv paper; everything else is a standard page.
pub fn detect_source(url: &str, academic_prefixes: &[String]) -> SourceKind {
    match arxiv_id(url, academic_prefixes) {
        Some(id) => SourceKind::Academic { id },
        None => SourceKind::Standard,
    }
}

/// Extract the arXiv identifier from an abstract or PDF URL.
///
/// `https://arxiv.org/pdf/2106.09685v2.pdf?x=1` → `2106.09685v2`.
pub fn arxiv_id(url: &str, academic_prefixes: &[String]) -> Option<String> {
    let rest = academic_prefixes
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix.as_str()))?;
    let rest = rest.split(['?', '#']).next().unwrap_or_default();
    let rest = rest.trim_end_matches('/');
    let id = rest.strip_suffix(".pdf").unwrap_or(rest);
    if id.is_empty() {
        None
    } else {
        debug!("arXiv id: {}", id);
        Some(id.to_string())
    }
}

/// GET `url` and return the body, failing on non-2xx statuses.
pub async fn download_bytes(client: &reqwest::Client, url: &str) -> Result<Vec<u8>, ArchiveError> {
    let fail = |reason: String| ArchiveError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| fail(e.to_string()))?;
    if !response.status().is_success() {
        return Err(fail(format!("HTTP {}", response.status())));
    }
    let bytes = response.bytes().await.map_err(|e| fail(e.to_string()))?;
    debug!("Downloaded {} bytes from {}", bytes.len(), url);
    Ok(bytes.to_vec())
}
