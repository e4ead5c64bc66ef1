//! Error types for the notion-archive library.
//!
//! Every error here is **fatal for the run**: the pipeline processes one URL
//! start-to-finish and either publishes a complete page or publishes nothing.
//! Lower-level subprocess and network failures are folded into a small set of
//! variants grouped by stage, so the top-level caller can log one line and
//! exit non-zero.
//!
//! Two situations are deliberately *not* errors:
//!
//! * the tag threshold search running out of iterations (the run continues
//!   with whatever tag set it reached, see [`crate::pipeline::classify`]);
//! * an unsupported block being replaced by a placeholder (logged by
//!   [`crate::pipeline::postprocess`], counted in the run stats).

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the notion-archive library.
#[derive(Debug, Error)]
pub enum ArchiveError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The input string is not an absolute HTTP/HTTPS URL.
    #[error("Invalid input '{input}': not a valid HTTP/HTTPS URL")]
    InvalidUrl { input: String },

    /// HTTP request for a page, archive or image failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The readability process failed or returned something unusable.
    #[error("Extraction failed for '{url}': {reason}")]
    ExtractionFailed { url: String, reason: String },

    /// The arXiv metadata API returned no usable entry.
    #[error("Metadata lookup failed for arXiv '{id}': {reason}")]
    MetadataFailed { id: String, reason: String },

    /// The arXiv source archive could not be unpacked.
    #[error("Could not unpack source archive for arXiv '{id}': {reason}")]
    SourceArchive { id: String, reason: String },

    /// An external program exited with a non-zero status.
    #[error("'{program}' exited with {status}: {stderr}")]
    SubprocessFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// An external program could not be started at all.
    #[error("Could not start '{program}': {source}\nIs it installed and on PATH?")]
    SubprocessSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// An external program exceeded its hard timeout and was killed.
    #[error("'{program}' timed out after {secs}s")]
    SubprocessTimeout { program: String, secs: u64 },

    /// A vector figure could not be rasterised.
    #[error("Rasterisation failed for '{path}': {detail}")]
    RasterisationFailed { path: PathBuf, detail: String },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// HTML → Markdown or Markdown → block conversion failed.
    #[error("Conversion failed: {0}")]
    ConversionFailed(String),

    // ── Classification errors ─────────────────────────────────────────────
    /// The classifier backend is not configured (missing token or provider).
    #[error("Classifier '{backend}' is not configured.\n{hint}")]
    ClassifierNotConfigured { backend: String, hint: String },

    /// The zero-shot classification call failed or returned garbage.
    #[error("Classification failed: {reason}")]
    ClassificationFailed { reason: String },

    /// The classification call exceeded its timeout.
    #[error("Classification timed out after {secs}s")]
    ClassificationTimeout { secs: u64 },

    // ── Image host errors ─────────────────────────────────────────────────
    /// The image host rejected the credential (HTTP 401). Needs operator action.
    #[error("Image host rejected the access token (HTTP 401)\nCheck GYAZO_ACCESS_TOKEN.")]
    ImageHostAuth,

    /// Any other image upload failure.
    #[error("Image upload of '{reference}' failed: {detail}")]
    ImageUploadFailed { reference: String, detail: String },

    /// The bytes of an embedded image could not be obtained.
    #[error("Could not read image '{reference}': {reason}")]
    ImageFetchFailed { reference: String, reason: String },

    // ── Publish errors ────────────────────────────────────────────────────
    /// The destination store rejected a request.
    #[error("Notion API error ({status}): {detail}")]
    PublishFailed { status: u16, detail: String },

    /// The destination store rejected the integration token.
    #[error("Notion rejected the access token (HTTP {status})\nCheck NOTION_ACCESS_TOKEN and that the database is shared with the integration.")]
    PublishAuth { status: u16 },

    // ── Watcher errors ────────────────────────────────────────────────────
    /// Reading direct messages from the inbox failed.
    #[error("Inbox request failed: {0}")]
    InboxFailed(String),

    /// Reading or rewriting the seen-URL log failed.
    #[error("Failed to access seen-URL log '{path}': {source}")]
    SeenLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArchiveError {
    /// Whether the error needs operator action (bad credential) rather than
    /// being a property of the URL being archived.
    pub fn is_auth(&self) -> bool {
        matches!(self, ArchiveError::ImageHostAuth | ArchiveError::PublishAuth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subprocess_timeout_display() {
        let e = ArchiveError::SubprocessTimeout {
            program: "pandoc".into(),
            secs: 300,
        };
        let msg = e.to_string();
        assert!(msg.contains("pandoc"), "got: {msg}");
        assert!(msg.contains("300s"), "got: {msg}");
    }

    #[test]
    fn image_host_auth_is_auth() {
        assert!(ArchiveError::ImageHostAuth.is_auth());
        assert!(ArchiveError::PublishAuth { status: 401 }.is_auth());
    }

    #[test]
    fn upload_failure_is_not_auth() {
        let e = ArchiveError::ImageUploadFailed {
            reference: "fig1.png".into(),
            detail: "HTTP 500".into(),
        };
        assert!(!e.is_auth());
        assert!(e.to_string().contains("fig1.png"));
    }

    #[test]
    fn publish_failed_display() {
        let e = ArchiveError::PublishFailed {
            status: 400,
            detail: "body failed validation".into(),
        };
        assert!(e.to_string().contains("400"));
        assert!(e.to_string().contains("validation"));
    }
}
