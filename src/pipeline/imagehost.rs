//! Stable image hosting.
//!
//! Notion only renders external images reliably when they live on a host
//! that does not expire or block hotlinking. Every image block is therefore
//! re-hosted before publishing, except images that are already on the host.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

/// An image host that returns a stable URL for uploaded bytes.
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Whether `reference` already points at this host.
    fn is_hosted(&self, reference: &str) -> bool;

    /// Upload `bytes` and return the hosted URL.
    ///
    /// `name` is the original reference, used for the file name and errors.
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String, ArchiveError>;
}

/// Gyazo upload API client.
#[derive(Debug, Clone)]
pub struct GyazoHost {
    client: reqwest::Client,
    upload_url: String,
    token: String,
    hosted_prefix: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl GyazoHost {
    /// Build from config; requires `image_host_token`.
    pub fn from_config(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let token = config
            .image_host_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ArchiveError::InvalidConfig(
                    "Image host token missing. Set GYAZO_ACCESS_TOKEN.".into(),
                )
            })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| ArchiveError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            upload_url: config.image_host_upload_url.clone(),
            token,
            hosted_prefix: config.image_host_prefix.clone(),
        })
    }
}

#[async_trait]
impl ImageHost for GyazoHost {
    fn is_hosted(&self, reference: &str) -> bool {
        reference.starts_with(&self.hosted_prefix)
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String, ArchiveError> {
        let fail = |detail: String| ArchiveError::ImageUploadFailed {
            reference: name.to_string(),
            detail,
        };

        let mime = sniff_mime(&bytes);
        let part = Part::bytes(bytes)
            .file_name(file_name(name))
            .mime_str(mime)
            .map_err(|e| fail(e.to_string()))?;
        let form = Form::new().part("imagedata", part);

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await
            .map_err(|e| fail(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::UNAUTHORIZED => return Err(ArchiveError::ImageHostAuth),
            other => {
                let body = response.text().await.unwrap_or_default();
                return Err(fail(format!("HTTP {}: {}", other, body.trim())));
            }
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| fail(format!("unexpected response: {e}")))?;
        debug!("Uploaded {} → {}", name, parsed.url);
        Ok(parsed.url)
    }
}

/// MIME type from the image's magic bytes, PNG when unknown.
fn sniff_mime(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png")
}

/// Last path segment of a URL or path, without query.
fn file_name(reference: &str) -> String {
    let path = reference.split(['?', '#']).next().unwrap_or(reference);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("image")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    fn host(url: &str) -> GyazoHost {
        let config = ArchiveConfig::builder()
            .image_host_token("gy_test")
            .image_host_upload_url(url)
            .build()
            .unwrap();
        GyazoHost::from_config(&config).unwrap()
    }

    #[test]
    fn hosted_prefix_detection() {
        let h = host("http://localhost/upload");
        assert!(h.is_hosted("https://i.gyazo.com/abc.png"));
        assert!(!h.is_hosted("https://example.com/i.gyazo.com/abc.png"));
        assert!(!h.is_hosted("figures/a.png"));
    }

    #[test]
    fn file_name_from_reference() {
        assert_eq!(file_name("https://x.org/a/b.png?s=1"), "b.png");
        assert_eq!(file_name("figs/plot.png"), "plot.png");
        assert_eq!(file_name(""), "image");
    }

    #[test]
    fn mime_sniffing() {
        assert_eq!(sniff_mime(PNG_MAGIC), "image/png");
        assert_eq!(sniff_mime(&[0xff, 0xd8, 0xff, 0xe0]), "image/jpeg");
        assert_eq!(sniff_mime(b"??"), "image/png");
    }

    #[test]
    fn missing_token_rejected() {
        assert!(GyazoHost::from_config(&ArchiveConfig::default()).is_err());
    }

    #[tokio::test]
    async fn upload_returns_hosted_url() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/upload")
            .match_header("authorization", "Bearer gy_test")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"image_id":"abc","url":"https://i.gyazo.com/abc.png"}"#)
            .create_async()
            .await;
        let h = host(&format!("{}/upload", server.url()));
        let url = h.upload(PNG_MAGIC.to_vec(), "fig.png").await.unwrap();
        m.assert_async().await;
        assert_eq!(url, "https://i.gyazo.com/abc.png");
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/upload")
            .with_status(401)
            .create_async()
            .await;
        let h = host(&format!("{}/upload", server.url()));
        let err = h.upload(PNG_MAGIC.to_vec(), "fig.png").await.unwrap_err();
        assert!(matches!(err, ArchiveError::ImageHostAuth));
    }

    #[tokio::test]
    async fn server_error_is_upload_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/upload")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;
        let h = host(&format!("{}/upload", server.url()));
        let err = h.upload(PNG_MAGIC.to_vec(), "fig.png").await.unwrap_err();
        match err {
            ArchiveError::ImageUploadFailed { reference, detail } => {
                assert_eq!(reference, "fig.png");
                assert!(detail.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
