//! Extraction: URL → title + raw content, per source kind.
//!
//! Standard pages go through a readability process that returns the main
//! article as HTML. arXiv papers are rendered from their LaTeX source, see
//! [`crate::pipeline::arxiv`]. Either way the run owns a scratch directory
//! for the duration; arXiv figures referenced by the Markdown live there
//! until the image host has uploaded them.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::output::{RawContent, SourceKind};
use crate::pipeline::arxiv;
use crate::pipeline::command::{self, Invocation};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// What a readability backend returns for one page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Article {
    #[serde(default)]
    pub title: Option<String>,
    /// Main content as HTML.
    #[serde(default)]
    pub content: Option<String>,
    /// Page keywords / topic tags, when the page declares any.
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// Extracts the main article of a web page.
#[async_trait]
pub trait Readability: Send + Sync {
    async fn read(&self, url: &str) -> Result<Article, ArchiveError>;
}

/// Runs an external readability command: `<argv..> <url> <out.json>`.
///
/// The command writes the article as JSON to the given path; `null` means
/// readability found no article.
#[derive(Debug, Clone)]
pub struct CommandReadability {
    pub argv: Vec<String>,
    pub timeout: Option<Duration>,
}

impl CommandReadability {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            argv: config.readability_command.clone(),
            timeout: config.extract_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[async_trait]
impl Readability for CommandReadability {
    async fn read(&self, url: &str) -> Result<Article, ArchiveError> {
        let fail = |reason: String| ArchiveError::ExtractionFailed {
            url: url.to_string(),
            reason,
        };
        let dir = TempDir::new().map_err(|e| ArchiveError::Internal(e.to_string()))?;
        let out = dir.path().join("article.json");

        command::run(
            Invocation::new(&self.argv)
                .arg(url)
                .arg(out.to_string_lossy())
                .timeout(self.timeout),
        )
        .await?;

        let bytes = tokio::fs::read(&out)
            .await
            .map_err(|e| fail(format!("no output file: {e}")))?;
        let article: Option<Article> =
            serde_json::from_slice(&bytes).map_err(|e| fail(format!("invalid JSON: {e}")))?;
        article.ok_or_else(|| fail("readability found no article".into()))
    }
}

/// Result of the extraction stage.
#[derive(Debug)]
pub struct Extraction {
    pub title: String,
    pub url: String,
    pub raw: RawContent,
    pub source_kind: SourceKind,
    /// Tags supplied by the source; when non-empty the classifier is skipped.
    pub optional_tags: Vec<String>,
    /// Source-specific labels added to the classifier vocabulary.
    pub source_categories: Vec<String>,
    /// Directory local image references resolve against.
    pub asset_root: Option<PathBuf>,
    /// Scratch directory, deleted on drop.
    pub scratch: Option<TempDir>,
}

/// Extract `url` according to `source_kind`.
pub async fn extract(
    client: &reqwest::Client,
    url: &str,
    source_kind: SourceKind,
    readability: &dyn Readability,
    config: &ArchiveConfig,
) -> Result<Extraction, ArchiveError> {
    match source_kind {
        SourceKind::Standard => extract_standard(url, readability).await,
        SourceKind::Academic { id } => extract_academic(client, url, id, config).await,
    }
}

async fn extract_standard(
    url: &str,
    readability: &dyn Readability,
) -> Result<Extraction, ArchiveError> {
    let fail = |reason: &str| ArchiveError::ExtractionFailed {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let article = readability.read(url).await?;
    let title = article
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| fail("empty title"))?
        .to_string();
    let html = article
        .content
        .filter(|c| looks_like_html(c))
        .ok_or_else(|| fail("content is not HTML"))?;

    info!("Extracted '{}' ({} bytes of HTML)", title, html.len());
    debug!("Page keywords: {:?}", article.keywords);

    Ok(Extraction {
        title,
        url: url.to_string(),
        raw: RawContent::Html(html),
        source_kind: SourceKind::Standard,
        optional_tags: Vec::new(),
        source_categories: article.keywords,
        asset_root: None,
        scratch: None,
    })
}

async fn extract_academic(
    client: &reqwest::Client,
    url: &str,
    id: String,
    config: &ArchiveConfig,
) -> Result<Extraction, ArchiveError> {
    let scratch = TempDir::new().map_err(|e| ArchiveError::Internal(e.to_string()))?;
    let paper = arxiv::extract(client, &id, scratch.path(), config).await?;
    let optional_tags = map_categories(&paper.metadata.categories, config);
    if optional_tags.is_empty() {
        info!("No mapped categories for {:?}; classifier will run", paper.metadata.categories);
    }

    Ok(Extraction {
        title: paper.metadata.title,
        url: url.to_string(),
        raw: RawContent::Markdown(paper.markdown),
        source_kind: SourceKind::Academic { id },
        optional_tags,
        source_categories: Vec::new(),
        asset_root: Some(paper.asset_root),
        scratch: Some(scratch),
    })
}

/// Map category codes through the configured table, dropping unmapped
/// codes and duplicates.
pub fn map_categories(codes: &[String], config: &ArchiveConfig) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for code in codes {
        if let Some(label) = config.category_labels.get(code) {
            if !tags.contains(label) {
                tags.push(label.clone());
            }
        }
    }
    tags
}

fn looks_like_html(content: &str) -> bool {
    let trimmed = content.trim_start();
    trimmed.starts_with('<') && trimmed.contains('>')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedReadability(Article);

    #[async_trait]
    impl Readability for FixedReadability {
        async fn read(&self, _url: &str) -> Result<Article, ArchiveError> {
            Ok(self.0.clone())
        }
    }

    fn article(title: &str, content: &str) -> Article {
        Article {
            title: Some(title.into()),
            content: Some(content.into()),
            keywords: vec!["rust".into()],
        }
    }

    #[tokio::test]
    async fn standard_page_extracts_html() {
        let r = FixedReadability(article("Hello", "<div><p>Body</p></div>"));
        let ex = extract_standard("https://example.com/a", &r).await.unwrap();
        assert_eq!(ex.title, "Hello");
        assert_eq!(ex.raw, RawContent::Html("<div><p>Body</p></div>".into()));
        assert_eq!(ex.source_categories, vec!["rust"]);
        assert!(ex.optional_tags.is_empty());
    }

    #[tokio::test]
    async fn empty_title_is_fatal() {
        let r = FixedReadability(article("   ", "<p>x</p>"));
        let err = extract_standard("https://example.com/a", &r).await.unwrap_err();
        assert!(matches!(err, ArchiveError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn non_html_is_fatal() {
        let r = FixedReadability(article("T", "just text"));
        let err = extract_standard("https://example.com/a", &r).await.unwrap_err();
        assert!(err.to_string().contains("not HTML"));
    }

    #[test]
    fn categories_mapped_and_deduped() {
        let config = ArchiveConfig::default();
        let codes: Vec<String> = ["cs.LG", "stat.ML", "math.CO", "cs.CL"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            map_categories(&codes, &config),
            vec!["machine learning", "natural language processing"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_readability_reads_json() {
        // sh -c SCRIPT $0 URL OUT
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"printf '{"title":"T","content":"<p>c</p>"}' > "$2""#.to_string(),
            "readable".to_string(),
        ];
        let r = CommandReadability {
            argv,
            timeout: Some(Duration::from_secs(10)),
        };
        let a = r.read("https://example.com").await.unwrap();
        assert_eq!(a.title.as_deref(), Some("T"));
        assert!(a.keywords.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_readability_null_is_failure() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            r#"echo null > "$2""#.to_string(),
            "readable".to_string(),
        ];
        let r = CommandReadability {
            argv,
            timeout: None,
        };
        let err = r.read("https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("no article"));
    }
}
