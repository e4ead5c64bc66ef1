//! Output types produced by an archive run.

use crate::block::Block;
use serde::{Deserialize, Serialize};

/// Where the content came from. Selects the extraction branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceKind {
    /// Any page handled by the readability extractor.
    Standard,
    /// An arXiv paper, by identifier (e.g. `2106.09685` or `2106.09685v2`).
    Academic { id: String },
}

impl SourceKind {
    pub fn is_academic(&self) -> bool {
        matches!(self, SourceKind::Academic { .. })
    }
}

/// Extracted content before normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "body", rename_all = "snake_case")]
pub enum RawContent {
    /// Readability output.
    Html(String),
    /// Renderer output, or HTML already converted.
    Markdown(String),
}

/// The document a run builds up and finally publishes.
///
/// Created once per run and mutated stage by stage. `raw_content` is taken
/// by the normaliser; `cleansed_text` stays `None` when the tags came from
/// the source and the classifier was skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessedContent {
    /// Page title. Never empty once extraction succeeded.
    pub title: String,

    /// Canonical URL (redirects followed).
    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<RawContent>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleansed_text: Option<String>,

    /// Publish-ready blocks, in document order.
    pub blocks: Vec<Block>,

    /// Tags published as the multi-select property.
    pub tags: Vec<String>,
}

/// Counters and timings for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveStats {
    /// Blocks returned by the Markdown converter.
    pub converted_blocks: usize,

    /// Top-level blocks after post-processing (what gets appended).
    pub published_blocks: usize,

    /// Images uploaded to the image host.
    pub images_uploaded: usize,

    /// Images already on the host and left alone.
    pub images_skipped: usize,

    /// Extra sibling blocks created by rich-text chunking.
    pub blocks_split: usize,

    /// Blocks replaced by the unsupported-block placeholder.
    pub blocks_substituted: usize,

    /// Links removed because they were not absolute http(s).
    pub links_stripped: usize,

    /// Threshold adjustments made by the tag search (0 when skipped).
    pub search_iterations: u32,

    /// Whether the tag search hit its iteration cap.
    pub search_exhausted: bool,

    /// Whether tags came from the source instead of the classifier.
    pub tags_from_source: bool,

    pub extract_duration_ms: u64,
    pub classify_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub postprocess_duration_ms: u64,
    pub publish_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// Result of a complete archive run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveOutput {
    /// Identifier of the created page. `None` from [`crate::process`], which
    /// stops before publishing.
    pub page_id: Option<String>,

    pub content: ProcessedContent,

    pub stats: ArchiveStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_kind_serialises_tagged() {
        let v = serde_json::to_value(SourceKind::Academic {
            id: "2106.09685".into(),
        })
        .unwrap();
        assert_eq!(v["kind"], "academic");
        assert_eq!(v["id"], "2106.09685");
        assert!(!SourceKind::Standard.is_academic());
    }

    #[test]
    fn processed_content_omits_consumed_fields() {
        let content = ProcessedContent {
            title: "t".into(),
            url: "https://example.com".into(),
            ..Default::default()
        };
        let v = serde_json::to_value(&content).unwrap();
        assert!(v.get("raw_content").is_none());
        assert!(v.get("cleansed_text").is_none());
    }
}
