//! Markdown → Notion blocks.
//!
//! The conversion itself is delegated to a [`MarkdownConverter`]; the
//! default runs an external command that reads Markdown on stdin and prints
//! a JSON array of blocks. The empty-heading pre-pass runs here so every
//! converter sees the same input.

use crate::block::Block;
use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::pipeline::command::{self, Invocation};
use crate::pipeline::normalize;
use async_trait::async_trait;
use tracing::debug;

/// Converts Markdown into an ordered list of blocks.
#[async_trait]
pub trait MarkdownConverter: Send + Sync {
    async fn convert(&self, markdown: &str) -> Result<Vec<Block>, ArchiveError>;
}

/// Runs an external converter command.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub argv: Vec<String>,
}

impl CommandConverter {
    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self {
            argv: config.converter_command.clone(),
        }
    }
}

#[async_trait]
impl MarkdownConverter for CommandConverter {
    async fn convert(&self, markdown: &str) -> Result<Vec<Block>, ArchiveError> {
        let stdout = command::run(Invocation::new(&self.argv).stdin(markdown.as_bytes())).await?;
        parse_blocks(&stdout)
    }
}

/// Parse a JSON array of blocks as printed by the converter.
pub fn parse_blocks(json: &[u8]) -> Result<Vec<Block>, ArchiveError> {
    serde_json::from_slice(json)
        .map_err(|e| ArchiveError::ConversionFailed(format!("converter output: {e}")))
}

/// Pre-process `markdown` and convert it to blocks.
pub async fn to_structured_blocks(
    markdown: &str,
    converter: &dyn MarkdownConverter,
) -> Result<Vec<Block>, ArchiveError> {
    let prepared = normalize::fix_empty_headings(markdown);
    let blocks = converter.convert(&prepared).await?;
    debug!("Converter produced {} blocks", blocks.len());
    Ok(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::InlineSpan;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingConverter {
        seen: Mutex<Option<String>>,
    }

    #[async_trait]
    impl MarkdownConverter for RecordingConverter {
        async fn convert(&self, markdown: &str) -> Result<Vec<Block>, ArchiveError> {
            *self.seen.lock().unwrap() = Some(markdown.to_string());
            Ok(vec![Block::paragraph(vec![InlineSpan::plain("x")])])
        }
    }

    #[tokio::test]
    async fn pre_pass_applied_before_conversion() {
        let conv = RecordingConverter::default();
        let blocks = to_structured_blocks("# Title\n## \nbody", &conv).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(
            conv.seen.lock().unwrap().as_deref(),
            Some("# Title\n##\nbody")
        );
    }

    #[test]
    fn parse_blocks_rejects_garbage() {
        let err = parse_blocks(b"{not json").unwrap_err();
        assert!(matches!(err, ArchiveError::ConversionFailed(_)));
    }

    #[test]
    fn parse_blocks_array() {
        let json = br#"[{"object":"block","type":"divider","divider":{}}]"#;
        let blocks = parse_blocks(json).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].kind(), "divider");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_converter_round_trips_through_cat() {
        let json = r#"[{"type":"paragraph","paragraph":{"rich_text":[]}}]"#;
        let conv = CommandConverter {
            argv: vec!["cat".into()],
        };
        let blocks = conv.convert(json).await.unwrap();
        assert_eq!(blocks[0].kind(), "paragraph");
    }
}
