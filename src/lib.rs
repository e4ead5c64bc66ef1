//! # notion-archive
//!
//! Archive web articles and arXiv papers into a Notion database, tagged by
//! topic.
//!
//! ## Why this crate?
//!
//! Bookmarks rot and read-later services lose structure. This crate keeps a
//! full copy of each article as native Notion blocks (headings, lists, code,
//! equations, images re-hosted on a stable host) and tags it with a zero-shot
//! classifier, so the archive stays searchable by topic without any manual
//! filing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Resolve      follow redirects, pick standard or academic branch
//!  ├─ 2. Extract      readability (HTML) or arXiv source → pandoc (Markdown)
//!  ├─ 3. Normalise    HTML → Markdown, plus a cleansed 2048-char text
//!  ├─ 4. Classify     zero-shot scores + threshold search, or source tags
//!  ├─ 5. Convert      Markdown → Notion block tree
//!  ├─ 6. Post-process re-host images, strip bad links, chunk, substitute
//!  └─ 7. Publish      create page, append blocks one by one
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notion_archive::{archive, ArchiveConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ArchiveConfig::builder()
//!         .notion(std::env::var("NOTION_ACCESS_TOKEN")?, std::env::var("DATABASE_ID")?)
//!         .image_host_token(std::env::var("GYAZO_ACCESS_TOKEN")?)
//!         .inference_token(std::env::var("HF_API_TOKEN")?)
//!         .build()?;
//!     let output = archive("https://arxiv.org/abs/2106.09685", &config).await?;
//!     println!("{:?} tagged {:?}", output.page_id, output.content.tags);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `notion-archive` and `archive-watch` binaries |
//!
//! ## External Programs
//!
//! | Program | Used for |
//! |---------|----------|
//! | `node scripts/readable.mjs` | readability extraction of standard pages |
//! | `node scripts/markdown-to-blocks.mjs` | Markdown → block conversion |
//! | `pandoc` | arXiv LaTeX → Markdown |
//! | pdfium (shared library) | rasterising PDF figures in arXiv sources |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod archive;
pub mod block;
pub mod config;
pub mod error;
pub mod inbox;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod publish;
pub mod seen;
pub mod watch;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use archive::{archive, archive_sync, process};
pub use block::{Block, InlineSpan};
pub use config::{ArchiveConfig, ArchiveConfigBuilder, ClassifierBackend, ThresholdSearch};
pub use error::ArchiveError;
pub use inbox::{retrieve_urls, Inbox, Participant, TwitterInbox};
pub use output::{ArchiveOutput, ArchiveStats, ProcessedContent, RawContent, SourceKind};
pub use progress::{ArchiveProgressCallback, NoopProgressCallback, ProgressCallback, Stage};
pub use publish::{publish, NotionClient, Publisher};
pub use seen::SeenLog;
pub use watch::{PollSummary, Watcher};
