//! Post-processing: make converted blocks publishable.
//!
//! The converter's output is structurally valid Markdown-as-blocks, but the
//! destination adds constraints of its own:
//!
//! - at most 100 rich-text spans per block
//! - hyperlinks must be absolute http(s) URLs
//! - some block types (tables, anything the converter emits that this crate
//!   does not model) are rejected or unreliable
//! - images must live on a stable host
//!
//! One ordered pass fixes all of this. Each block goes through the steps
//! below in order, its children are processed recursively, and the result
//! replaces the block in place, so document order is never disturbed.
//!
//! ## Step Order
//!
//! 1. Substitute unsupported blocks (nothing else applies to a placeholder)
//! 2. Re-host images
//! 3. Demote bookmarks with invalid URLs to plain paragraphs
//! 4. Strip invalid links from every span the block owns
//! 5. Recurse into children
//! 6. Split oversized rich text into sibling blocks (last, so the pieces
//!    already carry sanitised spans)

use crate::block::{Block, InlineSpan};
use crate::error::ArchiveError;
use crate::pipeline::arxiv::is_safe_relative;
use crate::pipeline::imagehost::ImageHost;
use crate::progress::ProgressCallback;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Text of the paragraph that replaces an unsupported block.
pub const UNSUPPORTED_PLACEHOLDER: &str = "[unsupported block]";

/// Settings and collaborators for one post-processing pass.
pub struct PostProcessor<'a> {
    pub image_host: &'a dyn ImageHost,
    /// Client used to fetch remote image bytes.
    pub client: &'a reqwest::Client,
    /// Canonical page URL; relative image references resolve against it.
    pub page_url: &'a str,
    /// Directory local image references resolve against (arXiv scratch).
    pub asset_root: Option<&'a Path>,
    pub max_spans: usize,
    pub substitute_tables: bool,
    pub upload_delay: Duration,
    pub progress: Option<&'a ProgressCallback>,
}

/// What the pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostProcessStats {
    pub images_uploaded: usize,
    pub images_skipped: usize,
    pub blocks_split: usize,
    pub blocks_substituted: usize,
    pub links_stripped: usize,
}

type BoxFuture<'b, T> = Pin<Box<dyn Future<Output = T> + Send + 'b>>;

impl PostProcessor<'_> {
    /// Run the pass over `blocks`.
    pub async fn run(
        &self,
        blocks: Vec<Block>,
    ) -> Result<(Vec<Block>, PostProcessStats), ArchiveError> {
        let mut stats = PostProcessStats::default();
        let out = self.process_list(blocks, &mut stats).await?;
        info!(
            "Post-processed {} blocks: {} uploaded, {} already hosted, {} split, {} substituted, {} links stripped",
            out.len(),
            stats.images_uploaded,
            stats.images_skipped,
            stats.blocks_split,
            stats.blocks_substituted,
            stats.links_stripped
        );
        Ok((out, stats))
    }

    fn process_list<'b>(
        &'b self,
        blocks: Vec<Block>,
        stats: &'b mut PostProcessStats,
    ) -> BoxFuture<'b, Result<Vec<Block>, ArchiveError>> {
        Box::pin(async move {
            let mut out = Vec::with_capacity(blocks.len());
            for block in blocks {
                let processed = self.process_block(block, stats).await?;
                out.extend(processed);
            }
            Ok(out)
        })
    }

    async fn process_block(
        &self,
        block: Block,
        stats: &mut PostProcessStats,
    ) -> Result<Vec<Block>, ArchiveError> {
        // ── Step 1: Unsupported blocks ──────────────────────────────────────
        if self.is_unsupported(&block) {
            warn!("Replacing unsupported '{}' block with placeholder", block.kind());
            stats.blocks_substituted += 1;
            return Ok(vec![placeholder()]);
        }

        let mut block = block;

        // ── Step 2: Images ──────────────────────────────────────────────────
        if let Block::Image { image } = &mut block {
            if let Some(reference) = image.reference().map(str::to_string) {
                if self.image_host.is_hosted(&reference) {
                    debug!("Image already hosted: {}", reference);
                    stats.images_skipped += 1;
                } else {
                    let hosted = self.rehost(&reference).await?;
                    image.set_external(hosted.clone());
                    stats.images_uploaded += 1;
                    if let Some(cb) = self.progress {
                        cb.on_image_rehosted(&reference, &hosted);
                    }
                }
            }
        }

        // ── Step 3: Bookmarks ───────────────────────────────────────────────
        if let Block::Bookmark { bookmark } = &block {
            if !is_valid_link(&bookmark.url) {
                debug!("Demoting bookmark with invalid URL: {}", bookmark.url);
                stats.links_stripped += 1;
                let mut spans = vec![InlineSpan::plain(bookmark.url.clone())];
                spans.extend(bookmark.caption.iter().cloned());
                block = Block::paragraph(spans);
            }
        }

        // ── Step 4: Inline links ────────────────────────────────────────────
        stats.links_stripped += sanitize_links(&mut block);

        // ── Step 5: Children ────────────────────────────────────────────────
        if let Some(children) = block.children_mut() {
            if !children.is_empty() {
                let kids = std::mem::take(children);
                *children = self.process_list(kids, stats).await?;
            }
        }

        // ── Step 6: Chunking ────────────────────────────────────────────────
        let pieces = block.split_rich_text(self.max_spans);
        if pieces.len() > 1 {
            debug!("Split oversized block into {} pieces", pieces.len());
            stats.blocks_split += pieces.len() - 1;
        }
        Ok(pieces)
    }

    fn is_unsupported(&self, block: &Block) -> bool {
        match block {
            Block::Unsupported => true,
            Block::Table { .. } | Block::TableRow { .. } => self.substitute_tables,
            _ => false,
        }
    }

    /// Fetch the image bytes, upload them and pause for the configured delay.
    async fn rehost(&self, reference: &str) -> Result<String, ArchiveError> {
        let bytes = self.fetch_image(reference).await?;
        let hosted = self.image_host.upload(bytes, reference).await?;
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        Ok(hosted)
    }

    /// Absolute URL → GET; existing file under the asset root → read;
    /// anything else → resolve against the page URL and GET.
    ///
    /// With an asset root, a reference that is absolute or climbs out with
    /// `..` is refused.
    async fn fetch_image(&self, reference: &str) -> Result<Vec<u8>, ArchiveError> {
        let fail = |reason: String| ArchiveError::ImageFetchFailed {
            reference: reference.to_string(),
            reason,
        };

        if is_valid_link(reference) {
            return self.get(reference).await.map_err(fail);
        }

        if let Some(root) = self.asset_root {
            let relative = Path::new(reference);
            if !is_safe_relative(relative) {
                return Err(fail(format!(
                    "path escapes the asset directory {}",
                    root.display()
                )));
            }
            let candidate = root.join(relative);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return tokio::fs::read(&candidate)
                    .await
                    .map_err(|e| fail(e.to_string()));
            }
        }

        let base = reqwest::Url::parse(self.page_url).map_err(|e| fail(e.to_string()))?;
        let absolute = base.join(reference).map_err(|e| fail(e.to_string()))?;
        if !matches!(absolute.scheme(), "http" | "https") {
            return Err(fail(format!("unsupported scheme '{}'", absolute.scheme())));
        }
        self.get(absolute.as_str()).await.map_err(fail)
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>, String> {
        let response = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(bytes.to_vec())
    }
}

/// Run `processor` over `blocks`. See [`PostProcessor::run`].
pub async fn post_process(
    blocks: Vec<Block>,
    processor: &PostProcessor<'_>,
) -> Result<(Vec<Block>, PostProcessStats), ArchiveError> {
    processor.run(blocks).await
}

/// The paragraph that stands in for an unsupported block.
pub fn placeholder() -> Block {
    Block::paragraph(vec![InlineSpan::plain(UNSUPPORTED_PLACEHOLDER)])
}

/// Whether `link` is an absolute http(s) URL with a host.
pub fn is_valid_link(link: &str) -> bool {
    match reqwest::Url::parse(link) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Drop every invalid link from the block's own spans. Returns how many.
pub fn sanitize_links(block: &mut Block) -> usize {
    let mut stripped = 0;
    block.for_each_span_mut(&mut |span: &mut InlineSpan| {
        if let Some(link) = &span.link {
            if !is_valid_link(link) {
                debug!("Stripping link '{}' from '{}'", link, span.text);
                span.link = None;
                stripped += 1;
            }
        }
    });
    stripped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BookmarkBody, TableBody};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        uploads: AtomicUsize,
    }

    impl CountingHost {
        fn new() -> Self {
            Self {
                uploads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ImageHost for CountingHost {
        fn is_hosted(&self, reference: &str) -> bool {
            reference.starts_with("https://i.gyazo.com/")
        }

        async fn upload(&self, _bytes: Vec<u8>, _name: &str) -> Result<String, ArchiveError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://i.gyazo.com/{n}.png"))
        }
    }

    struct RejectingHost;

    #[async_trait]
    impl ImageHost for RejectingHost {
        fn is_hosted(&self, _reference: &str) -> bool {
            false
        }

        async fn upload(&self, _bytes: Vec<u8>, _name: &str) -> Result<String, ArchiveError> {
            Err(ArchiveError::ImageHostAuth)
        }
    }

    fn processor<'a>(
        host: &'a dyn ImageHost,
        client: &'a reqwest::Client,
        asset_root: Option<&'a Path>,
    ) -> PostProcessor<'a> {
        PostProcessor {
            image_host: host,
            client,
            page_url: "https://example.com/post/",
            asset_root,
            max_spans: 100,
            substitute_tables: true,
            upload_delay: Duration::ZERO,
            progress: None,
        }
    }

    fn spans(n: usize) -> Vec<InlineSpan> {
        (0..n).map(|i| InlineSpan::plain(format!("s{i}"))).collect()
    }

    #[test]
    fn valid_links() {
        assert!(is_valid_link("https://example.com/a?b=c"));
        assert!(is_valid_link("http://example.com"));
        assert!(!is_valid_link("mailto:a@example.com"));
        assert!(!is_valid_link("#section-2"));
        assert!(!is_valid_link("/relative/path"));
        assert!(!is_valid_link("javascript:alert(1)"));
        assert!(!is_valid_link("ftp://example.com/file"));
    }

    #[test]
    fn sanitize_keeps_text_and_valid_links() {
        let mut block = Block::paragraph(vec![
            InlineSpan::linked("mail me", "mailto:a@example.com"),
            InlineSpan::linked("docs", "https://docs.rs/regex"),
            InlineSpan::linked("anchor", "#top"),
        ]);
        assert_eq!(sanitize_links(&mut block), 2);
        let rt = block.rich_text().unwrap();
        assert_eq!(rt[0].text, "mail me");
        assert_eq!(rt[0].link, None);
        assert_eq!(rt[1].link.as_deref(), Some("https://docs.rs/regex"));
        assert_eq!(rt[2].link, None);
    }

    #[tokio::test]
    async fn chunking_preserves_order_and_bounds() {
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let original = spans(250);
        let pp = processor(&host, &client, None);
        let (out, stats) = post_process(vec![Block::paragraph(original.clone())], &pp)
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(stats.blocks_split, 2);
        assert!(out.iter().all(|b| b.rich_text().unwrap().len() <= 100));
        let rejoined: Vec<InlineSpan> = out
            .iter()
            .flat_map(|b| b.rich_text().unwrap().to_vec())
            .collect();
        assert_eq!(rejoined, original);
    }

    #[tokio::test]
    async fn hosted_image_untouched_without_upload() {
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let image = Block::image("https://i.gyazo.com/existing.png");
        let (out, stats) = processor(&host, &client, None)
            .run(vec![image.clone()])
            .await
            .unwrap();
        assert_eq!(out, vec![image]);
        assert_eq!(host.uploads.load(Ordering::SeqCst), 0);
        assert_eq!(stats.images_skipped, 1);
    }

    #[tokio::test]
    async fn local_image_uploaded_from_asset_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("figs")).unwrap();
        std::fs::write(dir.path().join("figs/plot.png"), b"png").unwrap();
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let (out, stats) = processor(&host, &client, Some(dir.path()))
            .run(vec![Block::image("figs/plot.png")])
            .await
            .unwrap();
        assert_eq!(stats.images_uploaded, 1);
        match &out[0] {
            Block::Image { image } => {
                assert_eq!(image.reference(), Some("https://i.gyazo.com/0.png"))
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[tokio::test]
    async fn image_outside_asset_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("paper");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(dir.path().join("secret.txt"), b"TOP-SECRET").unwrap();
        let outside = dir.path().join("secret.txt");
        let host = CountingHost::new();
        let client = reqwest::Client::new();

        for reference in ["../secret.txt", "figs/../../secret.txt", outside.to_str().unwrap()] {
            let err = processor(&host, &client, Some(&root))
                .run(vec![Block::image(reference)])
                .await
                .unwrap_err();
            assert!(
                matches!(err, ArchiveError::ImageFetchFailed { .. }),
                "{reference}: {err:?}"
            );
        }
        assert_eq!(host.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn remote_image_fetched_then_uploaded() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/img.png")
            .with_status(200)
            .with_body("bytes")
            .create_async()
            .await;
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let (_, stats) = processor(&host, &client, None)
            .run(vec![Block::image(format!("{}/img.png", server.url()))])
            .await
            .unwrap();
        assert_eq!(stats.images_uploaded, 1);
    }

    #[tokio::test]
    async fn upload_auth_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.png"), b"png").unwrap();
        let client = reqwest::Client::new();
        let err = processor(&RejectingHost, &client, Some(dir.path()))
            .run(vec![Block::image("a.png")])
            .await
            .unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn unsupported_and_tables_substituted_in_place() {
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let blocks = vec![
            Block::paragraph(spans(1)),
            Block::Unsupported,
            Block::Table {
                table: TableBody {
                    table_width: 2,
                    ..TableBody::default()
                },
            },
            Block::paragraph(spans(2)),
        ];
        let (out, stats) = processor(&host, &client, None).run(blocks).await.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(out[1], placeholder());
        assert_eq!(out[2], placeholder());
        assert_eq!(out[3].rich_text().unwrap().len(), 2);
        assert_eq!(stats.blocks_substituted, 2);
    }

    #[tokio::test]
    async fn nested_children_processed() {
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let mut parent = Block::bulleted(vec![InlineSpan::linked("x", "mailto:x@y.z")]);
        if let Some(children) = parent.children_mut() {
            children.push(Block::paragraph(spans(150)));
            children.push(Block::Unsupported);
        }
        let (out, stats) = processor(&host, &client, None)
            .run(vec![parent])
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rich_text().unwrap()[0].link, None);
        let kids = out[0].children();
        assert_eq!(kids.len(), 3);
        assert_eq!(kids[0].rich_text().unwrap().len(), 100);
        assert_eq!(kids[1].rich_text().unwrap().len(), 50);
        assert_eq!(kids[2], placeholder());
        assert_eq!(stats.links_stripped, 1);
    }

    #[tokio::test]
    async fn invalid_bookmark_demoted() {
        let host = CountingHost::new();
        let client = reqwest::Client::new();
        let bookmark = Block::Bookmark {
            bookmark: BookmarkBody {
                url: "about:blank".into(),
                caption: Vec::new(),
            },
        };
        let (out, _) = processor(&host, &client, None)
            .run(vec![bookmark])
            .await
            .unwrap();
        assert_eq!(out[0].kind(), "paragraph");
        assert_eq!(out[0].rich_text().unwrap()[0].text, "about:blank");
    }
}
