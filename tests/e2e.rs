//! End-to-end tests against live services.
//!
//! These call the real readability and converter scripts (Node), pandoc,
//! the inference endpoint, the image host and Notion. They are gated behind
//! the `E2E_ENABLED` environment variable so they do not run in CI unless
//! explicitly requested.
//!
//! Run with:
//!   (cd scripts && npm install)
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture
//!
//! Needs NOTION_ACCESS_TOKEN, DATABASE_ID, GYAZO_ACCESS_TOKEN and
//! HF_API_TOKEN in the environment (or a `.env` file).

use notion_archive::{archive, process, ArchiveConfig, Block};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip this test unless E2E_ENABLED is set and every variable is present.
macro_rules! e2e_skip_unless_ready {
    ($($var:expr),* $(,)?) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        $(
            if std::env::var($var).map(|v| v.is_empty()).unwrap_or(true) {
                println!("SKIP — {} is not set", $var);
                return;
            }
        )*
    }};
}

fn env(name: &str) -> String {
    std::env::var(name).unwrap_or_default()
}

fn live_config() -> ArchiveConfig {
    ArchiveConfig::builder()
        .notion(env("NOTION_ACCESS_TOKEN"), env("DATABASE_ID"))
        .image_host_token(env("GYAZO_ACCESS_TOKEN"))
        .inference_token(env("HF_API_TOKEN"))
        .build()
        .expect("live config should be valid")
}

/// Assert the blocks are ready for the destination API.
fn assert_publishable(blocks: &[Block], context: &str) {
    assert!(!blocks.is_empty(), "[{context}] no blocks");
    for block in blocks {
        if let Some(rt) = block.rich_text() {
            assert!(rt.len() <= 100, "[{context}] {} spans in one block", rt.len());
            for span in rt {
                if let Some(link) = &span.link {
                    assert!(link.starts_with("http"), "[{context}] bad link {link}");
                }
            }
        }
        if let Block::Image { image } = block {
            let r = image.reference().unwrap_or_default();
            assert!(
                r.starts_with("https://i.gyazo.com/"),
                "[{context}] image not re-hosted: {r}"
            );
        }
        assert_publishable_children(block.children(), context);
    }
}

fn assert_publishable_children(children: &[Block], context: &str) {
    if !children.is_empty() {
        assert_publishable(children, context);
    }
}

// ── Standard pages ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_process_rust_blog_post() {
    e2e_skip_unless_ready!("GYAZO_ACCESS_TOKEN", "HF_API_TOKEN");

    let output = process(
        "https://blog.rust-lang.org/2024/11/28/Rust-2024-public-testing.html",
        &live_config(),
    )
    .await
    .expect("process() should succeed");

    assert!(!output.content.title.is_empty());
    assert!(output.content.tags.len() <= 3 || output.stats.search_exhausted);
    assert_publishable(&output.content.blocks, "rust-blog");
    println!("Tags: {:?}", output.content.tags);
    println!("Stats: {:?}", output.stats);
}

#[tokio::test]
async fn test_archive_publishes_page() {
    e2e_skip_unless_ready!(
        "NOTION_ACCESS_TOKEN",
        "DATABASE_ID",
        "GYAZO_ACCESS_TOKEN",
        "HF_API_TOKEN"
    );

    let output = archive("https://www.rust-lang.org/learn", &live_config())
        .await
        .expect("archive() should succeed");

    let page_id = output.page_id.expect("page id");
    assert!(!page_id.is_empty());
    println!("Created page {page_id} with {} blocks", output.stats.published_blocks);
}

// ── arXiv papers ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_process_arxiv_paper_uses_categories() {
    e2e_skip_unless_ready!("GYAZO_ACCESS_TOKEN");

    // LoRA: cs.CL primary, so tags come from the category table.
    let output = process("https://arxiv.org/abs/2106.09685", &live_config())
        .await
        .expect("process() should succeed");

    assert!(output.stats.tags_from_source);
    assert!(output
        .content
        .tags
        .contains(&"natural language processing".to_string()));
    assert!(output.content.title.contains("LoRA"));
    assert_publishable(&output.content.blocks, "arxiv-lora");
}
