//! Archive entry points: one URL in, one published page out.
//!
//! [`process`] runs every stage up to and including post-processing and
//! returns the publish-ready document; [`archive`] does the same and then
//! publishes it. A run is strictly sequential and any stage failure aborts
//! it before anything is published.

use crate::config::{ArchiveConfig, ClassifierBackend};
use crate::error::ArchiveError;
use crate::output::{ArchiveOutput, ArchiveStats, ProcessedContent};
use crate::pipeline::blocks::{self, CommandConverter, MarkdownConverter};
use crate::pipeline::classify::{self, ZeroShotClassifier};
use crate::pipeline::extract::{self, CommandReadability, Readability};
use crate::pipeline::imagehost::{GyazoHost, ImageHost};
use crate::pipeline::inference::InferenceClassifier;
use crate::pipeline::llm::LlmClassifier;
use crate::pipeline::postprocess::{self, PostProcessor};
use crate::pipeline::{input, normalize};
use crate::progress::Stage;
use crate::publish::{self, NotionClient, Publisher};
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fetch, classify and convert `url` without publishing.
///
/// The returned output has `page_id = None`. Images are still re-hosted,
/// since the blocks it returns are meant to be publishable as-is.
///
/// # Errors
/// Any stage failure: invalid URL, extraction, renderer timeout, classifier
/// failure or timeout, converter failure, image fetch or upload failure.
pub async fn process(
    url: impl AsRef<str>,
    config: &ArchiveConfig,
) -> Result<ArchiveOutput, ArchiveError> {
    let total_start = Instant::now();
    let url = url.as_ref();
    info!("Starting archive run: {}", url);
    let progress = config.progress_callback.as_ref();
    let stage = |s: Stage| {
        if let Some(cb) = progress {
            cb.on_stage(s);
        }
    };

    // ── Step 1: Resolve collaborators ────────────────────────────────────
    let readability = resolve_readability(config);
    let converter = resolve_converter(config);
    let image_host = resolve_image_host(config)?;
    let client = input::http_client(config.download_timeout_secs)?;

    // ── Step 2: Canonicalise the URL ─────────────────────────────────────
    stage(Stage::Resolve);
    let canonical = if config.resolve_redirects {
        input::resolve_url(&client, url).await?
    } else {
        input::validate_url(url)?.to_string()
    };
    let source_kind = input::detect_source(&canonical, &config.academic_prefixes);
    debug!("Source kind: {:?}", source_kind);

    let mut stats = ArchiveStats::default();

    // ── Step 3: Extract ──────────────────────────────────────────────────
    stage(Stage::Extract);
    let extract_start = Instant::now();
    let extraction =
        extract::extract(&client, &canonical, source_kind, readability.as_ref(), config).await?;
    stats.extract_duration_ms = extract_start.elapsed().as_millis() as u64;

    // ── Step 4: Normalise ────────────────────────────────────────────────
    let markdown = normalize::to_markdown(extraction.raw.clone())?;

    // ── Step 5: Tags ─────────────────────────────────────────────────────
    stage(Stage::Classify);
    let classify_start = Instant::now();
    let mut cleansed_text = None;
    let tags = if !extraction.optional_tags.is_empty() {
        info!("Using source tags {:?}", extraction.optional_tags);
        stats.tags_from_source = true;
        extraction.optional_tags.clone()
    } else {
        let text = normalize::to_cleansed_text(&markdown, config.max_cleansed_chars);
        let tags = if text.is_empty() {
            warn!("Cleansed text is empty; publishing without tags");
            Vec::new()
        } else {
            let classifier = resolve_classifier(config).await?;
            let labels =
                classify::candidate_labels(&config.candidate_labels, &extraction.source_categories);
            let outcome = classify::classify(
                classifier.as_ref(),
                &text,
                &labels,
                &config.search,
                Duration::from_secs(config.classifier_timeout_secs),
            )
            .await?;
            if outcome.exhausted {
                warn!(
                    "Tag search hit its iteration cap; continuing with {} tags",
                    outcome.labels.len()
                );
            }
            stats.search_iterations = outcome.iterations;
            stats.search_exhausted = outcome.exhausted;
            outcome.labels
        };
        cleansed_text = Some(text);
        tags
    };
    stats.classify_duration_ms = classify_start.elapsed().as_millis() as u64;
    if let Some(cb) = progress {
        cb.on_tags(&tags);
    }

    // ── Step 6: Convert to blocks ────────────────────────────────────────
    stage(Stage::Convert);
    let convert_start = Instant::now();
    let converted = blocks::to_structured_blocks(&markdown, converter.as_ref()).await?;
    stats.converted_blocks = converted.len();
    stats.convert_duration_ms = convert_start.elapsed().as_millis() as u64;

    // ── Step 7: Post-process ─────────────────────────────────────────────
    stage(Stage::PostProcess);
    let postprocess_start = Instant::now();
    let processor = PostProcessor {
        image_host: image_host.as_ref(),
        client: &client,
        page_url: &canonical,
        asset_root: extraction.asset_root.as_deref(),
        max_spans: config.max_spans_per_block,
        substitute_tables: config.substitute_tables,
        upload_delay: Duration::from_millis(config.upload_delay_ms),
        progress,
    };
    let (blocks, pp) = postprocess::post_process(converted, &processor).await?;
    stats.published_blocks = blocks.len();
    stats.images_uploaded = pp.images_uploaded;
    stats.images_skipped = pp.images_skipped;
    stats.blocks_split = pp.blocks_split;
    stats.blocks_substituted = pp.blocks_substituted;
    stats.links_stripped = pp.links_stripped;
    stats.postprocess_duration_ms = postprocess_start.elapsed().as_millis() as u64;
    stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

    // The scratch directory (arXiv sources and figures) is removed here.
    drop(extraction.scratch);

    let content = ProcessedContent {
        title: extraction.title,
        url: canonical,
        raw_content: None,
        cleansed_text,
        blocks,
        tags,
    };
    info!(
        "Processed '{}': {} blocks, {} tags, {}ms",
        content.title,
        content.blocks.len(),
        content.tags.len(),
        stats.total_duration_ms
    );

    Ok(ArchiveOutput {
        page_id: None,
        content,
        stats,
    })
}

/// Archive `url`: [`process`] it, then publish the page.
///
/// The publisher is resolved before any work starts so a missing Notion
/// credential fails fast.
pub async fn archive(
    url: impl AsRef<str>,
    config: &ArchiveConfig,
) -> Result<ArchiveOutput, ArchiveError> {
    let total_start = Instant::now();
    let publisher = resolve_publisher(config)?;

    let mut output = process(url, config).await?;

    // ── Step 8: Publish ──────────────────────────────────────────────────
    if let Some(cb) = &config.progress_callback {
        cb.on_stage(Stage::Publish);
    }
    let publish_start = Instant::now();
    let page_id = publish::publish(
        publisher.as_ref(),
        &output.content,
        config.progress_callback.as_ref(),
    )
    .await?;
    output.stats.publish_duration_ms = publish_start.elapsed().as_millis() as u64;
    output.stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
    output.page_id = Some(page_id);

    info!(
        "Archive complete: page {} in {}ms",
        output.page_id.as_deref().unwrap_or_default(),
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// Synchronous wrapper around [`archive`].
///
/// Creates a temporary tokio runtime internally.
pub fn archive_sync(
    url: impl AsRef<str>,
    config: &ArchiveConfig,
) -> Result<ArchiveOutput, ArchiveError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ArchiveError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(archive(url, config))
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn resolve_readability(config: &ArchiveConfig) -> Arc<dyn Readability> {
    match &config.readability {
        Some(r) => Arc::clone(r),
        None => Arc::new(CommandReadability::from_config(config)),
    }
}

fn resolve_converter(config: &ArchiveConfig) -> Arc<dyn MarkdownConverter> {
    match &config.converter {
        Some(c) => Arc::clone(c),
        None => Arc::new(CommandConverter::from_config(config)),
    }
}

fn resolve_image_host(config: &ArchiveConfig) -> Result<Arc<dyn ImageHost>, ArchiveError> {
    match &config.image_host {
        Some(h) => Ok(Arc::clone(h)),
        None => Ok(Arc::new(GyazoHost::from_config(config)?)),
    }
}

fn resolve_publisher(config: &ArchiveConfig) -> Result<Arc<dyn Publisher>, ArchiveError> {
    match &config.publisher {
        Some(p) => Ok(Arc::clone(p)),
        None => Ok(Arc::new(NotionClient::from_config(config)?)),
    }
}

/// Resolve the classifier: an injected one wins, otherwise build the
/// configured backend.
async fn resolve_classifier(
    config: &ArchiveConfig,
) -> Result<Arc<dyn ZeroShotClassifier>, ArchiveError> {
    if let Some(ref classifier) = config.classifier {
        return Ok(Arc::clone(classifier));
    }
    match config.classifier_backend {
        ClassifierBackend::Inference => Ok(Arc::new(InferenceClassifier::from_config(config)?)),
        ClassifierBackend::Llm => {
            let provider = resolve_provider(config).await?;
            Ok(Arc::new(LlmClassifier::new(provider, config)))
        }
    }
}

fn create_chat_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, ArchiveError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        ArchiveError::ClassifierNotConfigured {
            backend: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the chat provider for the `llm` backend, most specific first:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`); the factory reads
///    the matching API key from the environment.
/// 3. **Environment pair** `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`.
/// 4. **`OPENAI_API_KEY`** present → OpenAI.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
async fn resolve_provider(config: &ArchiveConfig) -> Result<Arc<dyn LLMProvider>, ArchiveError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
        return create_chat_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_chat_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or("gpt-4.1-nano");
            return create_chat_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| ArchiveError::ClassifierNotConfigured {
            backend: "llm".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
