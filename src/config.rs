//! Configuration types for archiving a URL into Notion.
//!
//! All pipeline behaviour is controlled through [`ArchiveConfig`], built via
//! its [`ArchiveConfigBuilder`]. Credentials, tuning constants and injected
//! collaborators live in one struct so a run is fully described by it and two
//! runs can be diffed by printing their (redacted) configs.
//!
//! Collaborators (classifier, image host, converter, publisher, readability)
//! can be injected as trait objects. When one is absent the pipeline builds
//! the default implementation from the credentials and names configured here,
//! see [`crate::archive`].

use crate::error::ArchiveError;
use crate::pipeline::blocks::MarkdownConverter;
use crate::pipeline::classify::ZeroShotClassifier;
use crate::pipeline::extract::Readability;
use crate::pipeline::imagehost::ImageHost;
use crate::progress::ProgressCallback;
use crate::publish::Publisher;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Configuration for one archive run.
///
/// # Example
/// ```rust
/// use notion_archive::ArchiveConfig;
///
/// let config = ArchiveConfig::builder()
///     .notion("secret_xxx", "0123456789abcdef")
///     .initial_threshold(0.5)
///     .upload_delay_ms(500)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ArchiveConfig {
    /// Fixed topical vocabulary offered to the classifier.
    pub candidate_labels: Vec<String>,

    /// arXiv category code → tag. Used instead of the classifier for papers.
    pub category_labels: BTreeMap<String, String>,

    /// URL prefixes that select the academic-paper extraction branch.
    pub academic_prefixes: Vec<String>,

    /// Threshold search tuning. Default: 0.45 start, 0.05 step, < 4 tags, 10 iterations.
    pub search: ThresholdSearch,

    /// Maximum characters of cleansed text handed to the classifier. Default: 2048.
    ///
    /// Zero-shot NLI models have an input ceiling; text is cut at the last
    /// sentence terminator inside this window.
    pub max_cleansed_chars: usize,

    /// Maximum rich-text spans per block. Default: 100 (Notion's limit).
    pub max_spans_per_block: usize,

    /// Replace table blocks with a placeholder. Default: true.
    ///
    /// The Markdown converter emits tables whose rows routinely break
    /// Notion's nesting and width rules; the placeholder keeps the page
    /// publishable at the cost of the table content.
    pub substitute_tables: bool,

    /// Pause after each image upload in milliseconds. Default: 1000.
    pub upload_delay_ms: u64,

    /// Follow redirects once to canonicalise the input URL. Default: true.
    pub resolve_redirects: bool,

    /// Readability command; the URL and an output JSON path are appended.
    /// Default: `node scripts/readable.mjs`.
    pub readability_command: Vec<String>,

    /// Optional timeout for the readability command. Default: none.
    pub extract_timeout_secs: Option<u64>,

    /// Markdown → Notion block command (Markdown on stdin, JSON on stdout).
    /// Default: `node scripts/markdown-to-blocks.mjs`.
    pub converter_command: Vec<String>,

    /// arXiv Atom metadata API. Default: `http://export.arxiv.org/api/query`.
    pub arxiv_api_url: String,

    /// arXiv source archive base; the identifier is appended. Default: `https://arxiv.org/e-print`.
    pub arxiv_source_url: String,

    /// Longest edge in pixels of rasterised vector figures. Default: 1600.
    pub figure_max_pixels: u32,

    /// LaTeX renderer program. Default: `pandoc`.
    pub renderer_program: String,

    /// Hard timeout for the renderer in seconds. Default: 300.
    pub renderer_timeout_secs: u64,

    /// Timeout for HTTP downloads (pages, archives, images) in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Which zero-shot classifier to build when none is injected.
    pub classifier_backend: ClassifierBackend,

    /// Base URL of the inference endpoint. Default: Hugging Face inference API.
    pub inference_endpoint: String,

    /// Zero-shot NLI model served by the inference endpoint.
    pub inference_model: String,

    /// Bearer token for the inference endpoint.
    pub inference_token: Option<String>,

    /// NLI hypothesis; `{}` is replaced by each label. Default: "This text is about {}."
    pub hypothesis_template: String,

    /// Timeout for the single classification call in seconds. Default: 120.
    pub classifier_timeout_secs: u64,

    /// Chat model for [`ClassifierBackend::Llm`], e.g. "gpt-4.1-nano".
    pub model: Option<String>,

    /// Chat provider name for [`ClassifierBackend::Llm`] (e.g. "openai", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed chat provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Retries for the chat classifier on transient failures. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt). Default: 500.
    pub retry_backoff_ms: u64,

    /// Notion integration token.
    pub notion_token: Option<String>,

    /// Target Notion database.
    pub database_id: Option<String>,

    /// Notion API base URL. Default: `https://api.notion.com/v1`.
    pub notion_api_base: String,

    /// Gyazo access token.
    pub image_host_token: Option<String>,

    /// Image upload endpoint. Default: `https://upload.gyazo.com/api/upload`.
    pub image_host_upload_url: String,

    /// Prefix of URLs already on the image host. Default: `https://i.gyazo.com/`.
    pub image_host_prefix: String,

    /// Injected classifier. Takes precedence over `classifier_backend`.
    pub classifier: Option<Arc<dyn ZeroShotClassifier>>,

    /// Injected image host. Takes precedence over the Gyazo settings.
    pub image_host: Option<Arc<dyn ImageHost>>,

    /// Injected Markdown converter. Takes precedence over `converter_command`.
    pub converter: Option<Arc<dyn MarkdownConverter>>,

    /// Injected readability backend. Takes precedence over `readability_command`.
    pub readability: Option<Arc<dyn Readability>>,

    /// Injected publisher. Takes precedence over the Notion settings.
    pub publisher: Option<Arc<dyn Publisher>>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            candidate_labels: default_candidate_labels(),
            category_labels: default_category_labels(),
            academic_prefixes: vec![
                "https://arxiv.org/abs/".to_string(),
                "https://arxiv.org/pdf/".to_string(),
            ],
            search: ThresholdSearch::default(),
            max_cleansed_chars: 2048,
            max_spans_per_block: crate::block::MAX_SPANS_PER_BLOCK,
            substitute_tables: true,
            upload_delay_ms: 1000,
            resolve_redirects: true,
            readability_command: vec!["node".to_string(), "scripts/readable.mjs".to_string()],
            extract_timeout_secs: None,
            converter_command: vec![
                "node".to_string(),
                "scripts/markdown-to-blocks.mjs".to_string(),
            ],
            arxiv_api_url: "http://export.arxiv.org/api/query".to_string(),
            arxiv_source_url: "https://arxiv.org/e-print".to_string(),
            figure_max_pixels: 1600,
            renderer_program: "pandoc".to_string(),
            renderer_timeout_secs: 300,
            download_timeout_secs: 120,
            classifier_backend: ClassifierBackend::default(),
            inference_endpoint: "https://api-inference.huggingface.co/models".to_string(),
            inference_model: "MoritzLaurer/mDeBERTa-v3-base-mnli-xnli".to_string(),
            inference_token: None,
            hypothesis_template: "This text is about {}.".to_string(),
            classifier_timeout_secs: 120,
            model: None,
            provider_name: None,
            provider: None,
            max_retries: 3,
            retry_backoff_ms: 500,
            notion_token: None,
            database_id: None,
            notion_api_base: "https://api.notion.com/v1".to_string(),
            image_host_token: None,
            image_host_upload_url: "https://upload.gyazo.com/api/upload".to_string(),
            image_host_prefix: "https://i.gyazo.com/".to_string(),
            classifier: None,
            image_host: None,
            converter: None,
            readability: None,
            publisher: None,
            progress_callback: None,
        }
    }
}

fn redact(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for ArchiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveConfig")
            .field("candidate_labels", &self.candidate_labels.len())
            .field("category_labels", &self.category_labels.len())
            .field("academic_prefixes", &self.academic_prefixes)
            .field("search", &self.search)
            .field("max_cleansed_chars", &self.max_cleansed_chars)
            .field("max_spans_per_block", &self.max_spans_per_block)
            .field("substitute_tables", &self.substitute_tables)
            .field("upload_delay_ms", &self.upload_delay_ms)
            .field("readability_command", &self.readability_command)
            .field("converter_command", &self.converter_command)
            .field("arxiv_api_url", &self.arxiv_api_url)
            .field("figure_max_pixels", &self.figure_max_pixels)
            .field("renderer_program", &self.renderer_program)
            .field("renderer_timeout_secs", &self.renderer_timeout_secs)
            .field("classifier_backend", &self.classifier_backend)
            .field("inference_model", &self.inference_model)
            .field("inference_token", &redact(&self.inference_token))
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("notion_token", &redact(&self.notion_token))
            .field("database_id", &self.database_id)
            .field("image_host_token", &redact(&self.image_host_token))
            .field("image_host_prefix", &self.image_host_prefix)
            .field("classifier", &self.classifier.as_ref().map(|_| "<dyn ZeroShotClassifier>"))
            .field("image_host", &self.image_host.as_ref().map(|_| "<dyn ImageHost>"))
            .field("converter", &self.converter.as_ref().map(|_| "<dyn MarkdownConverter>"))
            .field("readability", &self.readability.as_ref().map(|_| "<dyn Readability>"))
            .field("publisher", &self.publisher.as_ref().map(|_| "<dyn Publisher>"))
            .finish()
    }
}

impl ArchiveConfig {
    /// Create a new builder for `ArchiveConfig`.
    pub fn builder() -> ArchiveConfigBuilder {
        ArchiveConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ArchiveConfig`].
#[derive(Debug)]
pub struct ArchiveConfigBuilder {
    config: ArchiveConfig,
}

impl ArchiveConfigBuilder {
    pub fn candidate_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.candidate_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn category_label(mut self, code: impl Into<String>, label: impl Into<String>) -> Self {
        self.config.category_labels.insert(code.into(), label.into());
        self
    }

    pub fn academic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.academic_prefixes.push(prefix.into());
        self
    }

    pub fn initial_threshold(mut self, t: f32) -> Self {
        self.config.search.initial_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn threshold_step(mut self, step: f32) -> Self {
        self.config.search.step = step;
        self
    }

    pub fn max_search_iterations(mut self, n: u32) -> Self {
        self.config.search.max_iterations = n;
        self
    }

    pub fn max_cleansed_chars(mut self, n: usize) -> Self {
        self.config.max_cleansed_chars = n;
        self
    }

    pub fn max_spans_per_block(mut self, n: usize) -> Self {
        self.config.max_spans_per_block = n.max(1);
        self
    }

    pub fn substitute_tables(mut self, v: bool) -> Self {
        self.config.substitute_tables = v;
        self
    }

    pub fn upload_delay_ms(mut self, ms: u64) -> Self {
        self.config.upload_delay_ms = ms;
        self
    }

    pub fn resolve_redirects(mut self, v: bool) -> Self {
        self.config.resolve_redirects = v;
        self
    }

    pub fn readability_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.readability_command = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn extract_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extract_timeout_secs = Some(secs);
        self
    }

    pub fn converter_command<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.converter_command = argv.into_iter().map(Into::into).collect();
        self
    }

    pub fn arxiv_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.arxiv_api_url = url.into();
        self
    }

    pub fn arxiv_source_url(mut self, url: impl Into<String>) -> Self {
        self.config.arxiv_source_url = url.into();
        self
    }

    pub fn figure_max_pixels(mut self, px: u32) -> Self {
        self.config.figure_max_pixels = px.clamp(64, 8192);
        self
    }

    pub fn renderer_program(mut self, program: impl Into<String>) -> Self {
        self.config.renderer_program = program.into();
        self
    }

    pub fn renderer_timeout_secs(mut self, secs: u64) -> Self {
        self.config.renderer_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn classifier_backend(mut self, backend: ClassifierBackend) -> Self {
        self.config.classifier_backend = backend;
        self
    }

    pub fn inference_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.inference_endpoint = url.into();
        self
    }

    pub fn inference_model(mut self, model: impl Into<String>) -> Self {
        self.config.inference_model = model.into();
        self
    }

    pub fn inference_token(mut self, token: impl Into<String>) -> Self {
        self.config.inference_token = Some(token.into());
        self
    }

    pub fn hypothesis_template(mut self, template: impl Into<String>) -> Self {
        self.config.hypothesis_template = template.into();
        self
    }

    pub fn classifier_timeout_secs(mut self, secs: u64) -> Self {
        self.config.classifier_timeout_secs = secs;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn notion(mut self, token: impl Into<String>, database_id: impl Into<String>) -> Self {
        self.config.notion_token = Some(token.into());
        self.config.database_id = Some(database_id.into());
        self
    }

    pub fn notion_api_base(mut self, url: impl Into<String>) -> Self {
        self.config.notion_api_base = url.into();
        self
    }

    pub fn image_host_token(mut self, token: impl Into<String>) -> Self {
        self.config.image_host_token = Some(token.into());
        self
    }

    pub fn image_host_upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.image_host_upload_url = url.into();
        self
    }

    pub fn image_host_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.image_host_prefix = prefix.into();
        self
    }

    pub fn classifier(mut self, classifier: Arc<dyn ZeroShotClassifier>) -> Self {
        self.config.classifier = Some(classifier);
        self
    }

    pub fn image_host(mut self, host: Arc<dyn ImageHost>) -> Self {
        self.config.image_host = Some(host);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn MarkdownConverter>) -> Self {
        self.config.converter = Some(converter);
        self
    }

    pub fn readability(mut self, readability: Arc<dyn Readability>) -> Self {
        self.config.readability = Some(readability);
        self
    }

    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.config.publisher = Some(publisher);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ArchiveConfig, ArchiveError> {
        let c = &self.config;
        if c.candidate_labels.is_empty() {
            return Err(ArchiveError::InvalidConfig(
                "At least one candidate label is required".into(),
            ));
        }
        if !(c.search.step > 0.0 && c.search.step < 1.0) {
            return Err(ArchiveError::InvalidConfig(format!(
                "Threshold step must be in (0, 1), got {}",
                c.search.step
            )));
        }
        if c.search.upper_bound < 2 {
            return Err(ArchiveError::InvalidConfig(format!(
                "Tag upper bound must be ≥ 2, got {}",
                c.search.upper_bound
            )));
        }
        if c.max_cleansed_chars == 0 {
            return Err(ArchiveError::InvalidConfig(
                "max_cleansed_chars must be ≥ 1".into(),
            ));
        }
        if c.readability_command.is_empty() || c.converter_command.is_empty() {
            return Err(ArchiveError::InvalidConfig(
                "Readability and converter commands must not be empty".into(),
            ));
        }
        if c.renderer_timeout_secs == 0 {
            return Err(ArchiveError::InvalidConfig(
                "Renderer timeout must be ≥ 1s".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Threshold search ─────────────────────────────────────────────────────

/// Parameters of the confidence-threshold search over classifier scores.
///
/// A label is kept when `score > threshold`. While no label survives the
/// threshold is lowered by `step`; while `upper_bound` or more survive it is
/// raised by `step`. The search stops after `max_iterations` adjustments
/// even if it has not reached the target band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSearch {
    pub initial_threshold: f32,
    pub step: f32,
    /// Smallest tag count considered "too many".
    pub upper_bound: usize,
    pub max_iterations: u32,
}

impl Default for ThresholdSearch {
    fn default() -> Self {
        Self {
            initial_threshold: 0.45,
            step: 0.05,
            upper_bound: 4,
            max_iterations: 10,
        }
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Zero-shot classifier implementation built when none is injected.
///
/// | Backend | Needs |
/// |---------|-------|
/// | `Inference` | an NLI model behind a Hugging Face style endpoint + token |
/// | `Llm` | any chat provider supported by `edgequake-llm` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ClassifierBackend {
    /// NLI zero-shot pipeline over HTTP (default).
    #[default]
    Inference,
    /// Chat model asked to score every label independently.
    Llm,
}

// ── Defaults ─────────────────────────────────────────────────────────────

/// The built-in topical vocabulary.
pub fn default_candidate_labels() -> Vec<String> {
    [
        // AI/ML
        "natural language processing",
        "computer vision",
        "reinforcement learning",
        "artificial intelligence",
        "machine learning",
        // Programming languages
        "sql",
        "python",
        "javascript",
        "shell script",
        // Services
        "aws",
        "google cloud",
        // Tools
        "docker",
        "kubernetes",
        "django",
        "fastapi",
        "pytorch",
        "tensorflow",
        "api",
        "git",
        // Genres
        "web",
        "lifehack",
        "business",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// The built-in arXiv category → tag table.
pub fn default_category_labels() -> BTreeMap<String, String> {
    [
        ("cs.CL", "natural language processing"),
        ("cs.CV", "computer vision"),
        ("cs.LG", "machine learning"),
        ("stat.ML", "machine learning"),
        ("cs.AI", "artificial intelligence"),
        ("cs.NE", "artificial intelligence"),
        ("cs.IR", "web"),
        ("cs.DB", "sql"),
    ]
    .into_iter()
    .map(|(code, label)| (code.to_string(), label.to_string()))
    .collect()
}
