//! CLI binary for notion-archive.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ArchiveConfig`, archives one URL and prints the result.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use notion_archive::{
    archive, process, ArchiveConfig, ArchiveOutput, ArchiveProgressCallback, ClassifierBackend,
    ProgressCallback, Stage,
};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner while the run moves through its stages, then a bar while blocks
/// are appended.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn activate_bar(&self, total: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} blocks  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Publishing");
    }
}

impl ArchiveProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: Stage) {
        self.bar.set_prefix(stage.to_string());
        self.bar.set_message(String::new());
    }

    fn on_tags(&self, tags: &[String]) {
        self.bar
            .println(format!("  {} tags: {}", green("✓"), dim(&tags.join(", "))));
    }

    fn on_image_rehosted(&self, original: &str, _hosted: &str) {
        self.bar.set_message(format!("re-hosted {original}"));
    }

    fn on_block_appended(&self, index: usize, total: usize) {
        if index == 0 {
            self.activate_bar(total);
        }
        self.bar.inc(1);
    }

    fn on_complete(&self, _page_id: &str, _blocks: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Archive an article
  notion-archive https://example.com/post

  # Archive an arXiv paper (tags come from its categories)
  notion-archive https://arxiv.org/abs/2106.09685

  # Classify with a chat model instead of the NLI endpoint
  notion-archive --classifier llm --provider openai --model gpt-4.1-nano https://example.com/post

  # Show what would be published, without publishing
  notion-archive --dry-run --json https://example.com/post

ENVIRONMENT VARIABLES:
  NOTION_ACCESS_TOKEN     Notion integration token
  DATABASE_ID             Target Notion database
  GYAZO_ACCESS_TOKEN      Image host access token
  HF_API_TOKEN            Inference endpoint token (classifier = inference)
  OPENAI_API_KEY, ...     Chat provider keys (classifier = llm)
  PDFIUM_LIB_PATH         Path to libpdfium for rasterising PDF figures
  RUST_LOG                Overrides the log filter

  A .env file in the working directory is loaded first.
"#;

/// Archive a web article or arXiv paper into a Notion database.
#[derive(Parser, Debug)]
#[command(
    name = "notion-archive",
    version,
    about = "Archive a web article or arXiv paper into a Notion database with topic tags",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// HTTP/HTTPS URL of the page to archive.
    url: String,

    /// Notion integration token.
    #[arg(long, env = "NOTION_ACCESS_TOKEN", hide_env_values = true)]
    notion_token: Option<String>,

    /// Notion database to create the page in.
    #[arg(long, env = "DATABASE_ID")]
    database_id: Option<String>,

    /// Image host access token.
    #[arg(long, env = "GYAZO_ACCESS_TOKEN", hide_env_values = true)]
    gyazo_token: Option<String>,

    /// Inference endpoint token.
    #[arg(long, env = "HF_API_TOKEN", hide_env_values = true)]
    hf_token: Option<String>,

    /// Classifier backend.
    #[arg(long, env = "ARCHIVE_CLASSIFIER", value_enum, default_value = "inference")]
    classifier: ClassifierArg,

    /// NLI model for the inference backend.
    #[arg(long, env = "ARCHIVE_INFERENCE_MODEL")]
    inference_model: Option<String>,

    /// Chat provider for the llm backend: openai, anthropic, gemini, ollama.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Chat model for the llm backend.
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Starting tag threshold (0.0–1.0).
    #[arg(long, env = "ARCHIVE_THRESHOLD", default_value_t = 0.45)]
    threshold: f32,

    /// Delay between image uploads in milliseconds.
    #[arg(long, env = "ARCHIVE_UPLOAD_DELAY_MS", default_value_t = 1000)]
    upload_delay_ms: u64,

    /// Hard timeout for the LaTeX renderer in seconds.
    #[arg(long, env = "ARCHIVE_RENDER_TIMEOUT", default_value_t = 300)]
    render_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "ARCHIVE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Stop before publishing and print the processed document.
    #[arg(long)]
    dry_run: bool,

    /// Print the run output as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "ARCHIVE_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "ARCHIVE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "ARCHIVE_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ClassifierArg {
    Inference,
    Llm,
}

impl From<ClassifierArg> for ClassifierBackend {
    fn from(v: ClassifierArg) -> Self {
        match v {
            ClassifierArg::Inference => ClassifierBackend::Inference,
            ClassifierArg::Llm => ClassifierBackend::Llm,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Values from .env only fill variables that are not already set.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ArchiveProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = if cli.dry_run {
        process(&cli.url, &config).await.context("Processing failed")?
    } else {
        archive(&cli.url, &config).await.context("Archive failed")?
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if !cli.quiet {
        print_summary(&output);
    }
    Ok(())
}

/// Map CLI args to `ArchiveConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ArchiveConfig> {
    let mut builder = ArchiveConfig::builder()
        .classifier_backend(cli.classifier.clone().into())
        .initial_threshold(cli.threshold)
        .upload_delay_ms(cli.upload_delay_ms)
        .renderer_timeout_secs(cli.render_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let (Some(token), Some(db)) = (&cli.notion_token, &cli.database_id) {
        builder = builder.notion(token.clone(), db.clone());
    }
    if let Some(ref token) = cli.gyazo_token {
        builder = builder.image_host_token(token.clone());
    }
    if let Some(ref token) = cli.hf_token {
        builder = builder.inference_token(token.clone());
    }
    if let Some(ref model) = cli.inference_model {
        builder = builder.inference_model(model.clone());
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_summary(output: &ArchiveOutput) {
    let stats = &output.stats;
    match output.page_id {
        Some(ref id) => eprintln!(
            "{} {}  →  page {}",
            green("✔"),
            bold(&output.content.title),
            cyan(id)
        ),
        None => eprintln!("{} {}  (dry run)", cyan("◆"), bold(&output.content.title)),
    }
    eprintln!("   tags: {}", output.content.tags.join(", "));
    eprintln!(
        "   {}",
        dim(&format!(
            "{} blocks  {} images uploaded  {} split  {} substituted  {}ms",
            stats.published_blocks,
            stats.images_uploaded,
            stats.blocks_split,
            stats.blocks_substituted,
            stats.total_duration_ms
        ))
    );
}
