//! Inbox watcher binary.
//!
//! Polls the direct messages exchanged with one account, and runs
//! `notion-archive <url>` for every URL not seen in the previous poll.

use anyhow::{Context, Result};
use clap::Parser;
use notion_archive::pipeline::input;
use notion_archive::{Participant, SeenLog, TwitterInbox, Watcher};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Watch a direct-message inbox and archive every new URL.
#[derive(Parser, Debug)]
#[command(
    name = "archive-watch",
    version,
    about = "Archive URLs sent by direct message into Notion",
    color = clap::ColorChoice::Auto
)]
struct Cli {
    /// OAuth 2.0 user-context bearer token with dm.read scope.
    #[arg(long, env = "TWITTER_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: String,

    /// Handle of the account whose conversation is polled.
    #[arg(long, env = "TWITTER_USER_NAME", conflicts_with = "user_id")]
    user_name: Option<String>,

    /// Numeric id of that account; skips the handle lookup.
    #[arg(long, env = "TWITTER_USER_ID")]
    user_id: Option<String>,

    /// Newline-delimited log of URLs seen in the previous poll.
    #[arg(long, env = "URLS_LOG_PATH", default_value = "urls.log")]
    seen_log: PathBuf,

    /// Messages read per poll.
    #[arg(long, env = "ARCHIVE_WATCH_MESSAGES", default_value_t = 5)]
    messages: usize,

    /// Poll every N seconds instead of once.
    #[arg(long, env = "ARCHIVE_WATCH_INTERVAL")]
    interval: Option<u64>,

    /// Archive program; defaults to the notion-archive next to this binary.
    #[arg(long, env = "ARCHIVE_COMMAND")]
    archive_command: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if cli.verbose { "debug" } else { "info" })
        }))
        .with_writer(io::stderr)
        .init();

    let participant = match (&cli.user_id, &cli.user_name) {
        (Some(id), _) => Participant::Id(id.clone()),
        (None, Some(name)) => Participant::Username(name.clone()),
        (None, None) => anyhow::bail!("Set --user-name (TWITTER_USER_NAME) or --user-id"),
    };
    let inbox = TwitterInbox::new(cli.bearer_token.clone(), participant)
        .context("Failed to create inbox client")?;
    let client = input::http_client(30).context("Failed to create HTTP client")?;
    let program = match cli.archive_command {
        Some(ref p) => p.clone(),
        None => sibling_binary("notion-archive")?,
    };

    let watcher = Watcher::new(
        Arc::new(inbox),
        client,
        SeenLog::new(&cli.seen_log),
        vec![program.to_string_lossy().into_owned()],
    )?
    .messages(cli.messages);

    info!("Starting direct message watcher");
    watcher
        .run(cli.interval.map(Duration::from_secs))
        .await
        .context("Watcher failed")?;
    Ok(())
}

/// Path of `name` in the directory holding the current executable.
fn sibling_binary(name: &str) -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Cannot locate current executable")?;
    let dir = exe
        .parent()
        .context("Current executable has no parent directory")?;
    Ok(dir.join(format!("{name}{}", std::env::consts::EXE_SUFFIX)))
}
