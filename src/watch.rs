//! The inbox watcher: poll, diff against the seen log, archive what is new.
//!
//! Every new URL is archived by spawning the archive binary as a separate
//! process, one at a time. A failing URL is logged and the watcher moves on;
//! it is not retried on the next poll because the seen log already holds it.

use crate::error::ArchiveError;
use crate::inbox::{retrieve_urls, Inbox};
use crate::seen::SeenLog;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// URLs found in the inbox window.
    pub found: usize,
    /// URLs not present in the seen log.
    pub new: Vec<String>,
    pub archived: usize,
    pub failed: usize,
}

/// Polls one inbox and archives each new URL in a child process.
pub struct Watcher {
    inbox: Arc<dyn Inbox>,
    client: reqwest::Client,
    seen: SeenLog,
    messages: usize,
    archive_command: Vec<String>,
}

impl Watcher {
    /// `archive_command` is the program and leading arguments; the URL is
    /// appended as the last argument.
    pub fn new(
        inbox: Arc<dyn Inbox>,
        client: reqwest::Client,
        seen: SeenLog,
        archive_command: Vec<String>,
    ) -> Result<Self, ArchiveError> {
        if archive_command.is_empty() {
            return Err(ArchiveError::InvalidConfig(
                "archive command must not be empty".into(),
            ));
        }
        Ok(Self {
            inbox,
            client,
            seen,
            messages: 5,
            archive_command,
        })
    }

    /// Messages read per poll (default 5).
    pub fn messages(mut self, n: usize) -> Self {
        self.messages = n.max(1);
        self
    }

    /// Poll once and archive every new URL sequentially.
    pub async fn run_once(&self) -> Result<PollSummary, ArchiveError> {
        let urls = retrieve_urls(self.inbox.as_ref(), &self.client, self.messages).await?;
        let new = self.seen.compare_and_save(&urls).await?;
        info!("Found {} URLs, {} new: {:?}", urls.len(), new.len(), new);

        let mut summary = PollSummary {
            found: urls.len(),
            ..PollSummary::default()
        };
        for url in &new {
            info!("Archiving {}", url);
            match self.archive_one(url).await {
                Ok(()) => {
                    info!("Finished archiving {}", url);
                    summary.archived += 1;
                }
                Err(e) => {
                    warn!("Failed to archive {}: {}", url, e);
                    summary.failed += 1;
                }
            }
        }
        summary.new = new;
        Ok(summary)
    }

    /// Poll once, or forever every `interval` until Ctrl-C.
    ///
    /// In the looping mode a failed poll is logged and the next one still
    /// runs.
    pub async fn run(&self, interval: Option<Duration>) -> Result<(), ArchiveError> {
        let Some(period) = interval else {
            self.run_once().await?;
            return Ok(());
        };

        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!("Poll failed: {}", e);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted; stopping watcher");
                    return Ok(());
                }
            }
        }
    }

    async fn archive_one(&self, url: &str) -> Result<(), ArchiveError> {
        let program = &self.archive_command[0];
        let status = tokio::process::Command::new(program)
            .args(&self.archive_command[1..])
            .arg(url)
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ArchiveError::SubprocessSpawn {
                program: program.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(ArchiveError::SubprocessFailed {
                program: program.clone(),
                status: status.to_string(),
                stderr: String::new(),
            })
        }
    }
}
