//! Change detection for the watcher.
//!
//! The log is a newline-delimited file of the URLs seen in the previous
//! poll. Each comparison reads it, reports what is new, and rewrites it
//! with the current batch, so a URL that drops out of the inbox window and
//! later reappears is treated as new again.

use crate::error::ArchiveError;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Newline-delimited log of previously seen URLs.
#[derive(Debug, Clone)]
pub struct SeenLog {
    path: PathBuf,
}

impl SeenLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the URLs in `incoming` that are not in the log, in incoming
    /// order without duplicates, then replace the log with `incoming`.
    ///
    /// A missing log is created empty first.
    pub async fn compare_and_save(&self, incoming: &[String]) -> Result<Vec<String>, ArchiveError> {
        let io_err = |source: std::io::Error| ArchiveError::SeenLog {
            path: self.path.clone(),
            source,
        };

        if !tokio::fs::try_exists(&self.path).await.map_err(io_err)? {
            tokio::fs::write(&self.path, "").await.map_err(io_err)?;
        }
        let previous = tokio::fs::read_to_string(&self.path).await.map_err(io_err)?;
        let seen: HashSet<&str> = previous
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let mut emitted = HashSet::new();
        let fresh: Vec<String> = incoming
            .iter()
            .filter(|url| !seen.contains(url.as_str()) && emitted.insert(url.as_str()))
            .cloned()
            .collect();

        let mut body = incoming.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        tokio::fs::write(&self.path, body).await.map_err(io_err)?;

        debug!(
            "Seen log {}: {} incoming, {} new",
            self.path.display(),
            incoming.len(),
            fresh.len()
        );
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn urls(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn reports_difference_and_rewrites() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.log");
        std::fs::write(&path, "b\n").unwrap();
        let log = SeenLog::new(&path);

        let fresh = log.compare_and_save(&urls(&["a", "b", "c"])).await.unwrap();
        assert_eq!(fresh, urls(&["a", "c"]));

        let saved = std::fs::read_to_string(&path).unwrap();
        assert_eq!(saved.lines().collect::<Vec<_>>(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn missing_log_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let log = SeenLog::new(dir.path().join("urls.log"));
        let fresh = log.compare_and_save(&urls(&["a", "a"])).await.unwrap();
        assert_eq!(fresh, urls(&["a"]));
        assert!(log.path().exists());
    }

    #[tokio::test]
    async fn second_poll_sees_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let log = SeenLog::new(dir.path().join("urls.log"));
        log.compare_and_save(&urls(&["x", "y"])).await.unwrap();
        assert!(log.compare_and_save(&urls(&["y", "x"])).await.unwrap().is_empty());
    }

    #[test]
    fn unreadable_log_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be.
        let log = SeenLog::new(dir.path());
        let err = tokio_test::assert_err!(tokio_test::block_on(
            log.compare_and_save(&urls(&["a"]))
        ));
        assert!(matches!(err, ArchiveError::SeenLog { .. }));
    }

    #[tokio::test]
    async fn empty_batch_clears_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.log");
        std::fs::write(&path, "old\n").unwrap();
        let log = SeenLog::new(&path);
        assert!(log.compare_and_save(&[]).await.unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
