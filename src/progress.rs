//! Progress-callback trait for archive run events.
//!
//! Inject an [`Arc<dyn ArchiveProgressCallback>`] via
//! [`crate::config::ArchiveConfigBuilder::progress_callback`] to receive
//! events as the pipeline moves through its stages, rehosts images and
//! appends blocks. The CLI drives an `indicatif` bar from these.
//!
//! # Example
//!
//! ```rust
//! use notion_archive::{ArchiveProgressCallback, ArchiveConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     appended: Arc<AtomicUsize>,
//! }
//!
//! impl ArchiveProgressCallback for CountingCallback {
//!     fn on_block_appended(&self, index: usize, total: usize) {
//!         self.appended.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("block {}/{}", index + 1, total);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     appended: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ArchiveConfig::builder()
//!     .progress_callback(counter as Arc<dyn ArchiveProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Pipeline stage reported to [`ArchiveProgressCallback::on_stage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Extract,
    Classify,
    Convert,
    PostProcess,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolve => "resolve",
            Stage::Extract => "extract",
            Stage::Classify => "classify",
            Stage::Convert => "convert",
            Stage::PostProcess => "post-process",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

/// Called by the archive pipeline as it processes one URL.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Events arrive sequentially from a single task.
pub trait ArchiveProgressCallback: Send + Sync {
    /// Called when the pipeline enters a stage.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called once tags are chosen.
    fn on_tags(&self, tags: &[String]) {
        let _ = tags;
    }

    /// Called after an image was uploaded and its block rewritten.
    ///
    /// # Arguments
    /// * `original`: the reference as it appeared in the block
    /// * `hosted`: the URL returned by the image host
    fn on_image_rehosted(&self, original: &str, hosted: &str) {
        let _ = (original, hosted);
    }

    /// Called after each block append call succeeds.
    ///
    /// # Arguments
    /// * `index`: 0-indexed position of the block in publish order
    /// * `total`: number of blocks that will be appended
    fn on_block_appended(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// Called once the page exists and every block was appended.
    fn on_complete(&self, page_id: &str, blocks: usize) {
        let _ = (page_id, blocks);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ArchiveProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ArchiveConfig`].
pub type ProgressCallback = Arc<dyn ArchiveProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct TrackingCallback {
        stages: Mutex<Vec<Stage>>,
        rehosted: AtomicUsize,
        appended: AtomicUsize,
        completed_blocks: AtomicUsize,
    }

    impl ArchiveProgressCallback for TrackingCallback {
        fn on_stage(&self, stage: Stage) {
            self.stages.lock().unwrap().push(stage);
        }

        fn on_image_rehosted(&self, _original: &str, _hosted: &str) {
            self.rehosted.fetch_add(1, Ordering::SeqCst);
        }

        fn on_block_appended(&self, _index: usize, _total: usize) {
            self.appended.fetch_add(1, Ordering::SeqCst);
        }

        fn on_complete(&self, _page_id: &str, blocks: usize) {
            self.completed_blocks.store(blocks, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage(Stage::Extract);
        cb.on_tags(&["web".to_string()]);
        cb.on_image_rehosted("a.png", "https://i.gyazo.com/x.png");
        cb.on_block_appended(0, 3);
        cb.on_complete("page", 3);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback::default();

        tracker.on_stage(Stage::Resolve);
        tracker.on_stage(Stage::Publish);
        tracker.on_image_rehosted("fig.png", "https://i.gyazo.com/1.png");
        for i in 0..3 {
            tracker.on_block_appended(i, 3);
        }
        tracker.on_complete("abc", 3);

        assert_eq!(
            *tracker.stages.lock().unwrap(),
            vec![Stage::Resolve, Stage::Publish]
        );
        assert_eq!(tracker.rehosted.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.appended.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completed_blocks.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stage_display() {
        assert_eq!(Stage::PostProcess.to_string(), "post-process");
    }
}
