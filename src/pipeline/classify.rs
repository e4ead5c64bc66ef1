//! Adaptive multi-label tagging.
//!
//! The classifier is called exactly once per run and returns an independent
//! score per candidate label. Picking the tags is then a pure search over
//! those scores: start at the configured threshold and move it in fixed
//! steps until between one and `upper_bound - 1` labels clear it, giving up
//! after a bounded number of steps.
//!
//! The threshold at step `k` is computed as `initial + k * step` rather than
//! accumulated, so the search visits exactly the same thresholds regardless
//! of float rounding.

use crate::config::ThresholdSearch;
use crate::error::ArchiveError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Confidence that `label` applies, in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// A zero-shot, multi-label text classifier.
///
/// Scores must be independent per label (multi-label), not a softmax over
/// the candidates.
#[async_trait]
pub trait ZeroShotClassifier: Send + Sync {
    async fn scores(&self, text: &str, labels: &[String]) -> Result<Vec<LabelScore>, ArchiveError>;
}

/// Result of [`search`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Selected labels, highest score first.
    pub labels: Vec<String>,
    /// Threshold the labels were selected at.
    pub threshold: f32,
    /// Threshold adjustments made.
    pub iterations: u32,
    /// Whether the iteration cap was hit before reaching the target band.
    pub exhausted: bool,
}

/// Build the candidate list: the vocabulary followed by source categories,
/// trimmed, without empties and without case-insensitive duplicates.
pub fn candidate_labels(vocabulary: &[String], source_categories: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    vocabulary
        .iter()
        .chain(source_categories)
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .filter(|l| seen.insert(l.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Select labels from `scores` by adjusting the threshold.
pub fn search(scores: &[LabelScore], params: &ThresholdSearch) -> SearchOutcome {
    let threshold_at = |k: i32| params.initial_threshold + k as f32 * params.step;
    let mut k: i32 = 0;
    let mut iterations: u32 = 0;

    loop {
        let threshold = threshold_at(k);
        let labels = select(scores, threshold);
        let n = labels.len();
        let in_band = n >= 1 && n < params.upper_bound;

        if in_band || scores.is_empty() || iterations >= params.max_iterations {
            let exhausted = !in_band && !scores.is_empty();
            if exhausted {
                warn!(
                    "Tag search exhausted after {} iterations at threshold {:.2} ({} tags)",
                    iterations, threshold, n
                );
            }
            return SearchOutcome {
                labels,
                threshold,
                iterations,
                exhausted,
            };
        }

        if n == 0 {
            k -= 1;
        } else {
            k += 1;
        }
        iterations += 1;
        debug!("{} tags at {:.2}; moving to {:.2}", n, threshold, threshold_at(k));
    }
}

/// Labels scoring strictly above `threshold`, best first, deduplicated.
fn select(scores: &[LabelScore], threshold: f32) -> Vec<String> {
    let mut above: Vec<&LabelScore> = scores.iter().filter(|s| s.score > threshold).collect();
    above.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen = HashSet::new();
    above
        .into_iter()
        .filter(|s| seen.insert(s.label.as_str()))
        .map(|s| s.label.clone())
        .collect()
}

/// Call `classifier` once under `timeout` and search its scores.
pub async fn classify(
    classifier: &dyn ZeroShotClassifier,
    text: &str,
    labels: &[String],
    params: &ThresholdSearch,
    timeout: Duration,
) -> Result<SearchOutcome, ArchiveError> {
    let scores = tokio::time::timeout(timeout, classifier.scores(text, labels))
        .await
        .map_err(|_| ArchiveError::ClassificationTimeout {
            secs: timeout.as_secs(),
        })??;
    validate(&scores)?;

    let outcome = search(&scores, params);
    info!(
        "Tags {:?} at threshold {:.2} after {} iterations",
        outcome.labels, outcome.threshold, outcome.iterations
    );
    Ok(outcome)
}

fn validate(scores: &[LabelScore]) -> Result<(), ArchiveError> {
    if scores.is_empty() {
        return Err(ArchiveError::ClassificationFailed {
            reason: "classifier returned no scores".into(),
        });
    }
    if let Some(bad) = scores
        .iter()
        .find(|s| !s.score.is_finite() || !(0.0..=1.0).contains(&s.score))
    {
        return Err(ArchiveError::ClassificationFailed {
            reason: format!("score {} for '{}' is outside [0, 1]", bad.score, bad.label),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ThresholdSearch {
        ThresholdSearch::default()
    }

    fn scores(pairs: &[(&str, f32)]) -> Vec<LabelScore> {
        pairs.iter().map(|(l, s)| LabelScore::new(*l, *s)).collect()
    }

    #[test]
    fn in_band_at_initial_threshold() {
        let s = scores(&[("web", 0.9), ("python", 0.5), ("git", 0.1)]);
        let out = search(&s, &params());
        assert_eq!(out.labels, vec!["web", "python"]);
        assert_eq!(out.iterations, 0);
        assert!(!out.exhausted);
    }

    #[test]
    fn lowers_threshold_when_nothing_clears() {
        let s = scores(&[("web", 0.33), ("git", 0.1)]);
        let out = search(&s, &params());
        // 0.45 → 0.40 → 0.35 → 0.30
        assert_eq!(out.labels, vec!["web"]);
        assert_eq!(out.iterations, 3);
    }

    #[test]
    fn raises_threshold_when_too_many() {
        let s = scores(&[("a", 0.9), ("b", 0.8), ("c", 0.7), ("d", 0.48), ("e", 0.47)]);
        let out = search(&s, &params());
        assert_eq!(out.labels, vec!["a", "b", "c"]);
        assert_eq!(out.iterations, 1);
    }

    #[test]
    fn oscillation_terminates_and_reports_exhaustion() {
        // Four labels with identical scores: either 0 or 4 clear any threshold.
        let s = scores(&[("a", 0.5), ("b", 0.5), ("c", 0.5), ("d", 0.5)]);
        let out = search(&s, &params());
        assert!(out.exhausted);
        assert_eq!(out.iterations, 10);
        assert!(out.labels.is_empty() || out.labels.len() == 4);
    }

    #[test]
    fn every_input_terminates_within_cap() {
        let all_low = scores(&[("a", 0.0), ("b", 0.0)]);
        let all_high = scores(&[("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0), ("e", 1.0)]);
        let low = search(&all_low, &params());
        assert!(low.iterations <= 10);
        let high = search(&all_high, &params());
        assert_eq!(high.iterations, 10);
        assert!(high.exhausted);
        assert_eq!(high.labels.len(), 5);
    }

    #[test]
    fn strictly_greater_than_threshold() {
        let s = scores(&[("edge", 0.45)]);
        let out = search(&s, &params());
        assert_eq!(out.iterations, 1);
        assert_eq!(out.labels, vec!["edge"]);
    }

    #[test]
    fn candidate_labels_dedup_case_insensitive() {
        let vocab = vec!["python".to_string(), "web".to_string()];
        let extra = vec!["Python".to_string(), " rust ".to_string(), "".to_string()];
        assert_eq!(candidate_labels(&vocab, &extra), vec!["python", "web", "rust"]);
    }

    struct Fixed(Vec<LabelScore>);

    #[async_trait]
    impl ZeroShotClassifier for Fixed {
        async fn scores(&self, _t: &str, _l: &[String]) -> Result<Vec<LabelScore>, ArchiveError> {
            Ok(self.0.clone())
        }
    }

    struct Hanging;

    #[async_trait]
    impl ZeroShotClassifier for Hanging {
        async fn scores(&self, _t: &str, _l: &[String]) -> Result<Vec<LabelScore>, ArchiveError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn classify_runs_search() {
        let c = Fixed(scores(&[("web", 0.8), ("git", 0.2)]));
        let out = classify(&c, "text", &[], &params(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.labels, vec!["web"]);
    }

    #[tokio::test]
    async fn classify_rejects_out_of_range_scores() {
        let c = Fixed(scores(&[("web", 1.7)]));
        let err = classify(&c, "text", &[], &params(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ClassificationFailed { .. }));
    }

    #[tokio::test]
    async fn classify_times_out() {
        let err = classify(&Hanging, "text", &[], &params(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::ClassificationTimeout { .. }));
    }
}
