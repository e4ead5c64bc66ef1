//! Zero-shot classification with a chat model.
//!
//! An alternative to the NLI endpoint for setups that already have an LLM
//! provider configured. The model is asked for a JSON object of independent
//! per-label scores (see [`crate::prompts`]); labels it leaves out score 0.
//!
//! ## Retry Strategy
//!
//! Provider errors and unparseable replies are both retried with exponential
//! backoff (`retry_backoff_ms * 2^attempt`): with 500 ms base and 3 retries
//! the wait sequence is 500 ms → 1 s → 2 s.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::pipeline::classify::{LabelScore, ZeroShotClassifier};
use crate::prompts::{classifier_user_prompt, CLASSIFIER_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Classifier that prompts an `edgequake-llm` chat provider.
pub struct LlmClassifier {
    provider: Arc<dyn LLMProvider>,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl LlmClassifier {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &ArchiveConfig) -> Self {
        Self {
            provider,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

#[async_trait]
impl ZeroShotClassifier for LlmClassifier {
    async fn scores(&self, text: &str, labels: &[String]) -> Result<Vec<LabelScore>, ArchiveError> {
        let messages = vec![
            ChatMessage::system(CLASSIFIER_SYSTEM_PROMPT),
            ChatMessage::user(classifier_user_prompt(text, labels)),
        ];
        let options = build_options();

        let mut last_err = String::from("Unknown error");
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Classifier: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "Classifier: {} input tokens, {} output tokens",
                        response.prompt_tokens, response.completion_tokens
                    );
                    match parse_scores(&response.content, labels) {
                        Ok(scores) => return Ok(scores),
                        Err(e) => {
                            warn!("Classifier: attempt {} unparseable — {}", attempt + 1, e);
                            last_err = e;
                        }
                    }
                }
                Err(e) => {
                    let err_msg = format!("{}", e);
                    warn!("Classifier: attempt {} failed — {}", attempt + 1, err_msg);
                    last_err = err_msg;
                }
            }
        }

        Err(ArchiveError::ClassificationFailed { reason: last_err })
    }
}

fn build_options() -> CompletionOptions {
    CompletionOptions {
        temperature: Some(0.0),
        max_tokens: Some(1024),
        ..Default::default()
    }
}

/// Parse the model's JSON object into one score per candidate label.
///
/// Tolerates a surrounding code fence or prose by taking the outermost
/// `{...}`. Label matching is case-insensitive; scores are clamped to [0, 1].
pub fn parse_scores(content: &str, labels: &[String]) -> Result<Vec<LabelScore>, String> {
    let start = content.find('{').ok_or("no JSON object in reply")?;
    let end = content.rfind('}').ok_or("no JSON object in reply")?;
    if end < start {
        return Err("no JSON object in reply".into());
    }
    let raw: HashMap<String, serde_json::Value> =
        serde_json::from_str(&content[start..=end]).map_err(|e| format!("invalid JSON: {e}"))?;
    let by_label: HashMap<String, f32> = raw
        .into_iter()
        .filter_map(|(k, v)| v.as_f64().map(|s| (k.trim().to_lowercase(), s as f32)))
        .collect();
    if by_label.is_empty() {
        return Err("reply contains no numeric scores".into());
    }
    Ok(labels
        .iter()
        .map(|label| {
            let score = by_label
                .get(&label.to_lowercase())
                .copied()
                .unwrap_or(0.0);
            LabelScore::new(label.clone(), score.clamp(0.0, 1.0))
        })
        .collect())
}
