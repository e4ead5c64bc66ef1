//! Zero-shot classification over an NLI inference endpoint.
//!
//! Sends one `zero-shot-classification` request with `multi_label = true`,
//! so each label is scored by its own entailment probability. Two response
//! shapes are accepted: the classic `{labels, scores}` object and the list
//! of `{label, score}` pairs newer inference routers return.
//!
//! ## Retry Strategy
//!
//! Hosted endpoints answer 503 while a cold model loads and 429 under rate
//! limiting. Both are retried with exponential backoff
//! (`retry_backoff_ms * 2^attempt`); every other status fails at once.

use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::pipeline::classify::{LabelScore, ZeroShotClassifier};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Classifier backed by a Hugging Face style inference endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClassifier {
    client: reqwest::Client,
    url: String,
    token: String,
    hypothesis_template: String,
    max_retries: u32,
    retry_backoff_ms: u64,
}

#[derive(Serialize)]
struct Request<'a> {
    inputs: &'a str,
    parameters: Parameters<'a>,
}

#[derive(Serialize)]
struct Parameters<'a> {
    candidate_labels: &'a [String],
    multi_label: bool,
    hypothesis_template: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Response {
    Columns { labels: Vec<String>, scores: Vec<f32> },
    Pairs(Vec<LabelScore>),
}

impl Response {
    fn into_scores(self) -> Result<Vec<LabelScore>, ArchiveError> {
        match self {
            Response::Columns { labels, scores } => {
                if labels.len() != scores.len() {
                    return Err(ArchiveError::ClassificationFailed {
                        reason: format!(
                            "{} labels but {} scores in response",
                            labels.len(),
                            scores.len()
                        ),
                    });
                }
                Ok(labels
                    .into_iter()
                    .zip(scores)
                    .map(|(label, score)| LabelScore { label, score })
                    .collect())
            }
            Response::Pairs(pairs) => Ok(pairs),
        }
    }
}

impl InferenceClassifier {
    /// Build from config; requires `inference_token`.
    pub fn from_config(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let token = config
            .inference_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ArchiveError::ClassifierNotConfigured {
                backend: "inference".into(),
                hint: "Set HF_API_TOKEN (or --hf-token), or choose --classifier llm.".into(),
            })?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ArchiveError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: format!(
                "{}/{}",
                config.inference_endpoint.trim_end_matches('/'),
                config.inference_model
            ),
            token,
            hypothesis_template: config.hypothesis_template.clone(),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        })
    }

    async fn request_once(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<Vec<LabelScore>, (bool, String)> {
        let body = Request {
            inputs: text,
            parameters: Parameters {
                candidate_labels: labels,
                multi_label: true,
                hypothesis_template: &self.hypothesis_template,
            },
        };
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .map_err(|e| (e.is_timeout() || e.is_connect(), e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = matches!(
                status,
                StatusCode::SERVICE_UNAVAILABLE | StatusCode::TOO_MANY_REQUESTS
            );
            let detail = response.text().await.unwrap_or_default();
            return Err((retryable, format!("HTTP {}: {}", status, detail.trim())));
        }

        let parsed: Response = response
            .json()
            .await
            .map_err(|e| (false, format!("unexpected response: {e}")))?;
        parsed.into_scores().map_err(|e| (false, e.to_string()))
    }
}

#[async_trait]
impl ZeroShotClassifier for InferenceClassifier {
    async fn scores(&self, text: &str, labels: &[String]) -> Result<Vec<LabelScore>, ArchiveError> {
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Classifier: retry {}/{} after {}ms",
                    attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }
            match self.request_once(text, labels).await {
                Ok(scores) => {
                    debug!("Classifier returned {} scores", scores.len());
                    return Ok(scores);
                }
                Err((retryable, detail)) => {
                    warn!("Classifier: attempt {} failed — {}", attempt + 1, detail);
                    last_err = detail;
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(ArchiveError::ClassificationFailed { reason: last_err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn config(endpoint: &str) -> ArchiveConfig {
        ArchiveConfig::builder()
            .inference_endpoint(endpoint)
            .inference_model("test/nli")
            .inference_token("hf_test")
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn missing_token_is_not_configured() {
        let err = InferenceClassifier::from_config(&ArchiveConfig::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::ClassifierNotConfigured { .. }));
    }

    #[tokio::test]
    async fn parses_column_response() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/test/nli")
            .match_header("authorization", "Bearer hf_test")
            .match_body(Matcher::PartialJson(json!({
                "parameters": { "multi_label": true, "hypothesis_template": "This text is about {}." }
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"sequence":"x","labels":["web","git"],"scores":[0.9,0.1]}"#)
            .create_async()
            .await;
        let c = InferenceClassifier::from_config(&config(&server.url())).unwrap();
        let scores = c
            .scores("x", &["web".to_string(), "git".to_string()])
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(scores[0], LabelScore::new("web", 0.9));
        assert_eq!(scores.len(), 2);
    }

    #[tokio::test]
    async fn parses_pair_response() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/test/nli")
            .with_status(200)
            .with_body(r#"[{"label":"api","score":0.7}]"#)
            .create_async()
            .await;
        let c = InferenceClassifier::from_config(&config(&server.url())).unwrap();
        let scores = c.scores("x", &["api".to_string()]).await.unwrap();
        assert_eq!(scores, vec![LabelScore::new("api", 0.7)]);
    }

    #[tokio::test]
    async fn retries_on_503_then_fails() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/test/nli")
            .with_status(503)
            .with_body("loading")
            .expect(4)
            .create_async()
            .await;
        let c = InferenceClassifier::from_config(&config(&server.url())).unwrap();
        let err = c.scores("x", &["api".to_string()]).await.unwrap_err();
        m.assert_async().await;
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn does_not_retry_on_400() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/test/nli")
            .with_status(400)
            .expect(1)
            .create_async()
            .await;
        let c = InferenceClassifier::from_config(&config(&server.url())).unwrap();
        assert!(c.scores("x", &["api".to_string()]).await.is_err());
        m.assert_async().await;
    }
}
