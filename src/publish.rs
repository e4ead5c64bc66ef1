//! Publishing to a Notion database.
//!
//! A run creates one page with three properties (`Name` title, `Tags`
//! multi-select, `URL`) and then appends the body blocks one request per
//! block, in order. One block per call keeps each request far below the
//! API's payload limits and pins a failure to a single block.

use crate::block::Block;
use crate::config::ArchiveConfig;
use crate::error::ArchiveError;
use crate::output::ProcessedContent;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

/// API version header sent with every request.
pub const NOTION_VERSION: &str = "2022-06-28";

/// Destination for archived pages.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create the page and return its identifier.
    async fn create_page(
        &self,
        title: &str,
        tags: &[String],
        url: &str,
    ) -> Result<String, ArchiveError>;

    /// Append `children` after the last child of `page_id`.
    async fn append_children(&self, page_id: &str, children: &[Block]) -> Result<(), ArchiveError>;
}

/// Notion REST client bound to one database.
#[derive(Debug, Clone)]
pub struct NotionClient {
    client: reqwest::Client,
    api_base: String,
    token: String,
    database_id: String,
}

#[derive(Deserialize)]
struct CreatedPage {
    id: String,
}

impl NotionClient {
    /// Build from config; requires `notion_token` and `database_id`.
    pub fn from_config(config: &ArchiveConfig) -> Result<Self, ArchiveError> {
        let token = non_empty(&config.notion_token).ok_or_else(|| {
            ArchiveError::InvalidConfig("Notion token missing. Set NOTION_ACCESS_TOKEN.".into())
        })?;
        let database_id = non_empty(&config.database_id).ok_or_else(|| {
            ArchiveError::InvalidConfig("Notion database missing. Set DATABASE_ID.".into())
        })?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.download_timeout_secs))
            .build()
            .map_err(|e| ArchiveError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: config.notion_api_base.trim_end_matches('/').to_string(),
            token,
            database_id,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ArchiveError> {
        let response = request
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .send()
            .await
            .map_err(|e| ArchiveError::PublishFailed {
                status: 0,
                detail: e.to_string(),
            })?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(ArchiveError::PublishAuth {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArchiveError::PublishFailed {
                status: status.as_u16(),
                detail: error_message(&body),
            });
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| ArchiveError::PublishFailed {
                status: status.as_u16(),
                detail: format!("unexpected response: {e}"),
            })
    }
}

#[async_trait]
impl Publisher for NotionClient {
    async fn create_page(
        &self,
        title: &str,
        tags: &[String],
        url: &str,
    ) -> Result<String, ArchiveError> {
        let body = page_body(&self.database_id, title, tags, url);
        let value = self
            .send(self.client.post(format!("{}/pages", self.api_base)).json(&body))
            .await?;
        let page: CreatedPage =
            serde_json::from_value(value).map_err(|e| ArchiveError::PublishFailed {
                status: 200,
                detail: format!("page response without id: {e}"),
            })?;
        info!("Created page {}", page.id);
        Ok(page.id)
    }

    async fn append_children(&self, page_id: &str, children: &[Block]) -> Result<(), ArchiveError> {
        let body = json!({ "children": children });
        self.send(
            self.client
                .patch(format!("{}/blocks/{}/children", self.api_base, page_id))
                .json(&body),
        )
        .await?;
        debug!("Appended {} block(s) to {}", children.len(), page_id);
        Ok(())
    }
}

/// Request body for page creation.
pub fn page_body(database_id: &str, title: &str, tags: &[String], url: &str) -> Value {
    let tags: Vec<Value> = tags.iter().map(|t| json!({ "name": t })).collect();
    json!({
        "parent": { "database_id": database_id },
        "properties": {
            "Name": { "title": [{ "text": { "content": title } }] },
            "Tags": { "multi_select": tags },
            "URL": { "url": url },
        }
    })
}

/// Create the page for `content` and append every block in order.
///
/// Stops at the first failed append; blocks already appended stay on the
/// page. Returns the page identifier.
pub async fn publish(
    publisher: &dyn Publisher,
    content: &ProcessedContent,
    progress: Option<&ProgressCallback>,
) -> Result<String, ArchiveError> {
    let page_id = publisher
        .create_page(&content.title, &content.tags, &content.url)
        .await?;

    let total = content.blocks.len();
    for (index, block) in content.blocks.iter().enumerate() {
        publisher
            .append_children(&page_id, std::slice::from_ref(block))
            .await?;
        if let Some(cb) = progress {
            cb.on_block_appended(index, total);
        }
    }

    info!("Published {} blocks to {}", total, page_id);
    if let Some(cb) = progress {
        cb.on_complete(&page_id, total);
    }
    Ok(page_id)
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
}

/// The API's `message` field, or the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::InlineSpan;
    use mockito::Matcher;
    use std::sync::Mutex;

    fn client(base: &str) -> NotionClient {
        let config = ArchiveConfig::builder()
            .notion("secret_test", "db123")
            .notion_api_base(base)
            .build()
            .unwrap();
        NotionClient::from_config(&config).unwrap()
    }

    #[test]
    fn page_body_shape() {
        let body = page_body("db", "Title", &["rust".into(), "web".into()], "https://x.org");
        assert_eq!(body["parent"]["database_id"], "db");
        assert_eq!(
            body["properties"]["Name"]["title"][0]["text"]["content"],
            "Title"
        );
        assert_eq!(body["properties"]["Tags"]["multi_select"][1]["name"], "web");
        assert_eq!(body["properties"]["URL"]["url"], "https://x.org");
    }

    #[test]
    fn missing_credentials_rejected() {
        assert!(NotionClient::from_config(&ArchiveConfig::default()).is_err());
    }

    #[test]
    fn error_message_prefers_api_message() {
        assert_eq!(
            error_message(r#"{"object":"error","message":"body.children invalid"}"#),
            "body.children invalid"
        );
        assert_eq!(error_message(" plain "), "plain");
    }

    #[tokio::test]
    async fn create_page_sends_properties() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("POST", "/pages")
            .match_header("authorization", "Bearer secret_test")
            .match_header("notion-version", NOTION_VERSION)
            .match_body(Matcher::PartialJson(json!({
                "parent": { "database_id": "db123" },
                "properties": { "URL": { "url": "https://x.org" } }
            })))
            .with_status(200)
            .with_body(r#"{"object":"page","id":"page-1"}"#)
            .create_async()
            .await;
        let id = client(&server.url())
            .create_page("T", &["rust".into()], "https://x.org")
            .await
            .unwrap();
        m.assert_async().await;
        assert_eq!(id, "page-1");
    }

    #[tokio::test]
    async fn append_sends_one_child() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("PATCH", "/blocks/page-1/children")
            .match_body(Matcher::Regex(r#""type":"paragraph""#.into()))
            .with_status(200)
            .with_body(r#"{"object":"list","results":[]}"#)
            .create_async()
            .await;
        client(&server.url())
            .append_children("page-1", &[Block::paragraph(vec![InlineSpan::plain("hi")])])
            .await
            .unwrap();
        m.assert_async().await;
    }

    #[tokio::test]
    async fn unauthorized_is_auth_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/pages")
            .with_status(401)
            .with_body(r#"{"message":"API token is invalid."}"#)
            .create_async()
            .await;
        let err = client(&server.url())
            .create_page("T", &[], "https://x.org")
            .await
            .unwrap_err();
        assert!(matches!(err, ArchiveError::PublishAuth { status: 401 }));
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn validation_error_carries_message() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("PATCH", "/blocks/p/children")
            .with_status(400)
            .with_body(r#"{"object":"error","message":"rich_text length exceeds 100"}"#)
            .create_async()
            .await;
        let err = client(&server.url())
            .append_children("p", &[Block::paragraph(Vec::new())])
            .await
            .unwrap_err();
        match err {
            ArchiveError::PublishFailed { status, detail } => {
                assert_eq!(status, 400);
                assert!(detail.contains("exceeds 100"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        appended: Mutex<Vec<String>>,
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl Publisher for RecordingPublisher {
        async fn create_page(&self, _: &str, _: &[String], _: &str) -> Result<String, ArchiveError> {
            Ok("p".into())
        }

        async fn append_children(&self, _: &str, children: &[Block]) -> Result<(), ArchiveError> {
            assert_eq!(children.len(), 1);
            let block = &children[0];
            let mut appended = self.appended.lock().unwrap();
            if Some(appended.len()) == self.fail_at {
                return Err(ArchiveError::PublishFailed {
                    status: 400,
                    detail: "bad block".into(),
                });
            }
            let text = block
                .rich_text()
                .and_then(|rt| rt.first())
                .map(|s| s.text.clone())
                .unwrap_or_default();
            appended.push(text);
            Ok(())
        }
    }

    fn content(n: usize) -> ProcessedContent {
        ProcessedContent {
            title: "T".into(),
            url: "https://x.org".into(),
            blocks: (0..n)
                .map(|i| Block::paragraph(vec![InlineSpan::plain(i.to_string())]))
                .collect(),
            ..ProcessedContent::default()
        }
    }

    #[tokio::test]
    async fn publish_appends_in_order() {
        let p = RecordingPublisher::default();
        let id = publish(&p, &content(3), None).await.unwrap();
        assert_eq!(id, "p");
        assert_eq!(*p.appended.lock().unwrap(), vec!["0", "1", "2"]);
    }

    #[tokio::test]
    async fn publish_stops_at_first_failure() {
        let p = RecordingPublisher {
            fail_at: Some(1),
            ..RecordingPublisher::default()
        };
        assert!(publish(&p, &content(3), None).await.is_err());
        assert_eq!(*p.appended.lock().unwrap(), vec!["0"]);
    }
}
