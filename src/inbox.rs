//! Direct-message inbox the watcher polls for URLs.
//!
//! Messages whose text starts with `http` are URL candidates. Each one is
//! resolved through a redirect-following GET so shortened links (`t.co`)
//! end up as the canonical URL that the seen log and the archive use.

use crate::error::ArchiveError;
use crate::pipeline::input;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Default X/Twitter API base.
pub const TWITTER_API_BASE: &str = "https://api.twitter.com";

/// A source of recent direct-message texts, newest first.
#[async_trait]
pub trait Inbox: Send + Sync {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<String>, ArchiveError>;
}

/// X/Twitter API v2 direct-message events with one participant.
#[derive(Debug, Clone)]
pub struct TwitterInbox {
    client: reqwest::Client,
    api_base: String,
    bearer_token: String,
    participant: Participant,
}

/// The conversation partner, by handle or by numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Participant {
    Username(String),
    Id(String),
}

#[derive(Deserialize)]
struct UserResponse {
    data: UserData,
}

#[derive(Deserialize)]
struct UserData {
    id: String,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    data: Vec<Event>,
}

#[derive(Deserialize)]
struct Event {
    #[serde(default)]
    text: Option<String>,
}

impl TwitterInbox {
    pub fn new(bearer_token: impl Into<String>, participant: Participant) -> Result<Self, ArchiveError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| ArchiveError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: TWITTER_API_BASE.to_string(),
            bearer_token: bearer_token.into(),
            participant,
        })
    }

    /// Point at another API base (tests, proxies).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, ArchiveError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.bearer_token)
            .send()
            .await
            .map_err(|e| ArchiveError::InboxFailed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ArchiveError::InboxFailed(format!(
                "HTTP {} from {}: {}",
                status,
                url,
                body.trim()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| ArchiveError::InboxFailed(format!("unexpected response: {e}")))
    }

    async fn participant_id(&self) -> Result<String, ArchiveError> {
        match &self.participant {
            Participant::Id(id) => Ok(id.clone()),
            Participant::Username(name) => {
                let url = format!("{}/2/users/by/username/{}", self.api_base, name);
                let user: UserResponse = self.get_json(&url).await?;
                debug!("Resolved @{} to user id {}", name, user.data.id);
                Ok(user.data.id)
            }
        }
    }
}

#[async_trait]
impl Inbox for TwitterInbox {
    async fn recent_messages(&self, limit: usize) -> Result<Vec<String>, ArchiveError> {
        let id = self.participant_id().await?;
        // The endpoint rejects max_results below 1 or above 100.
        let max_results = limit.clamp(1, 100);
        let url = format!(
            "{}/2/dm_conversations/with/{}/dm_events?max_results={}&dm_event_fields=text",
            self.api_base, id, max_results
        );
        let events: EventsResponse = self.get_json(&url).await?;
        Ok(events
            .data
            .into_iter()
            .filter_map(|e| e.text)
            .take(limit)
            .collect())
    }
}

/// Poll `inbox` and return the canonical URLs found in its messages.
///
/// A candidate whose redirect resolution fails is logged and skipped.
pub async fn retrieve_urls(
    inbox: &dyn Inbox,
    client: &reqwest::Client,
    limit: usize,
) -> Result<Vec<String>, ArchiveError> {
    let messages = inbox.recent_messages(limit).await?;
    let mut urls = Vec::new();
    for text in messages {
        let candidate = text.trim();
        if !candidate.starts_with("http") {
            continue;
        }
        match input::resolve_url(client, candidate).await {
            Ok(url) => urls.push(url),
            Err(e) => warn!("Skipping message '{}': {}", candidate, e),
        }
    }
    debug!("Inbox yielded {} URLs", urls.len());
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    struct FixedInbox(Vec<String>);

    #[async_trait]
    impl Inbox for FixedInbox {
        async fn recent_messages(&self, limit: usize) -> Result<Vec<String>, ArchiveError> {
            Ok(self.0.iter().take(limit).cloned().collect())
        }
    }

    #[tokio::test]
    async fn reads_events_by_username() {
        let mut server = mockito::Server::new_async().await;
        let user = server
            .mock("GET", "/2/users/by/username/alice")
            .match_header("authorization", "Bearer tw_test")
            .with_status(200)
            .with_body(r#"{"data":{"id":"42","name":"Alice","username":"alice"}}"#)
            .create_async()
            .await;
        let events = server
            .mock("GET", "/2/dm_conversations/with/42/dm_events")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("max_results".into(), "5".into()),
                Matcher::UrlEncoded("dm_event_fields".into(), "text".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"data":[{"id":"1","event_type":"MessageCreate","text":"https://a.org"},
                           {"id":"2","event_type":"ParticipantsJoin"},
                           {"id":"3","event_type":"MessageCreate","text":"hi"}]}"#,
            )
            .create_async()
            .await;

        let inbox = TwitterInbox::new("tw_test", Participant::Username("alice".into()))
            .unwrap()
            .with_api_base(server.url());
        let messages = inbox.recent_messages(5).await.unwrap();
        user.assert_async().await;
        events.assert_async().await;
        assert_eq!(messages, vec!["https://a.org".to_string(), "hi".to_string()]);
    }

    #[tokio::test]
    async fn empty_conversation_has_no_data() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", Matcher::Regex("^/2/dm_conversations/with/7/dm_events".into()))
            .with_status(200)
            .with_body(r#"{"meta":{"result_count":0}}"#)
            .create_async()
            .await;
        let inbox = TwitterInbox::new("t", Participant::Id("7".into()))
            .unwrap()
            .with_api_base(server.url());
        assert!(inbox.recent_messages(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn api_error_is_inbox_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/2/users/by/username/bob")
            .with_status(401)
            .create_async()
            .await;
        let inbox = TwitterInbox::new("bad", Participant::Username("bob".into()))
            .unwrap()
            .with_api_base(server.url());
        let err = inbox.recent_messages(5).await.unwrap_err();
        assert!(matches!(err, ArchiveError::InboxFailed(_)));
    }

    #[tokio::test]
    async fn retrieve_resolves_only_http_messages() {
        let mut server = mockito::Server::new_async().await;
        let target = format!("{}/article", server.url());
        let _short = server
            .mock("GET", "/s/abc")
            .with_status(301)
            .with_header("location", &target)
            .create_async()
            .await;
        let _article = server
            .mock("GET", "/article")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;
        let inbox = FixedInbox(vec![
            format!("{}/s/abc", server.url()),
            "thanks!".into(),
            "see http://x".into(),
        ]);
        let client = reqwest::Client::new();
        let urls = retrieve_urls(&inbox, &client, 5).await.unwrap();
        assert_eq!(urls, vec![target]);
    }
}
