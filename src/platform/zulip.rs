//! Zulip platform driver over Zulip's REST API (no official Rust SDK, so
//! this talks to `/api/v1` directly via `reqwest`, the same way the
//! teacher's Slack/Discord drivers wrap their SDK's HTTP client).

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::OnceLock;
use url::Url;

use crate::conversation::message_builder::NewMessageInput;
use crate::error::{PlatformError, Result};
use crate::platform::{HistoryPage, PlatformDriver, SendMessageRequest};

fn attachment_link_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\[([^\]]+)\]\((/user_uploads/[^)]+)\)").unwrap())
}

/// Extract `(filename, path)` pairs for every Zulip-hosted upload link in a
/// message body. Zulip inlines uploads as plain markdown links rather than
/// a structured attachments field, so downstream code has to scrape them.
pub fn extract_attachment_links(content: &str) -> Vec<(String, String)> {
    attachment_link_pattern()
        .captures_iter(content)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<ZulipMessage>,
    found_newest: Option<bool>,
    found_oldest: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ZulipMessage {
    id: u64,
    sender_id: u64,
    sender_full_name: String,
    content: String,
    timestamp: i64,
    #[serde(default)]
    reactions: Vec<ZulipReaction>,
    #[serde(default)]
    flags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ZulipReaction {
    emoji_name: String,
}

pub struct ZulipAdapter {
    site: String,
    email: String,
    api_key: String,
    client: Client,
}

impl ZulipAdapter {
    pub fn new(site: impl Into<String>, email: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            email: email.into(),
            api_key: api_key.into(),
            client: Client::new(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/v1/{}", self.site.trim_end_matches('/'), path)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.email, Some(&self.api_key))
    }

    /// Zulip serves uploads outside `/api/v1`, authenticated by an
    /// `api_key` query parameter rather than HTTP basic auth; `file_path`
    /// may already carry its own query string (e.g. a version marker), so
    /// this joins rather than string-concatenates to avoid clobbering it.
    fn download_url(&self, file_path: &str) -> Result<String> {
        let base = Url::parse(self.site.trim_end_matches('/'))
            .map_err(|e| PlatformError::Internal(format!("invalid zulip site url: {e}")))?;
        let mut url = base
            .join(file_path.trim_start_matches('/'))
            .map_err(|e| PlatformError::Internal(format!("invalid zulip attachment path: {e}")))?;
        url.query_pairs_mut().append_pair("api_key", &self.api_key);
        Ok(url.to_string())
    }
}

#[async_trait]
impl PlatformDriver for ZulipAdapter {
    fn adapter_type(&self) -> &'static str {
        "zulip"
    }

    fn max_message_length(&self) -> usize {
        10_000
    }

    fn max_attachments_per_message(&self) -> usize {
        10
    }

    async fn connection_exists(&self) -> bool {
        self.authed(self.client.get(self.endpoint("users/me")))
            .send()
            .await
            .is_ok()
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>> {
        // conversation_id encodes "<type>:<to>[:<topic>]" (stream messages
        // need a subject/topic; private messages don't).
        let mut parts = request.conversation_id.splitn(3, ':');
        let msg_type = parts.next().unwrap_or("stream");
        let to = parts.next().unwrap_or_default();
        let topic = parts.next();

        let mut form = vec![
            ("type".to_string(), msg_type.to_string()),
            ("to".to_string(), to.to_string()),
            ("content".to_string(), request.text.clone()),
        ];
        if let Some(topic) = topic {
            form.push(("topic".to_string(), topic.to_string()));
        }

        let response = self
            .authed(self.client.post(self.endpoint("messages")).form(&form))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::NotFound(format!("zulip send failed: {}", response.status())).into());
        }
        let parsed: SendMessageResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Internal(format!("malformed zulip response: {e}")))?;
        Ok(vec![parsed.id.to_string()])
    }

    async fn edit_message(&self, _conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        let form = [("content", text)];
        self.authed(self.client.patch(self.endpoint(&format!("messages/{message_id}"))).form(&form))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, _conversation_id: &str, message_id: &str) -> Result<()> {
        self.authed(self.client.delete(self.endpoint(&format!("messages/{message_id}"))))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn add_reaction(&self, _conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let form = [("emoji_name", emoji)];
        self.authed(
            self.client
                .post(self.endpoint(&format!("messages/{message_id}/reactions")))
                .form(&form),
        )
        .send()
        .await
        .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn remove_reaction(&self, _conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let form = [("emoji_name", emoji)];
        self.authed(
            self.client
                .delete(self.endpoint(&format!("messages/{message_id}/reactions")))
                .form(&form),
        )
        .send()
        .await
        .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn pin_message(&self, _conversation_id: &str, message_id: &str) -> Result<()> {
        let form = [("flag", "pinned"), ("op", "add"), ("messages", message_id)];
        self.authed(self.client.post(self.endpoint("messages/flags")).form(&form))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn unpin_message(&self, _conversation_id: &str, message_id: &str) -> Result<()> {
        let form = [("flag", "pinned"), ("op", "remove"), ("messages", message_id)];
        self.authed(self.client.post(self.endpoint("messages/flags")).form(&form))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn fetch_history_page(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        after: Option<i64>,
        limit: u32,
    ) -> Result<HistoryPage> {
        let narrow = serde_json::json!([{"operator": "stream", "operand": conversation_id}]);
        let anchor = match (before, after) {
            (Some(_), _) => "oldest",
            (_, Some(_)) => "newest",
            _ => "newest",
        };
        let (num_before, num_after) = if before.is_some() { (limit, 0) } else { (0, limit) };

        let query = [
            ("anchor", anchor.to_string()),
            ("num_before", num_before.to_string()),
            ("num_after", num_after.to_string()),
            ("narrow", narrow.to_string()),
        ];

        let response = self
            .authed(self.client.get(self.endpoint("messages")).query(&query))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Internal(format!("malformed zulip history response: {e}")))?;

        let has_more = !parsed.found_oldest.unwrap_or(true) || !parsed.found_newest.unwrap_or(true);
        let messages = parsed.messages.into_iter().map(zulip_message_to_dto).collect();
        Ok(HistoryPage { messages, has_more })
    }

    /// `attachment_id` is the upload's `/user_uploads/...` path, as scraped
    /// from message content by [`extract_attachment_links`].
    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>> {
        let url = self.download_url(attachment_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()).into())
    }
}

fn zulip_message_to_dto(message: ZulipMessage) -> NewMessageInput {
    let mut reactions: HashMap<String, u32> = HashMap::new();
    for reaction in &message.reactions {
        *reactions.entry(crate::emoji::canonicalize(&reaction.emoji_name)).or_insert(0) += 1;
    }

    NewMessageInput {
        message_id: message.id.to_string(),
        sender: message.sender_id.to_string(),
        sender_name: message.sender_full_name,
        is_from_bot: false,
        text: message.content,
        timestamp: message.timestamp * 1000,
        reply_to_message_id: None,
        is_pinned: message.flags.iter().any(|f| f == "pinned"),
        reactions,
        attachment_ids: Vec::new(),
        mentioned_user_ids: Vec::new(),
        mentions_all: message.flags.iter().any(|f| f == "mentioned"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_attachment_links_from_message_body() {
        let content = "Check this file: [test.pdf](/user_uploads/1/ab/xyz123/test.pdf)";
        let links = extract_attachment_links(content);
        assert_eq!(links, vec![("test.pdf".to_string(), "/user_uploads/1/ab/xyz123/test.pdf".to_string())]);
    }

    #[test]
    fn extracts_multiple_attachment_links() {
        let content = "[a.jpg](/user_uploads/1/cd/abc/a.jpg) and [b.docx](/user_uploads/1/ef/def/b.docx)";
        assert_eq!(extract_attachment_links(content).len(), 2);
    }

    fn adapter() -> ZulipAdapter {
        ZulipAdapter::new("https://zulip.example.com", "bot@example.com", "test_api_key")
    }

    #[test]
    fn download_url_appends_api_key() {
        let url = adapter().download_url("/user_uploads/1/ab/xyz123/test.pdf").unwrap();
        assert!(url.starts_with("https://zulip.example.com/user_uploads/"));
        assert!(url.contains("api_key=test_api_key"));
    }

    #[test]
    fn download_url_preserves_existing_query_params() {
        let url = adapter().download_url("/user_uploads/test.pdf?version=1").unwrap();
        assert!(url.contains("version=1"));
        assert!(url.contains("&api_key=test_api_key"));
    }
}
