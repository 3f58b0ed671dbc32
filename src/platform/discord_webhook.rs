//! Discord incoming-webhook platform driver.
//!
//! A webhook is a one-way send target: there is no gateway connection, no
//! reaction API, no pin API, and no history endpoint. Every op outside
//! send/edit/delete returns `Unsupported` so the outgoing processor and
//! transport surface it uniformly.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{PlatformError, Result};
use crate::platform::{HistoryPage, PlatformDriver, SendMessageRequest};

#[derive(Debug, Deserialize)]
struct WebhookMessageResponse {
    id: String,
}

pub struct DiscordWebhookAdapter {
    webhook_url: String,
    client: reqwest::Client,
}

impl DiscordWebhookAdapter {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PlatformDriver for DiscordWebhookAdapter {
    fn adapter_type(&self) -> &'static str {
        "discord_webhook"
    }

    fn max_message_length(&self) -> usize {
        2000
    }

    fn max_attachments_per_message(&self) -> usize {
        10
    }

    async fn connection_exists(&self) -> bool {
        self.client.get(&self.webhook_url).send().await.is_ok()
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>> {
        let mut body = serde_json::json!({ "content": request.text });
        if let Some(name) = &request.custom_name {
            body["username"] = serde_json::Value::String(name.clone());
        }

        let mut form = reqwest::multipart::Form::new().text("payload_json", body.to_string());
        for (i, path) in request.attachment_paths.iter().enumerate() {
            let bytes = tokio::fs::read(path).await?;
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
            form = form.part(format!("files[{i}]"), reqwest::multipart::Part::bytes(bytes).file_name(filename));
        }

        let response = self
            .client
            .post(format!("{}?wait=true", self.webhook_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::NotFound(format!("webhook post failed: {}", response.status())).into());
        }

        let parsed: WebhookMessageResponse = response
            .json()
            .await
            .map_err(|e| PlatformError::Internal(format!("malformed webhook response: {e}")))?;
        Ok(vec![parsed.id])
    }

    async fn edit_message(&self, _conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/messages/{}", self.webhook_url, message_id);
        self.client
            .patch(url)
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, _conversation_id: &str, message_id: &str) -> Result<()> {
        let url = format!("{}/messages/{}", self.webhook_url, message_id);
        self.client
            .delete(url)
            .send()
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn add_reaction(&self, _conversation_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
        Err(PlatformError::Unsupported("reactions are not supported on incoming webhooks".into()).into())
    }

    async fn remove_reaction(&self, _conversation_id: &str, _message_id: &str, _emoji: &str) -> Result<()> {
        Err(PlatformError::Unsupported("reactions are not supported on incoming webhooks".into()).into())
    }

    async fn pin_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
        Err(PlatformError::Unsupported("pinning is not supported on incoming webhooks".into()).into())
    }

    async fn unpin_message(&self, _conversation_id: &str, _message_id: &str) -> Result<()> {
        Err(PlatformError::Unsupported("pinning is not supported on incoming webhooks".into()).into())
    }

    async fn fetch_history_page(
        &self,
        _conversation_id: &str,
        _before: Option<i64>,
        _after: Option<i64>,
        _limit: u32,
    ) -> Result<HistoryPage> {
        Err(PlatformError::Unsupported("incoming webhooks expose no history endpoint".into()).into())
    }

    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>> {
        Err(PlatformError::Unsupported(format!("webhook adapter cannot fetch attachment {attachment_id}")).into())
    }
}
