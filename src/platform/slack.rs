//! Slack platform driver, built on `slack-morphism`.

use std::sync::Arc;

use async_trait::async_trait;
use slack_morphism::prelude::*;

use crate::error::{PlatformError, Result};
use crate::platform::{HistoryPage, PlatformDriver, SendMessageRequest};

pub struct SlackAdapter {
    bot_token: SlackApiToken,
    client: Arc<SlackHyperClient>,
}

impl SlackAdapter {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            bot_token: SlackApiToken::new(bot_token.into().into()),
            client: Arc::new(SlackClient::new(SlackClientHyperConnector::new().expect("tls connector"))),
        }
    }

    fn session(&self) -> SlackClientSession<'_, SlackClientHyperHttpsConnector> {
        self.client.open_session(&self.bot_token)
    }
}

#[async_trait]
impl PlatformDriver for SlackAdapter {
    fn adapter_type(&self) -> &'static str {
        "slack"
    }

    fn max_message_length(&self) -> usize {
        40_000
    }

    fn max_attachments_per_message(&self) -> usize {
        10
    }

    async fn connection_exists(&self) -> bool {
        self.session().auth_test().await.is_ok()
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>> {
        let session = self.session();
        let content = SlackMessageContent::new().with_text(request.text.clone());
        let mut req = SlackApiChatPostMessageRequest::new(request.conversation_id.clone().into(), content);
        if let Some(thread_id) = &request.thread_id {
            req = req.with_thread_ts(thread_id.clone().into());
        }

        let response = session
            .chat_post_message(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        let mut ids = vec![response.ts.to_string()];
        for path in &request.attachment_paths {
            let bytes = tokio::fs::read(path).await?;
            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("file").to_string();
            let upload = session
                .files_upload_v2(&SlackApiFilesUploadV2Request::new(
                    SlackApiFilesUploadV2ChannelsRequest::new(vec![request.conversation_id.clone().into()]),
                    filename.into(),
                    bytes,
                ))
                .await
                .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
            if let Some(file) = upload.files.first() {
                ids.push(file.id.to_string());
            }
        }
        Ok(ids)
    }

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        let content = SlackMessageContent::new().with_text(text.to_string());
        let req = SlackApiChatUpdateRequest::new(conversation_id.to_string().into(), content, message_id.to_string().into());
        self.session()
            .chat_update(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let req = SlackApiChatDeleteRequest::new(conversation_id.to_string().into(), message_id.to_string().into());
        self.session()
            .chat_delete(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let req = SlackApiReactionsAddRequest::new(
            conversation_id.to_string().into(),
            SlackReactionName(emoji.to_string()),
            message_id.to_string().into(),
        );
        self.session()
            .reactions_add(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let req = SlackApiReactionsRemoveRequest::new(SlackReactionName(emoji.to_string()))
            .with_channel(conversation_id.to_string().into())
            .with_timestamp(message_id.to_string().into());
        self.session()
            .reactions_remove(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let req = SlackApiPinsAddRequest::new(conversation_id.to_string().into(), message_id.to_string().into());
        self.session()
            .pins_add(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;
        Ok(())
    }

    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        let req = SlackApiPinsRemoveRequest::new(conversation_id.to_string().into(), message_id.to_string().into());
        self.session()
            .pins_remove(&req)
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
        let mut req = SlackApiConversationsHistoryRequest::new()
            .with_channel(conversation_id.to_string().into())
            .with_limit(limit);
        if let Some(before) = before {
            req = req.with_latest(SlackTs(format!("{}.000000", before / 1000)));
        }
        if let Some(after) = after {
            req = req.with_oldest(SlackTs(format!("{}.000000", after / 1000)));
        }

        let response = self
            .session()
            .conversations_history(&req)
            .await
            .map_err(|e| PlatformError::TransientNetwork(e.to_string()))?;

        let has_more = response.has_more.unwrap_or(false);
        let messages = response.messages.into_iter().filter_map(slack_message_to_dto).collect();
        Ok(HistoryPage { messages, has_more })
    }

    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>> {
        Err(PlatformError::Unsupported(format!(
            "slack attachments are downloaded by url_private, not id ({attachment_id})"
        ))
        .into())
    }
}

fn slack_message_to_dto(
    message: SlackHistoryMessage,
) -> Option<crate::conversation::message_builder::NewMessageInput> {
    use crate::conversation::message_builder::NewMessageInput;
    use std::collections::HashMap;

    let ts = message.origin.ts.to_string();
    let timestamp_ms = (message.origin.ts.0.split('.').next()?.parse::<f64>().ok()? * 1000.0) as i64;

    let reactions = message
        .content
        .reactions
        .unwrap_or_default()
        .into_iter()
        .map(|r| (crate::emoji::canonicalize(&r.name.0), r.count as u32))
        .collect::<HashMap<_, _>>();

    Some(NewMessageInput {
        message_id: ts,
        sender: message.sender.user.map(|u| u.to_string()).unwrap_or_default(),
        sender_name: message.sender.username.unwrap_or_default(),
        is_from_bot: message.sender.bot_id.is_some(),
        text: message.content.text.unwrap_or_default(),
        timestamp: timestamp_ms,
        reply_to_message_id: message.origin.thread_ts.map(|ts| ts.to_string()),
        is_pinned: false,
        reactions,
        attachment_ids: Vec::new(),
        mentioned_user_ids: Vec::new(),
        mentions_all: false,
    })
}
