//! Telegram platform driver, built on `teloxide`.
//!
//! Telegram's Bot API exposes no message-history endpoint, so
//! `fetch_history_page` always returns `Unsupported` — the history fetcher
//! then serves purely from the cache for this adapter.

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::payloads::SendMessageSetters;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId, ReactionType};
use tokio::sync::mpsc;

use crate::error::{PlatformError, Result};
use crate::platform::{HistoryPage, PlatformDriver, SendMessageRequest};

pub struct TelegramAdapter {
    bot: Bot,
    adapter_id: String,
}

impl TelegramAdapter {
    pub fn new(bot_token: impl Into<String>, adapter_id: impl Into<String>) -> Self {
        Self {
            bot: Bot::new(bot_token.into()),
            adapter_id: adapter_id.into(),
        }
    }

    /// Spawn the long-poll dispatcher, forwarding every raw update to
    /// `tx` for the incoming processor to translate into core events.
    pub fn spawn_listener(&self, tx: mpsc::Sender<Update>) {
        let bot = self.bot.clone();
        tokio::spawn(async move {
            let handler = teloxide::dptree::entry().endpoint(
                |update: Update, tx: mpsc::Sender<Update>| async move {
                    let _ = tx.send(update).await;
                    respond(())
                },
            );
            Dispatcher::builder(bot, handler)
                .dependencies(teloxide::dptree::deps![tx])
                .enable_ctrlc_handler()
                .build()
                .dispatch()
                .await;
        });
    }

    fn chat_id(conversation_id: &str) -> Result<ChatId> {
        conversation_id
            .parse::<i64>()
            .map(ChatId)
            .map_err(|_| PlatformError::InvalidRequest(format!("not a telegram chat id: {conversation_id}")).into())
    }

    fn message_id(message_id: &str) -> Result<MessageId> {
        message_id
            .parse::<i32>()
            .map(MessageId)
            .map_err(|_| PlatformError::InvalidRequest(format!("not a telegram message id: {message_id}")).into())
    }
}

#[async_trait]
impl PlatformDriver for TelegramAdapter {
    fn adapter_type(&self) -> &'static str {
        "telegram"
    }

    fn max_message_length(&self) -> usize {
        4096
    }

    fn max_attachments_per_message(&self) -> usize {
        10
    }

    async fn connection_exists(&self) -> bool {
        self.bot.get_me().send().await.is_ok()
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>> {
        tracing::debug!(adapter_id = %self.adapter_id, conversation_id = %request.conversation_id, "telegram send_message");
        let chat_id = Self::chat_id(&request.conversation_id)?;
        let mut ids = Vec::new();

        if request.attachment_paths.is_empty() {
            let sent = self.bot.send_message(chat_id, &request.text).send().await?;
            ids.push(sent.id.0.to_string());
        } else {
            let sent = self.bot.send_message(chat_id, &request.text).send().await?;
            ids.push(sent.id.0.to_string());
            for path in &request.attachment_paths {
                let sent = self
                    .bot
                    .send_document(chat_id, InputFile::file(path))
                    .send()
                    .await?;
                ids.push(sent.id.0.to_string());
            }
        }
        Ok(ids)
    }

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()> {
        self.bot
            .edit_message_text(Self::chat_id(conversation_id)?, Self::message_id(message_id)?, text)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.bot
            .delete_message(Self::chat_id(conversation_id)?, Self::message_id(message_id)?)
            .send()
            .await?;
        Ok(())
    }

    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()> {
        let glyph = crate::emoji::glyph_for(emoji)
            .ok_or_else(|| PlatformError::UnknownEmoji(emoji.to_string()))?;
        self.bot
            .set_message_reaction(Self::chat_id(conversation_id)?, Self::message_id(message_id)?)
            .reaction(vec![ReactionType::Emoji { emoji: glyph.to_string() }])
            .send()
            .await?;
        Ok(())
    }

    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, _emoji: &str) -> Result<()> {
        self.bot
            .set_message_reaction(Self::chat_id(conversation_id)?, Self::message_id(message_id)?)
            .send()
            .await?;
        Ok(())
    }

    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.bot
            .pin_chat_message(Self::chat_id(conversation_id)?, Self::message_id(message_id)?)
            .send()
            .await?;
        Ok(())
    }

    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()> {
        self.bot
            .unpin_chat_message(Self::chat_id(conversation_id)?)
            .message_id(Self::message_id(message_id)?)
            .send()
            .await?;
        Ok(())
    }

    async fn fetch_history_page(
        &self,
        _conversation_id: &str,
        _before: Option<i64>,
        _after: Option<i64>,
        _limit: u32,
    ) -> Result<HistoryPage> {
        Err(PlatformError::Unsupported("telegram bot api has no history endpoint".into()).into())
    }

    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>> {
        let file = self.bot.get_file(attachment_id).send().await?;
        let mut buf = Vec::new();
        self.bot.download_file(&file.path, &mut buf).await.map_err(|e| {
            PlatformError::TransientNetwork(e.to_string())
        })?;
        Ok(buf)
    }
}

impl From<teloxide::RequestError> for crate::error::Error {
    fn from(source: teloxide::RequestError) -> Self {
        PlatformError::TransientNetwork(source.to_string()).into()
    }
}
