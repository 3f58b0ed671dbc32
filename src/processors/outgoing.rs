//! The outgoing event processor. Validation already happened in
//! [`crate::events::outgoing::OutgoingEventBuilder`]; this module resolves,
//! rate-limits, calls the platform driver, and folds the result back into
//! the conversation manager so the cache reflects server truth.

use std::sync::Arc;

use crate::attachments::AttachmentStore;
use crate::cache::{now_ms, AttachmentCache};
use crate::conversation::manager::{ConversationManager, ConversationUpdate, DeleteFromConversationInput};
use crate::error::{Error, Result};
use crate::events::incoming::{AdapterIdentity, IncomingEventBuilder};
use crate::events::outgoing::{
    DeleteMessageData, EditMessageData, FetchAttachmentData, FetchHistoryData, OutgoingCommand, PinMessageData,
    ReactionData, SendMessageData,
};
use crate::events::request::ReplyPayload;
use crate::history::HistoryFetcher;
use crate::platform::{PlatformDriver, SendMessageRequest};
use crate::rate_limiter::RateLimiter;

pub struct OutgoingProcessor {
    driver: Arc<dyn PlatformDriver>,
    conversation_manager: Arc<ConversationManager>,
    rate_limiter: Arc<RateLimiter>,
    history_fetcher: Arc<HistoryFetcher>,
    attachment_store: Arc<AttachmentStore>,
    attachment_cache: Arc<AttachmentCache>,
    identity: AdapterIdentity,
}

impl OutgoingProcessor {
    pub fn new(
        driver: Arc<dyn PlatformDriver>,
        conversation_manager: Arc<ConversationManager>,
        rate_limiter: Arc<RateLimiter>,
        history_fetcher: Arc<HistoryFetcher>,
        attachment_store: Arc<AttachmentStore>,
        attachment_cache: Arc<AttachmentCache>,
        identity: AdapterIdentity,
    ) -> Self {
        Self {
            driver,
            conversation_manager,
            rate_limiter,
            history_fetcher,
            attachment_store,
            attachment_cache,
            identity,
        }
    }

    /// Outgoing commands carry the wire-facing `conversation_id` (a
    /// deterministic hash for Discord, platform-native elsewhere); resolve
    /// it to the id the driver's own SDK understands before calling out.
    /// Falls back to `conversation_id` itself if the conversation isn't
    /// cached, which is a no-op for platforms where the two already match.
    async fn resolve_platform_id(&self, conversation_id: &str) -> String {
        match self.conversation_manager.get_conversation(conversation_id).await {
            Some(info) => info.platform_conversation_id,
            None => conversation_id.to_string(),
        }
    }

    pub async fn handle(&self, command: OutgoingCommand) -> Result<ReplyPayload> {
        match command {
            OutgoingCommand::SendMessage(data) => self.send_message(data).await,
            OutgoingCommand::EditMessage(data) => self.edit_message(data).await,
            OutgoingCommand::DeleteMessage(data) => self.delete_message(data).await,
            OutgoingCommand::AddReaction(data) => self.add_reaction(data).await,
            OutgoingCommand::RemoveReaction(data) => self.remove_reaction(data).await,
            OutgoingCommand::FetchHistory(data) => self.fetch_history(data).await,
            OutgoingCommand::FetchAttachment(data) => self.fetch_attachment(data).await,
            OutgoingCommand::PinMessage(data) => self.pin_message(data).await,
            OutgoingCommand::UnpinMessage(data) => self.unpin_message(data).await,
        }
    }

    async fn send_message(&self, data: SendMessageData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("send_message", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;

        let pieces = split_long_message(&data.text, self.driver.max_message_length());
        let mut resolved_attachments = Vec::new();
        for attachment_id in &data.attachments {
            if let Some(info) = self.attachment_cache.get(attachment_id).await {
                resolved_attachments.push(self.attachment_store.registration_for(info).absolute_path());
            }
        }

        let mut message_ids = Vec::new();
        let max_attachments = self.driver.max_attachments_per_message().max(1);
        let attachment_chunks: Vec<&[std::path::PathBuf]> = resolved_attachments.chunks(max_attachments).collect();

        for (i, piece) in pieces.iter().enumerate() {
            let attachment_paths = attachment_chunks.get(i).map(|c| c.to_vec()).unwrap_or_default();
            let request = SendMessageRequest {
                conversation_id: platform_id.clone(),
                text: piece.clone(),
                attachment_paths,
                custom_name: data.custom_name.clone(),
                thread_id: data.thread_id.clone(),
                mentions: data.mentions.clone(),
            };
            let ids = self.driver.send_message(request).await?;
            message_ids.extend(ids);
        }

        Ok(ReplyPayload::SentMessageIds {
            request_completed: true,
            message_ids,
        })
    }

    async fn edit_message(&self, data: EditMessageData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("edit_message", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.edit_message(&platform_id, &data.message_id, &data.text).await?;
        self.conversation_manager
            .update_conversation(ConversationUpdate::EditedMessage {
                conversation_id: data.conversation_id,
                message_id: data.message_id,
                new_text: Some(data.text),
                new_reactions: None,
                new_is_pinned: None,
                edit_timestamp: now_ms(),
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn delete_message(&self, data: DeleteMessageData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("delete_message", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.delete_message(&platform_id, &data.message_id).await?;
        self.conversation_manager
            .delete_from_conversation(DeleteFromConversationInput {
                conversation_id: Some(data.conversation_id),
                deleted_ids: vec![data.message_id],
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn add_reaction(&self, data: ReactionData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("add_reaction", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.add_reaction(&platform_id, &data.message_id, &data.emoji).await?;
        self.conversation_manager
            .update_conversation(ConversationUpdate::AddedReaction {
                conversation_id: data.conversation_id,
                message_id: data.message_id,
                emoji: data.emoji,
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn remove_reaction(&self, data: ReactionData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("remove_reaction", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.remove_reaction(&platform_id, &data.message_id, &data.emoji).await?;
        self.conversation_manager
            .update_conversation(ConversationUpdate::RemovedReaction {
                conversation_id: data.conversation_id,
                message_id: data.message_id,
                emoji: data.emoji,
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn pin_message(&self, data: PinMessageData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("pin_message", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.pin_message(&platform_id, &data.message_id).await?;
        self.conversation_manager
            .update_conversation(ConversationUpdate::PinnedMessage {
                conversation_id: data.conversation_id,
                message_id: data.message_id,
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn unpin_message(&self, data: PinMessageData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("unpin_message", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        self.driver.unpin_message(&platform_id, &data.message_id).await?;
        self.conversation_manager
            .update_conversation(ConversationUpdate::UnpinnedMessage {
                conversation_id: data.conversation_id,
                message_id: data.message_id,
            })
            .await;
        Ok(ReplyPayload::Generic { request_completed: true })
    }

    async fn fetch_history(&self, data: FetchHistoryData) -> Result<ReplyPayload> {
        self.rate_limiter.limit_request("fetch_history", Some(&data.conversation_id)).await;
        let platform_id = self.resolve_platform_id(&data.conversation_id).await;
        let limit = data.limit.unwrap_or(50);
        let messages = self
            .history_fetcher
            .fetch(self.driver.as_ref(), &data.conversation_id, &platform_id, data.before, data.after, limit)
            .await?;
        let history = messages
            .iter()
            .map(|m| match IncomingEventBuilder::message_received(&self.identity, m, false) {
                crate::events::incoming::IncomingEventPayload::MessageReceived(d) => d,
                _ => unreachable!(),
            })
            .collect();
        Ok(ReplyPayload::History {
            request_completed: true,
            history,
        })
    }

    async fn fetch_attachment(&self, data: FetchAttachmentData) -> Result<ReplyPayload> {
        use base64::Engine;
        let bytes = self.driver.fetch_attachment(&data.attachment_id).await?;
        Ok(ReplyPayload::FetchedAttachment {
            request_completed: true,
            attachment_id: data.attachment_id,
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
        })
    }
}

/// Map an error to the `kind` string reported in `request_failed`.
pub fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Platform(p) => p.kind(),
        Error::Attachment(_) => "io_error",
        Error::Transport(_) => "transient_network",
        Error::Io(_) => "io_error",
        _ => "internal",
    }
}

/// Split `text` into pieces no longer than `max_len` Unicode scalar values,
/// preferring to break at a newline, then a sentence terminator, then
/// whitespace, falling back to a hard cut. Concatenating the pieces always
/// reproduces `text` exactly.
pub fn split_long_message(text: &str, max_len: usize) -> Vec<String> {
    if max_len == 0 {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_len {
            pieces.push(chars[start..].iter().collect());
            break;
        }

        let window_end = start + max_len;
        let mut split_at = window_end;
        if let Some(pos) = (start..window_end).rev().find(|&i| chars[i] == '\n') {
            split_at = pos + 1;
        } else if let Some(pos) = (start..window_end).rev().find(|&i| matches!(chars[i], '.' | '!' | '?')) {
            split_at = pos + 1;
        } else if let Some(pos) = (start..window_end).rev().find(|&i| chars[i].is_whitespace()) {
            split_at = pos + 1;
        }
        if split_at <= start {
            split_at = window_end;
        }
        pieces.push(chars[start..split_at].iter().collect());
        start = split_at;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_piece() {
        let pieces = split_long_message("hello", 100);
        assert_eq!(pieces, vec!["hello".to_string()]);
    }

    #[test]
    fn pieces_reconstruct_the_original_text_exactly() {
        let text = "a".repeat(250);
        let pieces = split_long_message(&text, 100);
        assert_eq!(pieces.concat(), text);
        assert!(pieces.iter().all(|p| p.chars().count() <= 100));
    }

    #[test]
    fn prefers_splitting_at_newline() {
        let text = format!("{}\n{}", "a".repeat(50), "b".repeat(50));
        let pieces = split_long_message(&text, 60);
        assert_eq!(pieces[0], format!("{}\n", "a".repeat(50)));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn falls_back_to_hard_cut_with_no_boundary() {
        let text = "a".repeat(300);
        let pieces = split_long_message(&text, 100);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.concat(), text);
    }
}
