//! The incoming event processor. Turns platform-raw callbacks into
//! conversation-manager deltas, then reshapes those deltas into the wire
//! event payloads carried over the transport.
//!
//! Each platform module defines its own raw-event shape (Discord's gateway
//! events, Telegram's long-poll `Update`); the handler for each lives here
//! so the conversation manager never sees an SDK type. Any error raised
//! while handling one event is logged and yields no events rather than
//! propagating — a malformed or partially-unsupported callback must not
//! take the whole listener loop down.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, warn};

use crate::attachments::AttachmentStore;
use crate::cache::now_ms;
use crate::conversation::manager::{AddToConversationInput, ConversationManager, ConversationUpdate, DeleteFromConversationInput};
use crate::conversation::message_builder::NewMessageInput;
use crate::conversation::model::{ConversationDelta, ConversationType, UserInfo};
use crate::events::incoming::{AdapterIdentity, IncomingEventBuilder, IncomingEventPayload};
use crate::history::HistoryFetcher;
use crate::platform::PlatformDriver;

/// Everything needed to fold a brand-new message into the conversation
/// manager, already resolved from whatever SDK type the platform delivered.
pub struct ExternalMessageEvent {
    pub conversation_id: String,
    pub platform_conversation_id: String,
    pub conversation_type: ConversationType,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub is_direct_message: bool,
    pub sender: UserInfo,
    pub message: NewMessageInput,
    pub native_thread_id: Option<String>,
    pub attachments: Vec<crate::attachments::AttachmentRegistration>,
}

pub struct IncomingProcessor {
    conversation_manager: Arc<ConversationManager>,
    history_fetcher: Arc<HistoryFetcher>,
    driver: Arc<dyn PlatformDriver>,
    attachment_store: Arc<AttachmentStore>,
    identity: AdapterIdentity,
}

impl IncomingProcessor {
    pub fn new(
        conversation_manager: Arc<ConversationManager>,
        history_fetcher: Arc<HistoryFetcher>,
        driver: Arc<dyn PlatformDriver>,
        attachment_store: Arc<AttachmentStore>,
        identity: AdapterIdentity,
    ) -> Self {
        Self {
            conversation_manager,
            history_fetcher,
            driver,
            attachment_store,
            identity,
        }
    }

    /// Platform-agnostic entry point: fold a resolved new-message event into
    /// the conversation manager and, if this is the conversation's first
    /// message, fetch and emit its history right behind `conversation_started`.
    pub async fn ingest_external_message(&self, event: ExternalMessageEvent) -> Vec<IncomingEventPayload> {
        let is_direct_message = event.is_direct_message;
        let platform_conversation_id = event.platform_conversation_id.clone();
        let input = AddToConversationInput {
            conversation_id: event.conversation_id.clone(),
            platform_conversation_id: event.platform_conversation_id,
            conversation_type: event.conversation_type,
            conversation_name: event.conversation_name,
            server_id: event.server_id,
            server_name: event.server_name,
            sender: event.sender,
            message: event.message,
            native_thread_id: event.native_thread_id,
            attachments: event.attachments,
        };

        let delta = self.conversation_manager.add_to_conversation(input).await;
        let mut events = self.delta_to_events(&delta, is_direct_message);

        if delta.fetch_history {
            match self
                .history_fetcher
                .fetch(self.driver.as_ref(), &delta.conversation_id, &platform_conversation_id, None, None, 50)
                .await
            {
                Ok(history) => {
                    events.push(IncomingEventBuilder::history_fetched(
                        &self.identity,
                        &delta.conversation_id,
                        &history,
                        is_direct_message,
                    ));
                }
                Err(error) => {
                    warn!(%error, conversation_id = %delta.conversation_id, "history fetch failed for conversation_started");
                }
            }
        }

        events
    }

    pub async fn handle_conversation_update(&self, update: ConversationUpdate, is_direct_message: bool) -> Vec<IncomingEventPayload> {
        let delta = self.conversation_manager.update_conversation(update).await;
        self.delta_to_events(&delta, is_direct_message)
    }

    pub async fn handle_delete(&self, input: DeleteFromConversationInput) -> Vec<IncomingEventPayload> {
        let delta = self.conversation_manager.delete_from_conversation(input).await;
        delta
            .deleted_message_ids
            .iter()
            .map(|message_id| IncomingEventBuilder::message_deleted(&self.identity, &delta.conversation_id, message_id))
            .collect()
    }

    /// Reshape a [`ConversationDelta`] into zero or more outbound events, in
    /// the same order the original values changed: new/updated messages,
    /// then deletions, then pin flips, then reaction deltas.
    fn delta_to_events(&self, delta: &ConversationDelta, is_direct_message: bool) -> Vec<IncomingEventPayload> {
        let mut events = Vec::new();

        if delta.just_started {
            events.push(IncomingEventBuilder::conversation_started(
                &self.identity,
                &delta.conversation_id,
                delta.conversation_name.clone(),
                delta.server_name.clone(),
            ));
        }

        for message in &delta.added_messages {
            events.push(IncomingEventBuilder::message_received(&self.identity, message, is_direct_message));
        }
        for message in &delta.updated_messages {
            events.push(IncomingEventBuilder::message_updated(message, &self.identity));
        }
        for message_id in &delta.deleted_message_ids {
            events.push(IncomingEventBuilder::message_deleted(&self.identity, &delta.conversation_id, message_id));
        }

        if let Some(message_id) = &delta.message_id {
            for emoji in &delta.added_reactions {
                events.push(IncomingEventBuilder::reaction_added(&self.identity, &delta.conversation_id, message_id, emoji));
            }
            for emoji in &delta.removed_reactions {
                events.push(IncomingEventBuilder::reaction_removed(&self.identity, &delta.conversation_id, message_id, emoji));
            }
        }
        for message_id in &delta.pinned_message_ids {
            events.push(IncomingEventBuilder::message_pinned(&self.identity, &delta.conversation_id, message_id));
        }
        for message_id in &delta.unpinned_message_ids {
            events.push(IncomingEventBuilder::message_unpinned(&self.identity, &delta.conversation_id, message_id));
        }

        events
    }

    /// Download and register an attachment fetched from a direct URL
    /// (Discord's CDN links, Slack's `url_private`). Logged and dropped on
    /// failure — a message still gets cached without the attachment rather
    /// than being lost entirely.
    pub async fn fetch_url_attachment(
        &self,
        url: &str,
        filename: &str,
        content_type: Option<String>,
        size_hint: Option<u64>,
    ) -> Option<crate::attachments::AttachmentRegistration> {
        let response = match reqwest::get(url).await {
            Ok(response) => response,
            Err(error) => {
                error!(%error, url, "attachment download failed");
                return None;
            }
        };
        match self
            .attachment_store
            .download_streaming(response, filename, content_type, url.to_string(), size_hint, now_ms())
            .await
        {
            Ok(registration) => Some(registration),
            Err(error) => {
                error!(%error, url, "attachment streaming/registration failed");
                None
            }
        }
    }

    /// Fetch an attachment the platform driver addresses by id (Telegram's
    /// `file_id`) rather than by URL, and register it the same way.
    pub async fn fetch_id_attachment(
        &self,
        attachment_id: &str,
        filename: &str,
        content_type: Option<String>,
    ) -> Option<crate::attachments::AttachmentRegistration> {
        match self.driver.fetch_attachment(attachment_id).await {
            Ok(bytes) => match self
                .attachment_store
                .store_bytes(&bytes, filename, content_type, None, now_ms())
                .await
            {
                Ok(registration) => Some(registration),
                Err(error) => {
                    error!(%error, attachment_id, "attachment registration failed");
                    None
                }
            },
            Err(error) => {
                error!(%error, attachment_id, "attachment fetch failed");
                None
            }
        }
    }
}

/// Discord-specific translation: gateway events to the shared ingest/update
/// entry points above. Lives alongside the processor rather than in
/// `platform::discord` because it needs the attachment store and history
/// fetcher, neither of which the platform driver trait exposes.
pub mod discord {
    use super::*;
    use crate::platform::discord::{conversation_id_for, platform_conversation_id, DiscordRawEvent};

    impl IncomingProcessor {
        pub async fn handle_discord_event(&self, event: DiscordRawEvent) -> Vec<IncomingEventPayload> {
            match event {
                DiscordRawEvent::NewMessage(message) => self.handle_new_message(message).await,
                DiscordRawEvent::MessageUpdate(message) => self.handle_message_update(message).await,
                DiscordRawEvent::MessageDelete { guild_id, channel_id, message_id } => {
                    let conversation_id = conversation_id_for(&platform_conversation_id(guild_id, channel_id));
                    self.handle_delete(DeleteFromConversationInput {
                        conversation_id: Some(conversation_id),
                        deleted_ids: vec![message_id.to_string()],
                    })
                    .await
                }
                DiscordRawEvent::ReactionAdd(reaction) => self.handle_reaction(reaction, true).await,
                DiscordRawEvent::ReactionRemove(reaction) => self.handle_reaction(reaction, false).await,
            }
        }

        async fn handle_new_message(&self, message: serenity::all::Message) -> Vec<IncomingEventPayload> {
            let is_direct_message = message.guild_id.is_none();
            let mut attachments = Vec::new();
            for attachment in &message.attachments {
                if let Some(registration) = self
                    .fetch_url_attachment(&attachment.url, &attachment.filename, attachment.content_type.clone(), Some(attachment.size as u64))
                    .await
                {
                    attachments.push(registration);
                }
            }

            let mut reactions = HashMap::new();
            for reaction in &message.reactions {
                reactions.insert(crate::emoji::canonicalize(&reaction.reaction_type.to_string()), reaction.count as u32);
            }

            let sender = UserInfo {
                user_id: message.author.id.to_string(),
                username: Some(message.author.name.clone()),
                first_name: message.author.global_name.clone(),
                last_name: None,
                is_bot: message.author.bot,
                created_at: now_ms(),
                last_access: now_ms(),
            };

            let input = NewMessageInput {
                message_id: message.id.to_string(),
                sender: sender.user_id.clone(),
                sender_name: sender.display_name(),
                is_from_bot: message.author.bot,
                text: message.content.clone(),
                timestamp: message.timestamp.timestamp() * 1000,
                reply_to_message_id: message.referenced_message.as_ref().map(|m| m.id.to_string()),
                is_pinned: message.pinned,
                reactions,
                attachment_ids: attachments.iter().map(|a| a.info.attachment_id.clone()).collect(),
                mentioned_user_ids: message.mentions.iter().map(|u| u.id.to_string()).collect(),
                mentions_all: message.mention_everyone,
            };

            let conversation_type = if is_direct_message { ConversationType::Dm } else { ConversationType::TextChannel };
            let platform_id = platform_conversation_id(message.guild_id, message.channel_id);
            let conversation_id = conversation_id_for(&platform_id);

            self.ingest_external_message(ExternalMessageEvent {
                conversation_id,
                platform_conversation_id: platform_id,
                conversation_type,
                conversation_name: None,
                server_id: message.guild_id.map(|g| g.to_string()),
                server_name: None,
                is_direct_message,
                sender,
                message: input,
                native_thread_id: None,
                attachments,
            })
            .await
        }

        async fn handle_message_update(&self, message: serenity::all::Message) -> Vec<IncomingEventPayload> {
            let mut new_reactions = HashMap::new();
            for reaction in &message.reactions {
                new_reactions.insert(crate::emoji::canonicalize(&reaction.reaction_type.to_string()), reaction.count as u32);
            }
            let conversation_id = conversation_id_for(&platform_conversation_id(message.guild_id, message.channel_id));
            self.handle_conversation_update(
                ConversationUpdate::EditedMessage {
                    conversation_id,
                    message_id: message.id.to_string(),
                    new_text: Some(message.content.clone()),
                    new_reactions: Some(new_reactions),
                    new_is_pinned: Some(message.pinned),
                    edit_timestamp: message.edited_timestamp.map(|t| t.timestamp() * 1000).unwrap_or_else(now_ms),
                },
                message.guild_id.is_none(),
            )
            .await
        }

        async fn handle_reaction(&self, reaction: serenity::all::Reaction, added: bool) -> Vec<IncomingEventPayload> {
            let emoji = crate::emoji::canonicalize(&reaction.emoji.to_string());
            let conversation_id = conversation_id_for(&platform_conversation_id(reaction.guild_id, reaction.channel_id));
            let update = if added {
                ConversationUpdate::AddedReaction {
                    conversation_id,
                    message_id: reaction.message_id.to_string(),
                    emoji,
                }
            } else {
                ConversationUpdate::RemovedReaction {
                    conversation_id,
                    message_id: reaction.message_id.to_string(),
                    emoji,
                }
            };
            self.handle_conversation_update(update, reaction.guild_id.is_none()).await
        }
    }
}

/// Telegram-specific translation: long-poll `Update`s to the shared ingest
/// entry points.
pub mod telegram {
    use super::*;
    use teloxide::types::{MessageKind, UpdateKind};

    impl IncomingProcessor {
        pub async fn handle_telegram_update(&self, update: teloxide::prelude::Update) -> Vec<IncomingEventPayload> {
            match update.kind {
                UpdateKind::Message(message) => self.handle_new_message(message).await,
                UpdateKind::EditedMessage(message) => self.handle_edited_message(message).await,
                _ => {
                    // Member joins/leaves, callback queries, and other chat
                    // actions carry no conversation-state change this bridge
                    // surfaces.
                    Vec::new()
                }
            }
        }

        async fn handle_new_message(&self, message: teloxide::types::Message) -> Vec<IncomingEventPayload> {
            if matches!(message.kind, MessageKind::Pinned(_)) {
                return self.handle_pin_service_message(message).await;
            }
            let Some(text) = message.text().or_else(|| message.caption()) else {
                return Vec::new();
            };
            let Some(from) = message.from() else {
                return Vec::new();
            };

            let mut attachments = Vec::new();
            let mut attachment_ids = Vec::new();
            if let Some(doc) = message.document() {
                if let Some(registration) = self.fetch_id_attachment(&doc.file.id, &doc.file_name.clone().unwrap_or_else(|| doc.file.id.clone()), doc.mime_type.as_ref().map(|m| m.to_string())).await {
                    attachment_ids.push(registration.info.attachment_id.clone());
                    attachments.push(registration);
                }
            }
            if let Some(photos) = message.photo() {
                if let Some(largest) = photos.last() {
                    if let Some(registration) = self.fetch_id_attachment(&largest.file.id, &format!("{}.jpg", largest.file.id), Some("image/jpeg".to_string())).await {
                        attachment_ids.push(registration.info.attachment_id.clone());
                        attachments.push(registration);
                    }
                }
            }

            let sender = UserInfo {
                user_id: from.id.to_string(),
                username: from.username.clone(),
                first_name: Some(from.first_name.clone()),
                last_name: from.last_name.clone(),
                is_bot: from.is_bot,
                created_at: now_ms(),
                last_access: now_ms(),
            };

            let chat = &message.chat;
            let conversation_type = if chat.is_private() {
                ConversationType::Private
            } else if chat.is_channel() {
                ConversationType::Channel
            } else {
                ConversationType::Group
            };
            let is_direct_message = chat.is_private();

            let input = NewMessageInput {
                message_id: message.id.0.to_string(),
                sender: sender.user_id.clone(),
                sender_name: sender.display_name(),
                is_from_bot: from.is_bot,
                text: text.to_string(),
                timestamp: message.date.timestamp() * 1000,
                reply_to_message_id: message.reply_to_message().map(|m| m.id.0.to_string()),
                is_pinned: message.pinned_message().is_some(),
                reactions: HashMap::new(),
                attachment_ids,
                mentioned_user_ids: Vec::new(),
                mentions_all: text.contains("@all"),
            };

            self.ingest_external_message(ExternalMessageEvent {
                conversation_id: chat.id.0.to_string(),
                platform_conversation_id: chat.id.0.to_string(),
                conversation_type,
                conversation_name: chat.title().map(|t| t.to_string()),
                server_id: None,
                server_name: None,
                is_direct_message,
                sender,
                message: input,
                native_thread_id: message.thread_id.map(|id| id.0.to_string()),
                attachments,
            })
            .await
        }

        async fn handle_edited_message(&self, message: teloxide::types::Message) -> Vec<IncomingEventPayload> {
            let Some(text) = message.text().or_else(|| message.caption()) else {
                return Vec::new();
            };
            self.handle_conversation_update(
                ConversationUpdate::EditedMessage {
                    conversation_id: message.chat.id.0.to_string(),
                    message_id: message.id.0.to_string(),
                    new_text: Some(text.to_string()),
                    new_reactions: None,
                    new_is_pinned: None,
                    edit_timestamp: message.edit_date().map(|d| d.timestamp() * 1000).unwrap_or_else(now_ms),
                },
                message.chat.is_private(),
            )
            .await
        }

        /// Telegram announces a pin as a service message carrying the
        /// pinned message inline; promote it to `message_pinned` instead of
        /// caching the service message itself.
        async fn handle_pin_service_message(&self, message: teloxide::types::Message) -> Vec<IncomingEventPayload> {
            let Some(pinned) = message.pinned_message() else {
                return Vec::new();
            };
            self.handle_conversation_update(
                ConversationUpdate::PinnedMessage {
                    conversation_id: message.chat.id.0.to_string(),
                    message_id: pinned.id.0.to_string(),
                },
                message.chat.is_private(),
            )
            .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AttachmentCache, MessageCache, UserCache};
    use crate::platform::{HistoryPage, SendMessageRequest};
    use std::collections::HashMap as Map;

    struct NoopDriver;

    #[async_trait::async_trait]
    impl PlatformDriver for NoopDriver {
        fn adapter_type(&self) -> &'static str {
            "test"
        }
        fn max_message_length(&self) -> usize {
            1000
        }
        fn max_attachments_per_message(&self) -> usize {
            1
        }
        async fn connection_exists(&self) -> bool {
            true
        }
        async fn send_message(&self, _r: SendMessageRequest) -> crate::error::Result<Vec<String>> {
            unreachable!()
        }
        async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn delete_message(&self, _c: &str, _m: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn add_reaction(&self, _c: &str, _m: &str, _e: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn remove_reaction(&self, _c: &str, _m: &str, _e: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn pin_message(&self, _c: &str, _m: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn unpin_message(&self, _c: &str, _m: &str) -> crate::error::Result<()> {
            unreachable!()
        }
        async fn fetch_history_page(&self, _c: &str, _b: Option<i64>, _a: Option<i64>, _l: u32) -> crate::error::Result<HistoryPage> {
            Ok(HistoryPage::default())
        }
        async fn fetch_attachment(&self, _a: &str) -> crate::error::Result<Vec<u8>> {
            unreachable!()
        }
    }

    fn processor() -> IncomingProcessor {
        let message_cache = Arc::new(MessageCache::new(999.0, 999, 999));
        let attachment_cache = Arc::new(AttachmentCache::new(999.0, 999));
        let user_cache = Arc::new(UserCache::new(999.0, 999));
        let manager = Arc::new(ConversationManager::new("bot-1", message_cache.clone(), attachment_cache.clone(), user_cache));
        let history_fetcher = Arc::new(HistoryFetcher::new(message_cache, manager.clone(), 50, 1, false));
        let dir = tempfile::tempdir().unwrap();
        let attachment_store = Arc::new(AttachmentStore::new(dir.path(), 10, 5));
        IncomingProcessor::new(
            manager,
            history_fetcher,
            Arc::new(NoopDriver),
            attachment_store,
            AdapterIdentity {
                adapter_name: "test".into(),
                adapter_id: "bot-1".into(),
            },
        )
    }

    fn input(message_id: &str) -> NewMessageInput {
        NewMessageInput {
            message_id: message_id.into(),
            sender: "u1".into(),
            sender_name: "Alice".into(),
            is_from_bot: false,
            text: "hi".into(),
            timestamp: 0,
            reply_to_message_id: None,
            is_pinned: false,
            reactions: Map::new(),
            attachment_ids: vec![],
            mentioned_user_ids: vec![],
            mentions_all: false,
        }
    }

    #[tokio::test]
    async fn first_message_emits_conversation_started_before_message_received() {
        let processor = processor();
        let events = processor
            .ingest_external_message(ExternalMessageEvent {
                conversation_id: "c1".into(),
                platform_conversation_id: "c1".into(),
                conversation_type: ConversationType::Private,
                conversation_name: None,
                server_id: None,
                server_name: None,
                is_direct_message: true,
                sender: UserInfo {
                    user_id: "u1".into(),
                    username: Some("alice".into()),
                    first_name: None,
                    last_name: None,
                    is_bot: false,
                    created_at: 0,
                    last_access: 0,
                },
                message: input("1"),
                native_thread_id: None,
                attachments: vec![],
            })
            .await;

        assert_eq!(events[0].event_type(), "conversation_started");
        assert_eq!(events[1].event_type(), "message_received");
        assert_eq!(events[2].event_type(), "history_fetched");
    }

    #[tokio::test]
    async fn second_message_skips_conversation_started() {
        let processor = processor();
        let make_event = |id: &str| ExternalMessageEvent {
            conversation_id: "c1".into(),
            platform_conversation_id: "c1".into(),
            conversation_type: ConversationType::Private,
            conversation_name: None,
            server_id: None,
            server_name: None,
            is_direct_message: true,
            sender: UserInfo {
                user_id: "u1".into(),
                username: Some("alice".into()),
                first_name: None,
                last_name: None,
                is_bot: false,
                created_at: 0,
                last_access: 0,
            },
            message: input(id),
            native_thread_id: None,
            attachments: vec![],
        };
        processor.ingest_external_message(make_event("1")).await;
        let events = processor.ingest_external_message(make_event("2")).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "message_received");
    }
}
