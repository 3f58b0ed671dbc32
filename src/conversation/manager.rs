//! The conversation manager, the heart of the core.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::attachments::AttachmentRegistration;
use crate::cache::{now_ms, AttachmentCache, MessageCache, UserCache};
use crate::conversation::message_builder::{MessageBuilder, NewMessageInput};
use crate::conversation::model::{
    CachedMessage, ConversationDelta, ConversationId, ConversationInfo, ConversationType,
    MessageId, UserInfo,
};
use crate::conversation::reaction_handler::ReactionHandler;
use crate::conversation::thread_handler::{ThreadHandler, ThreadInput};

/// Everything the conversation manager needs to add a brand-new message to
/// a conversation.
pub struct AddToConversationInput {
    pub conversation_id: ConversationId,
    pub platform_conversation_id: String,
    pub conversation_type: ConversationType,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub sender: UserInfo,
    pub message: NewMessageInput,
    pub native_thread_id: Option<String>,
    pub attachments: Vec<AttachmentRegistration>,
}

/// The `event_type` dispatch for `update_conversation`.
pub enum ConversationUpdate {
    EditedMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
        new_text: Option<String>,
        new_reactions: Option<HashMap<String, u32>>,
        new_is_pinned: Option<bool>,
        edit_timestamp: i64,
    },
    AddedReaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        emoji: String,
    },
    RemovedReaction {
        conversation_id: ConversationId,
        message_id: MessageId,
        emoji: String,
    },
    PinnedMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
    UnpinnedMessage {
        conversation_id: ConversationId,
        message_id: MessageId,
    },
}

/// Input to `delete_from_conversation`: either an explicit conversation id
/// or a best-match search across all known conversations.
pub struct DeleteFromConversationInput {
    pub conversation_id: Option<ConversationId>,
    pub deleted_ids: Vec<MessageId>,
}

pub struct ConversationManager {
    adapter_id: String,
    conversations: Mutex<HashMap<ConversationId, Arc<Mutex<ConversationInfo>>>>,
    message_cache: Arc<MessageCache>,
    attachment_cache: Arc<AttachmentCache>,
    user_cache: Arc<UserCache>,
}

impl ConversationManager {
    pub fn new(
        adapter_id: impl Into<String>,
        message_cache: Arc<MessageCache>,
        attachment_cache: Arc<AttachmentCache>,
        user_cache: Arc<UserCache>,
    ) -> Self {
        Self {
            adapter_id: adapter_id.into(),
            conversations: Mutex::new(HashMap::new()),
            message_cache,
            attachment_cache,
            user_cache,
        }
    }

    /// Snapshot of a conversation's current state, if known.
    pub async fn get_conversation(&self, conversation_id: &str) -> Option<ConversationInfo> {
        let lock = {
            let conversations = self.conversations.lock().await;
            conversations.get(conversation_id).cloned()
        }?;
        Some(lock.lock().await.clone())
    }

    async fn get_or_create(&self, input: &AddToConversationInput) -> (Arc<Mutex<ConversationInfo>>, bool) {
        let mut conversations = self.conversations.lock().await;
        if let Some(existing) = conversations.get(&input.conversation_id) {
            return (existing.clone(), false);
        }
        let created = Arc::new(Mutex::new(ConversationInfo::new(
            input.conversation_id.clone(),
            input.platform_conversation_id.clone(),
            input.conversation_type,
        )));
        conversations.insert(input.conversation_id.clone(), created.clone());
        (created, true)
    }

    /// Never raises: every internal failure is logged here and folded into
    /// an empty delta rather than propagated.
    pub async fn add_to_conversation(&self, input: AddToConversationInput) -> ConversationDelta {
        let (conversation_lock, is_new) = self.get_or_create(&input).await;
        let mut conversation = conversation_lock.lock().await;

        if is_new {
            conversation.conversation_name = input.conversation_name.clone();
            conversation.server_id = input.server_id.clone();
            conversation.server_name = input.server_name.clone();
        }

        let mut delta = ConversationDelta::empty(input.conversation_id.clone());
        delta.conversation_name = conversation.conversation_name.clone();
        delta.server_name = conversation.server_name.clone();
        delta.fetch_history = is_new;
        delta.just_started = is_new;

        self.user_cache.upsert(input.sender.clone()).await;
        conversation
            .known_members
            .entry(input.sender.user_id.clone())
            .or_insert_with(|| input.sender.clone());

        let thread_input = ThreadInput {
            native_thread_id: input.native_thread_id.as_deref(),
            reply_to_message_id: input.message.reply_to_message_id.as_deref(),
        };
        let thread_id = ThreadHandler::resolve(&self.message_cache, &thread_input).await;

        let replied_to_bot = match &input.message.reply_to_message_id {
            Some(parent_id) => self
                .message_cache
                .get(parent_id)
                .await
                .map(|m| m.sender_id == self.adapter_id)
                .unwrap_or(false),
            None => false,
        };

        let attachment_ids: Vec<String> = input.attachments.iter().map(|a| a.info.attachment_id.clone()).collect();
        for registration in &input.attachments {
            self.attachment_cache.add_reference(registration.info.clone()).await;
        }

        let mut new_message = input.message;
        new_message.attachment_ids = attachment_ids;
        let message = MessageBuilder::build(
            new_message,
            input.conversation_id.clone(),
            thread_id.clone(),
            &self.adapter_id,
            replied_to_bot,
        );

        self.message_cache.add(message.clone()).await;
        conversation.messages.insert(message.message_id.clone());
        if message.is_pinned {
            conversation.pinned_messages.insert(message.message_id.clone());
        }
        if let Some(thread_id) = &thread_id {
            ThreadHandler::record_in_conversation(&mut conversation, thread_id, &message.message_id, now_ms());
        }

        delta.added_messages.push(message);
        conversation.just_started = false;

        debug!(
            conversation_id = %delta.conversation_id,
            is_new,
            "add_to_conversation"
        );
        delta
    }

    /// Dispatch on `event_type`.
    pub async fn update_conversation(&self, update: ConversationUpdate) -> ConversationDelta {
        match update {
            ConversationUpdate::EditedMessage {
                conversation_id,
                message_id,
                new_text,
                new_reactions,
                new_is_pinned,
                edit_timestamp,
            } => {
                self.handle_edit(conversation_id, message_id, new_text, new_reactions, new_is_pinned, edit_timestamp)
                    .await
            }
            ConversationUpdate::AddedReaction {
                conversation_id,
                message_id,
                emoji,
            } => self.handle_single_reaction(conversation_id, message_id, Some(emoji), None).await,
            ConversationUpdate::RemovedReaction {
                conversation_id,
                message_id,
                emoji,
            } => self.handle_single_reaction(conversation_id, message_id, None, Some(emoji)).await,
            ConversationUpdate::PinnedMessage {
                conversation_id,
                message_id,
            } => self.handle_pin(conversation_id, message_id, true).await,
            ConversationUpdate::UnpinnedMessage {
                conversation_id,
                message_id,
            } => self.handle_pin(conversation_id, message_id, false).await,
        }
    }

    async fn conversation_lock(&self, conversation_id: &str) -> Option<Arc<Mutex<ConversationInfo>>> {
        self.conversations.lock().await.get(conversation_id).cloned()
    }

    async fn handle_edit(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        new_text: Option<String>,
        new_reactions: Option<HashMap<String, u32>>,
        new_is_pinned: Option<bool>,
        edit_timestamp: i64,
    ) -> ConversationDelta {
        let mut delta = ConversationDelta::empty(conversation_id.clone());
        let Some(conversation_lock) = self.conversation_lock(&conversation_id).await else {
            warn!(%conversation_id, "edited_message for unknown conversation");
            return delta;
        };
        let mut conversation = conversation_lock.lock().await;

        let Some(cached) = self.message_cache.get(&message_id).await else {
            // Still report the pin flip (if any) so the surface event can
            // be suppressed cleanly rather than silently dropped.
            if let Some(pinned) = new_is_pinned {
                self.apply_pin_flip(&mut conversation, &mut delta, &message_id, pinned);
            }
            return delta;
        };

        let mut updated = cached.clone();
        let mut text_changed = false;
        if let Some(text) = new_text {
            // An edit whose new text equals the cached text is not treated
            // as a text update — some platforms resend the full message on
            // any metadata change.
            if text != updated.text {
                updated.text = text;
                updated.edit_timestamp = Some(edit_timestamp);
                updated.edited = true;
                text_changed = true;
            }
        }

        if let Some(new_reactions) = new_reactions {
            let diff = ReactionHandler::diff(&updated.reactions, &new_reactions);
            if !diff.added.is_empty() || !diff.removed.is_empty() {
                ReactionHandler::apply(&mut updated.reactions, &new_reactions);
                delta.added_reactions = diff.added;
                delta.removed_reactions = diff.removed;
                delta.message_id = Some(message_id.clone());
            }
        }

        if text_changed || delta.message_id.is_some() {
            self.message_cache.add(updated.clone()).await;
        }
        if text_changed {
            delta.updated_messages.push(updated);
        }

        if let Some(pinned) = new_is_pinned {
            if pinned != cached.is_pinned {
                self.message_cache
                    .with_mut(&message_id, |m| m.is_pinned = pinned)
                    .await;
                self.apply_pin_flip(&mut conversation, &mut delta, &message_id, pinned);
            }
        }

        delta
    }

    async fn handle_single_reaction(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        add_emoji: Option<String>,
        remove_emoji: Option<String>,
    ) -> ConversationDelta {
        let mut delta = ConversationDelta::empty(conversation_id);
        let Some(cached) = self.message_cache.get(&message_id).await else {
            warn!(%message_id, "reaction event for uncached message");
            return delta;
        };
        let mut reactions = cached.reactions.clone();
        if let Some(emoji) = &add_emoji {
            ReactionHandler::apply_single_add(&mut reactions, emoji);
            delta.added_reactions.push(emoji.clone());
        }
        if let Some(emoji) = &remove_emoji {
            ReactionHandler::apply_single_remove(&mut reactions, emoji);
            delta.removed_reactions.push(emoji.clone());
        }
        self.message_cache
            .with_mut(&message_id, |m| m.reactions = reactions)
            .await;
        delta.message_id = Some(message_id);
        delta
    }

    async fn handle_pin(
        &self,
        conversation_id: ConversationId,
        message_id: MessageId,
        pinned: bool,
    ) -> ConversationDelta {
        let mut delta = ConversationDelta::empty(conversation_id.clone());
        let Some(conversation_lock) = self.conversation_lock(&conversation_id).await else {
            return delta;
        };
        let mut conversation = conversation_lock.lock().await;

        let existed = self
            .message_cache
            .with_mut(&message_id, |m| m.is_pinned = pinned)
            .await
            .is_some();
        if existed {
            self.apply_pin_flip(&mut conversation, &mut delta, &message_id, pinned);
        } else {
            // No cached message: still return the conversation id so the
            // surface event can be suppressed cleanly.
            warn!(%message_id, "pin event for uncached message");
        }
        delta
    }

    fn apply_pin_flip(
        &self,
        conversation: &mut ConversationInfo,
        delta: &mut ConversationDelta,
        message_id: &str,
        pinned: bool,
    ) {
        if pinned {
            conversation.pinned_messages.insert(message_id.to_string());
            delta.pinned_message_ids.push(message_id.to_string());
        } else {
            conversation.pinned_messages.remove(message_id);
            delta.unpinned_message_ids.push(message_id.to_string());
        }
        delta.message_id = Some(message_id.to_string());
    }

    /// Fold a message fetched from upstream history into the cache without
    /// producing an outbound delta: used by the history fetcher so fetched
    /// pages become visible to later cache-first lookups without replaying
    /// them as fresh `message_received` events.
    pub async fn ingest_history_message(
        &self,
        conversation_id: impl Into<String>,
        message: crate::conversation::message_builder::NewMessageInput,
    ) {
        let conversation_id = conversation_id.into();
        let conversations = self.conversations.lock().await;
        let Some(conversation_lock) = conversations.get(&conversation_id).cloned() else {
            return;
        };
        drop(conversations);
        let mut conversation = conversation_lock.lock().await;

        if self.message_cache.get(&message.message_id).await.is_some() {
            return;
        }

        let built = MessageBuilder::build(message, conversation_id, None, &self.adapter_id, false);
        conversation.messages.insert(built.message_id.clone());
        if built.is_pinned {
            conversation.pinned_messages.insert(built.message_id.clone());
        }
        self.message_cache.add(built).await;
    }

    /// Resolve the target conversation by explicit id, else best-match
    /// search: the conversation whose `messages` intersects `deleted_ids`
    /// the most, ties broken by `conversation_id` lexicographic order
    /// (resolving the tie-break left open in the design notes).
    pub async fn delete_from_conversation(&self, input: DeleteFromConversationInput) -> ConversationDelta {
        let resolved_id = match input.conversation_id {
            Some(id) => Some(id),
            None => self.best_match_conversation(&input.deleted_ids).await,
        };

        let Some(conversation_id) = resolved_id else {
            return ConversationDelta::default();
        };

        let mut delta = ConversationDelta::empty(conversation_id.clone());
        let Some(conversation_lock) = self.conversation_lock(&conversation_id).await else {
            return delta;
        };
        let mut conversation = conversation_lock.lock().await;

        for message_id in &input.deleted_ids {
            if conversation.messages.remove(message_id) {
                self.message_cache.delete(message_id).await;
                conversation.pinned_messages.remove(message_id);
                delta.deleted_message_ids.push(message_id.clone());
            }
        }
        delta
    }

    async fn best_match_conversation(&self, deleted_ids: &[MessageId]) -> Option<ConversationId> {
        let snapshot: Vec<(ConversationId, Arc<Mutex<ConversationInfo>>)> = {
            let conversations = self.conversations.lock().await;
            conversations.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        let mut best: Option<(ConversationId, usize)> = None;
        for (conversation_id, lock) in snapshot {
            let conversation = lock.lock().await;
            let overlap = deleted_ids.iter().filter(|id| conversation.messages.contains(*id)).count();
            if overlap == 0 {
                continue;
            }
            best = match best {
                None => Some((conversation_id, overlap)),
                Some((best_id, best_overlap)) => {
                    if overlap > best_overlap || (overlap == best_overlap && conversation_id < best_id) {
                        Some((conversation_id, overlap))
                    } else {
                        Some((best_id, best_overlap))
                    }
                }
            };
        }
        best.map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachments::AttachmentRegistration;
    use crate::conversation::model::ConversationType;

    fn new_manager() -> ConversationManager {
        ConversationManager::new(
            "bot-1",
            Arc::new(MessageCache::new(999.0, 999, 999)),
            Arc::new(AttachmentCache::new(999.0, 999)),
            Arc::new(UserCache::new(999.0, 999)),
        )
    }

    fn sender(id: &str) -> UserInfo {
        UserInfo {
            user_id: id.to_string(),
            username: Some(format!("user{id}")),
            first_name: None,
            last_name: None,
            is_bot: false,
            created_at: 0,
            last_access: 0,
        }
    }

    fn add_input(conversation_id: &str, message_id: &str, sender_id: &str) -> AddToConversationInput {
        AddToConversationInput {
            conversation_id: conversation_id.into(),
            platform_conversation_id: conversation_id.into(),
            conversation_type: ConversationType::Private,
            conversation_name: None,
            server_id: None,
            server_name: None,
            sender: sender(sender_id),
            message: NewMessageInput {
                message_id: message_id.into(),
                sender: sender_id.into(),
                sender_name: format!("user{sender_id}"),
                is_from_bot: false,
                text: "hi".into(),
                timestamp: 0,
                reply_to_message_id: None,
                is_pinned: false,
                reactions: HashMap::new(),
                attachment_ids: vec![],
                mentioned_user_ids: vec![],
                mentions_all: false,
            },
            native_thread_id: None,
            attachments: Vec::<AttachmentRegistration>::new(),
        }
    }

    #[tokio::test]
    async fn first_message_sets_fetch_history_only_once() {
        let manager = new_manager();
        let delta1 = manager.add_to_conversation(add_input("c1", "1", "u1")).await;
        assert!(delta1.fetch_history);

        let delta2 = manager.add_to_conversation(add_input("c1", "2", "u1")).await;
        assert!(!delta2.fetch_history);
    }

    #[tokio::test]
    async fn edit_flips_pin_emits_both_changes() {
        let manager = new_manager();
        manager.add_to_conversation(add_input("c1", "1", "u1")).await;

        let delta = manager
            .update_conversation(ConversationUpdate::EditedMessage {
                conversation_id: "c1".into(),
                message_id: "1".into(),
                new_text: None,
                new_reactions: None,
                new_is_pinned: Some(true),
                edit_timestamp: 1,
            })
            .await;

        assert!(delta.updated_messages.is_empty());
        assert_eq!(delta.pinned_message_ids, vec!["1".to_string()]);
        let conv = manager.get_conversation("c1").await.unwrap();
        assert!(conv.pinned_messages.contains("1"));
        assert!(conv.pins_are_subset_of_messages());
    }

    #[tokio::test]
    async fn unchanged_text_edit_is_not_a_text_update() {
        let manager = new_manager();
        manager.add_to_conversation(add_input("c1", "1", "u1")).await;

        let delta = manager
            .update_conversation(ConversationUpdate::EditedMessage {
                conversation_id: "c1".into(),
                message_id: "1".into(),
                new_text: Some("hi".into()),
                new_reactions: None,
                new_is_pinned: None,
                edit_timestamp: 1,
            })
            .await;
        assert!(delta.updated_messages.is_empty());
    }

    #[tokio::test]
    async fn reaction_toggle_empties_reactions() {
        let manager = new_manager();
        let mut input = add_input("c1", "1", "u1");
        input.message.reactions.insert("thumbs_up".into(), 1);
        manager.add_to_conversation(input).await;

        let delta = manager
            .update_conversation(ConversationUpdate::EditedMessage {
                conversation_id: "c1".into(),
                message_id: "1".into(),
                new_text: None,
                new_reactions: Some(HashMap::new()),
                new_is_pinned: None,
                edit_timestamp: 1,
            })
            .await;

        assert_eq!(delta.removed_reactions, vec!["thumbs_up".to_string()]);
        let cached = manager.get_conversation("c1").await.unwrap();
        assert!(cached.messages.contains("1"));
    }

    #[tokio::test]
    async fn delete_resolves_best_match_conversation() {
        let manager = new_manager();
        manager.add_to_conversation(add_input("a", "123", "u1")).await;
        manager.add_to_conversation(add_input("a", "500", "u1")).await;
        manager.add_to_conversation(add_input("b", "600", "u1")).await;

        let delta = manager
            .delete_from_conversation(DeleteFromConversationInput {
                conversation_id: None,
                deleted_ids: vec!["123".into()],
            })
            .await;

        assert_eq!(delta.conversation_id, "a");
        assert_eq!(delta.deleted_message_ids, vec!["123".to_string()]);
        let conv_b = manager.get_conversation("b").await.unwrap();
        assert!(conv_b.messages.contains("600"));
    }

    #[tokio::test]
    async fn reply_to_bot_message_surfaces_implicit_mention() {
        let manager = new_manager();
        let mut bot_msg = add_input("c1", "1", "bot-1");
        bot_msg.message.is_from_bot = true;
        manager.add_to_conversation(bot_msg).await;

        let mut reply = add_input("c1", "2", "u2");
        reply.message.reply_to_message_id = Some("1".into());
        let delta = manager.add_to_conversation(reply).await;

        let added = &delta.added_messages[0];
        assert!(added
            .mentions
            .iter()
            .any(|m| matches!(m, crate::conversation::model::Mention::User(id) if id == "bot-1")));
    }
}
