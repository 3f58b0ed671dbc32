//! Pure mapper from a platform-local DTO to a [`CachedMessage`].

use std::collections::HashMap;

use crate::cache::now_ms;
use crate::conversation::model::{AttachmentId, CachedMessage, Mention, MessageId, UserId};

/// Platform-local DTO for an incoming message, already resolved by the
/// adapter's platform driver (conversation id, sender, attachments). Per
/// the design notes, the conversation manager never sees raw SDK objects —
/// only this narrow struct, replacing dynamic field access on upstream SDK
/// types with explicit variant matching.
pub struct NewMessageInput {
    pub message_id: MessageId,
    pub sender: UserId,
    pub sender_name: String,
    pub is_from_bot: bool,
    pub text: String,
    pub timestamp: i64,
    pub reply_to_message_id: Option<MessageId>,
    pub is_pinned: bool,
    pub reactions: HashMap<String, u32>,
    pub attachment_ids: Vec<AttachmentId>,
    pub mentioned_user_ids: Vec<UserId>,
    pub mentions_all: bool,
}

pub struct MessageBuilder;

impl MessageBuilder {
    /// Build a [`CachedMessage`] for a newly-seen message.
    ///
    /// `thread_id` is whatever the thread handler resolved. `replied_to_bot` is true when
    /// the message replies to a message authored by the adapter's own
    /// account — in that case the bot's id is folded into `mentions` even
    /// if it's absent from `mentioned_user_ids`, since the adapter is
    /// treated as "the referent" of a reply.
    pub fn build(
        input: NewMessageInput,
        conversation_id: impl Into<String>,
        thread_id: Option<String>,
        adapter_id: &str,
        replied_to_bot: bool,
    ) -> CachedMessage {
        let mut mentions: Vec<Mention> = input
            .mentioned_user_ids
            .iter()
            .cloned()
            .map(Mention::User)
            .collect();

        let bot_already_mentioned = mentions.iter().any(|m| matches!(m, Mention::User(id) if id == adapter_id));
        if replied_to_bot && !bot_already_mentioned {
            mentions.push(Mention::User(adapter_id.to_string()));
        }
        if input.mentions_all {
            mentions.push(Mention::All);
        }

        let now = now_ms();
        CachedMessage {
            message_id: input.message_id,
            conversation_id: conversation_id.into(),
            thread_id,
            sender_id: input.sender,
            sender_name: input.sender_name,
            text: input.text,
            timestamp: input.timestamp,
            edit_timestamp: None,
            edited: false,
            is_from_bot: input.is_from_bot,
            reply_to_message_id: input.reply_to_message_id,
            is_pinned: input.is_pinned,
            reactions: input.reactions.into_iter().filter(|(_, count)| *count > 0).collect(),
            attachments: input.attachment_ids,
            mentions,
            created_at: now,
            last_access: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_input() -> NewMessageInput {
        NewMessageInput {
            message_id: "1".into(),
            sender: "u1".into(),
            sender_name: "Alice".into(),
            is_from_bot: false,
            text: "hi".into(),
            timestamp: 0,
            reply_to_message_id: None,
            is_pinned: false,
            reactions: HashMap::new(),
            attachment_ids: vec![],
            mentioned_user_ids: vec![],
            mentions_all: false,
        }
    }

    #[test]
    fn reply_to_bot_adds_implicit_mention() {
        let msg = MessageBuilder::build(base_input(), "c1", None, "bot-1", true);
        assert!(msg.mentions.contains(&Mention::User("bot-1".into())));
    }

    #[test]
    fn at_all_token_produces_all_mention() {
        let mut input = base_input();
        input.mentions_all = true;
        let msg = MessageBuilder::build(input, "c1", None, "bot-1", false);
        assert!(msg.mentions.contains(&Mention::All));
    }

    #[test]
    fn zero_count_reactions_are_dropped() {
        let mut input = base_input();
        input.reactions.insert("thumbs_up".into(), 0);
        let msg = MessageBuilder::build(input, "c1", None, "bot-1", false);
        assert!(msg.reactions.is_empty());
    }
}
