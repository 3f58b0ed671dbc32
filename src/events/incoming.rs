//! `IncomingEventBuilder` — pure mappers from a delta/message to the
//! wire-shaped incoming event payloads.

use serde::Serialize;

use crate::conversation::model::{CachedMessage, Mention};

#[derive(Debug, Clone, Serialize)]
pub struct SenderInfo {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationEventData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub conversation_id: String,
    pub conversation_name: Option<String>,
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageReceivedData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub sender: SenderInfo,
    pub text: String,
    pub timestamp: i64,
    pub edited: bool,
    pub is_direct_message: bool,
    pub thread_id: Option<String>,
    pub edit_timestamp: Option<i64>,
    pub attachments: Vec<String>,
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageUpdatedData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub new_text: String,
    pub timestamp: Option<i64>,
    pub attachments: Vec<String>,
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDeletedData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub message_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReactionEventData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub message_id: String,
    pub conversation_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinEventData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub message_id: String,
    pub conversation_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryFetchedData {
    pub adapter_name: String,
    pub adapter_id: String,
    pub conversation_id: String,
    pub history: Vec<MessageReceivedData>,
}

/// Union of every incoming event payload, tagged by its `event_type` string.
/// Carried inside `bot_request{adapter_type, event_type, data}`.
#[derive(Debug, Clone)]
pub enum IncomingEventPayload {
    ConversationStarted(ConversationEventData),
    ConversationUpdated(ConversationEventData),
    MessageReceived(MessageReceivedData),
    MessageUpdated(MessageUpdatedData),
    MessageDeleted(MessageDeletedData),
    ReactionAdded(ReactionEventData),
    ReactionRemoved(ReactionEventData),
    MessagePinned(PinEventData),
    MessageUnpinned(PinEventData),
    HistoryFetched(HistoryFetchedData),
}

impl IncomingEventPayload {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ConversationStarted(_) => "conversation_started",
            Self::ConversationUpdated(_) => "conversation_updated",
            Self::MessageReceived(_) => "message_received",
            Self::MessageUpdated(_) => "message_updated",
            Self::MessageDeleted(_) => "message_deleted",
            Self::ReactionAdded(_) => "reaction_added",
            Self::ReactionRemoved(_) => "reaction_removed",
            Self::MessagePinned(_) => "message_pinned",
            Self::MessageUnpinned(_) => "message_unpinned",
            Self::HistoryFetched(_) => "history_fetched",
        }
    }

    pub fn data_json(&self) -> serde_json::Value {
        match self {
            Self::ConversationStarted(d) | Self::ConversationUpdated(d) => {
                serde_json::to_value(d).expect("ConversationEventData always serializes")
            }
            Self::MessageReceived(d) => serde_json::to_value(d).expect("MessageReceivedData always serializes"),
            Self::MessageUpdated(d) => serde_json::to_value(d).expect("MessageUpdatedData always serializes"),
            Self::MessageDeleted(d) => serde_json::to_value(d).expect("MessageDeletedData always serializes"),
            Self::ReactionAdded(d) | Self::ReactionRemoved(d) => {
                serde_json::to_value(d).expect("ReactionEventData always serializes")
            }
            Self::MessagePinned(d) | Self::MessageUnpinned(d) => {
                serde_json::to_value(d).expect("PinEventData always serializes")
            }
            Self::HistoryFetched(d) => serde_json::to_value(d).expect("HistoryFetchedData always serializes"),
        }
    }
}

fn mention_strings(mentions: &[Mention]) -> Vec<String> {
    mentions
        .iter()
        .map(|m| match m {
            Mention::User(id) => id.clone(),
            Mention::All => "all".to_string(),
        })
        .collect()
}

/// Identity fields every adapter stamps on its events.
#[derive(Debug, Clone)]
pub struct AdapterIdentity {
    pub adapter_name: String,
    pub adapter_id: String,
}

pub struct IncomingEventBuilder;

impl IncomingEventBuilder {
    pub fn conversation_started(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        conversation_name: Option<String>,
        server_name: Option<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::ConversationStarted(ConversationEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            conversation_id: conversation_id.into(),
            conversation_name,
            server_name,
        })
    }

    pub fn conversation_updated(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        conversation_name: Option<String>,
        server_name: Option<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::ConversationUpdated(ConversationEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            conversation_id: conversation_id.into(),
            conversation_name,
            server_name,
        })
    }

    pub fn message_received(
        identity: &AdapterIdentity,
        message: &CachedMessage,
        is_direct_message: bool,
    ) -> IncomingEventPayload {
        IncomingEventPayload::MessageReceived(MessageReceivedData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message.message_id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender: SenderInfo {
                user_id: message.sender_id.clone(),
                display_name: message.sender_name.clone(),
            },
            text: message.text.clone(),
            timestamp: message.timestamp,
            edited: message.edited,
            is_direct_message,
            thread_id: message.thread_id.clone(),
            edit_timestamp: message.edit_timestamp,
            attachments: message.attachments.clone(),
            mentions: mention_strings(&message.mentions),
        })
    }

    pub fn message_updated(message: &CachedMessage, identity: &AdapterIdentity) -> IncomingEventPayload {
        IncomingEventPayload::MessageUpdated(MessageUpdatedData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message.message_id.clone(),
            conversation_id: message.conversation_id.clone(),
            new_text: message.text.clone(),
            timestamp: message.edit_timestamp,
            attachments: message.attachments.clone(),
            mentions: mention_strings(&message.mentions),
        })
    }

    pub fn message_deleted(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::MessageDeleted(MessageDeletedData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        })
    }

    pub fn reaction_added(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::ReactionAdded(ReactionEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            emoji: emoji.into(),
        })
    }

    pub fn reaction_removed(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        emoji: impl Into<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::ReactionRemoved(ReactionEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
            emoji: emoji.into(),
        })
    }

    pub fn message_pinned(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::MessagePinned(PinEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        })
    }

    pub fn message_unpinned(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
    ) -> IncomingEventPayload {
        IncomingEventPayload::MessageUnpinned(PinEventData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            message_id: message_id.into(),
            conversation_id: conversation_id.into(),
        })
    }

    pub fn history_fetched(
        identity: &AdapterIdentity,
        conversation_id: impl Into<String>,
        history: &[CachedMessage],
        is_direct_message: bool,
    ) -> IncomingEventPayload {
        let history = history
            .iter()
            .map(|m| match Self::message_received(identity, m, is_direct_message) {
                IncomingEventPayload::MessageReceived(d) => d,
                _ => unreachable!(),
            })
            .collect();
        IncomingEventPayload::HistoryFetched(HistoryFetchedData {
            adapter_name: identity.adapter_name.clone(),
            adapter_id: identity.adapter_id.clone(),
            conversation_id: conversation_id.into(),
            history,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn identity() -> AdapterIdentity {
        AdapterIdentity {
            adapter_name: "telegram".into(),
            adapter_id: "bot-1".into(),
        }
    }

    fn message() -> CachedMessage {
        CachedMessage {
            message_id: "1".into(),
            conversation_id: "c1".into(),
            thread_id: None,
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            text: "hi".into(),
            timestamp: 100,
            edit_timestamp: None,
            edited: false,
            is_from_bot: false,
            reply_to_message_id: None,
            is_pinned: false,
            reactions: HashMap::new(),
            attachments: vec![],
            mentions: vec![Mention::All],
            created_at: 0,
            last_access: 0,
        }
    }

    #[test]
    fn message_received_has_correct_event_type_and_mentions() {
        let payload = IncomingEventBuilder::message_received(&identity(), &message(), true);
        assert_eq!(payload.event_type(), "message_received");
        let json = payload.data_json();
        assert_eq!(json["mentions"][0], "all");
        assert_eq!(json["is_direct_message"], true);
    }
}
