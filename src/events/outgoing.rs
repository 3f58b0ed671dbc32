//! `OutgoingEventBuilder` — validates and upgrades a raw `bot_response` wire
//! dict into a typed command.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, PlatformError};

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageData {
    pub conversation_id: String,
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub custom_name: Option<String>,
    pub thread_id: Option<String>,
    #[serde(default)]
    pub mentions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EditMessageData {
    pub conversation_id: String,
    pub message_id: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMessageData {
    pub conversation_id: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionData {
    pub conversation_id: String,
    pub message_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchHistoryData {
    pub conversation_id: String,
    pub limit: Option<u32>,
    pub before: Option<i64>,
    pub after: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchAttachmentData {
    pub attachment_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PinMessageData {
    pub conversation_id: String,
    pub message_id: String,
}

/// A validated command dispatched to a platform driver.
#[derive(Debug, Clone)]
pub enum OutgoingCommand {
    SendMessage(SendMessageData),
    EditMessage(EditMessageData),
    DeleteMessage(DeleteMessageData),
    AddReaction(ReactionData),
    RemoveReaction(ReactionData),
    FetchHistory(FetchHistoryData),
    FetchAttachment(FetchAttachmentData),
    PinMessage(PinMessageData),
    UnpinMessage(PinMessageData),
}

pub struct OutgoingEventBuilder;

impl OutgoingEventBuilder {
    /// Parse and validate a `bot_response{event_type, data}` payload.
    pub fn build(event_type: &str, data: Value) -> Result<OutgoingCommand, Error> {
        let invalid = |source: serde_json::Error| PlatformError::InvalidRequest(source.to_string()).into();

        let command = match event_type {
            "send_message" => OutgoingCommand::SendMessage(serde_json::from_value(data).map_err(invalid)?),
            "edit_message" => OutgoingCommand::EditMessage(serde_json::from_value(data).map_err(invalid)?),
            "delete_message" => OutgoingCommand::DeleteMessage(serde_json::from_value(data).map_err(invalid)?),
            "add_reaction" => OutgoingCommand::AddReaction(serde_json::from_value(data).map_err(invalid)?),
            "remove_reaction" => OutgoingCommand::RemoveReaction(serde_json::from_value(data).map_err(invalid)?),
            "fetch_history" => {
                let parsed: FetchHistoryData = serde_json::from_value(data).map_err(invalid)?;
                match (parsed.before, parsed.after) {
                    (Some(_), None) | (None, Some(_)) => {}
                    _ => {
                        return Err(PlatformError::InvalidRequest(
                            "fetch_history requires exactly one of before/after".into(),
                        )
                        .into())
                    }
                }
                OutgoingCommand::FetchHistory(parsed)
            }
            "fetch_attachment" => OutgoingCommand::FetchAttachment(serde_json::from_value(data).map_err(invalid)?),
            "pin_message" => OutgoingCommand::PinMessage(serde_json::from_value(data).map_err(invalid)?),
            "unpin_message" => OutgoingCommand::UnpinMessage(serde_json::from_value(data).map_err(invalid)?),
            other => {
                return Err(PlatformError::InvalidRequest(format!("unknown_event_type: {other}")).into());
            }
        };
        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fetch_history_requires_exactly_one_bound() {
        let both = OutgoingEventBuilder::build(
            "fetch_history",
            json!({"conversation_id": "c1", "before": 1, "after": 2}),
        );
        assert!(both.is_err());

        let neither = OutgoingEventBuilder::build("fetch_history", json!({"conversation_id": "c1"}));
        assert!(neither.is_err());

        let ok = OutgoingEventBuilder::build("fetch_history", json!({"conversation_id": "c1", "before": 1}));
        assert!(ok.is_ok());
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let result = OutgoingEventBuilder::build("levitate", json!({}));
        assert!(result.is_err());
    }

    #[test]
    fn send_message_parses_full_shape() {
        let command = OutgoingEventBuilder::build(
            "send_message",
            json!({"conversation_id": "c1", "text": "hi", "attachments": ["a1"], "mentions": ["u1"]}),
        )
        .unwrap();
        match command {
            OutgoingCommand::SendMessage(data) => {
                assert_eq!(data.text, "hi");
                assert_eq!(data.attachments, vec!["a1".to_string()]);
            }
            _ => panic!("expected SendMessage"),
        }
    }
}
