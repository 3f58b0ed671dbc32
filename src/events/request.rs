//! `RequestEventBuilder` — wraps an outgoing command's result into the
//! `request_success` / `request_failed` wire payload.

use serde::Serialize;
use serde_json::Value;

use crate::events::incoming::MessageReceivedData;

/// The `data` payload of a `request_success` event, selected by which
/// fields the underlying outgoing-command result actually populated.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ReplyPayload {
    SentMessageIds {
        request_completed: bool,
        message_ids: Vec<String>,
    },
    History {
        request_completed: bool,
        history: Vec<MessageReceivedData>,
    },
    FetchedAttachment {
        request_completed: bool,
        attachment_id: String,
        content_base64: String,
    },
    ReadFile {
        request_completed: bool,
        content: String,
    },
    ViewDirectory {
        request_completed: bool,
        entries: Vec<String>,
    },
    SessionOpened {
        request_completed: bool,
        session_id: String,
    },
    CommandResult {
        request_completed: bool,
        stdout: String,
        stderr: String,
        exit_code: i32,
        original_stdout_size: Option<usize>,
        original_stderr_size: Option<usize>,
        new_working_directory: Option<String>,
        unsuccessful: bool,
    },
    Generic {
        request_completed: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestFailedData {
    pub kind: String,
    pub message: String,
}

pub struct RequestEventBuilder;

impl RequestEventBuilder {
    pub fn success(adapter_type: &str, request_id: &str, internal_request_id: Option<&str>, payload: &ReplyPayload) -> Value {
        serde_json::json!({
            "adapter_type": adapter_type,
            "request_id": request_id,
            "internal_request_id": internal_request_id,
            "data": payload,
        })
    }

    pub fn failed(adapter_type: &str, request_id: &str, kind: &str, message: &str) -> Value {
        serde_json::json!({
            "adapter_type": adapter_type,
            "request_id": request_id,
            "error": RequestFailedData { kind: kind.to_string(), message: message.to_string() },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_message_ids_serializes_flat() {
        let payload = ReplyPayload::SentMessageIds {
            request_completed: true,
            message_ids: vec!["1".into(), "2".into()],
        };
        let value = RequestEventBuilder::success("telegram", "req-1", None, &payload);
        assert_eq!(value["data"]["message_ids"][1], "2");
    }

    #[test]
    fn failed_carries_kind_and_message() {
        let value = RequestEventBuilder::failed("slack", "req-2", "not_found", "conversation missing");
        assert_eq!(value["error"]["kind"], "not_found");
    }
}
