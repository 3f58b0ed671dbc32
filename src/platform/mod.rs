//! Platform driver trait and per-platform adapters.
//!
//! The incoming and outgoing processors never see a raw platform SDK type;
//! every platform module converts its SDK's objects into the DTOs below at
//! the edge, so the core only ever matches on narrow, adapter-local shapes
//! (design note: dynamic field access on upstream SDK objects becomes
//! explicit DTO construction here).

pub mod discord;
pub mod discord_webhook;
pub mod slack;
pub mod telegram;
pub mod zulip;

use async_trait::async_trait;

use crate::conversation::message_builder::NewMessageInput;
use crate::error::Result;

/// A resolved send target plus the text/attachments/mentions to deliver.
#[derive(Debug, Clone)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub text: String,
    pub attachment_paths: Vec<std::path::PathBuf>,
    pub custom_name: Option<String>,
    pub thread_id: Option<String>,
    pub mentions: Vec<String>,
}

/// A page of history normalized to the same DTO used for live messages.
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub messages: Vec<NewMessageInput>,
    pub has_more: bool,
}

/// The narrow surface the outgoing processor drives. Every platform module
/// implements this once against its own SDK; operations the platform
/// genuinely cannot perform return `PlatformError::Unsupported` rather than
/// being omitted, so the outgoing processor's dispatch table stays uniform
/// across adapters.
#[async_trait]
pub trait PlatformDriver: Send + Sync {
    fn adapter_type(&self) -> &'static str;

    fn max_message_length(&self) -> usize;

    fn max_attachments_per_message(&self) -> usize;

    /// Lightweight liveness probe used by the connection monitor:
    /// `get_me`, `GET /gateway`, or equivalent per platform.
    async fn connection_exists(&self) -> bool;

    async fn send_message(&self, request: SendMessageRequest) -> Result<Vec<String>>;

    async fn edit_message(&self, conversation_id: &str, message_id: &str, text: &str) -> Result<()>;

    async fn delete_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn add_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    async fn remove_reaction(&self, conversation_id: &str, message_id: &str, emoji: &str) -> Result<()>;

    async fn pin_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn unpin_message(&self, conversation_id: &str, message_id: &str) -> Result<()>;

    async fn fetch_history_page(
        &self,
        conversation_id: &str,
        before: Option<i64>,
        after: Option<i64>,
        limit: u32,
    ) -> Result<HistoryPage>;

    async fn fetch_attachment(&self, attachment_id: &str) -> Result<Vec<u8>>;
}
