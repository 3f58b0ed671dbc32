//! Core data model shared by every adapter.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

pub type ConversationId = String;
pub type MessageId = String;
pub type UserId = String;
pub type ThreadId = String;
pub type AttachmentId = String;

/// `ConversationInfo.conversation_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationType {
    Private,
    Group,
    Channel,
    Dm,
    Thread,
    TextChannel,
}

/// A chat scope in which messages are ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationInfo {
    pub conversation_id: ConversationId,
    pub platform_conversation_id: String,
    pub conversation_type: ConversationType,
    pub conversation_name: Option<String>,
    pub server_id: Option<String>,
    pub server_name: Option<String>,
    pub known_members: HashMap<UserId, UserInfo>,
    pub messages: HashSet<MessageId>,
    pub pinned_messages: HashSet<MessageId>,
    pub threads: HashMap<ThreadId, ThreadInfo>,
    /// True only until the first `add_to_conversation` delta has been emitted
    /// for it.
    pub just_started: bool,
}

impl ConversationInfo {
    pub fn new(
        conversation_id: ConversationId,
        platform_conversation_id: String,
        conversation_type: ConversationType,
    ) -> Self {
        Self {
            conversation_id,
            platform_conversation_id,
            conversation_type,
            conversation_name: None,
            server_id: None,
            server_name: None,
            known_members: HashMap::new(),
            messages: HashSet::new(),
            pinned_messages: HashSet::new(),
            threads: HashMap::new(),
            just_started: true,
        }
    }

    /// Invariant check used by tests: `pinned_messages ⊆ messages`.
    pub fn pins_are_subset_of_messages(&self) -> bool {
        self.pinned_messages.is_subset(&self.messages)
    }
}

/// A message as held in the message cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedMessage {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub thread_id: Option<ThreadId>,
    pub sender_id: UserId,
    pub sender_name: String,
    pub text: String,
    /// Epoch milliseconds, uniform across adapters (see DESIGN.md timestamp note).
    pub timestamp: i64,
    pub edit_timestamp: Option<i64>,
    pub edited: bool,
    pub is_from_bot: bool,
    pub reply_to_message_id: Option<MessageId>,
    pub is_pinned: bool,
    pub reactions: HashMap<String, u32>,
    pub attachments: Vec<AttachmentId>,
    pub mentions: Vec<Mention>,
    /// Monotonic bookkeeping for cache eviction; not part of the wire model.
    pub created_at: i64,
    pub last_access: i64,
}

/// A mention target: either a specific user or the platform-wide "at all" token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mention {
    User(UserId),
    All,
}

impl CachedMessage {
    pub fn touch(&mut self, now_ms: i64) {
        self.last_access = now_ms;
    }
}

/// A reply chain / forum-topic grouping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadInfo {
    pub thread_id: ThreadId,
    pub title: Option<String>,
    pub root_message_id: Option<MessageId>,
    pub messages: HashSet<MessageId>,
    pub last_activity: i64,
}

impl ThreadInfo {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// A known chat participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub user_id: UserId,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_bot: bool,
    pub created_at: i64,
    pub last_access: i64,
}

impl UserInfo {
    /// `display_name` derived as `username` else `first_name last_name` else
    /// `"Unknown User"`.
    pub fn display_name(&self) -> String {
        if let Some(username) = &self.username {
            if !username.is_empty() {
                return username.clone();
            }
        }
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) if !first.is_empty() || !last.is_empty() => {
                format!("{} {}", first, last).trim().to_string()
            }
            (Some(first), None) if !first.is_empty() => first.clone(),
            (None, Some(last)) if !last.is_empty() => last.clone(),
            _ => "Unknown User".to_string(),
        }
    }
}

/// Kind of file, derived from extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentType {
    Image,
    Video,
    Audio,
    Document,
    Archive,
    Code,
    Ebook,
    Font,
    #[serde(rename = "3d_model")]
    ThreeDModel,
    Executable,
    Sticker,
}

impl AttachmentType {
    /// Derive the attachment type from a file extension (case-insensitive,
    /// leading-dot optional).
    pub fn from_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "svg" | "heic" => Self::Image,
            "mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" => Self::Video,
            "mp3" | "wav" | "ogg" | "flac" | "m4a" | "opus" => Self::Audio,
            "zip" | "tar" | "gz" | "7z" | "rar" | "bz2" | "xz" => Self::Archive,
            "rs" | "py" | "js" | "ts" | "go" | "java" | "c" | "cpp" | "h" | "sh" | "rb" => {
                Self::Code
            }
            "epub" | "mobi" | "azw3" => Self::Ebook,
            "ttf" | "otf" | "woff" | "woff2" => Self::Font,
            "glb" | "gltf" | "obj" | "fbx" | "stl" => Self::ThreeDModel,
            "exe" | "msi" | "dmg" | "appimage" | "deb" | "apk" => Self::Executable,
            "webp_sticker" | "tgs" => Self::Sticker,
            _ => Self::Document,
        }
    }

    pub fn as_dir_name(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
            Self::Archive => "archive",
            Self::Code => "code",
            Self::Ebook => "ebook",
            Self::Font => "font",
            Self::ThreeDModel => "3d_model",
            Self::Executable => "executable",
            Self::Sticker => "sticker",
        }
    }
}

/// Metadata for a cached attachment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentInfo {
    pub attachment_id: AttachmentId,
    pub attachment_type: AttachmentType,
    pub filename: String,
    pub file_extension: Option<String>,
    pub size: u64,
    pub content_type: Option<String>,
    pub url: Option<String>,
    pub processable: bool,
    pub created_at: i64,
    pub last_access: i64,
    /// Number of cached messages currently referencing this attachment.
    /// The on-disk blob is only unlinked when this reaches zero and the
    /// entry is evicted; a blob may outlive its cache entry if another
    /// reference exists.
    pub ref_count: u32,
}

impl AttachmentInfo {
    /// Relative path under the attachment storage root:
    /// `<attachment_type>/<attachment_id>/<filename>`.
    pub fn relative_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(self.attachment_type.as_dir_name())
            .join(&self.attachment_id)
            .join(&self.filename)
    }

    pub fn sidecar_relative_path(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(self.attachment_type.as_dir_name())
            .join(&self.attachment_id)
            .join(format!("{}.json", self.attachment_id))
    }
}

/// The pure value returned by every conversation-manager mutator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationDelta {
    pub conversation_id: ConversationId,
    pub conversation_name: Option<String>,
    pub server_name: Option<String>,
    /// True iff the conversation was just created by this event.
    pub fetch_history: bool,
    pub just_started: bool,
    pub added_messages: Vec<CachedMessage>,
    pub updated_messages: Vec<CachedMessage>,
    pub deleted_message_ids: Vec<MessageId>,
    pub pinned_message_ids: Vec<MessageId>,
    pub unpinned_message_ids: Vec<MessageId>,
    pub added_reactions: Vec<String>,
    pub removed_reactions: Vec<String>,
    /// Set for single-message reaction/pin events.
    pub message_id: Option<MessageId>,
}

impl ConversationDelta {
    pub fn empty(conversation_id: impl Into<ConversationId>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added_messages.is_empty()
            && self.updated_messages.is_empty()
            && self.deleted_message_ids.is_empty()
            && self.pinned_message_ids.is_empty()
            && self.unpinned_message_ids.is_empty()
            && self.added_reactions.is_empty()
            && self.removed_reactions.is_empty()
            && !self.fetch_history
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_username() {
        let u = UserInfo {
            user_id: "1".into(),
            username: Some("alice".into()),
            first_name: Some("Alice".into()),
            last_name: None,
            is_bot: false,
            created_at: 0,
            last_access: 0,
        };
        assert_eq!(u.display_name(), "alice");
    }

    #[test]
    fn display_name_falls_back_to_names() {
        let u = UserInfo {
            user_id: "1".into(),
            username: None,
            first_name: Some("Alice".into()),
            last_name: Some("Smith".into()),
            is_bot: false,
            created_at: 0,
            last_access: 0,
        };
        assert_eq!(u.display_name(), "Alice Smith");
    }

    #[test]
    fn display_name_unknown_when_nothing_present() {
        let u = UserInfo {
            user_id: "1".into(),
            username: None,
            first_name: None,
            last_name: None,
            is_bot: false,
            created_at: 0,
            last_access: 0,
        };
        assert_eq!(u.display_name(), "Unknown User");
    }

    #[test]
    fn attachment_type_from_extension() {
        assert_eq!(AttachmentType::from_extension("PNG"), AttachmentType::Image);
        assert_eq!(AttachmentType::from_extension(".rs"), AttachmentType::Code);
        assert_eq!(
            AttachmentType::from_extension("unknownext"),
            AttachmentType::Document
        );
    }
}
