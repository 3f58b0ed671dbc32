//! Thread handler: reply/forum-thread inference.

use crate::cache::MessageCache;
use crate::conversation::model::{ConversationInfo, MessageId, ThreadId, ThreadInfo};

/// Input carried by an incoming message relevant to thread resolution.
pub struct ThreadInput<'a> {
    /// A native thread id the platform already assigned (Telegram
    /// `message_thread_id`, Discord thread-channel id, Slack `thread_ts`,
    /// Zulip topic). Verbatim if present.
    pub native_thread_id: Option<&'a str>,
    pub reply_to_message_id: Option<&'a str>,
}

/// Resolve the thread id for an incoming message and, if one is assigned,
/// fold the message into `conversation.threads`.
pub struct ThreadHandler;

impl ThreadHandler {
    /// Determine the message's thread id, walking the reply chain through
    /// the message cache when no native id is present.
    pub async fn resolve(
        message_cache: &MessageCache,
        input: &ThreadInput<'_>,
    ) -> Option<ThreadId> {
        if let Some(native) = input.native_thread_id {
            return Some(native.to_string());
        }

        let reply_to = input.reply_to_message_id?;
        Some(Self::walk_to_root(message_cache, reply_to).await)
    }

    /// Walk reply pointers through the message cache to the earliest ancestor still
    /// cached; if the chain exits the cache, the furthest ancestor seen
    /// becomes the thread id.
    async fn walk_to_root(message_cache: &MessageCache, start: &str) -> MessageId {
        let mut current = start.to_string();
        let mut seen = std::collections::HashSet::new();
        loop {
            if !seen.insert(current.clone()) {
                // Defensive: a cycle should never occur upstream, but never loop forever.
                return current;
            }
            match message_cache.get(&current).await {
                Some(cached) => {
                    if let Some(existing_thread) = &cached.thread_id {
                        return existing_thread.clone();
                    }
                    match cached.reply_to_message_id {
                        Some(parent) => current = parent,
                        None => return current,
                    }
                }
                None => return current,
            }
        }
    }

    /// Ensure `conversation.threads[thread_id]` exists, add the message id,
    /// and refresh `last_activity`.
    pub fn record_in_conversation(
        conversation: &mut ConversationInfo,
        thread_id: &str,
        message_id: &str,
        now_ms: i64,
    ) {
        let thread = conversation
            .threads
            .entry(thread_id.to_string())
            .or_insert_with(|| ThreadInfo {
                thread_id: thread_id.to_string(),
                title: None,
                root_message_id: None,
                messages: std::collections::HashSet::new(),
                last_activity: now_ms,
            });
        thread.messages.insert(message_id.to_string());
        thread.last_activity = now_ms;
    }

    /// Drop threads left with no messages: empty `messages` makes a thread
    /// eligible for removal on the next maintenance pass.
    pub fn sweep_empty_threads(conversation: &mut ConversationInfo) {
        conversation.threads.retain(|_, thread| !thread.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::model::{CachedMessage, ConversationType};
    use std::collections::HashMap;

    fn msg(id: &str, reply_to: Option<&str>) -> CachedMessage {
        CachedMessage {
            message_id: id.to_string(),
            conversation_id: "c1".into(),
            thread_id: None,
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            text: "hi".into(),
            timestamp: 0,
            edit_timestamp: None,
            edited: false,
            is_from_bot: false,
            reply_to_message_id: reply_to.map(|s| s.to_string()),
            is_pinned: false,
            reactions: HashMap::new(),
            attachments: vec![],
            mentions: vec![],
            created_at: 0,
            last_access: 0,
        }
    }

    #[tokio::test]
    async fn native_thread_id_wins() {
        let cache = MessageCache::new(999.0, 999, 999);
        let input = ThreadInput {
            native_thread_id: Some("native-1"),
            reply_to_message_id: Some("100"),
        };
        let resolved = ThreadHandler::resolve(&cache, &input).await;
        assert_eq!(resolved.as_deref(), Some("native-1"));
    }

    #[tokio::test]
    async fn reply_chain_walks_to_cached_root() {
        let cache = MessageCache::new(999.0, 999, 999);
        cache.add(msg("1", None)).await;
        cache.add(msg("2", Some("1"))).await;
        cache.add(msg("3", Some("2"))).await;

        let input = ThreadInput {
            native_thread_id: None,
            reply_to_message_id: Some("3"),
        };
        let resolved = ThreadHandler::resolve(&cache, &input).await;
        assert_eq!(resolved.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn reply_chain_stops_at_cache_boundary() {
        let cache = MessageCache::new(999.0, 999, 999);
        cache.add(msg("2", Some("1"))).await; // "1" not cached

        let input = ThreadInput {
            native_thread_id: None,
            reply_to_message_id: Some("2"),
        };
        let resolved = ThreadHandler::resolve(&cache, &input).await;
        assert_eq!(resolved.as_deref(), Some("1"));
    }

    #[test]
    fn no_reply_no_thread() {
        let input = ThreadInput {
            native_thread_id: None,
            reply_to_message_id: None,
        };
        assert!(input.native_thread_id.is_none() && input.reply_to_message_id.is_none());
    }

    #[test]
    fn sweep_removes_empty_threads() {
        let mut conv = ConversationInfo::new("c1".into(), "c1".into(), ConversationType::Group);
        ThreadHandler::record_in_conversation(&mut conv, "t1", "m1", 0);
        conv.threads.get_mut("t1").unwrap().messages.clear();
        ThreadHandler::sweep_empty_threads(&mut conv);
        assert!(conv.threads.is_empty());
    }
}
