//! The history fetcher. Cache-first, API-fill-the-gap.

use std::sync::Arc;

use crate::cache::MessageCache;
use crate::conversation::manager::ConversationManager;
use crate::conversation::model::CachedMessage;
use crate::error::Result;
use crate::platform::PlatformDriver;

pub struct HistoryFetcher {
    message_cache: Arc<MessageCache>,
    conversation_manager: Arc<ConversationManager>,
    max_history_limit: u32,
    max_pagination_iterations: u32,
    cache_fetched_history: bool,
}

impl HistoryFetcher {
    pub fn new(
        message_cache: Arc<MessageCache>,
        conversation_manager: Arc<ConversationManager>,
        max_history_limit: u32,
        max_pagination_iterations: u32,
        cache_fetched_history: bool,
    ) -> Self {
        Self {
            message_cache,
            conversation_manager,
            max_history_limit,
            max_pagination_iterations,
            cache_fetched_history,
        }
    }

    /// Exactly one of `before`/`after` must be set; validated by
    /// `OutgoingEventBuilder` before this is reached. `conversation_id` is
    /// the cache key (the wire-facing id); `platform_conversation_id` is
    /// what the driver's own SDK resolves (they're equal on every platform
    /// except Discord, where the former is a hash of the latter).
    pub async fn fetch(
        &self,
        driver: &dyn PlatformDriver,
        conversation_id: &str,
        platform_conversation_id: &str,
        before: Option<i64>,
        after: Option<i64>,
        limit: u32,
    ) -> Result<Vec<CachedMessage>> {
        let limit = limit.max(1);
        let cached = self.cached_window(conversation_id, before, after).await;

        if cached.len() as u32 >= limit {
            return Ok(truncate_for_bound(cached, before, after, limit));
        }

        let mut cursor_before = before;
        let mut cursor_after = after;
        let mut iterations = 0;
        while iterations < self.max_pagination_iterations {
            let page_limit = self.max_history_limit.min(limit);
            let page = driver
                .fetch_history_page(platform_conversation_id, cursor_before, cursor_after, page_limit)
                .await?;
            if page.messages.is_empty() {
                break;
            }

            for raw in page.messages {
                if self.cache_fetched_history {
                    self.conversation_manager.ingest_history_message(conversation_id, raw).await;
                }
            }

            if !page.has_more {
                break;
            }
            iterations += 1;

            // Walk the window further away from the anchor each iteration
            // so a platform that honors before/after as a moving cursor
            // doesn't just return the same page forever.
            let refreshed = self.cached_window(conversation_id, before, after).await;
            if refreshed.len() as u32 >= limit {
                return Ok(truncate_for_bound(refreshed, before, after, limit));
            }
            if let Some(b) = cursor_before {
                cursor_before = refreshed.iter().map(|m| m.timestamp).min().or(Some(b));
            }
            if let Some(a) = cursor_after {
                cursor_after = refreshed.iter().map(|m| m.timestamp).max().or(Some(a));
            }
        }

        let result = self.cached_window(conversation_id, before, after).await;
        Ok(truncate_for_bound(result, before, after, limit))
    }

    async fn cached_window(&self, conversation_id: &str, before: Option<i64>, after: Option<i64>) -> Vec<CachedMessage> {
        let ids = self.message_cache.conversation_message_ids(conversation_id).await;
        let mut messages = Vec::new();
        for id in ids {
            if let Some(message) = self.message_cache.get(&id).await {
                let in_window = match (before, after) {
                    (Some(before), _) => message.timestamp < before,
                    (_, Some(after)) => message.timestamp > after,
                    _ => true,
                };
                if in_window {
                    messages.push(message);
                }
            }
        }
        sort_by_timestamp_then_id(&mut messages);
        messages
    }
}

fn sort_by_timestamp_then_id(messages: &mut [CachedMessage]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.message_id.cmp(&b.message_id)));
}

/// `before` truncates to the newest `limit` messages below the bound;
/// `after` (or unbounded) truncates to the oldest `limit` above it.
fn truncate_for_bound(mut messages: Vec<CachedMessage>, before: Option<i64>, _after: Option<i64>, limit: u32) -> Vec<CachedMessage> {
    sort_by_timestamp_then_id(&mut messages);
    let limit = limit as usize;
    if messages.len() <= limit {
        return messages;
    }
    if before.is_some() {
        messages.split_off(messages.len() - limit)
    } else {
        messages.truncate(limit);
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AttachmentCache, UserCache};
    use std::collections::HashMap;

    fn msg(id: &str, conversation_id: &str, ts: i64) -> CachedMessage {
        CachedMessage {
            message_id: id.into(),
            conversation_id: conversation_id.into(),
            thread_id: None,
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            text: "hi".into(),
            timestamp: ts,
            edit_timestamp: None,
            edited: false,
            is_from_bot: false,
            reply_to_message_id: None,
            is_pinned: false,
            reactions: HashMap::new(),
            attachments: vec![],
            mentions: vec![],
            created_at: ts,
            last_access: ts,
        }
    }

    #[tokio::test]
    async fn serves_from_cache_when_enough_messages_present() {
        let message_cache = Arc::new(MessageCache::new(999.0, 999, 999));
        message_cache.add(msg("1", "c1", 10)).await;
        message_cache.add(msg("2", "c1", 20)).await;
        message_cache.add(msg("3", "c1", 30)).await;

        let manager = Arc::new(ConversationManager::new(
            "bot-1",
            message_cache.clone(),
            Arc::new(AttachmentCache::new(999.0, 999)),
            Arc::new(UserCache::new(999.0, 999)),
        ));

        struct PanicsDriver;
        #[async_trait::async_trait]
        impl PlatformDriver for PanicsDriver {
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
            async fn send_message(&self, _r: crate::platform::SendMessageRequest) -> Result<Vec<String>> {
                unreachable!()
            }
            async fn edit_message(&self, _c: &str, _m: &str, _t: &str) -> Result<()> {
                unreachable!()
            }
            async fn delete_message(&self, _c: &str, _m: &str) -> Result<()> {
                unreachable!()
            }
            async fn add_reaction(&self, _c: &str, _m: &str, _e: &str) -> Result<()> {
                unreachable!()
            }
            async fn remove_reaction(&self, _c: &str, _m: &str, _e: &str) -> Result<()> {
                unreachable!()
            }
            async fn pin_message(&self, _c: &str, _m: &str) -> Result<()> {
                unreachable!()
            }
            async fn unpin_message(&self, _c: &str, _m: &str) -> Result<()> {
                unreachable!()
            }
            async fn fetch_history_page(
                &self,
                _c: &str,
                _b: Option<i64>,
                _a: Option<i64>,
                _l: u32,
            ) -> Result<crate::platform::HistoryPage> {
                panic!("should not reach upstream when cache already satisfies the limit")
            }
            async fn fetch_attachment(&self, _a: &str) -> Result<Vec<u8>> {
                unreachable!()
            }
        }

        let fetcher = HistoryFetcher::new(message_cache, manager, 50, 3, false);
        let result = fetcher.fetch(&PanicsDriver, "c1", "c1", None, None, 2).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].message_id, "1");
    }
}
