//! The message cache.
//!
//! Wraps the same bounded-map discipline as [`super::BoundedCache`] but adds
//! the per-conversation index needed for the per-conversation cap and for
//! `migrate`, so it keeps its own lock over both the message map
//! and the index rather than composing two independently-locked maps.

use std::collections::{HashMap, HashSet};

use tokio::sync::Mutex;

use super::now_ms;
use crate::conversation::model::{CachedMessage, ConversationId, MessageId};

struct Inner {
    messages: HashMap<MessageId, CachedMessage>,
    by_conversation: HashMap<ConversationId, HashSet<MessageId>>,
}

pub struct MessageCache {
    inner: Mutex<Inner>,
    max_age_ms: i64,
    max_per_conversation: usize,
    max_total: usize,
}

impl MessageCache {
    pub fn new(max_age_hours: f64, max_per_conversation: usize, max_total: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: HashMap::new(),
                by_conversation: HashMap::new(),
            }),
            max_age_ms: (max_age_hours * 3_600_000.0) as i64,
            max_per_conversation,
            max_total,
        }
    }

    /// Idempotent insert-or-replace.
    pub async fn add(&self, message: CachedMessage) {
        let mut guard = self.inner.lock().await;
        let conversation_id = message.conversation_id.clone();
        let message_id = message.message_id.clone();
        guard
            .by_conversation
            .entry(conversation_id)
            .or_default()
            .insert(message_id.clone());
        guard.messages.insert(message_id, message);
    }

    pub async fn get(&self, message_id: &str) -> Option<CachedMessage> {
        let mut guard = self.inner.lock().await;
        let now = now_ms();
        guard.messages.get_mut(message_id).map(|m| {
            m.touch(now);
            m.clone()
        })
    }

    pub async fn with_mut<R>(
        &self,
        message_id: &str,
        f: impl FnOnce(&mut CachedMessage) -> R,
    ) -> Option<R> {
        let mut guard = self.inner.lock().await;
        let now = now_ms();
        guard.messages.get_mut(message_id).map(|m| {
            let r = f(m);
            m.touch(now);
            r
        })
    }

    pub async fn delete(&self, message_id: &str) -> Option<CachedMessage> {
        let mut guard = self.inner.lock().await;
        let removed = guard.messages.remove(message_id);
        if let Some(m) = &removed {
            if let Some(set) = guard.by_conversation.get_mut(&m.conversation_id) {
                set.remove(message_id);
            }
        }
        removed
    }

    /// All message ids currently cached for a conversation.
    pub async fn conversation_message_ids(&self, conversation_id: &str) -> HashSet<MessageId> {
        self.inner
            .lock()
            .await
            .by_conversation
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Re-key every cached message (and the conversation index) from
    /// `old_id` to `new_id`, for platforms whose chat ids change in place
    /// (e.g. Telegram basic-group → supergroup upgrade).
    pub async fn migrate(&self, old_conversation_id: &str, new_conversation_id: &str) {
        let mut guard = self.inner.lock().await;
        let Some(ids) = guard.by_conversation.remove(old_conversation_id) else {
            return;
        };
        for id in &ids {
            if let Some(m) = guard.messages.get_mut(id) {
                m.conversation_id = new_conversation_id.to_string();
            }
        }
        guard
            .by_conversation
            .entry(new_conversation_id.to_string())
            .or_default()
            .extend(ids);
    }

    pub async fn total_len(&self) -> usize {
        self.inner.lock().await.messages.len()
    }

    pub async fn conversation_len(&self, conversation_id: &str) -> usize {
        self.inner
            .lock()
            .await
            .by_conversation
            .get(conversation_id)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// One maintenance pass: age-based eviction, then per-conversation cap,
    /// then global cap — each dropping the oldest messages first.
    pub async fn run_maintenance(&self) -> Vec<MessageId> {
        let mut guard = self.inner.lock().await;
        let now = now_ms();
        let mut dropped = Vec::new();

        let aged_out: Vec<MessageId> = guard
            .messages
            .iter()
            .filter(|(_, m)| now.saturating_sub(m.created_at) > self.max_age_ms)
            .map(|(id, _)| id.clone())
            .collect();
        for id in aged_out {
            if let Some(m) = guard.messages.remove(&id) {
                if let Some(set) = guard.by_conversation.get_mut(&m.conversation_id) {
                    set.remove(&id);
                }
                dropped.push(id);
            }
        }

        let conversations: Vec<ConversationId> = guard.by_conversation.keys().cloned().collect();
        for conversation_id in conversations {
            let over = {
                let set = guard.by_conversation.get(&conversation_id).unwrap();
                set.len().saturating_sub(self.max_per_conversation)
            };
            if over == 0 {
                continue;
            }
            let mut ids: Vec<(MessageId, i64)> = guard
                .by_conversation
                .get(&conversation_id)
                .unwrap()
                .iter()
                .map(|id| (id.clone(), guard.messages.get(id).map(|m| m.created_at).unwrap_or(i64::MAX)))
                .collect();
            ids.sort_by_key(|(_, created)| *created);
            for (id, _) in ids.into_iter().take(over) {
                guard.messages.remove(&id);
                if let Some(set) = guard.by_conversation.get_mut(&conversation_id) {
                    set.remove(&id);
                }
                dropped.push(id);
            }
        }

        if guard.messages.len() > self.max_total {
            let mut by_age: Vec<(MessageId, i64)> = guard
                .messages
                .iter()
                .map(|(id, m)| (id.clone(), m.created_at))
                .collect();
            by_age.sort_by_key(|(_, created)| *created);
            let excess = guard.messages.len() - self.max_total;
            for (id, _) in by_age.into_iter().take(excess) {
                if let Some(m) = guard.messages.remove(&id) {
                    if let Some(set) = guard.by_conversation.get_mut(&m.conversation_id) {
                        set.remove(&id);
                    }
                    dropped.push(id);
                }
            }
        }

        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, conversation_id: &str, created_at: i64) -> CachedMessage {
        CachedMessage {
            message_id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            thread_id: None,
            sender_id: "u1".into(),
            sender_name: "Alice".into(),
            text: "hi".into(),
            timestamp: created_at,
            edit_timestamp: None,
            edited: false,
            is_from_bot: false,
            reply_to_message_id: None,
            is_pinned: false,
            reactions: HashMap::new(),
            attachments: vec![],
            mentions: vec![],
            created_at,
            last_access: created_at,
        }
    }

    #[tokio::test]
    async fn per_conversation_cap_evicts_oldest() {
        let cache = MessageCache::new(999.0, 2, 999);
        cache.add(msg("1", "c1", 1)).await;
        cache.add(msg("2", "c1", 2)).await;
        cache.add(msg("3", "c1", 3)).await;

        let dropped = cache.run_maintenance().await;
        assert_eq!(dropped, vec!["1".to_string()]);
        assert_eq!(cache.conversation_len("c1").await, 2);
    }

    #[tokio::test]
    async fn migrate_rekeys_conversation() {
        let cache = MessageCache::new(999.0, 999, 999);
        cache.add(msg("1", "old", 1)).await;
        cache.migrate("old", "new").await;

        assert!(cache.conversation_message_ids("old").await.is_empty());
        let ids = cache.conversation_message_ids("new").await;
        assert!(ids.contains("1"));
        assert_eq!(cache.get("1").await.unwrap().conversation_id, "new");
    }

    #[tokio::test]
    async fn global_cap_evicts_across_conversations() {
        let cache = MessageCache::new(999.0, 999, 2);
        cache.add(msg("1", "c1", 1)).await;
        cache.add(msg("2", "c2", 2)).await;
        cache.add(msg("3", "c1", 3)).await;

        let dropped = cache.run_maintenance().await;
        assert_eq!(dropped, vec!["1".to_string()]);
        assert_eq!(cache.total_len().await, 2);
    }
}
