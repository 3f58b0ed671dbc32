//! Bounded, lock-serialized caches shared by the message, attachment, and
//! user caches.
//!
//! All three caches share the same eviction shape: a single exclusive lock,
//! creation/last-access timestamps per entry, an age cutoff, and a count
//! cap. The common base lives here; `message_cache`, `attachment_cache`, and
//! `user_cache` each add the bookkeeping specific to their entry type
//! (message cache additionally tracks a per-conversation index and supports
//! `migrate`).

pub mod attachment_cache;
pub mod message_cache;
pub mod user_cache;

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::Mutex;

pub use attachment_cache::AttachmentCache;
pub use message_cache::MessageCache;
pub use user_cache::UserCache;

/// Anything stored in a [`BoundedCache`] must expose its bookkeeping
/// timestamps so the maintenance sweep can evict by age and by count.
pub trait CacheEntry {
    fn created_at(&self) -> i64;
    fn last_access(&self) -> i64;
    fn touch(&mut self, now_ms: i64);
}

/// Current time in epoch milliseconds. A free function (rather than
/// `chrono::Utc::now()` sprinkled everywhere) so tests can't accidentally
/// depend on wall-clock time without going through here.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// The generic bounded map underlying the message, attachment, and user caches.
///
/// Every public operation takes the single internal lock; none perform
/// network I/O, so critical sections stay O(1)-ish.
pub struct BoundedCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
    max_age_ms: i64,
    max_total: usize,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Ord,
    V: CacheEntry + Clone,
{
    pub fn new(max_age_hours: f64, max_total: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age_ms: (max_age_hours * 3_600_000.0) as i64,
            max_total,
        }
    }

    /// Idempotent insert-or-replace; bumps `last_access`.
    pub async fn add(&self, key: K, mut value: V) {
        value.touch(now_ms());
        self.entries.lock().await.insert(key, value);
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.entries.lock().await;
        let now = now_ms();
        if let Some(entry) = guard.get_mut(key) {
            entry.touch(now);
            Some(entry.clone())
        } else {
            None
        }
    }

    pub async fn delete(&self, key: &K) -> Option<V> {
        self.entries.lock().await.remove(key)
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Mutate an entry in place under the lock, returning whatever the
    /// closure returns. Returns `None` if the key is absent.
    pub async fn with_mut<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        let mut guard = self.entries.lock().await;
        let now = now_ms();
        guard.get_mut(key).map(|entry| {
            let result = f(entry);
            entry.touch(now);
            result
        })
    }

    /// One maintenance pass: drop entries older than `max_age_ms`, then (if
    /// still over `max_total`) drop the oldest entries by `created_at`
    /// until at or under the cap. Returns the dropped keys.
    pub async fn run_maintenance(&self) -> Vec<K> {
        let mut guard = self.entries.lock().await;
        let now = now_ms();
        let mut dropped = Vec::new();

        let aged_out: Vec<K> = guard
            .iter()
            .filter(|(_, v)| now.saturating_sub(v.created_at()) > self.max_age_ms)
            .map(|(k, _)| k.clone())
            .collect();
        for key in aged_out {
            guard.remove(&key);
            dropped.push(key);
        }

        if guard.len() > self.max_total {
            let mut by_age: Vec<(K, i64)> =
                guard.iter().map(|(k, v)| (k.clone(), v.created_at())).collect();
            by_age.sort_by_key(|(_, created)| *created);
            let excess = guard.len() - self.max_total;
            for (key, _) in by_age.into_iter().take(excess) {
                guard.remove(&key);
                dropped.push(key);
            }
        }

        dropped
    }

    /// Snapshot of all current keys, oldest-created first.
    pub async fn keys_oldest_first(&self) -> Vec<K> {
        let guard = self.entries.lock().await;
        let mut keys: Vec<(K, i64)> = guard.iter().map(|(k, v)| (k.clone(), v.created_at())).collect();
        keys.sort_by_key(|(_, created)| *created);
        keys.into_iter().map(|(k, _)| k).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone)]
    struct Entry {
        created_at: i64,
        last_access: i64,
    }

    impl CacheEntry for Entry {
        fn created_at(&self) -> i64 {
            self.created_at
        }
        fn last_access(&self) -> i64 {
            self.last_access
        }
        fn touch(&mut self, now_ms: i64) {
            self.last_access = now_ms;
        }
    }

    #[tokio::test]
    async fn evicts_oldest_over_count_cap() {
        let cache: BoundedCache<i32, Entry> = BoundedCache::new(999.0, 2);
        cache
            .add(
                1,
                Entry {
                    created_at: 1,
                    last_access: 1,
                },
            )
            .await;
        cache
            .add(
                2,
                Entry {
                    created_at: 2,
                    last_access: 2,
                },
            )
            .await;
        cache
            .add(
                3,
                Entry {
                    created_at: 3,
                    last_access: 3,
                },
            )
            .await;

        let dropped = cache.run_maintenance().await;
        assert_eq!(dropped, vec![1]);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn evicts_by_age() {
        let cache: BoundedCache<i32, Entry> = BoundedCache::new(1.0 / 3_600_000.0 * 5.0, 999);
        cache
            .add(
                1,
                Entry {
                    created_at: now_ms() - 100_000,
                    last_access: now_ms() - 100_000,
                },
            )
            .await;
        let dropped = cache.run_maintenance().await;
        assert_eq!(dropped, vec![1]);
    }
}
