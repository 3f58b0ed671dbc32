//! The user cache: user_id → profile, populated on first sighting.

use super::{BoundedCache, CacheEntry};
use crate::conversation::model::{UserId, UserInfo};

impl CacheEntry for UserInfo {
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

pub struct UserCache {
    inner: BoundedCache<UserId, UserInfo>,
}

impl UserCache {
    pub fn new(max_age_hours: f64, max_total: usize) -> Self {
        Self {
            inner: BoundedCache::new(max_age_hours, max_total),
        }
    }

    /// Upsert a user profile. Populated on first sighting;
    /// later sightings refresh known fields without discarding ones the
    /// new sighting doesn't carry (e.g. a reaction payload that only has a
    /// user id keeps the previously-learned display name).
    pub async fn upsert(&self, mut info: UserInfo) {
        if let Some(existing) = self.inner.get(&info.user_id).await {
            info.username = info.username.or(existing.username);
            info.first_name = info.first_name.or(existing.first_name);
            info.last_name = info.last_name.or(existing.last_name);
            info.created_at = existing.created_at;
        }
        self.inner.add(info.user_id.clone(), info).await;
    }

    pub async fn get(&self, user_id: &str) -> Option<UserInfo> {
        self.inner.get(&user_id.to_string()).await
    }

    pub async fn delete(&self, user_id: &str) -> Option<UserInfo> {
        self.inner.delete(&user_id.to_string()).await
    }

    pub async fn run_maintenance(&self) -> Vec<UserId> {
        self.inner.run_maintenance().await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_preserves_previously_known_fields() {
        let cache = UserCache::new(999.0, 999);
        cache
            .upsert(UserInfo {
                user_id: "1".into(),
                username: Some("alice".into()),
                first_name: Some("Alice".into()),
                last_name: None,
                is_bot: false,
                created_at: 10,
                last_access: 10,
            })
            .await;

        cache
            .upsert(UserInfo {
                user_id: "1".into(),
                username: None,
                first_name: None,
                last_name: None,
                is_bot: false,
                created_at: 20,
                last_access: 20,
            })
            .await;

        let stored = cache.get("1").await.unwrap();
        assert_eq!(stored.username.as_deref(), Some("alice"));
        assert_eq!(stored.created_at, 10);
    }
}
