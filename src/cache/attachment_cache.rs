//! The attachment cache: attachment_id → metadata + local blob path.

use super::{BoundedCache, CacheEntry};
use crate::conversation::model::{AttachmentId, AttachmentInfo};

impl CacheEntry for AttachmentInfo {
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

pub struct AttachmentCache {
    inner: BoundedCache<AttachmentId, AttachmentInfo>,
}

impl AttachmentCache {
    pub fn new(max_age_hours: f64, max_total: usize) -> Self {
        Self {
            inner: BoundedCache::new(max_age_hours, max_total),
        }
    }

    /// Register (or re-register) an attachment. If an entry already exists
    /// its `ref_count` is incremented rather than reset, since `add` is used
    /// both for first-sighting and for later messages reusing the same
    /// attachment (forwarded files, repeated stickers).
    pub async fn add_reference(&self, mut info: AttachmentInfo) {
        if let Some(existing) = self.inner.get(&info.attachment_id).await {
            info.ref_count = existing.ref_count + 1;
        } else {
            info.ref_count = info.ref_count.max(1);
        }
        self.inner.add(info.attachment_id.clone(), info).await;
    }

    pub async fn get(&self, attachment_id: &str) -> Option<AttachmentInfo> {
        self.inner.get(&attachment_id.to_string()).await
    }

    /// Decrement the reference count; returns the entry if it should now be
    /// deleted (ref_count reached zero) so the caller can unlink the blob.
    pub async fn release(&self, attachment_id: &str) -> Option<AttachmentInfo> {
        let key = attachment_id.to_string();
        let remaining = self
            .inner
            .with_mut(&key, |info| {
                info.ref_count = info.ref_count.saturating_sub(1);
                info.ref_count
            })
            .await?;
        if remaining == 0 {
            self.inner.delete(&key).await
        } else {
            None
        }
    }

    pub async fn delete(&self, attachment_id: &str) -> Option<AttachmentInfo> {
        self.inner.delete(&attachment_id.to_string()).await
    }

    pub async fn run_maintenance(&self) -> Vec<AttachmentId> {
        self.inner.run_maintenance().await
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}
