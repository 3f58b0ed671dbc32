//! Bounded, per-path log of reversible file operations, each backed by an
//! on-disk copy of whatever content an undo would need to restore.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::now_ms;
use crate::error::{FileAdapterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub backup_file_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub action: EventAction,
    pub backup_info: Option<BackupInfo>,
    pub recorded_at: i64,
}

pub struct FileEventCache {
    backup_directory: PathBuf,
    event_ttl_ms: i64,
    max_events_per_file: usize,
    events: Mutex<HashMap<PathBuf, VecDeque<FileEvent>>>,
}

impl FileEventCache {
    pub fn new(backup_directory: impl Into<PathBuf>, event_ttl_hours: f64, max_events_per_file: usize) -> Self {
        Self {
            backup_directory: backup_directory.into(),
            event_ttl_ms: (event_ttl_hours * 3_600_000.0) as i64,
            max_events_per_file,
            events: Mutex::new(HashMap::new()),
        }
    }

    /// A file was just created: undo is "delete it".
    pub async fn record_create_event(&self, path: &Path) -> Result<()> {
        self.push(path, FileEvent {
            action: EventAction::Delete,
            backup_info: None,
            recorded_at: now_ms(),
        })
        .await
    }

    /// A file is about to be overwritten: snapshot its current content so
    /// undo can restore it.
    pub async fn record_update_event(&self, path: &Path) -> Result<()> {
        let backup_info = self.backup_current_content(path).await?;
        self.push(path, FileEvent {
            action: EventAction::Update,
            backup_info: Some(backup_info),
            recorded_at: now_ms(),
        })
        .await
    }

    /// A file is about to be deleted: snapshot it so undo can recreate it.
    pub async fn record_delete_event(&self, path: &Path) -> Result<()> {
        let backup_info = self.backup_current_content(path).await?;
        self.push(path, FileEvent {
            action: EventAction::Create,
            backup_info: Some(backup_info),
            recorded_at: now_ms(),
        })
        .await
    }

    async fn backup_current_content(&self, path: &Path) -> Result<BackupInfo> {
        tokio::fs::create_dir_all(&self.backup_directory).await?;
        let backup_file_path = self.backup_directory.join(format!("{}.bak", Uuid::new_v4()));
        tokio::fs::copy(path, &backup_file_path).await?;
        Ok(BackupInfo { backup_file_path })
    }

    async fn push(&self, path: &Path, event: FileEvent) -> Result<()> {
        let mut events = self.events.lock().await;
        let deque = events.entry(path.to_path_buf()).or_default();
        deque.push_back(event);
        if deque.len() > self.max_events_per_file {
            if let Some(evicted) = deque.pop_front() {
                self.free_backup(&evicted).await;
            }
        }
        Ok(())
    }

    async fn free_backup(&self, event: &FileEvent) {
        if let Some(backup) = &event.backup_info {
            let _ = tokio::fs::remove_file(&backup.backup_file_path).await;
        }
    }

    /// Pop the most recent event for `path` and apply its inverse.
    pub async fn undo_recorded_event(&self, path: &Path) -> Result<bool> {
        let event = {
            let mut events = self.events.lock().await;
            match events.get_mut(path).and_then(VecDeque::pop_back) {
                Some(event) => event,
                None => return Err(FileAdapterError::NothingToUndo(path.display().to_string()).into()),
            }
        };

        match event.action {
            EventAction::Delete => {
                tokio::fs::remove_file(path).await?;
            }
            EventAction::Update | EventAction::Create => {
                let backup = event
                    .backup_info
                    .as_ref()
                    .expect("update/create undo events always carry a backup");
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(&backup.backup_file_path, path).await?;
            }
        }
        self.free_backup(&event).await;
        Ok(true)
    }

    /// Drop events older than `event_ttl_hours`, freeing their backups.
    pub async fn cleanup_expired_events(&self) {
        let cutoff = now_ms() - self.event_ttl_ms;
        let mut events = self.events.lock().await;
        for deque in events.values_mut() {
            while let Some(front) = deque.front() {
                if front.recorded_at < cutoff {
                    let expired = deque.pop_front().expect("front just checked");
                    self.free_backup(&expired).await;
                } else {
                    break;
                }
            }
        }
        events.retain(|_, deque| !deque.is_empty());
    }

    pub async fn run_maintenance(&self, cleanup_interval_hours: f64) {
        let interval = std::time::Duration::from_secs_f64((cleanup_interval_hours * 3600.0).max(1.0));
        loop {
            tokio::time::sleep(interval).await;
            self.cleanup_expired_events().await;
        }
    }

    #[cfg(test)]
    pub async fn event_count(&self, path: &Path) -> usize {
        self.events.lock().await.get(path).map(VecDeque::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn write(path: &Path, content: &str) {
        tokio::fs::write(path, content).await.unwrap();
    }

    #[tokio::test]
    async fn record_create_pushes_a_delete_undo() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let file = dir.path().join("a.txt");
        write(&file, "hello").await;

        let cache = FileEventCache::new(&backup_dir, 24.0, 5);
        cache.record_create_event(&file).await.unwrap();
        assert_eq!(cache.event_count(&file).await, 1);
    }

    #[tokio::test]
    async fn undo_update_restores_original_content() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let file = dir.path().join("a.txt");
        write(&file, "original").await;

        let cache = FileEventCache::new(&backup_dir, 24.0, 5);
        cache.record_update_event(&file).await.unwrap();
        write(&file, "modified").await;

        assert!(cache.undo_recorded_event(&file).await.unwrap());
        let restored = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(restored, "original");
    }

    #[tokio::test]
    async fn undo_delete_recreates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let file = dir.path().join("a.txt");
        write(&file, "will be deleted").await;

        let cache = FileEventCache::new(&backup_dir, 24.0, 5);
        cache.record_delete_event(&file).await.unwrap();
        tokio::fs::remove_file(&file).await.unwrap();

        assert!(cache.undo_recorded_event(&file).await.unwrap());
        assert!(tokio::fs::try_exists(&file).await.unwrap());
    }

    #[tokio::test]
    async fn max_events_per_file_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let file = dir.path().join("a.txt");
        write(&file, "v1").await;

        let cache = FileEventCache::new(&backup_dir, 24.0, 2);
        cache.record_create_event(&file).await.unwrap();
        cache.record_update_event(&file).await.unwrap();
        cache.record_update_event(&file).await.unwrap();

        assert_eq!(cache.event_count(&file).await, 2);
    }

    #[tokio::test]
    async fn undo_with_no_recorded_events_errors() {
        let dir = tempfile::tempdir().unwrap();
        let backup_dir = dir.path().join("backups");
        let file = dir.path().join("a.txt");

        let cache = FileEventCache::new(&backup_dir, 24.0, 5);
        assert!(cache.undo_recorded_event(&file).await.is_err());
    }
}
