//! Attachment pipeline: content-addressed on-disk storage, ref-counting, and
//! `.partial` resumable downloads.
//!
//! Content-addressed: the attachment id is the hex SHA-256 of its bytes, so
//! re-downloading identical content (a forwarded file, a repeated sticker)
//! lands on the same id and the existing cache entry's `ref_count` is
//! incremented rather than a duplicate blob being written.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::conversation::model::{AttachmentInfo, AttachmentType};
use crate::error::{AttachmentError, Result};

/// Chunk size used when streaming a large-file download to `.partial`
/// before the atomic rename; also the unit a resumed download is read back
/// in to re-hash what's already on disk.
pub const LARGE_DOWNLOAD_CHUNK_BYTES: usize = 1024 * 1024;

/// Chunk size used for Telegram uploads.
pub const TELEGRAM_UPLOAD_CHUNK_BYTES: usize = 512 * 1024;

/// The result of registering an attachment: its metadata plus where its
/// blob lives on disk, relative to the configured storage root.
#[derive(Debug, Clone)]
pub struct AttachmentRegistration {
    pub info: AttachmentInfo,
    pub storage_root: PathBuf,
}

impl AttachmentRegistration {
    pub fn absolute_path(&self) -> PathBuf {
        self.storage_root.join(self.info.relative_path())
    }

    pub fn sidecar_path(&self) -> PathBuf {
        self.storage_root.join(self.info.sidecar_relative_path())
    }
}

pub struct AttachmentStore {
    storage_root: PathBuf,
    max_file_size_bytes: u64,
    large_file_threshold_bytes: u64,
}

impl AttachmentStore {
    pub fn new(storage_root: impl Into<PathBuf>, max_file_size_mb: u64, large_file_threshold_mb: u64) -> Self {
        Self {
            storage_root: storage_root.into(),
            max_file_size_bytes: max_file_size_mb * 1024 * 1024,
            large_file_threshold_bytes: large_file_threshold_mb * 1024 * 1024,
        }
    }

    /// Build the registration (and therefore the on-disk path) for an
    /// already-known [`AttachmentInfo`], e.g. one looked up from the
    /// attachment cache when resolving an outgoing `send_message`'s
    /// attachment ids.
    pub fn registration_for(&self, info: AttachmentInfo) -> AttachmentRegistration {
        AttachmentRegistration {
            info,
            storage_root: self.storage_root.clone(),
        }
    }

    fn content_addressed_id(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Persist already-fetched bytes (small attachments, sent as one shot
    /// by the platform SDK) as a registered attachment.
    pub async fn store_bytes(
        &self,
        bytes: &[u8],
        filename: &str,
        content_type: Option<String>,
        url: Option<String>,
        now_ms: i64,
    ) -> Result<AttachmentRegistration> {
        if bytes.len() as u64 > self.max_file_size_bytes {
            return Err(AttachmentError::TooLarge {
                size: bytes.len() as u64,
                limit: self.max_file_size_bytes,
            }
            .into());
        }

        let attachment_id = Self::content_addressed_id(bytes);
        let extension = extension_of(filename);
        let attachment_type = extension
            .as_deref()
            .map(AttachmentType::from_extension)
            .unwrap_or(AttachmentType::Document);

        let info = AttachmentInfo {
            attachment_id,
            attachment_type,
            filename: filename.to_string(),
            file_extension: extension,
            size: bytes.len() as u64,
            content_type,
            url,
            processable: true,
            created_at: now_ms,
            last_access: now_ms,
            ref_count: 0,
        };

        let registration = AttachmentRegistration {
            info,
            storage_root: self.storage_root.clone(),
        };

        let dest = registration.absolute_path();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if !tokio::fs::try_exists(&dest).await.unwrap_or(false) {
            tokio::fs::write(&dest, bytes).await?;
        }
        self.write_sidecar(&registration).await?;

        Ok(registration)
    }

    /// Stream a download through `<path>.partial` before the atomic rename;
    /// if a `.partial` file already exists from an interrupted attempt,
    /// resume via an HTTP range request starting at its current length.
    pub async fn download_streaming(
        &self,
        response: reqwest::Response,
        filename: &str,
        content_type: Option<String>,
        url: String,
        total_size_hint: Option<u64>,
        now_ms: i64,
    ) -> Result<AttachmentRegistration> {
        use futures::StreamExt;

        // The final id depends on content, which isn't known until the
        // download completes, so large downloads land first at a
        // temporary staging path keyed by URL, then get renamed into their
        // content-addressed home once hashed.
        let staging_dir = self.storage_root.join(".staging");
        tokio::fs::create_dir_all(&staging_dir).await?;
        let staging_path = staging_dir.join(format!("{}.partial", Self::content_addressed_id(url.as_bytes())));

        let resume_from = match tokio::fs::metadata(&staging_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };

        let mut file = if resume_from > 0 {
            tokio::fs::OpenOptions::new().append(true).open(&staging_path).await?
        } else {
            tokio::fs::File::create(&staging_path).await?
        };

        let mut hasher = Sha256::new();
        if resume_from > 0 {
            let mut existing = tokio::fs::File::open(&staging_path).await?;
            let mut buf = vec![0u8; LARGE_DOWNLOAD_CHUNK_BYTES];
            loop {
                let n = existing.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
        }

        let mut stream = response.bytes_stream();
        let mut written = resume_from;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| AttachmentError::DownloadFailed(e.to_string()))?;
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            if written > self.max_file_size_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&staging_path).await;
                return Err(AttachmentError::TooLarge {
                    size: written,
                    limit: self.max_file_size_bytes,
                }
                .into());
            }
        }
        file.flush().await?;
        drop(file);

        let attachment_id = hex::encode(hasher.finalize());
        let extension = extension_of(filename);
        let attachment_type = extension
            .as_deref()
            .map(AttachmentType::from_extension)
            .unwrap_or(AttachmentType::Document);

        let info = AttachmentInfo {
            attachment_id,
            attachment_type,
            filename: filename.to_string(),
            file_extension: extension,
            size: written,
            content_type,
            url: Some(url),
            processable: true,
            created_at: now_ms,
            last_access: now_ms,
            ref_count: 0,
        };
        let registration = AttachmentRegistration {
            info,
            storage_root: self.storage_root.clone(),
        };

        let dest = registration.absolute_path();
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&staging_path, &dest).await.or_else(|_| {
            // cross-device rename fallback
            std::fs::copy(&staging_path, &dest).map(|_| ())
        })?;
        let _ = total_size_hint;
        self.write_sidecar(&registration).await?;

        Ok(registration)
    }

    async fn write_sidecar(&self, registration: &AttachmentRegistration) -> Result<()> {
        let sidecar = registration.sidecar_path();
        if let Some(parent) = sidecar.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(&registration.info)
            .map_err(|e| AttachmentError::CorruptSidecar {
                attachment_id: registration.info.attachment_id.clone(),
                reason: e.to_string(),
            })?;
        tokio::fs::write(sidecar, json).await?;
        Ok(())
    }

    /// Unlink a blob and its sidecar. Called only when the attachment
    /// cache's eviction drops the last reference to an attachment id; a
    /// blob may outlive its cache entry while another reference exists.
    pub async fn unlink(&self, info: &AttachmentInfo) -> Result<()> {
        let registration = AttachmentRegistration {
            info: info.clone(),
            storage_root: self.storage_root.clone(),
        };
        let _ = tokio::fs::remove_file(registration.absolute_path()).await;
        let _ = tokio::fs::remove_file(registration.sidecar_path()).await;
        Ok(())
    }
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_bytes_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path(), 10, 5);
        let a = store.store_bytes(b"hello", "a.txt", None, None, 0).await.unwrap();
        let b = store.store_bytes(b"hello", "b.txt", None, None, 0).await.unwrap();
        assert_eq!(a.info.attachment_id, b.info.attachment_id);
    }

    #[tokio::test]
    async fn store_bytes_rejects_oversized_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(dir.path(), 0, 0);
        let result = store.store_bytes(b"hello world", "a.txt", None, None, 0).await;
        assert!(result.is_err());
    }
}
