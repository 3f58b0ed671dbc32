//! Resolves `view`/`read`/`create`/`delete`/`move`/`update`/`insert`/
//! `replace`/`undo` commands against the workspace, validating every path
//! through the [`PathValidator`] and recording undo events for every
//! mutation (`view`/`read` are non-mutating and recorded nowhere).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlatformError, Result};
use crate::file_adapter::event_cache::FileEventCache;
use crate::file_adapter::validator::PathValidator;

#[derive(Debug, Clone, Deserialize)]
pub struct FileData {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentData {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReadData {
    pub path: String,
    pub line_range: Option<[usize; 2]>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveData {
    pub source_path: String,
    pub destination_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InsertData {
    pub path: String,
    pub content: String,
    pub line: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplaceData {
    pub path: String,
    pub old_string: String,
    pub new_string: String,
}

pub enum FileAdapterCommand {
    View(FileData),
    Read(ReadData),
    Create(ContentData),
    Delete(FileData),
    Move(MoveData),
    Update(ContentData),
    Insert(InsertData),
    Replace(ReplaceData),
    Undo(FileData),
}

impl FileAdapterCommand {
    pub fn build(event_type: &str, data: Value) -> Result<Self> {
        let invalid = |source: serde_json::Error| PlatformError::InvalidRequest(source.to_string()).into();
        let command = match event_type {
            "view" => Self::View(serde_json::from_value(data).map_err(invalid)?),
            "read" => Self::Read(serde_json::from_value(data).map_err(invalid)?),
            "create" => Self::Create(serde_json::from_value(data).map_err(invalid)?),
            "delete" => Self::Delete(serde_json::from_value(data).map_err(invalid)?),
            "move" => Self::Move(serde_json::from_value(data).map_err(invalid)?),
            "update" => Self::Update(serde_json::from_value(data).map_err(invalid)?),
            "insert" => Self::Insert(serde_json::from_value(data).map_err(invalid)?),
            "replace" => Self::Replace(serde_json::from_value(data).map_err(invalid)?),
            "undo" => Self::Undo(serde_json::from_value(data).map_err(invalid)?),
            other => return Err(PlatformError::InvalidRequest(format!("unknown_event_type: {other}")).into()),
        };
        Ok(command)
    }
}

/// What a successful file-adapter command hands back to the caller, in the
/// same spirit as `ReplyPayload` for messaging commands.
pub enum FileAdapterReply {
    Entries(Vec<String>),
    Content(String),
    Ack,
}

impl FileAdapterReply {
    pub fn into_reply_payload(self) -> crate::events::request::ReplyPayload {
        use crate::events::request::ReplyPayload;
        match self {
            FileAdapterReply::Entries(entries) => ReplyPayload::ViewDirectory { request_completed: true, entries },
            FileAdapterReply::Content(content) => ReplyPayload::ReadFile { request_completed: true, content },
            FileAdapterReply::Ack => ReplyPayload::Generic { request_completed: true },
        }
    }
}

pub struct FileAdapterProcessor {
    validator: PathValidator,
    event_cache: Arc<FileEventCache>,
    max_token_count: usize,
}

impl FileAdapterProcessor {
    pub fn new(validator: PathValidator, event_cache: Arc<FileEventCache>, max_token_count: usize) -> Self {
        Self {
            validator,
            event_cache,
            max_token_count,
        }
    }

    pub async fn handle(&self, command: FileAdapterCommand) -> Result<FileAdapterReply> {
        match command {
            FileAdapterCommand::View(data) => self.view(data).await,
            FileAdapterCommand::Read(data) => self.read(data).await,
            FileAdapterCommand::Create(data) => self.create(data).await,
            FileAdapterCommand::Delete(data) => self.delete(data).await,
            FileAdapterCommand::Move(data) => self.r#move(data).await,
            FileAdapterCommand::Update(data) => self.update(data).await,
            FileAdapterCommand::Insert(data) => self.insert(data).await,
            FileAdapterCommand::Replace(data) => self.replace(data).await,
            FileAdapterCommand::Undo(data) => self.undo(data).await,
        }
    }

    async fn view(&self, data: FileData) -> Result<FileAdapterReply> {
        let path = self.validator.resolve_within_workspace(&data.path)?;
        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            entries.push(entry.file_name().to_string_lossy().into_owned());
        }
        entries.sort();
        Ok(FileAdapterReply::Entries(entries))
    }

    async fn read(&self, data: ReadData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        let content = tokio::fs::read_to_string(&path).await?;
        let selected = match data.line_range {
            Some([start, end]) => content
                .lines()
                .skip(start.saturating_sub(1))
                .take(end.saturating_sub(start).saturating_add(1))
                .collect::<Vec<_>>()
                .join("\n"),
            None => content,
        };
        self.enforce_token_budget(&selected)?;
        Ok(FileAdapterReply::Content(selected))
    }

    async fn create(&self, data: ContentData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        self.validator.validate_size(data.content.len() as u64)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data.content).await?;
        self.event_cache.record_create_event(&path).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn delete(&self, data: FileData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        self.event_cache.record_delete_event(&path).await?;
        tokio::fs::remove_file(&path).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn r#move(&self, data: MoveData) -> Result<FileAdapterReply> {
        let source = self.validator.validate(&data.source_path)?;
        let destination = self.validator.validate(&data.destination_path)?;
        self.event_cache.record_delete_event(&source).await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&source, &destination).await?;
        self.event_cache.record_create_event(&destination).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn update(&self, data: ContentData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        self.validator.validate_size(data.content.len() as u64)?;
        self.event_cache.record_update_event(&path).await?;
        tokio::fs::write(&path, &data.content).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn insert(&self, data: InsertData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        self.event_cache.record_update_event(&path).await?;
        let existing = tokio::fs::read_to_string(&path).await?;
        let mut lines: Vec<&str> = existing.lines().collect();
        let at = data.line.min(lines.len());
        lines.insert(at, data.content.as_str());
        let updated = lines.join("\n");
        self.validator.validate_size(updated.len() as u64)?;
        tokio::fs::write(&path, updated).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn replace(&self, data: ReplaceData) -> Result<FileAdapterReply> {
        let path = self.validator.validate(&data.path)?;
        let existing = tokio::fs::read_to_string(&path).await?;
        if !existing.contains(&data.old_string) {
            return Err(PlatformError::InvalidRequest(format!("old_string not found in {}", data.path)).into());
        }
        self.event_cache.record_update_event(&path).await?;
        let updated = existing.replacen(&data.old_string, &data.new_string, 1);
        self.validator.validate_size(updated.len() as u64)?;
        tokio::fs::write(&path, updated).await?;
        Ok(FileAdapterReply::Ack)
    }

    async fn undo(&self, data: FileData) -> Result<FileAdapterReply> {
        let path = self.validator.resolve_within_workspace(&data.path)?;
        self.event_cache.undo_recorded_event(&path).await?;
        Ok(FileAdapterReply::Ack)
    }

    /// No tokenizer crate in the dependency stack, so token count is
    /// approximated as whitespace-separated word count — enough to gate
    /// obviously oversized reads without pulling in a model-specific BPE.
    fn enforce_token_budget(&self, content: &str) -> Result<()> {
        let approx_token_count = content.split_whitespace().count();
        if approx_token_count > self.max_token_count {
            return Err(PlatformError::InvalidRequest(format!(
                "file content is approximately {approx_token_count} tokens, exceeding the {} token limit",
                self.max_token_count
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileAdapterConfig, SecurityMode};

    fn processor(workspace: std::path::PathBuf, backup_dir: std::path::PathBuf) -> FileAdapterProcessor {
        let config = FileAdapterConfig {
            workspace_directory: workspace,
            backup_directory: backup_dir.clone(),
            event_ttl_hours: 24.0,
            cleanup_interval_hours: 1.0,
            max_events_per_file: 10,
            max_file_size: 1024 * 1024,
            max_token_count: 10_000,
            security_mode: SecurityMode::Unrestricted,
            allowed_extensions: vec![],
            blocked_extensions: vec![],
        };
        let validator = PathValidator::new(&config);
        let event_cache = Arc::new(FileEventCache::new(backup_dir, config.event_ttl_hours, config.max_events_per_file));
        FileAdapterProcessor::new(validator, event_cache, config.max_token_count)
    }

    #[tokio::test]
    async fn create_then_undo_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let proc = processor(dir.path().to_path_buf(), dir.path().join("backups"));

        proc.create(ContentData { path: "note.txt".into(), content: "hi".into() }).await.unwrap();
        let path = dir.path().join("note.txt");
        assert!(tokio::fs::try_exists(&path).await.unwrap());

        proc.undo(FileData { path: "note.txt".into() }).await.unwrap();
        assert!(!tokio::fs::try_exists(&path).await.unwrap());
    }

    #[tokio::test]
    async fn replace_rejects_missing_old_string() {
        let dir = tempfile::tempdir().unwrap();
        let proc = processor(dir.path().to_path_buf(), dir.path().join("backups"));
        proc.create(ContentData { path: "a.txt".into(), content: "hello world".into() }).await.unwrap();

        let result = proc
            .replace(ReplaceData {
                path: "a.txt".into(),
                old_string: "goodbye".into(),
                new_string: "hi".into(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn view_lists_directory_entries() {
        let dir = tempfile::tempdir().unwrap();
        let proc = processor(dir.path().to_path_buf(), dir.path().join("backups"));
        proc.create(ContentData { path: "a.txt".into(), content: "x".into() }).await.unwrap();

        match proc.view(FileData { path: ".".into() }).await.unwrap() {
            FileAdapterReply::Entries(entries) => assert!(entries.contains(&"a.txt".to_string())),
            _ => panic!("expected Entries"),
        }
    }
}
