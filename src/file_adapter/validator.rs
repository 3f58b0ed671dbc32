//! Path and extension gating for the file adapter, parameterized by
//! `security_mode`.
//!
//! All three modes always deny escaping `workspace_directory` via a `..`
//! component or a symlink that resolves outside it; they differ only in
//! how they treat extensions:
//! - `strict`: allowlist only, extensions not in `allowed_extensions` are rejected.
//! - `permissive`: blocklist only, extensions in `blocked_extensions` are rejected.
//! - `unrestricted`: no extension check at all.

use std::path::{Path, PathBuf};

use crate::config::{FileAdapterConfig, SecurityMode};
use crate::error::{FileAdapterError, Result};

pub struct PathValidator {
    workspace_directory: PathBuf,
    security_mode: SecurityMode,
    allowed_extensions: Vec<String>,
    blocked_extensions: Vec<String>,
    max_file_size: u64,
}

impl PathValidator {
    pub fn new(config: &FileAdapterConfig) -> Self {
        Self {
            workspace_directory: config.workspace_directory.clone(),
            security_mode: config.security_mode,
            allowed_extensions: config.allowed_extensions.clone(),
            blocked_extensions: config.blocked_extensions.clone(),
            max_file_size: config.max_file_size,
        }
    }

    /// Resolve `requested` (relative or absolute) against the workspace
    /// root, rejecting any path that escapes it, then check its extension
    /// against the configured security mode.
    pub fn validate(&self, requested: &str) -> Result<PathBuf> {
        let absolute = self.resolve_within_workspace(requested)?;
        self.validate_extension(&absolute)?;
        Ok(absolute)
    }

    /// Like [`Self::validate`] but skips the extension check — used for
    /// `move`'s destination, which inherits validation from its source.
    pub fn resolve_within_workspace(&self, requested: &str) -> Result<PathBuf> {
        let candidate = Path::new(requested);
        let unrooted = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace_directory.join(candidate)
        };

        let normalized = normalize(&unrooted);
        if !normalized.starts_with(&self.workspace_directory) {
            return Err(FileAdapterError::PathEscape(requested.to_string()).into());
        }

        // A symlink whose target escapes the workspace must be rejected
        // even though the link's own path does not contain `..`.
        if let Ok(canonical) = normalized.canonicalize() {
            let workspace_canonical = self
                .workspace_directory
                .canonicalize()
                .unwrap_or_else(|_| self.workspace_directory.clone());
            if !canonical.starts_with(&workspace_canonical) {
                return Err(FileAdapterError::PathEscape(requested.to_string()).into());
            }
        }

        Ok(normalized)
    }

    pub fn validate_extension(&self, path: &Path) -> Result<()> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match self.security_mode {
            SecurityMode::Unrestricted => Ok(()),
            SecurityMode::Strict => {
                if self.allowed_extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
                    Ok(())
                } else {
                    Err(FileAdapterError::ExtensionBlocked {
                        mode: "strict".to_string(),
                        extension,
                    }
                    .into())
                }
            }
            SecurityMode::Permissive => {
                if self.blocked_extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
                    Err(FileAdapterError::ExtensionBlocked {
                        mode: "permissive".to_string(),
                        extension,
                    }
                    .into())
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn validate_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(FileAdapterError::TooLarge {
                size,
                limit: self.max_file_size,
            }
            .into());
        }
        Ok(())
    }
}

/// Lexically collapse `.`/`..` components without touching the filesystem
/// (the path may not exist yet, e.g. a `create` target).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component;
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(security_mode: SecurityMode, workspace: PathBuf) -> FileAdapterConfig {
        FileAdapterConfig {
            workspace_directory: workspace,
            backup_directory: PathBuf::from("/tmp/backups"),
            event_ttl_hours: 24.0,
            cleanup_interval_hours: 1.0,
            max_events_per_file: 50,
            max_file_size: 1024,
            max_token_count: 1000,
            security_mode,
            allowed_extensions: vec!["txt".into(), "md".into()],
            blocked_extensions: vec!["exe".into()],
        }
    }

    #[test]
    fn rejects_dotdot_escape() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&config(SecurityMode::Unrestricted, dir.path().to_path_buf()));
        let result = validator.resolve_within_workspace("../outside.txt");
        assert!(result.is_err());
    }

    #[test]
    fn strict_mode_rejects_non_allowlisted_extension() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&config(SecurityMode::Strict, dir.path().to_path_buf()));
        assert!(validator.validate("notes.rs").is_err());
        assert!(validator.validate("notes.txt").is_ok());
    }

    #[test]
    fn permissive_mode_rejects_only_blocklisted_extension() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&config(SecurityMode::Permissive, dir.path().to_path_buf()));
        assert!(validator.validate("tool.exe").is_err());
        assert!(validator.validate("anything.rs").is_ok());
    }

    #[test]
    fn unrestricted_mode_allows_any_extension_within_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&config(SecurityMode::Unrestricted, dir.path().to_path_buf()));
        assert!(validator.validate("tool.exe").is_ok());
    }

    #[test]
    fn validate_size_enforces_limit() {
        let dir = tempfile::tempdir().unwrap();
        let validator = PathValidator::new(&config(SecurityMode::Unrestricted, dir.path().to_path_buf()));
        assert!(validator.validate_size(2048).is_err());
        assert!(validator.validate_size(10).is_ok());
    }
}
