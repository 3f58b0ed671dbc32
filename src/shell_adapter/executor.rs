//! Runs commands against [`Session`]s with non-blocking resource monitoring,
//! truncates their output, and reaps sessions that outlive their welcome.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ShellAdapterConfig;
use crate::error::{Result, ShellAdapterError};
use crate::shell_adapter::session::Session;

/// What a command produced, already truncated, with `unsuccessful` set when
/// the resource monitor had to cancel it (lifetime, CPU, or memory).
pub struct CommandOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub original_stdout_size: Option<usize>,
    pub original_stderr_size: Option<usize>,
    pub new_working_directory: Option<String>,
    pub unsuccessful: bool,
}

struct TrackedSession {
    session: Arc<Session>,
    created_at: Instant,
    working_dir: String,
}

/// The per-command send/receive loop: a command is raced against a monitor
/// that samples CPU%/RSS every ~10s and enforces `command_max_lifetime`.
/// Either the command finishes or the monitor cancels it first.
pub struct CommandExecutor {
    max_output_size: usize,
    begin_output_size: usize,
    end_output_size: usize,
    command_max_lifetime: Duration,
    cpu_percent_limit: f32,
    memory_mb_limit: f64,
}

impl CommandExecutor {
    pub fn new(config: &ShellAdapterConfig) -> Self {
        Self {
            max_output_size: config.max_output_size,
            begin_output_size: config.begin_output_size,
            end_output_size: config.end_output_size,
            command_max_lifetime: Duration::from_secs(config.command_max_lifetime_secs),
            cpu_percent_limit: config.cpu_percent_limit,
            memory_mb_limit: config.memory_mb_limit as f64,
        }
    }

    pub async fn execute(&self, command: &str, session: &Session) -> CommandOutcome {
        let command_id = Uuid::new_v4();
        info!(%command_id, command, "starting shell command execution");

        let unsuccessful = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let execution = session.execute_command(command);

        let monitor_flag = unsuccessful.clone();
        let monitor = self.monitor(session, monitor_flag);

        tokio::pin!(execution);
        tokio::pin!(monitor);

        let result = tokio::select! {
            outcome = &mut execution => Some(outcome),
            _ = &mut monitor => None,
        };

        let new_working_directory = session.update_working_directory().await.ok();

        match result {
            Some(Ok(raw)) => {
                let (stdout, original_stdout_size) = truncate(&raw.stdout, self.max_output_size, self.begin_output_size, self.end_output_size);
                let (stderr, original_stderr_size) = truncate(&raw.stderr, self.max_output_size, self.begin_output_size, self.end_output_size);
                CommandOutcome {
                    stdout,
                    stderr,
                    exit_code: raw.exit_code,
                    original_stdout_size,
                    original_stderr_size,
                    new_working_directory,
                    unsuccessful: false,
                }
            }
            Some(Err(error)) => {
                warn!(%command_id, %error, "error executing shell command");
                CommandOutcome {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    original_stdout_size: None,
                    original_stderr_size: None,
                    new_working_directory,
                    unsuccessful: true,
                }
            }
            None => {
                warn!(%command_id, "shell command cancelled by resource monitor");
                CommandOutcome {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: -1,
                    original_stdout_size: None,
                    original_stderr_size: None,
                    new_working_directory,
                    unsuccessful: true,
                }
            }
        }
    }

    /// Resolves once the command must be cancelled: either it outlived
    /// `command_max_lifetime`, or it crossed the CPU/memory ceiling on a
    /// ~10s poll. Never resolves if the command stays within budget — the
    /// caller races this against the execution future itself.
    async fn monitor(&self, session: &Session, unsuccessful: Arc<std::sync::atomic::AtomicBool>) {
        let start = Instant::now();
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            if start.elapsed() > self.command_max_lifetime {
                unsuccessful.store(true, std::sync::atomic::Ordering::SeqCst);
                return;
            }
            let usage = session.get_resource_usage().await;
            if usage.cpu_percent > self.cpu_percent_limit || usage.memory_mb > self.memory_mb_limit {
                unsuccessful.store(true, std::sync::atomic::Ordering::SeqCst);
                return;
            }
        }
    }
}

fn truncate(text: &str, max_output_size: usize, begin: usize, end: usize) -> (String, Option<usize>) {
    let original_size = text.len();
    if original_size <= max_output_size {
        return (text.to_string(), None);
    }
    let begin_slice = text.get(..begin.min(text.len())).unwrap_or(text);
    let end_start = text.len().saturating_sub(end);
    let end_slice = text.get(end_start..).unwrap_or("");
    (format!("{begin_slice}\n...[Output truncated]...\n{end_slice}"), Some(original_size))
}

/// Owns every open [`Session`] for one adapter process: creation, command
/// dispatch, and periodic reaping of sessions past `session_max_lifetime_secs`
/// with no command currently running in them.
pub struct SessionManager {
    workspace_directory: PathBuf,
    session_max_lifetime: Duration,
    executor: CommandExecutor,
    sessions: RwLock<std::collections::HashMap<String, TrackedSession>>,
    running_commands: Mutex<HashSet<String>>,
}

impl SessionManager {
    pub fn new(config: &ShellAdapterConfig) -> Self {
        Self {
            workspace_directory: config.workspace_directory.clone(),
            session_max_lifetime: Duration::from_secs(config.session_max_lifetime_secs),
            executor: CommandExecutor::new(config),
            sessions: RwLock::new(std::collections::HashMap::new()),
            running_commands: Mutex::new(HashSet::new()),
        }
    }

    pub async fn open_session(&self) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let session = Session::open(session_id.clone(), &self.workspace_directory).await?;
        self.sessions.write().await.insert(
            session_id.clone(),
            TrackedSession {
                session: Arc::new(session),
                created_at: Instant::now(),
                working_dir: self.workspace_directory.display().to_string(),
            },
        );
        info!(session_id, "opened shell session");
        Ok(session_id)
    }

    pub async fn run_command(&self, session_id: &str, command: &str) -> Result<CommandOutcome> {
        let session = {
            let sessions = self.sessions.read().await;
            let entry = sessions
                .get(session_id)
                .ok_or_else(|| ShellAdapterError::SessionNotFound(session_id.to_string()))?;
            entry.session.clone()
        };

        self.running_commands.lock().await.insert(session_id.to_string());
        let outcome = self.executor.execute(command, &session).await;
        self.running_commands.lock().await.remove(session_id);

        if let Some(new_dir) = &outcome.new_working_directory {
            if let Some(entry) = self.sessions.write().await.get_mut(session_id) {
                entry.working_dir = new_dir.clone();
            }
        }

        if outcome.unsuccessful {
            let _ = self.close_session(session_id).await;
        }

        Ok(outcome)
    }

    pub async fn working_directory(&self, session_id: &str) -> Result<String> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.working_dir.clone())
            .ok_or_else(|| ShellAdapterError::SessionNotFound(session_id.to_string()).into())
    }

    pub async fn close_session(&self, session_id: &str) -> Result<()> {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(entry) => {
                entry.session.close().await?;
                info!(session_id, "closed shell session");
                Ok(())
            }
            None => Err(ShellAdapterError::SessionNotFound(session_id.to_string()).into()),
        }
    }

    /// Reap sessions whose process already exited, or that have outlived
    /// `session_max_lifetime` with nothing currently running in them.
    async fn reap_expired(&self) {
        let running = self.running_commands.lock().await.clone();
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut expired = Vec::new();
            for (session_id, entry) in sessions.iter() {
                if !entry.session.is_alive().await {
                    expired.push(session_id.clone());
                    continue;
                }
                if running.contains(session_id) {
                    continue;
                }
                if entry.created_at.elapsed() > self.session_max_lifetime {
                    expired.push(session_id.clone());
                }
            }
            expired
        };

        for session_id in expired {
            if let Err(error) = self.close_session(&session_id).await {
                warn!(%session_id, %error, "error closing expired shell session");
            } else {
                info!(%session_id, "closed shell session past max lifetime");
            }
        }
    }

    pub async fn run_maintenance(&self) {
        loop {
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.reap_expired().await;
        }
    }

    pub async fn shutdown(&self) {
        let session_ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for session_id in session_ids {
            if let Err(error) = self.close_session(&session_id).await {
                warn!(%session_id, %error, "error closing shell session during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(workspace: PathBuf) -> ShellAdapterConfig {
        ShellAdapterConfig {
            workspace_directory: workspace,
            session_max_lifetime_secs: 3600,
            command_max_lifetime_secs: 30,
            cpu_percent_limit: 90.0,
            memory_mb_limit: 1024,
            max_output_size: 10_000,
            begin_output_size: 4_000,
            end_output_size: 4_000,
        }
    }

    #[tokio::test]
    async fn opens_runs_and_closes_a_session() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::new(&config(dir.path().to_path_buf()));
        let session_id = manager.open_session().await.unwrap();

        let outcome = manager.run_command(&session_id, "echo hi").await.unwrap();
        assert_eq!(outcome.stdout.trim(), "hi");
        assert!(!outcome.unsuccessful);

        manager.close_session(&session_id).await.unwrap();
        assert!(manager.run_command(&session_id, "echo gone").await.is_err());
    }

    #[tokio::test]
    async fn truncation_keeps_head_and_tail() {
        let big = "a".repeat(100);
        let (truncated, original) = truncate(&big, 20, 5, 5);
        assert_eq!(original, Some(100));
        assert!(truncated.starts_with("aaaaa"));
        assert!(truncated.ends_with("aaaaa"));
        assert!(truncated.contains("[Output truncated]"));
    }

    #[tokio::test]
    async fn short_output_is_not_truncated() {
        let (text, original) = truncate("hi", 20, 5, 5);
        assert_eq!(text, "hi");
        assert!(original.is_none());
    }
}
