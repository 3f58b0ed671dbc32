//! Resolves `execute_command`/`open_session`/`close_session` commands
//! against a [`SessionManager`].

use serde::Deserialize;

use crate::error::{PlatformError, Result};
use crate::shell_adapter::executor::{CommandOutcome, SessionManager};

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteCommandData {
    pub session_id: String,
    pub command: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionIdData {
    pub session_id: String,
}

pub enum ShellAdapterCommand {
    ExecuteCommand(ExecuteCommandData),
    OpenSession,
    CloseSession(SessionIdData),
}

impl ShellAdapterCommand {
    pub fn build(event_type: &str, data: serde_json::Value) -> Result<Self> {
        let invalid = |source: serde_json::Error| PlatformError::InvalidRequest(source.to_string()).into();
        let command = match event_type {
            "execute_command" => Self::ExecuteCommand(serde_json::from_value(data).map_err(invalid)?),
            "open_session" => Self::OpenSession,
            "close_session" => Self::CloseSession(serde_json::from_value(data).map_err(invalid)?),
            other => return Err(PlatformError::InvalidRequest(format!("unknown_event_type: {other}")).into()),
        };
        Ok(command)
    }
}

pub enum ShellAdapterReply {
    SessionOpened(String),
    CommandResult(CommandOutcome),
    Ack,
}

impl ShellAdapterReply {
    pub fn into_reply_payload(self) -> crate::events::request::ReplyPayload {
        use crate::events::request::ReplyPayload;
        match self {
            ShellAdapterReply::SessionOpened(session_id) => {
                ReplyPayload::SessionOpened { request_completed: true, session_id }
            }
            ShellAdapterReply::CommandResult(outcome) => ReplyPayload::CommandResult {
                request_completed: true,
                stdout: outcome.stdout,
                stderr: outcome.stderr,
                exit_code: outcome.exit_code,
                original_stdout_size: outcome.original_stdout_size,
                original_stderr_size: outcome.original_stderr_size,
                new_working_directory: outcome.new_working_directory,
                unsuccessful: outcome.unsuccessful,
            },
            ShellAdapterReply::Ack => ReplyPayload::Generic { request_completed: true },
        }
    }
}

pub struct ShellAdapterProcessor {
    manager: SessionManager,
}

impl ShellAdapterProcessor {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub async fn handle(&self, command: ShellAdapterCommand) -> Result<ShellAdapterReply> {
        match command {
            ShellAdapterCommand::OpenSession => {
                let session_id = self.manager.open_session().await?;
                Ok(ShellAdapterReply::SessionOpened(session_id))
            }
            ShellAdapterCommand::ExecuteCommand(data) => {
                let outcome = self.manager.run_command(&data.session_id, &data.command).await?;
                Ok(ShellAdapterReply::CommandResult(outcome))
            }
            ShellAdapterCommand::CloseSession(data) => {
                self.manager.close_session(&data.session_id).await?;
                Ok(ShellAdapterReply::Ack)
            }
        }
    }

    pub async fn run_maintenance(&self) {
        self.manager.run_maintenance().await
    }

    pub async fn shutdown(&self) {
        self.manager.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShellAdapterConfig;

    fn config(workspace: std::path::PathBuf) -> ShellAdapterConfig {
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
    async fn open_execute_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let processor = ShellAdapterProcessor::new(SessionManager::new(&config(dir.path().to_path_buf())));

        let session_id = match processor.handle(ShellAdapterCommand::OpenSession).await.unwrap() {
            ShellAdapterReply::SessionOpened(id) => id,
            _ => panic!("expected SessionOpened"),
        };

        let outcome = match processor
            .handle(ShellAdapterCommand::ExecuteCommand(ExecuteCommandData {
                session_id: session_id.clone(),
                command: "echo hi".into(),
            }))
            .await
            .unwrap()
        {
            ShellAdapterReply::CommandResult(outcome) => outcome,
            _ => panic!("expected CommandResult"),
        };
        assert_eq!(outcome.stdout.trim(), "hi");

        processor
            .handle(ShellAdapterCommand::CloseSession(SessionIdData { session_id }))
            .await
            .unwrap();
    }

    #[test]
    fn build_rejects_unknown_event_type() {
        assert!(ShellAdapterCommand::build("frobnicate", serde_json::json!({})).is_err());
    }
}
