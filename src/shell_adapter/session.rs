//! One long-lived shell subprocess rooted at `workspace_directory`, plus the
//! resource sampling the executor polls while a command is in flight.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Instant;

use sysinfo::{Pid, System};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::Mutex;

use crate::error::{Result, ShellAdapterError};

/// End-of-command marker written to stdout/stderr after every command so
/// `execute_command` knows where one command's output ends and the next
/// `pwd` probe's begins, without waiting on process exit (the shell itself
/// never exits between commands).
const SENTINEL: &str = "__connectome_shell_done_ddc97c__";

pub struct ShellResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_mb: f64,
}

/// A live `/bin/sh` (or platform shell) process plus handles to its piped
/// stdin/stdout/stderr, kept open across commands so `cd` and shell
/// variables persist within a session the way an interactive terminal would.
pub struct Session {
    pub session_id: String,
    pub created_at: Instant,
    child: Mutex<Child>,
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<tokio::process::ChildStdout>>,
    stderr: Mutex<BufReader<tokio::process::ChildStderr>>,
    pid: u32,
}

impl Session {
    pub async fn open(session_id: impl Into<String>, workspace_directory: &PathBuf) -> Result<Self> {
        let mut child = Command::new("/bin/sh")
            .current_dir(workspace_directory)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().ok_or_else(|| {
            ShellAdapterError::Io(std::io::Error::new(std::io::ErrorKind::Other, "shell exited immediately"))
        })?;
        let stdin = child.stdin.take().expect("piped stdin");
        let stdout = BufReader::new(child.stdout.take().expect("piped stdout"));
        let stderr = BufReader::new(child.stderr.take().expect("piped stderr"));

        Ok(Self {
            session_id: session_id.into(),
            created_at: Instant::now(),
            child: Mutex::new(child),
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
            pid,
        })
    }

    /// Send `command`, then read stdout/stderr up to the sentinel each
    /// writes after it, and finally read the shell's own exit status for
    /// that command via `$?`.
    pub async fn execute_command(&self, command: &str) -> Result<ShellResult> {
        let status_path = self.status_file_path();
        let mut stdin = self.stdin.lock().await;
        let script = format!(
            "{command}\necho \"$?\" > {status}\necho {sentinel}\necho {sentinel} 1>&2\n",
            status = status_path.display(),
            sentinel = SENTINEL,
        );
        stdin.write_all(script.as_bytes()).await?;
        stdin.flush().await?;
        drop(stdin);

        let stdout = self.read_until_sentinel(&self.stdout).await?;
        let stderr = self.read_until_sentinel(&self.stderr).await?;
        let exit_code = self.read_exit_code(&status_path).await.unwrap_or(-1);

        Ok(ShellResult { stdout, stderr, exit_code })
    }

    fn status_file_path(&self) -> PathBuf {
        std::env::temp_dir().join(format!(".connectome_status_{}", self.session_id))
    }

    async fn read_until_sentinel<R>(&self, reader: &Mutex<BufReader<R>>) -> Result<String>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let mut guard = reader.lock().await;
        let mut collected = String::new();
        loop {
            let mut line = String::new();
            let bytes_read = guard.read_line(&mut line).await?;
            if bytes_read == 0 || line.trim_end() == SENTINEL {
                break;
            }
            collected.push_str(&line);
        }
        Ok(collected)
    }

    async fn read_exit_code(&self, path: &std::path::Path) -> Result<i32> {
        let raw = tokio::fs::read_to_string(path).await?;
        let _ = tokio::fs::remove_file(path).await;
        Ok(raw.trim().parse().unwrap_or(-1))
    }

    /// Ask the live shell for its current directory rather than tracking
    /// `cd` invocations client-side.
    pub async fn update_working_directory(&self) -> Result<String> {
        let result = self.execute_command("pwd").await?;
        Ok(result.stdout.trim().to_string())
    }

    pub async fn get_resource_usage(&self) -> ResourceUsage {
        let mut system = System::new();
        let pid = Pid::from_u32(self.pid);
        system.refresh_process(pid);
        match system.process(pid) {
            Some(process) => ResourceUsage {
                cpu_percent: process.cpu_usage(),
                memory_mb: process.memory() as f64 / 1024.0 / 1024.0,
            },
            None => ResourceUsage { cpu_percent: 0.0, memory_mb: 0.0 },
        }
    }

    pub async fn is_alive(&self) -> bool {
        matches!(self.child.lock().await.try_wait(), Ok(None))
    }

    pub async fn close(&self) -> Result<()> {
        let mut child = self.child.lock().await;
        child.start_kill().ok();
        let _ = child.wait().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn executes_a_command_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::open("s1", &dir.path().to_path_buf()).await.unwrap();
        let result = session.execute_command("echo hello").await.unwrap();
        assert_eq!(result.stdout.trim(), "hello");
        assert_eq!(result.exit_code, 0);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn pwd_resync_reflects_a_cd() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("sub")).await.unwrap();
        let session = Session::open("s2", &dir.path().to_path_buf()).await.unwrap();
        session.execute_command("cd sub").await.unwrap();
        let cwd = session.update_working_directory().await.unwrap();
        assert!(cwd.ends_with("sub"));
        session.close().await.unwrap();
    }
}
