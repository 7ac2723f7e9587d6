// Unified command execution - every host, remote or local, sits behind one trait

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, RemoteCommandFailedDetails, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn spawn_failure(context: &str, err: impl fmt::Display) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("{}: {}", context, err),
            success: false,
            exit_code: -1,
        }
    }

    /// Turn a failed command into a `remote.command_failed` error.
    pub fn into_result(self, host: &str, command: &str) -> Result<CommandOutput> {
        if self.success {
            return Ok(self);
        }
        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: self.exit_code,
            stdout: self.stdout,
            stderr: self.stderr,
            host: host.to_string(),
        }))
    }
}

/// A command channel to one host.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    fn host(&self) -> &str;

    /// Run a command and capture its output. Transport failures are reported
    /// through `success`/`exit_code`, never as a panic.
    async fn execute_command(&self, command: &str) -> CommandOutput;

    /// Run a command attached to the caller's terminal. Returns the exit code.
    async fn start_interactive_session(&self, command: &str) -> Result<i32>;
}

/// Host identity: a name bound to the executor that reaches it.
#[derive(Clone)]
pub struct Host {
    name: String,
    executor: Arc<dyn RemoteExecutor>,
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host").field("name", &self.name).finish()
    }
}

impl Host {
    pub fn new(executor: Arc<dyn RemoteExecutor>) -> Self {
        Self {
            name: executor.host().to_string(),
            executor,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn executor(&self) -> &Arc<dyn RemoteExecutor> {
        &self.executor
    }

    pub async fn execute(&self, command: &str) -> CommandOutput {
        self.executor.execute_command(command).await
    }

    /// Execute and require success.
    pub async fn run(&self, command: &str) -> Result<CommandOutput> {
        self.execute(command).await.into_result(&self.name, command)
    }
}

/// Runs commands on the current machine through `sh -c`.
///
/// With a working directory set, every command runs relative to it; this is
/// how a directory can stand in for a remote login directory.
pub struct LocalExecutor {
    name: String,
    dir: Option<PathBuf>,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self {
            name: "localhost".to_string(),
            dir: None,
        }
    }

    pub fn in_dir(name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            dir: Some(dir.into()),
        }
    }

    fn command(&self, command: &str) -> Command {
        #[cfg(windows)]
        let mut cmd = {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", command]);
            cmd
        };

        #[cfg(not(windows))]
        let mut cmd = {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", command]);
            cmd
        };

        if let Some(dir) = &self.dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
    fn host(&self) -> &str {
        &self.name
    }

    async fn execute_command(&self, command: &str) -> CommandOutput {
        run_captured(self.command(command), "Command error").await
    }

    async fn start_interactive_session(&self, command: &str) -> Result<i32> {
        run_interactive(self.command(command)).await
    }
}

/// Capture a command's output. Dropping the future kills the child, so a
/// caller's deadline also stops the work.
pub(crate) async fn run_captured(mut cmd: Command, context: &str) -> CommandOutput {
    cmd.stdin(Stdio::null()).kill_on_drop(true);
    match cmd.output().await {
        Ok(out) => CommandOutput {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        },
        Err(e) => CommandOutput::spawn_failure(context, e),
    }
}

pub(crate) async fn run_interactive(mut cmd: Command) -> Result<i32> {
    let status = cmd
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .await
        .map_err(|e| Error::internal_io(e.to_string(), Some("start session".to_string())))?;

    Ok(status.code().unwrap_or(-1))
}
