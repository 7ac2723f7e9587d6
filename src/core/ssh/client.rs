use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::SshConfig;
use crate::error::{Error, Result};
use crate::executor::{run_captured, run_interactive, CommandOutput, LocalExecutor, RemoteExecutor};

pub struct SshClient {
    pub host: String,
    pub user: String,
    pub port: u16,
    pub identity_file: Option<String>,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
}

impl SshClient {
    pub fn new(host: &str, ssh: &SshConfig) -> Result<Self> {
        let identity_file = match &ssh.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(host, expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", host);
        }

        Ok(Self {
            host: host.to_string(),
            user: ssh.user.clone(),
            port: ssh.port,
            identity_file,
            is_local,
        })
    }

    /// Connection arguments shared by command sessions and tunnels.
    pub fn connection_args(&self, interactive: bool) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        // For non-interactive commands, add timeout and keepalive options
        // to prevent hangs on stalled connections or unexpected prompts.
        if !interactive {
            args.extend([
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                "-o".to_string(),
                "ConnectTimeout=10".to_string(),
                "-o".to_string(),
                "ServerAliveInterval=15".to_string(),
                "-o".to_string(),
                "ServerAliveCountMax=3".to_string(),
            ]);
        }

        args
    }

    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn build_ssh_args(&self, command: &str, interactive: bool) -> Vec<String> {
        let mut args = self.connection_args(interactive);
        if interactive {
            args.push("-t".to_string());
        }
        args.push(self.destination());
        args.push(command.to_string());
        args
    }

    async fn execute_with_retry(&self, command: &str, max_attempts: u32) -> CommandOutput {
        let backoff_secs = [0, 2, 5]; // delays before retry 1, 2, 3
        let mut attempt = 0;

        loop {
            let result = self.execute_once(command).await;
            attempt += 1;

            // Only retry on transient connection errors, not command failures
            if result.success || attempt >= max_attempts || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = backoff_secs.get(attempt as usize).copied().unwrap_or(5);
            log_status!(
                "ssh",
                "Connection to {} failed (attempt {}/{}), retrying in {}s...",
                self.host,
                attempt,
                max_attempts,
                delay
            );
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
    }

    async fn execute_once(&self, command: &str) -> CommandOutput {
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(command, false));
        run_captured(cmd, "SSH error").await
    }
}

#[async_trait]
impl RemoteExecutor for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    async fn execute_command(&self, command: &str) -> CommandOutput {
        if self.is_local {
            return LocalExecutor::new().execute_command(command).await;
        }
        self.execute_with_retry(command, 3).await
    }

    async fn start_interactive_session(&self, command: &str) -> Result<i32> {
        if self.is_local {
            return LocalExecutor::new().start_interactive_session(command).await;
        }
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(command, true));
        run_interactive(cmd).await
    }
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();
    // SSH exit code 255 = connection error (not a remote command failure)
    let is_connection_exit = output.exit_code == 255;

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    is_connection_exit || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssh(port: u16) -> SshConfig {
        SshConfig {
            user: "deploy".to_string(),
            port,
            identity_file: None,
        }
    }

    #[test]
    fn batch_args_include_timeouts_and_port() {
        let client = SshClient::new("web-1.internal", &ssh(2222)).unwrap();
        let args = client.build_ssh_args("uptime", false);

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "-p" && w[1] == "2222"));
        assert_eq!(args[args.len() - 2], "deploy@web-1.internal");
        assert_eq!(args.last().map(String::as_str), Some("uptime"));
    }

    #[test]
    fn interactive_args_request_tty() {
        let client = SshClient::new("web-1", &ssh(22)).unwrap();
        let args = client.build_ssh_args("tail -f log", true);

        assert!(args.contains(&"-t".to_string()));
        assert!(!args.contains(&"BatchMode=yes".to_string()));
        assert!(!args.contains(&"-p".to_string()));
    }

    #[test]
    fn missing_identity_file_is_rejected() {
        let mut config = ssh(22);
        config.identity_file = Some("/nonexistent/armada_key".to_string());

        let err = SshClient::new("web-1", &config).err().unwrap();
        assert_eq!(err.code, crate::ErrorCode::SshIdentityFileNotFound);
    }

    #[test]
    fn localhost_is_local() {
        assert!(SshClient::new("127.0.0.1", &ssh(22)).unwrap().is_local);
        assert!(!SshClient::new("10.0.0.4", &ssh(22)).unwrap().is_local);
    }

    #[test]
    fn transient_errors_are_detected() {
        let refused = CommandOutput {
            stdout: String::new(),
            stderr: "ssh: connect to host x port 22: Connection refused".to_string(),
            success: false,
            exit_code: 255,
        };
        let command_failure = CommandOutput {
            stdout: String::new(),
            stderr: "cat: lock: No such file".to_string(),
            success: false,
            exit_code: 1,
        };

        assert!(is_transient_ssh_error(&refused));
        assert!(!is_transient_ssh_error(&command_failure));
    }
}
