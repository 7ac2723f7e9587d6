//! Reverse port-forwards that let hosts pull from a registry on this machine.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::config::SshConfig;
use crate::error::{Error, Result};
use crate::ssh::SshClient;

/// How long a forward must stay up before it counts as established.
pub const DEFAULT_HANDSHAKE: Duration = Duration::from_millis(1500);

#[async_trait]
pub trait PortForwarder: Send + Sync {
    /// Expose local `port` as `localhost:<port>` on `host`.
    async fn open(&self, host: &str, port: u16) -> Result<Tunnel>;
}

/// An open forward. Closed explicitly with [`Tunnel::close`], or killed on
/// drop.
#[derive(Debug)]
pub struct Tunnel {
    host: String,
    port: u16,
    child: Option<Child>,
}

impl Tunnel {
    pub fn new(host: impl Into<String>, port: u16, child: Child) -> Self {
        Self {
            host: host.into(),
            port,
            child: Some(child),
        }
    }

    /// A forward with no process behind it (the host is this machine).
    pub fn detached(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            child: None,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_detached(&self) -> bool {
        self.child.is_none()
    }

    pub async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                log_status!("tunnel", "Could not stop forward to {}: {}", self.host, e);
            }
        }
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(child) = &mut self.child {
            let _ = child.start_kill();
        }
    }
}

/// Opens forwards with `ssh -N -R`.
pub struct SshPortForwarder {
    ssh: SshConfig,
    handshake: Duration,
}

impl SshPortForwarder {
    pub fn new(ssh: SshConfig) -> Self {
        Self {
            ssh,
            handshake: DEFAULT_HANDSHAKE,
        }
    }

    pub fn with_handshake(mut self, handshake: Duration) -> Self {
        self.handshake = handshake;
        self
    }

    fn forward_args(client: &SshClient, port: u16) -> Vec<String> {
        let mut args = client.connection_args(false);
        args.extend([
            "-N".to_string(),
            "-o".to_string(),
            "ExitOnForwardFailure=yes".to_string(),
            "-R".to_string(),
            format!("{}:localhost:{}", port, port),
            client.destination(),
        ]);
        args
    }
}

#[async_trait]
impl PortForwarder for SshPortForwarder {
    async fn open(&self, host: &str, port: u16) -> Result<Tunnel> {
        let client = SshClient::new(host, &self.ssh)?;
        if client.is_local {
            return Ok(Tunnel::detached(host, port));
        }

        let mut child = Command::new("ssh")
            .args(Self::forward_args(&client, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::internal_io(e.to_string(), Some("spawn ssh port forward".to_string())))?;

        match tokio::time::timeout(self.handshake, child.wait()).await {
            Err(_) => {
                log_status!("tunnel", "Forwarding port {} to {}", port, host);
                Ok(Tunnel::new(host, port, child))
            }
            Ok(Ok(status)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                Err(Error::ssh_connect_failed(
                    host,
                    format!("port forward exited ({}): {}", status, stderr.trim()),
                ))
            }
            Ok(Err(e)) => Err(Error::internal_io(
                e.to_string(),
                Some(format!("wait for port forward to {}", host)),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_args_reverse_same_port() {
        let ssh = SshConfig {
            user: "deploy".to_string(),
            port: 2222,
            identity_file: None,
        };
        let client = SshClient::new("web-1", &ssh).unwrap();
        let args = SshPortForwarder::forward_args(&client, 5000);

        assert!(args.contains(&"-N".to_string()));
        assert!(args.contains(&"5000:localhost:5000".to_string()));
        assert_eq!(args.last().unwrap(), "deploy@web-1");
    }

    #[tokio::test]
    async fn localhost_needs_no_process() {
        let forwarder = SshPortForwarder::new(SshConfig::default());
        let tunnel = forwarder.open("localhost", 5000).await.unwrap();

        assert!(tunnel.is_detached());
        assert_eq!(tunnel.port(), 5000);
        tunnel.close().await;
    }

    #[tokio::test]
    async fn close_kills_the_process() {
        let child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let tunnel = Tunnel::new("a", 5000, child);
        assert!(!tunnel.is_detached());

        tokio::time::timeout(Duration::from_secs(5), tunnel.close())
            .await
            .unwrap();
    }
}
