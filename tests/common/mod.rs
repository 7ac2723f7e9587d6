#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use armada::executor::LocalExecutor;
use armada::tunnel::{PortForwarder, Tunnel};
use armada::{CommandOutput, Error, Host, RemoteExecutor, Result};
use async_trait::async_trait;
use tempfile::TempDir;

/// A host backed by a scratch directory.
///
/// Commands that touch `.armada/` state files run for real in the directory,
/// so lock and audit files can be inspected afterwards. Everything else
/// (docker, proxy) is recorded and succeeds. Commands matching a failure
/// pattern fail either way, and an unreachable host fails every command.
pub struct FakeHost {
    name: String,
    dir: PathBuf,
    local: LocalExecutor,
    fail_on: Vec<String>,
    unreachable: bool,
    delay: Option<Duration>,
    stall: Option<(String, Duration)>,
    late_reply: Option<(String, Duration)>,
    commands: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(name: &str, dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            dir: dir.to_path_buf(),
            local: LocalExecutor::in_dir(name, dir),
            fail_on: Vec::new(),
            unreachable: false,
            delay: None,
            stall: None,
            late_reply: None,
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, pattern: &str) -> Self {
        self.fail_on.push(pattern.to_string());
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Stall every command for `delay` before answering.
    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Matching state commands sleep inside the shell before doing their
    /// work, so the work only happens if the process is left running.
    pub fn stalling_on(mut self, pattern: &str, delay: Duration) -> Self {
        self.stall = Some((pattern.to_string(), delay));
        self
    }

    /// Matching state commands do their work at once but answer late.
    pub fn answering_late_on(mut self, pattern: &str, delay: Duration) -> Self {
        self.late_reply = Some((pattern.to_string(), delay));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded commands that contain `needle`.
    pub fn ran(&self, needle: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.contains(needle))
            .collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    fn host(&self) -> &str {
        &self.name
    }

    async fn execute_command(&self, command: &str) -> CommandOutput {
        self.commands.lock().unwrap().push(command.to_string());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.unreachable {
            return CommandOutput {
                stdout: String::new(),
                stderr: format!("ssh: connect to host {} port 22: Connection refused", self.name),
                success: false,
                exit_code: 255,
            };
        }

        if self.fail_on.iter().any(|p| command.contains(p.as_str())) {
            return CommandOutput {
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
                success: false,
                exit_code: 1,
            };
        }

        if command.contains(".armada/") {
            if let Some((pattern, delay)) = &self.stall {
                if command.contains(pattern.as_str()) {
                    let stalled = format!("sleep {}; {}", delay.as_secs_f64(), command);
                    return self.local.execute_command(&stalled).await;
                }
            }

            let output = self.local.execute_command(command).await;
            if let Some((pattern, delay)) = &self.late_reply {
                if command.contains(pattern.as_str()) {
                    tokio::time::sleep(*delay).await;
                }
            }
            return output;
        }

        CommandOutput {
            stdout: String::new(),
            stderr: String::new(),
            success: true,
            exit_code: 0,
        }
    }

    async fn start_interactive_session(&self, _command: &str) -> Result<i32> {
        Ok(0)
    }
}

/// A set of fake hosts, each with its own scratch directory.
pub struct Fleet {
    pub dirs: Vec<TempDir>,
    pub fakes: Vec<Arc<FakeHost>>,
}

impl Fleet {
    pub fn new(names: &[&str]) -> Self {
        Self::build(names, |host| host)
    }

    /// Like [`Fleet::new`], with a hook to configure each fake by name.
    pub fn build(names: &[&str], configure: impl Fn(FakeHost) -> FakeHost) -> Self {
        let mut dirs = Vec::new();
        let mut fakes = Vec::new();
        for name in names {
            let dir = tempfile::tempdir().unwrap();
            fakes.push(Arc::new(configure(FakeHost::new(name, dir.path()))));
            dirs.push(dir);
        }
        Self { dirs, fakes }
    }

    pub fn hosts(&self) -> Vec<Host> {
        self.fakes
            .iter()
            .map(|fake| Host::new(fake.clone() as Arc<dyn RemoteExecutor>))
            .collect()
    }

    pub fn fake(&self, name: &str) -> &Arc<FakeHost> {
        self.fakes.iter().find(|f| f.name == name).unwrap()
    }

    pub fn read(&self, name: &str, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.fake(name).dir().join(relative)).ok()
    }
}

/// Records forwards instead of spawning ssh.
#[derive(Default)]
pub struct FakeForwarder {
    fail_on: Vec<String>,
    opened: Mutex<Vec<(String, u16)>>,
}

impl FakeForwarder {
    pub fn failing_on(host: &str) -> Self {
        Self {
            fail_on: vec![host.to_string()],
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn opened(&self) -> Vec<(String, u16)> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl PortForwarder for FakeForwarder {
    async fn open(&self, host: &str, port: u16) -> Result<Tunnel> {
        if self.fail_on.iter().any(|h| h == host) {
            return Err(Error::ssh_connect_failed(host, "remote port forwarding failed"));
        }
        self.opened.lock().unwrap().push((host.to_string(), port));
        Ok(Tunnel::detached(host, port))
    }
}
