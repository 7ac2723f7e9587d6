use std::time::Duration;

use clap::{Args, Subcommand};
use serde::Serialize;

use armada::deploy::Deployer;
use armada::lock::{AcquireOptions, AcquireReport, LockStatusSet, ReleaseReport};

use crate::commands::CmdResult;
use crate::output::TextOutput;

#[derive(Args)]
pub struct LockArgs {
    #[command(subcommand)]
    command: LockCommand,
}

#[derive(Subcommand)]
pub enum LockCommand {
    /// Take the deployment lock on every host
    Acquire {
        /// Why the lock is held (shown to anyone who hits it)
        message: String,
        /// Take over a lock held by someone else
        #[arg(long)]
        force: bool,
        /// Per-host write timeout in seconds
        #[arg(long, value_name = "SECONDS")]
        timeout: Option<u64>,
    },
    /// Remove the deployment lock from every host that holds it
    Release,
    /// Show the lock state of every host
    Status,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockOutput {
    pub command: String,
    pub project: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LockStatusSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acquired: Option<AcquireReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub released: Option<ReleaseReport>,
}

impl LockOutput {
    fn new(command: &str, project: &str) -> Self {
        Self {
            command: command.to_string(),
            project: project.to_string(),
            status: None,
            acquired: None,
            released: None,
        }
    }
}

pub async fn run(args: LockArgs, global: &crate::commands::GlobalArgs) -> CmdResult<LockOutput> {
    let config = global.load_config()?;
    let project = config.project.clone();
    let lock = Deployer::from_config(config)?.lock();

    match args.command {
        LockCommand::Acquire {
            message,
            force,
            timeout,
        } => {
            let options = AcquireOptions {
                force,
                timeout: timeout.map(Duration::from_secs),
            };
            let report = lock.acquire(&message, options).await?;
            let mut output = LockOutput::new("lock.acquire", &project);
            output.acquired = Some(report);
            Ok((output, 0))
        }
        LockCommand::Release => {
            let mut output = LockOutput::new("lock.release", &project);
            output.released = Some(lock.release().await);
            Ok((output, 0))
        }
        LockCommand::Status => {
            let mut output = LockOutput::new("lock.status", &project);
            output.status = Some(lock.status().await);
            Ok((output, 0))
        }
    }
}

impl TextOutput for LockOutput {
    fn render_text(&self) -> String {
        let mut out = String::new();

        if let Some(status) = &self.status {
            for host in &status.hosts {
                match (&host.record, &host.error) {
                    (Some(record), _) if host.locked => out.push_str(&format!(
                        "{}: LOCKED by {} at {} - {}\n",
                        host.host,
                        record.acquired_by,
                        record.acquired_at.to_rfc3339(),
                        record.message
                    )),
                    (_, Some(error)) => {
                        out.push_str(&format!("{}: unlocked (read error: {})\n", host.host, error.message))
                    }
                    _ => out.push_str(&format!("{}: unlocked\n", host.host)),
                }
            }
            out.push_str(&format!(
                "{} host(s): {} locked, {} unlocked\n",
                status.summary.total, status.summary.locked, status.summary.unlocked
            ));
        }

        if let Some(acquired) = &self.acquired {
            for holder in &acquired.overridden {
                out.push_str(&format!(
                    "Overrode lock on {} held by {} ({})\n",
                    holder.host, holder.acquired_by, holder.message
                ));
            }
            out.push_str(&format!(
                "Lock acquired on {} host(s): {}\n",
                acquired.hosts.len(),
                acquired.record.message
            ));
        }

        if let Some(released) = &self.released {
            if released.was_locked {
                out.push_str(&format!("Lock released on {} host(s)\n", released.released.len()));
            } else if released.failed.is_empty() {
                out.push_str("No deployment lock is held\n");
            } else {
                out.push_str(&format!("Could not check {} host(s)\n", released.failed.len()));
            }
            for failure in &released.failed {
                out.push_str(&format!("  failed on {}: {}\n", failure.host, failure.message));
            }
        }

        out
    }
}
