use std::sync::Arc;

use clap::{Args, Subcommand};
use serde::Serialize;

use armada::audit::{
    self, AuditEntry, AuditFilter, AuditFollower, AuditStatus, AuditTrail, HostEntries, HostLog,
    DEFAULT_RECENT_LINES,
};
use armada::deploy::connect_hosts;
use armada::{ConcurrencyPool, Error, HostFailure};

use super::CmdResult;
use crate::output::TextOutput;
use crate::tty;

#[derive(Args)]
pub struct AuditArgs {
    #[command(subcommand)]
    command: AuditCommand,
}

#[derive(Subcommand)]
pub enum AuditCommand {
    /// Show recent audit entries from every host
    Show {
        /// Lines to read from the end of each host's log
        #[arg(short = 'n', long, default_value_t = DEFAULT_RECENT_LINES)]
        lines: usize,
        /// Interleave all hosts into one chronological stream
        #[arg(long)]
        merge: bool,
        /// Only entries whose action contains this text
        #[arg(long)]
        action: Option<String>,
        /// Only entries with this status (started, success, failed, warning)
        #[arg(long)]
        status: Option<String>,
        /// Only entries at or after this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,
        /// Only entries at or before this time (RFC 3339 or YYYY-MM-DD)
        #[arg(long)]
        until: Option<String>,
    },
    /// Print new audit lines from every host as they are written
    Follow {
        /// Lines to read from the end of each host's log per poll
        #[arg(short = 'n', long, default_value_t = DEFAULT_RECENT_LINES)]
        lines: usize,
    },
}

#[derive(Serialize)]
#[serde(tag = "command")]
pub enum AuditOutput {
    /// Unfiltered per-host tails, including lines that do not parse.
    #[serde(rename = "audit.show")]
    Raw { logs: Vec<HostLog> },

    #[serde(rename = "audit.show")]
    Grouped { hosts: Vec<HostEntries> },

    #[serde(rename = "audit.show")]
    Merged {
        entries: Vec<AuditEntry>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        errors: Vec<HostFailure>,
    },

    #[serde(rename = "audit.follow")]
    Follow { emitted: usize },
}

pub async fn run(args: AuditArgs, global: &crate::commands::GlobalArgs) -> CmdResult<AuditOutput> {
    let config = global.load_config()?;
    let hosts = connect_hosts(&config)?;
    let pool = Arc::new(ConcurrencyPool::new(config.max_concurrency));
    let trail = AuditTrail::new(&config.project, hosts, pool);

    match args.command {
        AuditCommand::Show {
            lines,
            merge,
            action,
            status,
            since,
            until,
        } => {
            let filter = AuditFilter {
                action,
                status: status.as_deref().map(str::parse::<AuditStatus>).transpose()?,
                since: since.as_deref().map(|v| audit::parse_timestamp("since", v)).transpose()?,
                until: until.as_deref().map(|v| audit::parse_timestamp("until", v)).transpose()?,
            };
            show(&trail, lines, merge, &filter).await
        }
        AuditCommand::Follow { lines } => follow(trail, lines, global.json).await,
    }
}

async fn show(trail: &AuditTrail, lines: usize, merge: bool, filter: &AuditFilter) -> CmdResult<AuditOutput> {
    let logs = trail.recent_entries(lines).await;

    let output = if merge {
        AuditOutput::Merged {
            entries: audit::merged(&logs, filter),
            errors: logs.iter().filter_map(|l| l.error.clone()).collect(),
        }
    } else if filter.is_empty() {
        AuditOutput::Raw { logs }
    } else {
        AuditOutput::Grouped {
            hosts: audit::grouped(&logs, filter),
        }
    };

    Ok((output, 0))
}

async fn follow(trail: AuditTrail, lines: usize, json: bool) -> CmdResult<AuditOutput> {
    tty::status("Following audit logs (Ctrl-C to stop)");

    let mut handle = AuditFollower::new(trail).with_lines(lines).spawn();
    let mut emitted = 0;

    loop {
        tokio::select! {
            line = handle.next() => {
                let Some(line) = line else { break };
                if json {
                    let payload = serde_json::to_string(&line)
                        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize audit line".to_string())))?;
                    println!("{}", payload);
                } else {
                    println!("[{}] {}", line.host, line.line);
                }
                emitted += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.cancel().await?;
    Ok((AuditOutput::Follow { emitted }, 0))
}

fn render_entry(entry: &AuditEntry) -> String {
    let mut out = entry.render();
    out.push('\n');
    out
}

impl TextOutput for AuditOutput {
    fn render_text(&self) -> String {
        let mut out = String::new();

        match self {
            AuditOutput::Raw { logs } => {
                for log in logs {
                    out.push_str(&format!("== {} ==\n", log.host));
                    if let Some(error) = &log.error {
                        out.push_str(&format!("  unavailable: {}\n", error.message));
                    }
                    for line in &log.lines {
                        out.push_str(line);
                        out.push('\n');
                    }
                }
            }
            AuditOutput::Grouped { hosts } => {
                for host in hosts {
                    out.push_str(&format!("== {} ==\n", host.host));
                    if let Some(error) = &host.error {
                        out.push_str(&format!("  unavailable: {}\n", error.message));
                    }
                    for entry in &host.entries {
                        out.push_str(&render_entry(entry));
                    }
                }
            }
            AuditOutput::Merged { entries, errors } => {
                for entry in entries {
                    out.push_str(&render_entry(entry));
                }
                for error in errors {
                    out.push_str(&format!("{} unavailable: {}\n", error.host, error.message));
                }
            }
            AuditOutput::Follow { emitted } => {
                out.push_str(&format!("{} line(s) received\n", emitted));
            }
        }

        out
    }
}
