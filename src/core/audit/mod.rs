//! Append-only audit trail, one log per host.
//!
//! Writes go to every host the command touched (or to a local file when
//! there are none). Reads fetch the tail of each log concurrently and build
//! either a per-host view or a single chronological stream.

mod entry;
mod follow;

pub use entry::{parse_lines, AuditEntry, AuditStatus};
pub use follow::{AuditFollower, AuditLine, FollowHandle, DEFAULT_POLL_INTERVAL};

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::executor::Host;
use crate::output::{partition, HostFailure, HostOutcome};
use crate::paths;
use crate::pool::ConcurrencyPool;
use crate::utils::remote_file;

pub const DEFAULT_RECENT_LINES: usize = 50;

/// Source name used for the local log.
pub const LOCAL_SOURCE: &str = "local";

#[derive(Clone)]
pub struct AuditTrail {
    hosts: Vec<Host>,
    pool: Arc<ConcurrencyPool>,
    remote_path: String,
    local_path: Option<PathBuf>,
}

/// Raw tail of one host's log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostLog {
    pub host: String,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostFailure>,
}

impl HostLog {
    /// Parsed entries. Entries written without a host tag are attributed to
    /// the log they were read from.
    pub fn entries(&self) -> Vec<AuditEntry> {
        parse_lines(&self.lines)
            .into_iter()
            .map(|mut entry| {
                if entry.host.is_none() {
                    entry.host = Some(self.host.clone());
                }
                entry
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostEntries {
    pub host: String,
    pub entries: Vec<AuditEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostFailure>,
}

#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Substring match on the action.
    pub action: Option<String>,
    pub status: Option<AuditStatus>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl AuditFilter {
    pub fn is_empty(&self) -> bool {
        self.action.is_none() && self.status.is_none() && self.since.is_none() && self.until.is_none()
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(action) = &self.action {
            if !entry.action.contains(action.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status != status {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}

impl AuditTrail {
    pub fn new(project: &str, hosts: Vec<Host>, pool: Arc<ConcurrencyPool>) -> Self {
        Self {
            hosts,
            pool,
            remote_path: paths::remote_audit_log(project),
            local_path: paths::local_audit_log(project).ok(),
        }
    }

    pub fn with_local_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_path = Some(path.into());
        self
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Append to every host's log, or to the local log when there are no
    /// hosts. Write failures are logged and returned, never raised.
    pub async fn record(&self, entry: &AuditEntry) -> Vec<HostFailure> {
        self.record_on(&self.hosts, entry).await
    }

    /// Append only on the given hosts, each line tagged with its host.
    pub async fn record_on(&self, hosts: &[Host], entry: &AuditEntry) -> Vec<HostFailure> {
        if hosts.is_empty() {
            return match self.append_local(entry).await {
                Ok(()) => Vec::new(),
                Err(err) => {
                    log_status!("audit", "Could not write local audit log: {}", err.message);
                    vec![HostFailure::new(LOCAL_SOURCE, &err)]
                }
            };
        }

        let remote_path = self.remote_path.as_str();
        let outcomes: Vec<HostOutcome<()>> = self
            .pool
            .fan_out(hosts, |host| {
                let line = entry.clone().with_host(host.name()).render();
                let command = remote_file::append(remote_path, &line);
                async move { host.run(&command).await.map(|_| ()) }
            })
            .await;

        let (_, failures) = partition(outcomes);
        for failure in &failures {
            log_status!(
                "audit",
                "Could not write audit entry on {}: {}",
                failure.host,
                failure.message
            );
        }
        failures
    }

    async fn append_local(&self, entry: &AuditEntry) -> Result<()> {
        let path = self
            .local_path
            .as_ref()
            .ok_or_else(|| Error::internal_unexpected("No local audit log path available"))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
            })?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("open {}", path.display()))))?;

        let mut line = entry.render();
        line.push('\n');
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("append {}", path.display()))))
    }

    /// Last `lines` raw lines of every log, fetched concurrently, in host
    /// order. A host that cannot be read carries its error instead.
    pub async fn recent_entries(&self, lines: usize) -> Vec<HostLog> {
        if self.hosts.is_empty() {
            return vec![self.read_local(lines).await];
        }

        let remote_path = self.remote_path.as_str();
        let outcomes = self
            .pool
            .fan_out(&self.hosts, |host| {
                let command = remote_file::tail(remote_path, lines);
                async move { host.run(&command).await }
            })
            .await;

        outcomes
            .into_iter()
            .map(|outcome| match outcome {
                HostOutcome::Ok { host, value } => HostLog {
                    host,
                    lines: value.stdout.lines().map(str::to_string).collect(),
                    error: None,
                },
                HostOutcome::Err { host, error } => HostLog {
                    error: Some(HostFailure::new(&host, &error)),
                    host,
                    lines: Vec::new(),
                },
            })
            .collect()
    }

    async fn read_local(&self, lines: usize) -> HostLog {
        let mut log = HostLog {
            host: LOCAL_SOURCE.to_string(),
            lines: Vec::new(),
            error: None,
        };

        let Some(path) = &self.local_path else {
            return log;
        };

        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let all: Vec<&str> = content.lines().collect();
                let start = all.len().saturating_sub(lines);
                log.lines = all[start..].iter().map(|l| l.to_string()).collect();
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let err = Error::internal_io(e.to_string(), Some(format!("read {}", path.display())));
                log.error = Some(HostFailure::new(LOCAL_SOURCE, &err));
            }
        }
        log
    }
}

// ============================================================================
// Views
// ============================================================================

/// Per-host view. Unparsable lines are dropped.
pub fn grouped(logs: &[HostLog], filter: &AuditFilter) -> Vec<HostEntries> {
    logs.iter()
        .map(|log| HostEntries {
            host: log.host.clone(),
            entries: log.entries().into_iter().filter(|e| filter.matches(e)).collect(),
            error: log.error.clone(),
        })
        .collect()
}

/// All hosts interleaved by timestamp. Entries with equal timestamps keep
/// host order, then file order.
pub fn merged(logs: &[HostLog], filter: &AuditFilter) -> Vec<AuditEntry> {
    let mut entries: Vec<AuditEntry> = logs
        .iter()
        .flat_map(|log| log.entries())
        .filter(|e| filter.matches(e))
        .collect();
    entries.sort_by_key(|e| e.timestamp);
    entries
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                field,
                "Expected an RFC 3339 timestamp or a YYYY-MM-DD date",
                Some(value.to_string()),
                None,
            )
        })
}
