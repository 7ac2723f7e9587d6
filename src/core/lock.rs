//! Advisory deployment lock, replicated as one JSON file per host.
//!
//! The lock is held when every host carries a `locked: true` record. There is
//! no coordinator: `acquire` reads every host, refuses if any is held, then
//! writes everywhere and rolls back if any write fails. Two operators racing
//! between the read and the write can both succeed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::{AuditEntry, AuditStatus, AuditTrail};
use crate::error::{Error, ErrorCode, LockHolderDetails, Result};
use crate::executor::Host;
use crate::identity::{IdentityProvider, SystemIdentity};
use crate::output::{partition, HostFailure, HostOutcome};
use crate::paths;
use crate::pool::ConcurrencyPool;
use crate::utils::remote_file;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub locked: bool,
    pub message: String,
    pub acquired_at: DateTime<Utc>,
    pub acquired_by: String,
    #[serde(rename = "pid")]
    pub process_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl LockRecord {
    pub fn new(message: impl Into<String>, identity: &dyn IdentityProvider) -> Self {
        Self {
            locked: true,
            message: message.into(),
            acquired_at: Utc::now(),
            acquired_by: identity.principal(),
            process_id: identity.process_id(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }
    }
}

/// One host's view of the lock. A missing, unreadable or unparsable file
/// reads as unlocked; the read error is kept for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HostLockStatus {
    pub host: String,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<LockRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<HostFailure>,
}

impl HostLockStatus {
    fn holder(&self) -> Option<LockHolderDetails> {
        let record = self.record.as_ref().filter(|r| r.locked)?;
        Some(LockHolderDetails {
            host: self.host.clone(),
            message: record.message.clone(),
            acquired_by: record.acquired_by.clone(),
            acquired_at: record.acquired_at.to_rfc3339(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockSummary {
    pub total: usize,
    pub locked: usize,
    pub unlocked: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatusSet {
    pub hosts: Vec<HostLockStatus>,
    pub summary: LockSummary,
}

impl LockStatusSet {
    fn new(hosts: Vec<HostLockStatus>) -> Self {
        let locked = hosts.iter().filter(|h| h.locked).count();
        let summary = LockSummary {
            total: hosts.len(),
            locked,
            unlocked: hosts.len() - locked,
        };
        Self { hosts, summary }
    }

    pub fn any_locked(&self) -> bool {
        self.summary.locked > 0
    }

    pub fn locked_hosts(&self) -> Vec<&str> {
        self.hosts
            .iter()
            .filter(|h| h.locked)
            .map(|h| h.host.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Overwrite records held by someone else.
    pub force: bool,
    /// Per-host write deadline. Defaults to the lock's timeout.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcquireReport {
    pub hosts: Vec<String>,
    pub record: LockRecord,
    /// Holders replaced by a forced acquire.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overridden: Vec<LockHolderDetails>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseReport {
    pub was_locked: bool,
    pub released: Vec<String>,
    pub failed: Vec<HostFailure>,
}

pub struct DeployLock {
    hosts: Vec<Host>,
    pool: Arc<ConcurrencyPool>,
    audit: AuditTrail,
    identity: Arc<dyn IdentityProvider>,
    path: String,
    timeout: Duration,
}

impl DeployLock {
    pub fn new(project: &str, hosts: Vec<Host>, pool: Arc<ConcurrencyPool>, audit: AuditTrail) -> Self {
        Self {
            hosts,
            pool,
            audit,
            identity: Arc::new(SystemIdentity),
            path: paths::remote_lock_file(project),
            timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// Read every host's record concurrently. Never fails.
    pub async fn status(&self) -> LockStatusSet {
        let path = self.path.as_str();
        let limit = self.timeout;

        let outcomes = self
            .pool
            .fan_out(&self.hosts, |host| {
                let command = remote_file::read(path);
                async move { with_deadline(host.name(), "lock read", limit, host.run(&command)).await }
            })
            .await;

        let statuses = outcomes
            .into_iter()
            .map(|outcome| match outcome {
                HostOutcome::Ok { host, value } => parse_status(host, &value.stdout),
                HostOutcome::Err { host, error } => HostLockStatus {
                    error: Some(HostFailure::new(&host, &error)),
                    host,
                    locked: false,
                    record: None,
                },
            })
            .collect();

        LockStatusSet::new(statuses)
    }

    /// Take the lock on every host, or on none.
    pub async fn acquire(&self, message: &str, options: AcquireOptions) -> Result<AcquireReport> {
        let status = self.status().await;
        let holders: Vec<LockHolderDetails> = status.hosts.iter().filter_map(HostLockStatus::holder).collect();

        if !holders.is_empty() {
            if !options.force {
                return Err(Error::lock_held(holders));
            }
            log_status!("lock", "Forcing lock over {} held host(s)", holders.len());
        }

        let record = LockRecord::new(message, self.identity.as_ref());
        let content = serde_json::to_string(&record)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize lock record".to_string())))?;
        let limit = options.timeout.unwrap_or(self.timeout);
        let path = self.path.as_str();

        let outcomes = self
            .pool
            .fan_out(&self.hosts, |host| {
                let command = remote_file::write(path, &content);
                async move {
                    with_deadline(host.name(), "lock write", limit, host.run(&command))
                        .await
                        .map(|_| ())
                }
            })
            .await;

        let (succeeded, failures) = partition(outcomes);
        let succeeded: Vec<String> = succeeded.into_iter().map(|(host, _)| host).collect();

        if !failures.is_empty() {
            for failure in &failures {
                log_status!("lock", "Lock write failed on {}: {}", failure.host, failure.message);
            }
            // A timed-out write may still have landed.
            let mut written = succeeded.clone();
            written.extend(
                failures
                    .iter()
                    .filter(|f| f.code == ErrorCode::RemoteCommandTimeout.as_str())
                    .map(|f| f.host.clone()),
            );
            let (rolled_back, suppressed) = self.roll_back(&written).await;
            return Err(Error::lock_acquire_failed(failures, rolled_back, suppressed));
        }

        let entry = AuditEntry::new(
            AuditStatus::Success,
            "deployment_lock",
            format!("Lock acquired: {}", message),
        )
        .with_detail("acquiredBy", &record.acquired_by)
        .with_detail("pid", record.process_id);
        self.audit.record_on(&self.hosts, &entry).await;

        log_status!("lock", "Lock acquired on {} host(s)", succeeded.len());
        Ok(AcquireReport {
            hosts: succeeded,
            record,
            overridden: if options.force { holders } else { Vec::new() },
        })
    }

    /// Best-effort delete on hosts that were, or may have been, written
    /// during a failed acquire.
    async fn roll_back(&self, written: &[String]) -> (Vec<String>, Vec<HostFailure>) {
        let targets = self.select(written);
        if targets.is_empty() {
            return (Vec::new(), Vec::new());
        }

        let (removed, suppressed) = partition(self.remove_on(&targets).await);
        for failure in &suppressed {
            log_status!("lock", "Rollback failed on {}: {}", failure.host, failure.message);
        }
        (removed.into_iter().map(|(host, _)| host).collect(), suppressed)
    }

    /// Remove the record from every locked host. Hosts that fail keep their
    /// record; hosts that succeeded are not rolled back. Hosts whose status
    /// could not be read are reported as failed.
    pub async fn release(&self) -> ReleaseReport {
        let status = self.status().await;
        let locked: Vec<String> = status.locked_hosts().into_iter().map(str::to_string).collect();

        // An unparsable record was read fine; only transport failures count.
        let unreadable: Vec<HostFailure> = status
            .hosts
            .iter()
            .filter_map(|h| h.error.clone())
            .filter(|e| e.code != ErrorCode::InternalJsonError.as_str())
            .collect();
        for failure in &unreadable {
            log_status!("lock", "Could not read lock on {}: {}", failure.host, failure.message);
        }

        if locked.is_empty() {
            if unreadable.is_empty() {
                log_status!("lock", "No deployment lock is held");
            }
            return ReleaseReport {
                was_locked: false,
                released: Vec::new(),
                failed: unreadable,
            };
        }

        let targets = self.select(&locked);
        let (released, mut failed) = partition(self.remove_on(&targets).await);
        let released: Vec<String> = released.into_iter().map(|(host, _)| host).collect();

        for failure in &failed {
            log_status!("lock", "Release failed on {}: {}", failure.host, failure.message);
        }

        if !released.is_empty() {
            let entry = AuditEntry::new(AuditStatus::Success, "deployment_unlock", "Lock released")
                .with_detail("releasedBy", self.identity.principal());
            self.audit.record_on(&self.select(&released), &entry).await;
        }

        failed.extend(unreadable);
        failed.sort_by_key(|f| self.hosts.iter().position(|h| h.name() == f.host));

        ReleaseReport {
            was_locked: true,
            released,
            failed,
        }
    }

    async fn remove_on(&self, targets: &[Host]) -> Vec<HostOutcome<()>> {
        let path = self.path.as_str();
        let limit = self.timeout;

        self.pool
            .fan_out(targets, |host| {
                let command = remote_file::remove(path);
                async move {
                    with_deadline(host.name(), "lock removal", limit, host.run(&command))
                        .await
                        .map(|_| ())
                }
            })
            .await
    }

    fn select(&self, names: &[String]) -> Vec<Host> {
        self.hosts
            .iter()
            .filter(|h| names.iter().any(|n| n == h.name()))
            .cloned()
            .collect()
    }
}

fn parse_status(host: String, content: &str) -> HostLockStatus {
    let content = content.trim();
    if content.is_empty() {
        return HostLockStatus {
            host,
            locked: false,
            record: None,
            error: None,
        };
    }

    match serde_json::from_str::<LockRecord>(content) {
        Ok(record) => HostLockStatus {
            locked: record.locked,
            host,
            record: Some(record),
            error: None,
        },
        Err(e) => {
            let err = Error::internal_json(e.to_string(), Some("parse lock record".to_string()));
            HostLockStatus {
                error: Some(HostFailure::new(&host, &err)),
                host,
                locked: false,
                record: None,
            }
        }
    }
}

async fn with_deadline<T>(
    host: &str,
    operation: &str,
    limit: Duration,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::remote_command_timeout(host, operation, limit.as_secs())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::StaticIdentity;

    #[test]
    fn record_uses_wire_field_names() {
        let record = LockRecord::new("deploy v2", &StaticIdentity::new("ops", 4242));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["locked"], true);
        assert_eq!(json["message"], "deploy v2");
        assert_eq!(json["acquiredBy"], "ops");
        assert_eq!(json["pid"], 4242);
        assert!(json["acquiredAt"].is_string());
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn record_without_version_parses() {
        let content = r#"{"locked":true,"message":"m","acquiredAt":"2026-01-01T00:00:00Z","acquiredBy":"ci","pid":7}"#;
        let status = parse_status("a".to_string(), content);
        assert!(status.locked);
        assert_eq!(status.record.unwrap().version, None);
    }

    #[test]
    fn empty_file_reads_unlocked() {
        let status = parse_status("a".to_string(), "\n");
        assert!(!status.locked);
        assert!(status.error.is_none());
    }

    #[test]
    fn garbage_reads_unlocked_with_error() {
        let status = parse_status("a".to_string(), "{not json");
        assert!(!status.locked);
        assert_eq!(status.error.unwrap().code, "internal.json_error");
    }

    #[test]
    fn unlocked_record_has_no_holder() {
        let content = r#"{"locked":false,"message":"m","acquiredAt":"2026-01-01T00:00:00Z","acquiredBy":"ci","pid":7}"#;
        let status = parse_status("a".to_string(), content);
        assert!(!status.locked);
        assert!(status.holder().is_none());
    }

    #[tokio::test]
    async fn deadline_expiry_is_timeout_error() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        };
        let err = with_deadline("a", "lock write", Duration::from_millis(10), slow)
            .await
            .unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::RemoteCommandTimeout);
        assert_eq!(err.retryable, Some(true));
    }
}
