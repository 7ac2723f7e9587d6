mod common;

use std::sync::Arc;

use armada::audit::{self, AuditEntry, AuditFilter, AuditStatus, AuditTrail};
use armada::{ConcurrencyPool, Host};
use chrono::{TimeZone, Utc};

use common::Fleet;

fn at(minute: u32, status: AuditStatus, action: &str, message: &str) -> AuditEntry {
    let mut entry = AuditEntry::new(status, action, message);
    entry.timestamp = Utc.with_ymd_and_hms(2026, 5, 4, 12, minute, 0).unwrap();
    entry
}

fn trail(hosts: Vec<Host>) -> AuditTrail {
    AuditTrail::new("shop", hosts, Arc::new(ConcurrencyPool::new(4)))
}

async fn seed(fleet: &Fleet) -> AuditTrail {
    let hosts = fleet.hosts();
    let trail = trail(hosts.clone());
    let (a, b) = (&hosts[0..1], &hosts[1..2]);

    trail
        .record_on(a, &at(0, AuditStatus::Started, "deploy", "Deploying v1").with_detail("version", "v1"))
        .await;
    trail
        .record_on(b, &at(1, AuditStatus::Success, "deployment_lock", "Lock acquired: v1"))
        .await;
    trail
        .record_on(a, &at(2, AuditStatus::Success, "deploy", "Deployed v1"))
        .await;
    trail
        .record_on(b, &at(3, AuditStatus::Failed, "deploy", "Deploy of v1 failed"))
        .await;
    trail
}

#[tokio::test]
async fn merged_view_interleaves_hosts_by_time() {
    let fleet = Fleet::new(&["a", "b"]);
    let trail = seed(&fleet).await;

    let logs = trail.recent_entries(50).await;
    let merged = audit::merged(&logs, &AuditFilter::default());

    let order: Vec<(String, &str)> = merged
        .iter()
        .map(|e| (e.host.clone().unwrap(), e.action.as_str()))
        .collect();
    assert_eq!(
        order,
        vec![
            ("a".to_string(), "deploy"),
            ("b".to_string(), "deployment_lock"),
            ("a".to_string(), "deploy"),
            ("b".to_string(), "deploy"),
        ]
    );
    assert_eq!(merged[0].details["version"], "v1");
}

#[tokio::test]
async fn grouped_view_applies_filters_per_host() {
    let fleet = Fleet::new(&["a", "b"]);
    let trail = seed(&fleet).await;
    let logs = trail.recent_entries(50).await;

    let failed = AuditFilter {
        status: Some(AuditStatus::Failed),
        ..AuditFilter::default()
    };
    let grouped = audit::grouped(&logs, &failed);
    assert_eq!(grouped.len(), 2);
    assert!(grouped[0].entries.is_empty());
    assert_eq!(grouped[1].entries.len(), 1);
    assert_eq!(grouped[1].entries[0].message, "Deploy of v1 failed");

    let window = AuditFilter {
        action: Some("deploy".to_string()),
        since: Some(audit::parse_timestamp("since", "2026-05-04T12:01:30Z").unwrap()),
        ..AuditFilter::default()
    };
    let merged = audit::merged(&logs, &window);
    let messages: Vec<&str> = merged.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["Deployed v1", "Deploy of v1 failed"]);
}

#[tokio::test]
async fn unreachable_host_is_reported_alongside_others() {
    let fleet = Fleet::build(&["a", "b", "c"], |host| {
        if host.name() == "c" {
            host.unreachable()
        } else {
            host
        }
    });
    let trail = seed(&fleet).await;

    let logs = trail.recent_entries(50).await;

    assert_eq!(logs.len(), 3);
    assert!(logs[2].error.is_some());
    assert!(logs[2].lines.is_empty());
    assert_eq!(audit::merged(&logs, &AuditFilter::default()).len(), 4);
}

#[tokio::test]
async fn tail_limits_lines_per_host() {
    let fleet = Fleet::new(&["a", "b"]);
    let trail = seed(&fleet).await;

    let logs = trail.recent_entries(1).await;

    assert_eq!(logs[0].lines.len(), 1);
    assert!(logs[0].lines[0].ends_with("- Deployed v1"));
    assert!(logs[1].lines[0].ends_with("- Deploy of v1 failed"));
}
