use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::entry::is_detail_line;
use super::{AuditTrail, DEFAULT_RECENT_LINES};
use crate::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// One raw log line and the host it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditLine {
    pub host: String,
    pub line: String,
}

/// Polls every host's log tail and yields entries it has not emitted before.
///
/// An entry is a header line with the detail lines under it. Entries are
/// deduplicated whole, so a detail repeated under a new header is shown.
pub struct AuditFollower {
    trail: AuditTrail,
    lines: usize,
    interval: Duration,
    /// Host and full text of every entry emitted so far.
    seen: HashSet<(String, String)>,
}

impl AuditFollower {
    pub fn new(trail: AuditTrail) -> Self {
        Self {
            trail,
            lines: DEFAULT_RECENT_LINES,
            interval: DEFAULT_POLL_INTERVAL,
            seen: HashSet::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_lines(mut self, lines: usize) -> Self {
        self.lines = lines.max(1);
        self
    }

    /// Forget everything emitted so far; the next poll re-emits the tail.
    pub fn reset(&mut self) {
        self.seen.clear();
    }

    /// One poll. New lines come back in host order, then file order.
    pub async fn poll(&mut self) -> Vec<AuditLine> {
        let mut fresh = Vec::new();

        for log in self.trail.recent_entries(self.lines).await {
            if let Some(error) = &log.error {
                log_status!("audit", "Could not read audit log on {}: {}", error.host, error.message);
                continue;
            }

            let truncated = log.lines.len() >= self.lines;
            for unit in entry_units(log.lines, truncated) {
                if self.seen.insert((log.host.clone(), unit.join("\n"))) {
                    fresh.extend(unit.into_iter().map(|line| AuditLine {
                        host: log.host.clone(),
                        line,
                    }));
                }
            }
        }

        fresh
    }

    /// Poll on a fixed interval in a background task until cancelled.
    pub fn spawn(self) -> FollowHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (stop, mut stopped) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut follower = self;
            let mut ticker = tokio::time::interval(follower.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut stopped => break,
                    _ = ticker.tick() => {
                        for line in follower.poll().await {
                            if sender.send(line).is_err() {
                                return follower;
                            }
                        }
                    }
                }
            }
            follower
        });

        FollowHandle {
            receiver,
            stop: Some(stop),
            task: Some(task),
        }
    }
}

/// Group raw lines into entries: each non-detail line starts one and takes
/// the detail lines that follow. When the tail was cut short, leading detail
/// lines lost their header and are dropped.
fn entry_units(lines: Vec<String>, truncated: bool) -> Vec<Vec<String>> {
    let mut units: Vec<Vec<String>> = Vec::new();

    for line in lines {
        if is_detail_line(&line) {
            if let Some(unit) = units.last_mut() {
                unit.push(line);
                continue;
            }
            if truncated {
                continue;
            }
        }
        units.push(vec![line]);
    }

    units
}

/// Handle to a running follower. Dropping it aborts the poll task.
pub struct FollowHandle {
    receiver: mpsc::UnboundedReceiver<AuditLine>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<AuditFollower>>,
}

impl FollowHandle {
    pub async fn next(&mut self) -> Option<AuditLine> {
        self.receiver.recv().await
    }

    /// Stop polling and wait for the task to finish. No line is emitted
    /// after this returns. The follower comes back so it can be restarted.
    pub async fn cancel(mut self) -> Result<AuditFollower> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let task = self
            .task
            .take()
            .ok_or_else(|| Error::internal_unexpected("Audit follower already stopped"))?;

        task.await
            .map_err(|e| Error::internal_unexpected(format!("Audit follower task failed: {}", e)))
    }
}

impl Drop for FollowHandle {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEntry, AuditStatus};
    use crate::executor::{Host, LocalExecutor};
    use crate::pool::ConcurrencyPool;
    use std::sync::Arc;

    fn trail_in(dir: &std::path::Path) -> AuditTrail {
        let host = Host::new(Arc::new(LocalExecutor::in_dir("a", dir)));
        AuditTrail::new("shop", vec![host], Arc::new(ConcurrencyPool::default()))
    }

    async fn next_line(handle: &mut FollowHandle) -> AuditLine {
        tokio::time::timeout(Duration::from_secs(5), handle.next())
            .await
            .expect("follower emitted in time")
            .expect("follower still running")
    }

    #[tokio::test]
    async fn poll_emits_only_new_lines() {
        let dir = tempfile::tempdir().unwrap();
        let trail = trail_in(dir.path());
        let mut follower = AuditFollower::new(trail.clone());

        assert!(follower.poll().await.is_empty());

        trail.record(&AuditEntry::new(AuditStatus::Started, "deploy", "one")).await;
        assert_eq!(follower.poll().await.len(), 1);
        assert!(follower.poll().await.is_empty());

        trail.record(&AuditEntry::new(AuditStatus::Success, "deploy", "two")).await;
        let fresh = follower.poll().await;
        assert_eq!(fresh.len(), 1);
        assert!(fresh[0].line.ends_with("- two"));

        follower.reset();
        assert_eq!(follower.poll().await.len(), 2);
    }

    #[tokio::test]
    async fn repeated_detail_under_a_new_header_is_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let trail = trail_in(dir.path());
        let mut follower = AuditFollower::new(trail.clone());

        let started = AuditEntry::new(AuditStatus::Started, "deploy", "Deploying abc").with_detail("version", "abc");
        trail.record(&started).await;
        assert_eq!(follower.poll().await.len(), 2);

        let done = AuditEntry::new(AuditStatus::Success, "deploy", "Deployed abc").with_detail("version", "abc");
        trail.record(&done).await;
        let fresh: Vec<String> = follower.poll().await.into_iter().map(|l| l.line).collect();

        assert_eq!(fresh.len(), 2);
        assert!(fresh[0].ends_with("- Deployed abc"));
        assert_eq!(fresh[1], "  Details: version=abc");
    }

    #[test]
    fn units_group_details_under_their_header() {
        let lines: Vec<String> = [
            "  Details: lost=1",
            "[2026-05-04T12:00:00.000Z] [STARTED] deploy - one",
            "  Details: version=abc",
            "[2026-05-04T12:01:00.000Z] [SUCCESS] deploy - two",
        ]
        .iter()
        .map(|l| l.to_string())
        .collect();

        let cut = entry_units(lines.clone(), true);
        assert_eq!(cut.len(), 2);
        assert_eq!(cut[0].len(), 2);
        assert_eq!(cut[1].len(), 1);

        let whole = entry_units(lines, false);
        assert_eq!(whole.len(), 3);
        assert_eq!(whole[0], vec!["  Details: lost=1".to_string()]);
    }

    #[tokio::test]
    async fn spawned_follower_streams_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let trail = trail_in(dir.path());
        trail.record(&AuditEntry::new(AuditStatus::Started, "deploy", "first")).await;

        let mut handle = AuditFollower::new(trail.clone())
            .with_interval(Duration::from_millis(20))
            .spawn();

        let first = next_line(&mut handle).await;
        assert_eq!(first.host, "a");
        assert!(first.line.ends_with("- first"));

        trail.record(&AuditEntry::new(AuditStatus::Success, "deploy", "second")).await;
        let second = next_line(&mut handle).await;
        assert!(second.line.ends_with("- second"));

        let mut follower = handle.cancel().await.unwrap();
        follower.reset();
        assert_eq!(follower.poll().await.len(), 2);
    }
}
