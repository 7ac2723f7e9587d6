//! Audit line format.
//!
//! ```text
//! [2026-10-18T09:12:44.120Z] [SUCCESS] deployment_lock [web-1] - Lock acquired: deploy v2
//!   Details: acquiredBy=ops
//!   Details: pid=4242
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Started,
    Success,
    Failed,
    Warning,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Started => "STARTED",
            AuditStatus::Success => "SUCCESS",
            AuditStatus::Failed => "FAILED",
            AuditStatus::Warning => "WARNING",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "started" => Ok(AuditStatus::Started),
            "success" => Ok(AuditStatus::Success),
            "failed" => Ok(AuditStatus::Failed),
            "warning" => Ok(AuditStatus::Warning),
            other => Err(Error::validation_invalid_argument(
                "status",
                format!("Unknown audit status '{}'", other),
                Some(other.to_string()),
                Some(vec![
                    "started".to_string(),
                    "success".to_string(),
                    "failed".to_string(),
                    "warning".to_string(),
                ]),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub status: AuditStatus,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,
}

impl AuditEntry {
    pub fn new(status: AuditStatus, action: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            status,
            action: action.into(),
            host: None,
            message: message.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.details.insert(key.into(), value.to_string());
        self
    }

    /// Render as the header line plus one `Details:` line per detail.
    pub fn render(&self) -> String {
        let mut out = format!(
            "[{}] [{}] {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.status,
            sanitize_action(&self.action)
        );
        if let Some(host) = &self.host {
            out.push_str(&format!(" [{}]", host));
        }
        out.push_str(" - ");
        out.push_str(&single_line(&self.message));

        for (key, value) in &self.details {
            out.push_str(&format!("\n  Details: {}={}", key, single_line(value)));
        }
        out
    }

    /// Parse a header line. Detail lines and malformed lines yield `None`.
    pub fn parse_header(line: &str) -> Option<AuditEntry> {
        let caps = header_pattern().captures(line)?;
        let timestamp = DateTime::parse_from_rfc3339(&caps[1]).ok()?.with_timezone(&Utc);
        let status = caps[2].parse::<AuditStatus>().ok()?;

        Some(AuditEntry {
            timestamp,
            status,
            action: caps[3].to_string(),
            host: caps.get(4).map(|m| m.as_str().to_string()),
            message: caps[5].to_string(),
            details: BTreeMap::new(),
        })
    }
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\[([^\]]+)\] \[([A-Z]+)\] (\S+)(?: \[([^\]]+)\])? - (.*)$")
            .expect("audit header pattern is valid")
    })
}

fn detail_line(line: &str) -> Option<(&str, &str)> {
    let rest = line.strip_prefix(char::is_whitespace)?.trim_start();
    let pair = rest.strip_prefix("Details:")?.trim();
    pair.split_once('=')
}

/// A `Details:` line belonging to the header above it.
pub(crate) fn is_detail_line(line: &str) -> bool {
    detail_line(line).is_some()
}

fn sanitize_action(action: &str) -> String {
    action.split_whitespace().collect::<Vec<_>>().join("_")
}

fn single_line(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

/// Parse raw log lines into entries, attaching detail lines to the entry
/// above them. Unparsable lines (and details under them) are skipped.
pub fn parse_lines<S: AsRef<str>>(lines: &[S]) -> Vec<AuditEntry> {
    let mut entries: Vec<AuditEntry> = Vec::new();
    let mut attach = false;

    for line in lines {
        let line = line.as_ref();
        if let Some(entry) = AuditEntry::parse_header(line) {
            entries.push(entry);
            attach = true;
            continue;
        }
        match (detail_line(line), entries.last_mut()) {
            (Some((key, value)), Some(last)) if attach => {
                last.details.insert(key.to_string(), value.to_string());
            }
            (Some(_), _) => {}
            (None, _) => attach = false,
        }
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_790_000_000 + secs, 0).single().unwrap()
    }

    #[test]
    fn render_matches_line_format() {
        let mut entry = AuditEntry::new(AuditStatus::Success, "deployment_lock", "Lock acquired")
            .with_host("web-1")
            .with_detail("pid", 42);
        entry.timestamp = fixed(0);

        assert_eq!(
            entry.render(),
            "[2026-09-21T14:13:20.000Z] [SUCCESS] deployment_lock [web-1] - Lock acquired\n  Details: pid=42"
        );
    }

    #[test]
    fn header_without_host_parses() {
        let entry =
            AuditEntry::parse_header("[2026-09-21T14:13:20.000Z] [STARTED] deploy - Deploying v2")
                .unwrap();
        assert_eq!(entry.status, AuditStatus::Started);
        assert_eq!(entry.action, "deploy");
        assert_eq!(entry.host, None);
        assert_eq!(entry.message, "Deploying v2");
    }

    #[test]
    fn parse_lines_round_trips_rendered_entries() {
        let mut entry = AuditEntry::new(AuditStatus::Failed, "deploy", "web failed on b")
            .with_host("b")
            .with_detail("service", "web")
            .with_detail("version", "abc123");
        entry.timestamp = fixed(5);

        let rendered = entry.render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(parse_lines(&lines), vec![entry]);
    }

    #[test]
    fn parse_lines_skips_garbage_and_orphan_details() {
        let lines = [
            "garbage before anything",
            "  Details: orphan=1",
            "[2026-09-21T14:13:20.000Z] [WARNING] prune [a] - prune skipped",
            "  Details: reason=busy",
            "[not-a-time] [SUCCESS] deploy [a] - broken timestamp",
            "  Details: lost=yes",
            "[2026-09-21T14:13:21.000Z] [SUCCESS] deploy [a] - done",
        ];
        let entries = parse_lines(&lines);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].details.get("reason").map(String::as_str), Some("busy"));
        assert!(entries[1].details.is_empty());
    }

    #[test]
    fn multiline_message_is_flattened() {
        let entry = AuditEntry::new(AuditStatus::Warning, "tunnel setup", "line one\nline two");
        let rendered = entry.render();
        assert_eq!(rendered.lines().count(), 1);
        assert!(rendered.contains("tunnel_setup"));
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("SUCCESS".parse::<AuditStatus>().unwrap(), AuditStatus::Success);
        assert_eq!("warning".parse::<AuditStatus>().unwrap(), AuditStatus::Warning);
        assert!("done".parse::<AuditStatus>().is_err());
    }
}
