//! Public output types for fan-out results.
//!
//! Every operation issued across the fleet yields one [`HostOutcome`] per
//! host. Call sites match on it exhaustively and decide whether a failure
//! escalates; these types are also what command responses serialize.

use serde::{Deserialize, Serialize, Serializer};

use crate::error::Error;

// ============================================================================
// Per-host outcomes
// ============================================================================

/// Result of one operation on one host.
#[derive(Debug, Clone)]
pub enum HostOutcome<T> {
    Ok { host: String, value: T },
    Err { host: String, error: Error },
}

impl<T> HostOutcome<T> {
    pub fn from_result(host: impl Into<String>, result: crate::Result<T>) -> Self {
        let host = host.into();
        match result {
            Ok(value) => HostOutcome::Ok { host, value },
            Err(error) => HostOutcome::Err { host, error },
        }
    }

    pub fn host(&self) -> &str {
        match self {
            HostOutcome::Ok { host, .. } | HostOutcome::Err { host, .. } => host,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HostOutcome::Ok { .. })
    }

    pub fn failure(&self) -> Option<HostFailure> {
        match self {
            HostOutcome::Ok { .. } => None,
            HostOutcome::Err { host, error } => Some(HostFailure::new(host, error)),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HostOutcomeRepr<'a, T: Serialize> {
    host: &'a str,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<HostFailure>,
}

impl<T: Serialize> Serialize for HostOutcome<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let repr = match self {
            HostOutcome::Ok { host, value } => HostOutcomeRepr {
                host,
                success: true,
                value: Some(value),
                error: None,
            },
            HostOutcome::Err { host, error } => HostOutcomeRepr {
                host,
                success: false,
                value: None,
                error: Some(HostFailure::new(host, error)),
            },
        };
        repr.serialize(serializer)
    }
}

/// Serializable record of a failure on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostFailure {
    pub host: String,
    pub code: String,
    pub message: String,
}

impl HostFailure {
    pub fn new(host: &str, error: &Error) -> Self {
        Self {
            host: host.to_string(),
            code: error.code.as_str().to_string(),
            message: error.message.clone(),
        }
    }
}

/// Split outcomes into successes and failures, preserving host order.
pub fn partition<T>(outcomes: Vec<HostOutcome<T>>) -> (Vec<(String, T)>, Vec<HostFailure>) {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();

    for outcome in outcomes {
        match outcome {
            HostOutcome::Ok { host, value } => succeeded.push((host, value)),
            HostOutcome::Err { host, error } => failed.push(HostFailure::new(&host, &error)),
        }
    }

    (succeeded, failed)
}

// ============================================================================
// Summaries
// ============================================================================

/// Summary of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl OutcomeSummary {
    pub fn of<T>(outcomes: &[HostOutcome<T>]) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_ok()).count();
        Self {
            total: outcomes.len(),
            succeeded,
            failed: outcomes.len() - succeeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcomes() -> Vec<HostOutcome<u32>> {
        vec![
            HostOutcome::Ok {
                host: "a".to_string(),
                value: 1,
            },
            HostOutcome::Err {
                host: "b".to_string(),
                error: Error::internal_unexpected("boom"),
            },
            HostOutcome::Ok {
                host: "c".to_string(),
                value: 3,
            },
        ]
    }

    #[test]
    fn partition_keeps_host_order() {
        let (ok, failed) = partition(outcomes());
        assert_eq!(ok, vec![("a".to_string(), 1), ("c".to_string(), 3)]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].host, "b");
        assert_eq!(failed[0].code, "internal.unexpected");
    }

    #[test]
    fn summary_counts() {
        let summary = OutcomeSummary::of(&outcomes());
        assert_eq!(
            summary,
            OutcomeSummary {
                total: 3,
                succeeded: 2,
                failed: 1
            }
        );
    }

    #[test]
    fn outcome_serializes_as_tagged_record() {
        let json = serde_json::to_value(outcomes()).unwrap();
        assert_eq!(json[0]["success"], true);
        assert_eq!(json[0]["value"], 1);
        assert_eq!(json[1]["success"], false);
        assert_eq!(json[1]["error"]["host"], "b");
        assert!(json[1].get("value").is_none());
    }
}
