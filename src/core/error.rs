use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::output::HostFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigNotFound,
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationMissingArgument,
    ValidationInvalidArgument,

    SshIdentityFileNotFound,
    SshConnectFailed,

    RemoteCommandFailed,
    RemoteCommandTimeout,

    LockHeld,
    LockAcquireFailed,

    DeployNoServicesSelected,
    DeployBuildFailed,
    DeployRegistryUnavailable,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigNotFound => "config.not_found",
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationMissingArgument => "validation.missing_argument",
            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SshIdentityFileNotFound => "ssh.identity_file_not_found",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::RemoteCommandTimeout => "remote.command_timeout",

            ErrorCode::LockHeld => "lock.held",
            ErrorCode::LockAcquireFailed => "lock.acquire_failed",

            ErrorCode::DeployNoServicesSelected => "deploy.no_services_selected",
            ErrorCode::DeployBuildFailed => "deploy.build_failed",
            ErrorCode::DeployRegistryUnavailable => "deploy.registry_unavailable",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigNotFoundDetails {
    pub path: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingArgumentDetails {
    pub args: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshIdentityFileNotFoundDetails {
    pub host: String,
    pub identity_file: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub host: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandTimeoutDetails {
    pub host: String,
    pub operation: String,
    pub timeout_secs: u64,
}

/// One host that already holds the deployment lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHolderDetails {
    pub host: String,
    pub message: String,
    pub acquired_by: String,
    pub acquired_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockHeldDetails {
    pub holders: Vec<LockHolderDetails>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LockAcquireFailedDetails {
    pub failures: Vec<HostFailure>,
    pub rolled_back: Vec<String>,
    pub suppressed: Vec<HostFailure>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployBuildFailedDetails {
    pub service: String,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConfigNotFound,
            "Configuration file not found",
            to_details(ConfigNotFoundDetails { path: path.into() }),
        )
        .with_hint("Pass --config <path> or create armada.json in the current directory")
    }

    pub fn config_invalid_json(path: impl Into<String>, err: serde_json::Error) -> Self {
        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            to_details(ConfigInvalidJsonDetails {
                path: path.into(),
                error: err.to_string(),
            }),
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ConfigInvalidValue,
            format!("Invalid configuration value: {}", problem),
            to_details(ConfigInvalidValueDetails {
                key: key.into(),
                value,
                problem,
            }),
        )
    }

    pub fn validation_missing_argument(args: Vec<String>) -> Self {
        Self::new(
            ErrorCode::ValidationMissingArgument,
            "Missing required argument",
            to_details(MissingArgumentDetails { args }),
        )
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            to_details(InvalidArgumentDetails {
                field: field.into(),
                problem: problem.into(),
                id,
                tried,
            }),
        )
    }

    pub fn ssh_identity_file_not_found(
        host: impl Into<String>,
        identity_file: impl Into<String>,
    ) -> Self {
        Self::new(
            ErrorCode::SshIdentityFileNotFound,
            "SSH identity file not found",
            to_details(SshIdentityFileNotFoundDetails {
                host: host.into(),
                identity_file: identity_file.into(),
            }),
        )
    }

    pub fn ssh_connect_failed(host: impl Into<String>, reason: impl Into<String>) -> Self {
        let host = host.into();
        Self::new(
            ErrorCode::SshConnectFailed,
            format!("Could not connect to {}", host),
            serde_json::json!({ "host": host, "reason": reason.into() }),
        )
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        let message = if details.stderr.trim().is_empty() {
            format!(
                "Remote command failed on {} (exit {})",
                details.host, details.exit_code
            )
        } else {
            format!(
                "Remote command failed on {} (exit {}): {}",
                details.host,
                details.exit_code,
                details.stderr.trim()
            )
        };
        Self::new(ErrorCode::RemoteCommandFailed, message, to_details(details))
    }

    pub fn remote_command_timeout(
        host: impl Into<String>,
        operation: impl Into<String>,
        timeout_secs: u64,
    ) -> Self {
        let host = host.into();
        let operation = operation.into();
        let mut err = Self::new(
            ErrorCode::RemoteCommandTimeout,
            format!("{} on {} timed out after {}s", operation, host, timeout_secs),
            to_details(RemoteCommandTimeoutDetails {
                host,
                operation,
                timeout_secs,
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn lock_held(holders: Vec<LockHolderDetails>) -> Self {
        let hosts = holders
            .iter()
            .map(|h| h.host.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        Self::new(
            ErrorCode::LockHeld,
            format!("Deployment lock is held on: {}", hosts),
            to_details(LockHeldDetails { holders }),
        )
        .with_hint("Run 'armada lock status' to see who holds the lock")
        .with_hint("Use --force to take over the lock")
    }

    pub fn lock_acquire_failed(
        failures: Vec<HostFailure>,
        rolled_back: Vec<String>,
        suppressed: Vec<HostFailure>,
    ) -> Self {
        let hosts = failures
            .iter()
            .map(|f| f.host.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let mut err = Self::new(
            ErrorCode::LockAcquireFailed,
            format!("Failed to acquire deployment lock on: {}", hosts),
            to_details(LockAcquireFailedDetails {
                failures,
                rolled_back,
                suppressed,
            }),
        );
        err.retryable = Some(true);
        err
    }

    pub fn deploy_no_services_selected(tried: Vec<String>) -> Self {
        Self::new(
            ErrorCode::DeployNoServicesSelected,
            "No services match the given filters",
            serde_json::json!({ "filters": tried }),
        )
    }

    pub fn deploy_build_failed(details: DeployBuildFailedDetails) -> Self {
        let message = format!("Build failed for service '{}'", details.service);
        Self::new(ErrorCode::DeployBuildFailed, message, to_details(details))
    }

    pub fn deploy_registry_unavailable(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self::new(
            ErrorCode::DeployRegistryUnavailable,
            format!("Registry {} is not reachable", endpoint),
            serde_json::json!({ "endpoint": endpoint, "reason": reason.into() }),
        )
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalIoError,
            "IO error",
            to_details(InternalIoErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        Self::new(
            ErrorCode::InternalJsonError,
            "JSON error",
            to_details(InternalJsonErrorDetails {
                error: error.into(),
                context,
            }),
        )
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        let error = error.into();
        Self::new(
            ErrorCode::InternalUnexpected,
            format!("Unexpected error: {}", error),
            serde_json::json!({ "error": error }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_command_failed_includes_stderr_in_message() {
        let err = Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "cat lock".to_string(),
            exit_code: 255,
            stdout: String::new(),
            stderr: "ssh: connect to host c port 22: Connection refused\n".to_string(),
            host: "c".to_string(),
        });

        assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
        assert!(err.message.contains("Connection refused"));
        assert_eq!(err.details["exitCode"], 255);
    }

    #[test]
    fn lock_held_lists_every_holder() {
        let err = Error::lock_held(vec![
            LockHolderDetails {
                host: "a".to_string(),
                message: "deploy v1".to_string(),
                acquired_by: "ops".to_string(),
                acquired_at: "2026-01-01T00:00:00Z".to_string(),
            },
            LockHolderDetails {
                host: "b".to_string(),
                message: "deploy v1".to_string(),
                acquired_by: "ops".to_string(),
                acquired_at: "2026-01-01T00:00:00Z".to_string(),
            },
        ]);

        assert_eq!(err.code.as_str(), "lock.held");
        assert!(err.message.ends_with("a, b"));
        assert_eq!(err.details["holders"].as_array().map(Vec::len), Some(2));
        assert_eq!(err.hints.len(), 2);
    }

    #[test]
    fn timeout_is_retryable() {
        let err = Error::remote_command_timeout("a", "lock write", 5);
        assert_eq!(err.retryable, Some(true));
        assert_eq!(err.details["timeoutSecs"], 5);
    }
}
