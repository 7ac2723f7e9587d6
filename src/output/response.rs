//! CLI response formatting and output.
//!
//! Provides the JSON envelope, text printing, and exit code mapping.

use armada::error::Hint;
use armada::{Error, ErrorCode, Result};
use serde::Serialize;

use super::TextOutput;

#[derive(Debug, Serialize)]
pub struct CliResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CliError>,
}

#[derive(Debug, Serialize)]
pub struct CliError {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hints: Option<Vec<Hint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
}

impl<T: Serialize> CliResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            Error::internal_json(e.to_string(), Some("serialize response".to_string()))
        })
    }
}

impl CliResponse<()> {
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(CliError {
                code: err.code.as_str().to_string(),
                message: err.message.clone(),
                details: err.details.clone(),
                hints: if err.hints.is_empty() {
                    None
                } else {
                    Some(err.hints.clone())
                },
                retryable: err.retryable,
            }),
        }
    }
}

fn write_stdout(payload: &str) -> Result<()> {
    use std::io::{self, Write};

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(e) = writeln!(handle, "{}", payload) {
        if e.kind() == io::ErrorKind::BrokenPipe {
            return Ok(()); // Exit gracefully on SIGPIPE
        }
        return Err(Error::internal_io(
            e.to_string(),
            Some("write stdout".to_string()),
        ));
    }
    Ok(())
}

fn print_response<T: Serialize>(response: &CliResponse<T>) -> Result<()> {
    write_stdout(&response.to_json()?)
}

fn print_error_text(err: &Error) {
    eprintln!("Error [{}]: {}", err.code.as_str(), err.message);
    for hint in &err.hints {
        eprintln!("  hint: {}", hint.message);
    }
}

/// Print a command result as a JSON envelope or as text and return the
/// process exit code.
pub fn emit<T: Serialize + TextOutput>(result: Result<(T, i32)>, json: bool) -> i32 {
    let (printed, exit_code) = match result {
        Ok((data, exit_code)) => {
            let printed = if json {
                print_response(&CliResponse::success(data))
            } else {
                let text = data.render_text();
                if text.is_empty() {
                    Ok(())
                } else {
                    write_stdout(text.trim_end())
                }
            };
            (printed, exit_code)
        }
        Err(err) => {
            let exit_code = exit_code_for_error(err.code);
            let printed = if json {
                print_response(&CliResponse::<()>::from_error(&err))
            } else {
                print_error_text(&err);
                Ok(())
            };
            (printed, exit_code)
        }
    };

    match printed {
        Ok(()) => exit_code,
        Err(err) => {
            print_error_text(&err);
            exit_code_for_error(err.code)
        }
    }
}

pub fn exit_code_for_error(code: ErrorCode) -> i32 {
    match code {
        ErrorCode::ConfigNotFound
        | ErrorCode::ConfigInvalidJson
        | ErrorCode::ConfigInvalidValue
        | ErrorCode::ValidationMissingArgument
        | ErrorCode::ValidationInvalidArgument => 2,

        ErrorCode::LockHeld | ErrorCode::LockAcquireFailed => 1,

        ErrorCode::SshIdentityFileNotFound | ErrorCode::SshConnectFailed => 10,

        ErrorCode::RemoteCommandFailed
        | ErrorCode::RemoteCommandTimeout
        | ErrorCode::DeployNoServicesSelected
        | ErrorCode::DeployBuildFailed
        | ErrorCode::DeployRegistryUnavailable => 20,

        ErrorCode::InternalIoError
        | ErrorCode::InternalJsonError
        | ErrorCode::InternalUnexpected => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_errors_exit_one() {
        assert_eq!(exit_code_for_error(ErrorCode::LockHeld), 1);
        assert_eq!(exit_code_for_error(ErrorCode::LockAcquireFailed), 1);
    }

    #[test]
    fn config_errors_exit_two() {
        assert_eq!(exit_code_for_error(ErrorCode::ConfigNotFound), 2);
        assert_eq!(exit_code_for_error(ErrorCode::ValidationInvalidArgument), 2);
    }

    #[test]
    fn error_envelope_carries_code_and_hints() {
        let err = Error::lock_held(Vec::new());
        let json = serde_json::to_value(CliResponse::<()>::from_error(&err)).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "lock.held");
        assert_eq!(json["error"]["hints"].as_array().unwrap().len(), 2);
        assert!(json.get("data").is_none());
    }
}
