use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Base armada config directory (universal ~/.config/armada/ on all platforms)
pub fn armada() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected("APPDATA environment variable not set on Windows")
        })?;
        Ok(PathBuf::from(appdata).join("armada"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected("HOME environment variable not set on Unix-like system")
        })?;
        Ok(PathBuf::from(home).join(".config").join("armada"))
    }
}

/// Local state directory for one project
pub fn project(project: &str) -> Result<PathBuf> {
    Ok(armada()?.join(project))
}

/// Local audit log, used when a command has no hosts to record on
pub fn local_audit_log(project_name: &str) -> Result<PathBuf> {
    Ok(project(project_name)?.join("audit.log"))
}

/// Remote state directory, relative to the login directory on each host
pub fn remote_state_dir(project: &str) -> String {
    format!(".armada/{}", project)
}

/// Remote deployment lock file
pub fn remote_lock_file(project: &str) -> String {
    format!("{}/deploy.lock", remote_state_dir(project))
}

/// Remote audit log
pub fn remote_audit_log(project: &str) -> String {
    format!("{}/audit.log", remote_state_dir(project))
}
