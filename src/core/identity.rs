//! Who is acting: the principal and process recorded in lock files and audit
//! entries.

use std::env;

pub trait IdentityProvider: Send + Sync {
    /// Operator name, e.g. the OS user.
    fn principal(&self) -> String;

    fn process_id(&self) -> u32;
}

/// Reads the current OS user and process.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityProvider for SystemIdentity {
    fn principal(&self) -> String {
        ["USER", "USERNAME", "LOGNAME"]
            .iter()
            .find_map(|key| env::var(key).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn process_id(&self) -> u32 {
        std::process::id()
    }
}

/// Fixed identity, for callers that act on behalf of someone else.
#[derive(Debug, Clone)]
pub struct StaticIdentity {
    pub principal: String,
    pub process_id: u32,
}

impl StaticIdentity {
    pub fn new(principal: impl Into<String>, process_id: u32) -> Self {
        Self {
            principal: principal.into(),
            process_id,
        }
    }
}

impl IdentityProvider for StaticIdentity {
    fn principal(&self) -> String {
        self.principal.clone()
    }

    fn process_id(&self) -> u32 {
        self.process_id
    }
}
