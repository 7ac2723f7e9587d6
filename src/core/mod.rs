// Public modules
pub mod audit;
pub mod config;
pub mod deploy;
pub mod error;
pub mod executor;
pub mod identity;
pub mod lock;
pub mod output;
pub mod pool;
pub mod ssh;
pub mod tunnel;

// Internal modules - not part of public API
pub(crate) mod paths;

// Re-export common types for convenience
pub use error::{Error, ErrorCode, Result};
pub use executor::{CommandOutput, Host, RemoteExecutor};
pub use output::{HostFailure, HostOutcome, OutcomeSummary};
pub use pool::{CollectedResults, ConcurrencyPool, DEFAULT_MAX_CONCURRENCY};
