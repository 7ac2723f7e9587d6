use std::path::PathBuf;

use armada::config::{self, ProjectConfig};

pub type CmdResult<T> = armada::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    pub config: PathBuf,
    pub json: bool,
}

impl GlobalArgs {
    pub fn load_config(&self) -> armada::Result<ProjectConfig> {
        config::load(&self.config)
    }
}

pub mod audit;
pub mod deploy;
pub mod lock;

/// Dispatch a command to its handler and print the result.
macro_rules! dispatch {
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::emit($module::run($args, $global).await, $global.json)
    };
}

pub(crate) async fn run(command: crate::Commands, global: &GlobalArgs) -> i32 {
    match command {
        crate::Commands::Lock(args) => dispatch!(args, global, lock),
        crate::Commands::Deploy(args) => dispatch!(args, global, deploy),
        crate::Commands::Audit(args) => dispatch!(args, global, audit),
    }
}
