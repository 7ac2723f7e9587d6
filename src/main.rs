use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{audit, deploy, lock};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "armada")]
#[command(version = VERSION)]
#[command(about = "Deploy containerized services to a fleet of hosts over SSH")]
struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = armada::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Print the result as a JSON envelope
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the fleet-wide deployment lock
    Lock(lock::LockArgs),
    /// Build, push and roll out services
    Deploy(deploy::DeployArgs),
    /// Read the audit trail kept on each host
    Audit(audit::AuditArgs),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs {
        config: cli.config,
        json: cli.json,
    };

    let exit_code = commands::run(cli.command, &global).await;
    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
