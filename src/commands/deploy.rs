use clap::Args;
use serde::Serialize;

use armada::deploy::{DeployOptions, DeployOutcome, DeployPlan, Deployer, PlanFilter};
use armada::Error;

use super::CmdResult;
use crate::output::TextOutput;
use crate::tty;

/// Exit code when the run finished but some hosts failed.
const EXIT_HOST_FAILURES: i32 = 20;

#[derive(Args)]
pub struct DeployArgs {
    /// Build and push images before rolling out
    #[arg(long)]
    pub build: bool,

    /// Build without the docker layer cache
    #[arg(long, requires = "build")]
    pub no_cache: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Image tag to deploy (default: short git SHA)
    #[arg(long)]
    pub version: Option<String>,

    /// Only deploy this service (can be repeated)
    #[arg(long = "service", value_name = "NAME")]
    pub services: Vec<String>,

    /// Only deploy to this host (can be repeated)
    #[arg(long = "host", value_name = "HOST")]
    pub hosts: Vec<String>,

    /// Hold the deployment lock while deploying
    #[arg(long)]
    pub lock: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub command: String,
    #[serde(flatten)]
    pub outcome: DeployOutcome,
}

pub async fn run(args: DeployArgs, global: &crate::commands::GlobalArgs) -> CmdResult<DeployOutput> {
    if !args.yes && !tty::is_stdin_tty() {
        return Err(Error::validation_missing_argument(vec!["--yes".to_string()])
            .with_hint("Pass --yes to deploy without an interactive confirmation"));
    }

    let config = global.load_config()?;
    let deployer = Deployer::from_config(config)?;

    let options = DeployOptions {
        build: args.build,
        no_cache: args.no_cache,
        yes: args.yes,
        version: args.version,
        filter: PlanFilter {
            services: args.services,
            hosts: args.hosts,
        },
        lock: args.lock,
    };

    let outcome = if options.yes {
        deployer.run(&options, |_| true).await?
    } else {
        let plan = deployer.plan(&options).await?;
        let (plan, confirmed) = tokio::task::spawn_blocking(move || {
            let confirmed = confirm(&plan);
            (plan, confirmed)
        })
        .await
        .map_err(|e| Error::internal_unexpected(format!("Confirmation prompt failed: {}", e)))?;

        if confirmed {
            // Pin the version so the run deploys exactly what was confirmed.
            let options = DeployOptions {
                yes: true,
                version: Some(plan.version),
                ..options
            };
            deployer.run(&options, |_| true).await?
        } else {
            DeployOutcome::Cancelled { plan }
        }
    };
    let exit_code = match &outcome {
        DeployOutcome::Completed(report) if !report.success => EXIT_HOST_FAILURES,
        _ => 0,
    };

    Ok((
        DeployOutput {
            command: "deploy".to_string(),
            outcome,
        },
        exit_code,
    ))
}

fn confirm(plan: &DeployPlan) -> bool {
    eprintln!("{}", describe_plan(plan));
    match tty::prompt("Proceed? [y/N] ") {
        Ok(answer) => matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn describe_plan(plan: &DeployPlan) -> String {
    let mut out = format!("Deploy {} at version {}\n", plan.project, plan.version);
    for service in &plan.services {
        out.push_str(&format!(
            "  {} ({}) -> {}\n",
            service.name,
            service.image,
            service.hosts.join(", ")
        ));
    }
    out
}

impl TextOutput for DeployOutput {
    fn render_text(&self) -> String {
        let report = match &self.outcome {
            DeployOutcome::Cancelled { .. } => return "Deployment cancelled\n".to_string(),
            DeployOutcome::Completed(report) => report,
        };

        let mut out = describe_plan(&report.plan);
        for image in &report.built {
            out.push_str(&format!("built {} ({})\n", image.image, image.service));
        }
        for stage in &report.stages {
            let label = match &stage.service {
                Some(service) => format!("{} {}", stage.stage, service),
                None => stage.stage.clone(),
            };
            out.push_str(&format!(
                "{}: {}/{} ok\n",
                label, stage.summary.succeeded, stage.summary.total
            ));
            for outcome in &stage.outcomes {
                if let Some(failure) = outcome.failure() {
                    out.push_str(&format!("  {} failed: {}\n", failure.host, failure.message));
                }
            }
        }
        for warning in &report.warnings {
            out.push_str(&format!("warning: {}\n", warning));
        }
        out.push_str(if report.success {
            "Deploy succeeded\n"
        } else {
            "Deploy finished with failures\n"
        });
        out
    }
}
