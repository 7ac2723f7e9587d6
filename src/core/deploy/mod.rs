//! Deployment pipeline.
//!
//! Stages, in order:
//! 1. plan services × hosts and confirm,
//! 2. build and push images (optional, fatal on failure),
//! 3. open reverse port-forwards to a local registry (warnings only),
//! 4. install the proxy on hosts that need it,
//! 5. roll out each service across its hosts, repoint the proxy and retire
//!    superseded containers,
//! 6. prune old images (warnings only).
//!
//! Per-host failures never abort sibling hosts; they are collected into the
//! [`DeployReport`].

pub mod build;
pub mod plan;
pub mod proxy;
pub mod rollout;

pub use build::BuiltImage;
pub use plan::{DeployPlan, PlanFilter, ServicePlan};

use std::sync::Arc;

use serde::Serialize;

use crate::audit::{AuditEntry, AuditStatus, AuditTrail};
use crate::config::ProjectConfig;
use crate::error::Result;
use crate::executor::{Host, LocalExecutor};
use crate::identity::{IdentityProvider, SystemIdentity};
use crate::lock::{AcquireOptions, DeployLock};
use crate::output::{partition, HostOutcome, OutcomeSummary};
use crate::pool::ConcurrencyPool;
use crate::ssh::SshClient;
use crate::tunnel::{PortForwarder, SshPortForwarder, Tunnel};

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub build: bool,
    pub no_cache: bool,
    /// Skip the confirmation prompt.
    pub yes: bool,
    pub version: Option<String>,
    pub filter: PlanFilter,
    /// Hold the deployment lock for the duration of the run.
    pub lock: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum DeployOutcome {
    Completed(DeployReport),
    Cancelled { plan: DeployPlan },
}

/// Per-host outcomes of one stage, optionally scoped to one service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub outcomes: Vec<HostOutcome<String>>,
    pub summary: OutcomeSummary,
}

impl StageReport {
    fn new(stage: &str, service: Option<&str>, outcomes: Vec<HostOutcome<String>>) -> Self {
        Self {
            stage: stage.to_string(),
            service: service.map(str::to_string),
            summary: OutcomeSummary::of(&outcomes),
            outcomes,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployReport {
    pub plan: DeployPlan,
    pub built: Vec<BuiltImage>,
    pub stages: Vec<StageReport>,
    pub warnings: Vec<String>,
    pub success: bool,
}

impl DeployReport {
    fn new(plan: DeployPlan) -> Self {
        Self {
            plan,
            built: Vec::new(),
            stages: Vec::new(),
            warnings: Vec::new(),
            success: true,
        }
    }

    fn warn(&mut self, message: String) {
        log_status!("deploy", "Warning: {}", message);
        self.warnings.push(message);
    }

    /// Hosts with at least one failed stage, in plan order.
    pub fn failed_hosts(&self) -> Vec<String> {
        self.plan
            .hosts
            .iter()
            .filter(|h| {
                self.stages
                    .iter()
                    .flat_map(|s| &s.outcomes)
                    .any(|o| !o.is_ok() && o.host() == h.as_str())
            })
            .cloned()
            .collect()
    }
}

/// Forwards held for the duration of a run.
struct Tunnels(Vec<Tunnel>);

impl Tunnels {
    async fn close(self) {
        for tunnel in self.0 {
            tunnel.close().await;
        }
    }
}

pub struct Deployer {
    config: ProjectConfig,
    hosts: Vec<Host>,
    local: Host,
    pool: Arc<ConcurrencyPool>,
    forwarder: Arc<dyn PortForwarder>,
    identity: Arc<dyn IdentityProvider>,
}

impl Deployer {
    pub fn new(config: ProjectConfig, hosts: Vec<Host>, local: Host, forwarder: Arc<dyn PortForwarder>) -> Self {
        let pool = Arc::new(ConcurrencyPool::new(config.max_concurrency));
        Self {
            config,
            hosts,
            local,
            pool,
            forwarder,
            identity: Arc::new(SystemIdentity),
        }
    }

    /// SSH to every configured host, docker locally.
    pub fn from_config(config: ProjectConfig) -> Result<Self> {
        let hosts = connect_hosts(&config)?;
        let forwarder = Arc::new(SshPortForwarder::new(config.ssh.clone()));
        let local = Host::new(Arc::new(LocalExecutor::new()));
        Ok(Self::new(config, hosts, local, forwarder))
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn lock(&self) -> DeployLock {
        let audit = AuditTrail::new(&self.config.project, self.hosts.clone(), self.pool.clone());
        DeployLock::new(&self.config.project, self.hosts.clone(), self.pool.clone(), audit)
            .with_identity(self.identity.clone())
    }

    fn select_hosts(&self, names: &[String]) -> Vec<Host> {
        names
            .iter()
            .filter_map(|name| self.hosts.iter().find(|h| h.name() == name))
            .cloned()
            .collect()
    }

    /// Resolve the version and the hosts and services a run would touch.
    /// Only the local host is asked, and only when no version is given.
    pub async fn plan(&self, options: &DeployOptions) -> Result<DeployPlan> {
        let version = build::resolve_version(options.version.as_deref(), &self.local).await?;
        DeployPlan::new(&self.config, &options.filter, &version)
    }

    /// Run the pipeline. `confirm` sees the plan unless `options.yes` is set;
    /// returning false cancels before anything changes.
    pub async fn run<F>(&self, options: &DeployOptions, confirm: F) -> Result<DeployOutcome>
    where
        F: FnOnce(&DeployPlan) -> bool,
    {
        let plan = self.plan(options).await?;

        if !options.yes && !confirm(&plan) {
            log_status!("deploy", "Deployment cancelled");
            return Ok(DeployOutcome::Cancelled { plan });
        }

        if !options.lock {
            return self.execute(plan, options).await.map(DeployOutcome::Completed);
        }

        let lock = self.lock();
        lock.acquire(&format!("deploy {}", plan.version), AcquireOptions::default())
            .await?;

        let result = self.execute(plan, options).await;

        let release = lock.release().await;
        let mut report = result?;
        for failure in release.failed {
            report.warn(format!("lock release failed on {}: {}", failure.host, failure.message));
        }
        Ok(DeployOutcome::Completed(report))
    }

    async fn execute(&self, plan: DeployPlan, options: &DeployOptions) -> Result<DeployReport> {
        let hosts = self.select_hosts(&plan.hosts);
        let audit = AuditTrail::new(&plan.project, hosts.clone(), self.pool.clone());
        let services: Vec<&str> = plan.services.iter().map(|s| s.name.as_str()).collect();

        log_status!(
            "deploy",
            "Deploying {} ({}) to {} host(s)",
            services.join(", "),
            plan.version,
            hosts.len()
        );
        audit
            .record(
                &AuditEntry::new(
                    AuditStatus::Started,
                    "deploy",
                    format!("Deploying {} at {}", services.join(", "), plan.version),
                )
                .with_detail("version", &plan.version)
                .with_detail("by", self.identity.principal()),
            )
            .await;

        let mut report = DeployReport::new(plan);

        if options.build {
            match self.build(&report.plan, options.no_cache).await {
                Ok(built) => report.built = built,
                Err(err) => {
                    audit
                        .record(
                            &AuditEntry::new(AuditStatus::Failed, "deploy", err.message.clone())
                                .with_detail("version", &report.plan.version)
                                .with_detail("code", err.code.as_str()),
                        )
                        .await;
                    return Err(err);
                }
            }
        }

        let tunnels = self.open_tunnels(&hosts, &mut report).await;

        self.install_proxies(&mut report).await;
        self.roll_out(&mut report).await;

        tunnels.close().await;

        self.prune(&hosts, &mut report).await;
        self.finish(&audit, &mut report).await;

        Ok(report)
    }

    async fn build(&self, plan: &DeployPlan, no_cache: bool) -> Result<Vec<BuiltImage>> {
        if !plan.uses_registry() {
            log_status!("build", "No services to build");
            return Ok(Vec::new());
        }
        build::ensure_registry(&self.config.registry, &self.local).await?;
        build::build_and_push(plan, &self.local, no_cache).await
    }

    async fn open_tunnels(&self, hosts: &[Host], report: &mut DeployReport) -> Tunnels {
        if !self.config.registry.is_local() || !report.plan.uses_registry() {
            return Tunnels(Vec::new());
        }

        let port = self.config.registry.port;
        let forwarder = self.forwarder.as_ref();
        let outcomes = self
            .pool
            .fan_out(hosts, |host| forwarder.open(host.name(), port))
            .await;

        let mut tunnels = Vec::new();
        for outcome in outcomes {
            match outcome {
                HostOutcome::Ok { value, .. } => tunnels.push(value),
                HostOutcome::Err { host, error } => {
                    report.warn(format!("port forward to {} failed: {}", host, error.message))
                }
            }
        }
        Tunnels(tunnels)
    }

    async fn install_proxies(&self, report: &mut DeployReport) {
        let targets = self.select_hosts(&report.plan.proxy_hosts());
        if targets.is_empty() {
            return;
        }

        log_status!("proxy", "Ensuring proxy on {} host(s)", targets.len());
        let command = proxy::install_command(&self.config.proxy);
        let container = self.config.proxy.container_name.clone();
        let outcomes = self
            .pool
            .fan_out(&targets, |host| {
                let command = command.as_str();
                let container = container.clone();
                async move { host.run(command).await.map(|_| container) }
            })
            .await;

        report.stages.push(StageReport::new("proxy", None, outcomes));
    }

    async fn roll_out(&self, report: &mut DeployReport) {
        let plan = report.plan.clone();

        for service in &plan.services {
            let targets = self.select_hosts(&service.hosts);
            let container = rollout::container_name(&plan.project, &service.name, &plan.version);
            let command = rollout::run_command(&plan, service);

            log_status!("deploy", "Rolling out {} to {} host(s)", service.name, targets.len());
            let outcomes = self
                .pool
                .fan_out(&targets, |host| {
                    let command = command.as_str();
                    let container = container.clone();
                    async move { host.run(command).await.map(|_| container) }
                })
                .await;
            let mut live = succeeded_hosts(&outcomes);
            report
                .stages
                .push(StageReport::new("rollout", Some(&service.name), outcomes));

            if let Some(command) = proxy::deploy_command(&self.config.proxy, &plan.project, service, &container) {
                let targets = self.select_hosts(&live);
                let outcomes = self
                    .pool
                    .fan_out(&targets, |host| {
                        let command = command.as_str();
                        let container = container.clone();
                        async move { host.run(command).await.map(|_| container) }
                    })
                    .await;
                live = succeeded_hosts(&outcomes);
                report
                    .stages
                    .push(StageReport::new("proxy_reconfigure", Some(&service.name), outcomes));
            }

            self.retire(&plan.project, &service.name, &container, &live, report)
                .await;
        }
    }

    async fn retire(&self, project: &str, service: &str, keep: &str, live: &[String], report: &mut DeployReport) {
        let targets = self.select_hosts(live);
        if targets.is_empty() {
            return;
        }

        let command = rollout::retire_command(project, service, keep);
        let outcomes = self
            .pool
            .fan_out(&targets, |host| {
                let command = command.as_str();
                async move { host.run(command).await.map(|_| ()) }
            })
            .await;

        let (_, failures) = partition(outcomes);
        for failure in failures {
            report.warn(format!(
                "retiring old {} containers on {} failed: {}",
                service, failure.host, failure.message
            ));
        }
    }

    async fn prune(&self, hosts: &[Host], report: &mut DeployReport) {
        let plan = &report.plan;
        let outcomes = self
            .pool
            .fan_out(hosts, |host| {
                let command = rollout::prune_command(plan, host.name());
                async move { host.run(&command).await.map(|_| ()) }
            })
            .await;

        let (_, failures) = partition(outcomes);
        for failure in failures {
            report.warn(format!("prune on {} failed: {}", failure.host, failure.message));
        }
    }

    async fn finish(&self, audit: &AuditTrail, report: &mut DeployReport) {
        let failed = report.failed_hosts();
        let succeeded: Vec<String> = report
            .plan
            .hosts
            .iter()
            .filter(|h| !failed.contains(h))
            .cloned()
            .collect();
        report.success = failed.is_empty();

        let version = report.plan.version.clone();
        if !succeeded.is_empty() {
            let entry = AuditEntry::new(AuditStatus::Success, "deploy", format!("Deployed {}", version))
                .with_detail("version", &version);
            audit.record_on(&self.select_hosts(&succeeded), &entry).await;
        }
        if !failed.is_empty() {
            let entry = AuditEntry::new(AuditStatus::Failed, "deploy", format!("Deploy of {} failed", version))
                .with_detail("version", &version);
            audit.record_on(&self.select_hosts(&failed), &entry).await;
        }
        for warning in &report.warnings {
            let entry = AuditEntry::new(AuditStatus::Warning, "deploy", warning.clone());
            audit.record(&entry).await;
        }

        log_status!(
            "deploy",
            "Finished: {} host(s) ok, {} failed, {} warning(s)",
            succeeded.len(),
            failed.len(),
            report.warnings.len()
        );
    }
}

fn succeeded_hosts<T>(outcomes: &[HostOutcome<T>]) -> Vec<String> {
    outcomes
        .iter()
        .filter(|o| o.is_ok())
        .map(|o| o.host().to_string())
        .collect()
}

/// One SSH-backed host per configured host name.
pub fn connect_hosts(config: &ProjectConfig) -> Result<Vec<Host>> {
    config
        .all_hosts()
        .iter()
        .map(|name| {
            let client = SshClient::new(name, &config.ssh)?;
            Ok(Host::new(Arc::new(client)))
        })
        .collect()
}
