//! Container commands for rollout, retirement and pruning.

use super::plan::{repository, DeployPlan, ServicePlan};
use super::proxy::{ensure_network, NETWORK};
use crate::utils::shell::quote_arg;

pub const LABEL_PROJECT: &str = "armada.project";
pub const LABEL_SERVICE: &str = "armada.service";
pub const LABEL_VERSION: &str = "armada.version";

pub fn container_name(project: &str, service: &str, version: &str) -> String {
    format!("{}-{}-{}", project, service, version)
}

/// Pull the image and (re)start the versioned container.
pub fn run_command(plan: &DeployPlan, service: &ServicePlan) -> String {
    let name = container_name(&plan.project, &service.name, &plan.version);
    let config = &service.config;

    let mut run = vec![
        "docker run -d".to_string(),
        format!("--name {}", quote_arg(&name)),
        format!("--network {}", NETWORK),
        "--restart unless-stopped".to_string(),
        format!("--label {}", quote_arg(&format!("{}={}", LABEL_PROJECT, plan.project))),
        format!("--label {}", quote_arg(&format!("{}={}", LABEL_SERVICE, service.name))),
        format!("--label {}", quote_arg(&format!("{}={}", LABEL_VERSION, plan.version))),
    ];
    for port in &config.ports {
        run.push(format!("-p {}", quote_arg(port)));
    }
    for (key, value) in &config.env {
        run.push(format!("-e {}", quote_arg(&format!("{}={}", key, value))));
    }
    for volume in &config.volumes {
        run.push(format!("-v {}", quote_arg(volume)));
    }
    run.push(quote_arg(&service.image));
    if let Some(command) = &config.command {
        run.push(command.clone());
    }

    [
        ensure_network(),
        format!("docker pull {} >/dev/null", quote_arg(&service.image)),
        format!("(docker rm -f {} >/dev/null 2>&1 || true)", quote_arg(&name)),
        format!("{} >/dev/null", run.join(" ")),
    ]
    .join(" && ")
}

/// Remove every container of the service except `keep`.
pub fn retire_command(project: &str, service: &str, keep: &str) -> String {
    format!(
        "docker ps -a --filter label={} --filter label={} --format '{{{{.Names}}}}' | grep -vx {} | xargs -r docker rm -f >/dev/null",
        quote_arg(&format!("{}={}", LABEL_PROJECT, project)),
        quote_arg(&format!("{}={}", LABEL_SERVICE, service)),
        quote_arg(keep),
    )
}

/// Keep the newest `retain` images of each registry-built service on the
/// host, and drop exited project containers.
pub fn prune_command(plan: &DeployPlan, host: &str) -> String {
    let retain = plan.retain();
    let mut steps = vec![format!(
        "docker container prune -f --filter label={} >/dev/null",
        quote_arg(&format!("{}={}", LABEL_PROJECT, plan.project))
    )];

    for service in plan.services_on(host).filter(|s| s.build) {
        steps.push(format!(
            "(docker images {} --format '{{{{.Repository}}}}:{{{{.Tag}}}}' | tail -n +{} | xargs -r docker rmi >/dev/null 2>&1 || true)",
            quote_arg(repository(&service.image)),
            retain + 1
        ));
    }

    steps.join(" && ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;
    use crate::deploy::plan::PlanFilter;

    fn plan() -> DeployPlan {
        let config = config::parse(
            r#"{
                "project": "shop",
                "services": {
                    "web": {
                        "build": {},
                        "hosts": ["a", "b"],
                        "ports": ["8080:80"],
                        "env": { "RAILS_ENV": "production" },
                        "retain": 2
                    },
                    "worker": {
                        "image": "ghcr.io/acme/worker:1.2",
                        "hosts": ["b"],
                        "command": "bin/jobs --queue 'default'"
                    }
                }
            }"#,
            "armada.json",
        )
        .unwrap();
        DeployPlan::new(&config, &PlanFilter::default(), "abc123").unwrap()
    }

    #[test]
    fn run_command_labels_and_configures_container() {
        let plan = plan();
        let command = run_command(&plan, &plan.services[0]);

        assert!(command.contains("docker pull localhost:5000/shop-web:abc123"));
        assert!(command.contains("docker rm -f shop-web-abc123"));
        assert!(command.contains("--name shop-web-abc123 --network armada"));
        assert!(command.contains("--label armada.project=shop"));
        assert!(command.contains("--label armada.version=abc123"));
        assert!(command.contains("-p 8080:80"));
        assert!(command.contains("-e RAILS_ENV=production"));
        assert!(command.ends_with("localhost:5000/shop-web:abc123 >/dev/null"));
    }

    #[test]
    fn run_command_appends_service_command_verbatim() {
        let plan = plan();
        let command = run_command(&plan, &plan.services[1]);
        assert!(command.contains("ghcr.io/acme/worker:1.2 bin/jobs --queue 'default' >/dev/null"));
    }

    #[test]
    fn retire_keeps_current_container() {
        assert_eq!(
            retire_command("shop", "web", "shop-web-abc123"),
            "docker ps -a --filter label=armada.project=shop --filter label=armada.service=web --format '{{.Names}}' | grep -vx shop-web-abc123 | xargs -r docker rm -f >/dev/null"
        );
    }

    #[test]
    fn prune_only_touches_built_images_on_host() {
        let plan = plan();

        let on_a = prune_command(&plan, "a");
        assert!(on_a.contains("docker images localhost:5000/shop-web"));
        assert!(on_a.contains("tail -n +3"));

        let on_b = prune_command(&plan, "b");
        assert!(!on_b.contains("worker"));
    }
}
