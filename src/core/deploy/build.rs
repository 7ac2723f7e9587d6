//! Version resolution, registry readiness, and image builds on this machine.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;

use super::plan::{DeployPlan, ServicePlan};
use crate::config::{BuildConfig, RegistryConfig};
use crate::error::{DeployBuildFailedDetails, Error, Result};
use crate::executor::Host;
use crate::utils::shell::{quote_arg, quote_path};

pub const LOCAL_REGISTRY_CONTAINER: &str = "armada-registry";
const LOCAL_REGISTRY_IMAGE: &str = "registry:2";
const BUILD_OUTPUT_LIMIT: usize = 4000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltImage {
    pub service: String,
    pub image: String,
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid")
    })
}

/// Explicit tag, else the short git SHA of the working tree, else a
/// generated id.
pub async fn resolve_version(explicit: Option<&str>, local: &Host) -> Result<String> {
    if let Some(tag) = explicit {
        if !tag_pattern().is_match(tag) {
            return Err(Error::validation_invalid_argument(
                "version",
                "Version must be a valid image tag (letters, digits, '_', '.', '-')",
                Some(tag.to_string()),
                None,
            ));
        }
        return Ok(tag.to_string());
    }

    let output = local.execute("git rev-parse --short HEAD").await;
    let sha = output.stdout.trim();
    if output.success && tag_pattern().is_match(sha) {
        return Ok(sha.to_string());
    }

    let generated = uuid::Uuid::new_v4().simple().to_string();
    log_status!("deploy", "No git revision available, using generated version");
    Ok(generated[..12].to_string())
}

// ============================================================================
// Registry
// ============================================================================

/// Make sure images can be pushed: start the local registry container if
/// needed, or probe a remote registry's API root.
pub async fn ensure_registry(registry: &RegistryConfig, local: &Host) -> Result<()> {
    if registry.is_local() {
        let command = local_registry_command(registry.port);
        let output = local.execute(&command).await;
        if !output.success {
            return Err(Error::deploy_registry_unavailable(
                registry.endpoint(),
                output.stderr.trim().to_string(),
            ));
        }
        return Ok(());
    }

    probe_remote_registry(registry).await
}

fn local_registry_command(port: u16) -> String {
    let name = quote_arg(LOCAL_REGISTRY_CONTAINER);
    format!(
        "if [ -z \"$(docker ps -q -f name=^{name}$)\" ]; then docker start {name} >/dev/null 2>&1 || docker run -d --name {name} --restart unless-stopped -p {port}:5000 {image} >/dev/null; fi",
        name = name,
        port = port,
        image = LOCAL_REGISTRY_IMAGE,
    )
}

async fn probe_remote_registry(registry: &RegistryConfig) -> Result<()> {
    let endpoint = registry.endpoint();
    let base = match registry.url.as_deref() {
        Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
            url.trim_end_matches('/').to_string()
        }
        _ => format!("https://{}", endpoint),
    };

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| Error::deploy_registry_unavailable(&endpoint, e.to_string()))?;

    let response = client
        .get(format!("{}/v2/", base))
        .send()
        .await
        .map_err(|e| Error::deploy_registry_unavailable(&endpoint, e.to_string()))?;

    let status = response.status();
    // 401 means the registry is up and wants credentials.
    if status.is_success() || status == reqwest::StatusCode::UNAUTHORIZED {
        Ok(())
    } else {
        Err(Error::deploy_registry_unavailable(
            endpoint,
            format!("unexpected status {}", status),
        ))
    }
}

// ============================================================================
// Build + push
// ============================================================================

pub fn build_command(build: &BuildConfig, image: &str, no_cache: bool) -> String {
    let dockerfile = Path::new(&build.context).join(&build.dockerfile);
    let mut args = vec!["docker".to_string(), "build".to_string()];

    if let Some(platform) = &build.platform {
        args.push("--platform".to_string());
        args.push(quote_arg(platform));
    }
    if no_cache {
        args.push("--no-cache".to_string());
    }
    for (key, value) in &build.args {
        args.push("--build-arg".to_string());
        args.push(quote_arg(&format!("{}={}", key, value)));
    }
    args.push("-f".to_string());
    args.push(quote_path(&dockerfile.to_string_lossy()));
    args.push("-t".to_string());
    args.push(quote_arg(image));
    args.push(quote_path(&build.context));

    args.join(" ")
}

pub fn push_command(image: &str) -> String {
    format!("docker push {}", quote_arg(image))
}

/// Build and push every service with a build section, one at a time. The
/// first failure aborts.
pub async fn build_and_push(plan: &DeployPlan, local: &Host, no_cache: bool) -> Result<Vec<BuiltImage>> {
    let mut built = Vec::new();

    for service in plan.services.iter().filter(|s| s.build) {
        build_one(service, local, no_cache).await?;
        built.push(BuiltImage {
            service: service.name.clone(),
            image: service.image.clone(),
        });
    }

    Ok(built)
}

async fn build_one(service: &ServicePlan, local: &Host, no_cache: bool) -> Result<()> {
    let Some(build) = &service.config.build else {
        return Ok(());
    };

    log_status!("build", "Building {} as {}", service.name, service.image);
    for command in [build_command(build, &service.image, no_cache), push_command(&service.image)] {
        let output = local.execute(&command).await;
        if !output.success {
            let combined = format!("{}{}", output.stdout, output.stderr);
            return Err(Error::deploy_build_failed(DeployBuildFailedDetails {
                service: service.name.clone(),
                image: service.image.clone(),
                exit_code: Some(output.exit_code),
                output: tail_chars(&combined, BUILD_OUTPUT_LIMIT),
            }));
        }
    }
    Ok(())
}

fn tail_chars(text: &str, limit: usize) -> String {
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(limit)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalExecutor;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[tokio::test]
    async fn explicit_version_wins() {
        let local = Host::new(Arc::new(LocalExecutor::new()));
        assert_eq!(resolve_version(Some("v1.2.3"), &local).await.unwrap(), "v1.2.3");
    }

    #[tokio::test]
    async fn invalid_explicit_version_is_rejected() {
        let local = Host::new(Arc::new(LocalExecutor::new()));
        assert!(resolve_version(Some("bad tag!"), &local).await.is_err());
    }

    #[tokio::test]
    async fn falls_back_to_generated_id_outside_git() {
        let dir = tempfile::tempdir().unwrap();
        let local = Host::new(Arc::new(LocalExecutor::in_dir("localhost", dir.path())));
        let version = resolve_version(None, &local).await.unwrap();
        assert_eq!(version.len(), 12);
        assert!(tag_pattern().is_match(&version));
    }

    #[test]
    fn build_command_includes_options() {
        let mut args = BTreeMap::new();
        args.insert("RUBY_VERSION".to_string(), "3.3".to_string());
        let build = BuildConfig {
            context: "app".to_string(),
            dockerfile: "Dockerfile.prod".to_string(),
            platform: Some("linux/amd64".to_string()),
            args,
        };

        assert_eq!(
            build_command(&build, "localhost:5000/shop-web:v1", true),
            "docker build --platform linux/amd64 --no-cache --build-arg RUBY_VERSION=3.3 -f 'app/Dockerfile.prod' -t localhost:5000/shop-web:v1 'app'"
        );
    }

    #[test]
    fn local_registry_starts_only_when_absent() {
        let command = local_registry_command(5000);
        assert!(command.starts_with("if [ -z \"$(docker ps -q -f name=^armada-registry$)\" ]"));
        assert!(command.contains("-p 5000:5000 registry:2"));
    }

    #[test]
    fn tail_chars_keeps_end() {
        assert_eq!(tail_chars("abcdef", 3), "def");
        assert_eq!(tail_chars("ab", 3), "ab");
    }
}
