//! Project configuration (`armada.json`).
//!
//! Loaded once per invocation. Everything downstream receives the resolved
//! [`ProjectConfig`]; nothing re-reads the file mid-run.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pool::DEFAULT_MAX_CONCURRENCY;

pub const DEFAULT_CONFIG_FILE: &str = "armada.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub project: String,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    pub services: BTreeMap<String, ServiceConfig>,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<String>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            port: default_ssh_port(),
            identity_file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    #[serde(rename = "type", default)]
    pub kind: RegistryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default = "default_registry_port")]
    pub port: u16,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Local,
            url: None,
            port: default_registry_port(),
        }
    }
}

impl RegistryConfig {
    pub fn is_local(&self) -> bool {
        self.kind == RegistryKind::Local
    }

    /// Registry host[:port] as used in image references.
    pub fn endpoint(&self) -> String {
        match (&self.kind, &self.url) {
            (RegistryKind::Remote, Some(url)) => url
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string(),
            _ => format!("localhost:{}", self.port),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_image")]
    pub image: String,
    #[serde(default = "default_proxy_container")]
    pub container_name: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_https_port")]
    pub https_port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            image: default_proxy_image(),
            container_name: default_proxy_container(),
            http_port: default_http_port(),
            https_port: default_https_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Prebuilt image reference. Mutually optional with `build`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildConfig>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub ports: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default = "default_retain")]
    pub retain: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ServiceProxyConfig>,
}

impl ServiceConfig {
    pub fn is_proxied(&self) -> bool {
        self.proxy.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_build_context")]
    pub context: String,
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProxyConfig {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub app_port: u16,
    #[serde(default = "default_health_path")]
    pub health_path: String,
    #[serde(default)]
    pub tls: bool,
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_ssh_user() -> String {
    "root".to_string()
}

fn default_ssh_port() -> u16 {
    22
}

fn default_registry_port() -> u16 {
    5000
}

fn default_proxy_image() -> String {
    "basecamp/kamal-proxy:latest".to_string()
}

fn default_proxy_container() -> String {
    "armada-proxy".to_string()
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}

fn default_retain() -> usize {
    3
}

fn default_build_context() -> String {
    ".".to_string()
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_health_path() -> String {
    "/up".to_string()
}

// ============================================================================
// Loading
// ============================================================================

pub fn load(path: &Path) -> Result<ProjectConfig> {
    if !path.exists() {
        return Err(Error::config_not_found(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse(&content, &path.display().to_string())
}

pub fn parse(content: &str, source: &str) -> Result<ProjectConfig> {
    let config: ProjectConfig =
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(source, e))?;
    config.validate()?;
    Ok(config)
}

impl ProjectConfig {
    pub fn validate(&self) -> Result<()> {
        let slug = slug_pattern();

        if !slug.is_match(&self.project) {
            return Err(Error::config_invalid_value(
                "project",
                Some(self.project.clone()),
                "project name must be lowercase letters, digits, '-' or '_'",
            ));
        }

        if self.services.is_empty() {
            return Err(Error::config_invalid_value(
                "services",
                None,
                "at least one service must be configured",
            ));
        }

        if self.registry.kind == RegistryKind::Remote && self.registry.url.is_none() {
            return Err(Error::config_invalid_value(
                "registry.url",
                None,
                "a remote registry needs a url",
            ));
        }

        for (name, service) in &self.services {
            let key = format!("services.{}", name);

            if !slug.is_match(name) {
                return Err(Error::config_invalid_value(
                    key,
                    Some(name.clone()),
                    "service name must be lowercase letters, digits, '-' or '_'",
                ));
            }
            if service.hosts.is_empty() {
                return Err(Error::config_invalid_value(
                    format!("{}.hosts", key),
                    None,
                    format!("service '{}' has no hosts", name),
                ));
            }
            if service.image.is_none() && service.build.is_none() {
                return Err(Error::config_invalid_value(
                    key,
                    None,
                    format!("service '{}' needs an image or a build section", name),
                ));
            }
            if service.retain == 0 {
                return Err(Error::config_invalid_value(
                    format!("{}.retain", key),
                    Some("0".to_string()),
                    "retain must keep at least one image",
                ));
            }
        }

        Ok(())
    }

    /// Every host referenced by any service, in first-seen order.
    pub fn all_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = Vec::new();
        for service in self.services.values() {
            for host in &service.hosts {
                if !hosts.contains(host) {
                    hosts.push(host.clone());
                }
            }
        }
        hosts
    }
}

fn slug_pattern() -> Regex {
    Regex::new(r"^[a-z0-9][a-z0-9_-]*$").expect("slug pattern is valid")
}
