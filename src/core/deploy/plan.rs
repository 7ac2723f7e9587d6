use serde::Serialize;

use crate::config::{ProjectConfig, ServiceConfig};
use crate::error::{Error, Result};

/// `--service` / `--host` selection. Empty means everything.
#[derive(Debug, Clone, Default)]
pub struct PlanFilter {
    pub services: Vec<String>,
    pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePlan {
    pub name: String,
    pub hosts: Vec<String>,
    pub image: String,
    pub build: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub proxy_hosts: Vec<String>,
    #[serde(skip)]
    pub config: ServiceConfig,
}

impl ServicePlan {
    pub fn is_proxied(&self) -> bool {
        self.config.is_proxied()
    }
}

/// Which services go to which hosts, at which version.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployPlan {
    pub project: String,
    pub version: String,
    pub registry: String,
    pub services: Vec<ServicePlan>,
    pub hosts: Vec<String>,
}

impl DeployPlan {
    pub fn new(config: &ProjectConfig, filter: &PlanFilter, version: &str) -> Result<Self> {
        let unknown_services: Vec<String> = filter
            .services
            .iter()
            .filter(|s| !config.services.contains_key(*s))
            .cloned()
            .collect();
        if !unknown_services.is_empty() {
            return Err(Error::validation_invalid_argument(
                "service",
                "Unknown service names",
                None,
                Some(unknown_services),
            ));
        }

        let known_hosts = config.all_hosts();
        let unknown_hosts: Vec<String> = filter
            .hosts
            .iter()
            .filter(|h| !known_hosts.contains(h))
            .cloned()
            .collect();
        if !unknown_hosts.is_empty() {
            return Err(Error::validation_invalid_argument(
                "host",
                "Hosts not used by any service",
                None,
                Some(unknown_hosts),
            ));
        }

        let registry = config.registry.endpoint();
        let mut services = Vec::new();

        for (name, service) in &config.services {
            if !filter.services.is_empty() && !filter.services.contains(name) {
                continue;
            }
            let hosts: Vec<String> = service
                .hosts
                .iter()
                .filter(|h| filter.hosts.is_empty() || filter.hosts.contains(h))
                .cloned()
                .collect();
            if hosts.is_empty() {
                continue;
            }

            services.push(ServicePlan {
                name: name.clone(),
                image: image_ref(&registry, &config.project, name, service, version),
                build: service.build.is_some(),
                proxy_hosts: service.proxy.as_ref().map(|p| p.hosts.clone()).unwrap_or_default(),
                hosts,
                config: service.clone(),
            });
        }

        if services.is_empty() {
            let mut tried = filter.services.clone();
            tried.extend(filter.hosts.iter().cloned());
            return Err(Error::deploy_no_services_selected(tried));
        }

        let mut hosts: Vec<String> = Vec::new();
        for service in &services {
            for host in &service.hosts {
                if !hosts.contains(host) {
                    hosts.push(host.clone());
                }
            }
        }

        Ok(Self {
            project: config.project.clone(),
            version: version.to_string(),
            registry,
            services,
            hosts,
        })
    }

    /// Hosts running at least one proxied service.
    pub fn proxy_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| {
                self.services
                    .iter()
                    .any(|s| s.is_proxied() && s.hosts.contains(h))
            })
            .cloned()
            .collect()
    }

    /// Whether any image comes from the project registry.
    pub fn uses_registry(&self) -> bool {
        self.services.iter().any(|s| s.build)
    }

    /// Images to keep per repository when pruning.
    pub fn retain(&self) -> usize {
        self.services
            .iter()
            .map(|s| s.config.retain)
            .max()
            .unwrap_or(1)
    }

    pub fn services_on<'a>(&'a self, host: &'a str) -> impl Iterator<Item = &'a ServicePlan> + 'a {
        self.services
            .iter()
            .filter(move |s| s.hosts.iter().any(|h| h == host))
    }
}

/// Built services live in the project registry; others use their image as is.
pub fn image_ref(
    registry: &str,
    project: &str,
    name: &str,
    service: &ServiceConfig,
    version: &str,
) -> String {
    match (&service.build, &service.image) {
        (None, Some(image)) => image.clone(),
        _ => format!("{}/{}-{}:{}", registry, project, name, version),
    }
}

/// Repository part of an image reference (drops the tag, keeps a registry port).
pub fn repository(image: &str) -> &str {
    match image.rfind(':') {
        Some(idx) if !image[idx..].contains('/') => &image[..idx],
        _ => image,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config;

    fn config() -> ProjectConfig {
        config::parse(
            r#"{
                "project": "shop",
                "services": {
                    "web": {
                        "build": {},
                        "hosts": ["a", "b"],
                        "retain": 5,
                        "proxy": { "hosts": ["shop.example.com"], "appPort": 3000 }
                    },
                    "worker": { "image": "ghcr.io/acme/worker:1.2", "hosts": ["b", "c"] }
                }
            }"#,
            "armada.json",
        )
        .unwrap()
    }

    #[test]
    fn full_plan_covers_every_service() {
        let plan = DeployPlan::new(&config(), &PlanFilter::default(), "v1").unwrap();

        assert_eq!(plan.hosts, vec!["a", "b", "c"]);
        assert_eq!(plan.services[0].image, "localhost:5000/shop-web:v1");
        assert_eq!(plan.services[1].image, "ghcr.io/acme/worker:1.2");
        assert_eq!(plan.proxy_hosts(), vec!["a", "b"]);
        assert!(plan.uses_registry());
        assert_eq!(plan.retain(), 5);
        assert_eq!(plan.services_on("b").count(), 2);
    }

    #[test]
    fn host_filter_narrows_services() {
        let filter = PlanFilter {
            hosts: vec!["c".to_string()],
            ..Default::default()
        };
        let plan = DeployPlan::new(&config(), &filter, "v1").unwrap();

        assert_eq!(plan.services.len(), 1);
        assert_eq!(plan.services[0].name, "worker");
        assert_eq!(plan.services[0].hosts, vec!["c"]);
        assert!(plan.proxy_hosts().is_empty());
        assert!(!plan.uses_registry());
    }

    #[test]
    fn unknown_service_is_rejected() {
        let filter = PlanFilter {
            services: vec!["api".to_string()],
            ..Default::default()
        };
        let err = DeployPlan::new(&config(), &filter, "v1").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::ValidationInvalidArgument);
    }

    #[test]
    fn disjoint_filters_select_nothing() {
        let filter = PlanFilter {
            services: vec!["web".to_string()],
            hosts: vec!["c".to_string()],
        };
        let err = DeployPlan::new(&config(), &filter, "v1").unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::DeployNoServicesSelected);
    }

    #[test]
    fn repository_strips_tag_only() {
        assert_eq!(repository("localhost:5000/shop-web:v1"), "localhost:5000/shop-web");
        assert_eq!(repository("localhost:5000/shop-web"), "localhost:5000/shop-web");
        assert_eq!(repository("nginx"), "nginx");
    }
}
