//! kamal-proxy container management.

use super::plan::ServicePlan;
use crate::config::ProxyConfig;
use crate::utils::shell::quote_arg;

/// Docker network shared by the proxy and every service container.
pub const NETWORK: &str = "armada";

const PROXY_CONFIG_VOLUME: &str = "armada-proxy-config:/home/kamal-proxy/.config/kamal-proxy";

pub fn ensure_network() -> String {
    format!(
        "(docker network inspect {n} >/dev/null 2>&1 || docker network create {n} >/dev/null)",
        n = NETWORK
    )
}

/// Pull the proxy image and start the proxy container unless it is running.
pub fn install_command(proxy: &ProxyConfig) -> String {
    let name = quote_arg(&proxy.container_name);
    let image = quote_arg(&proxy.image);

    format!(
        "{network} && docker pull {image} >/dev/null && if [ -z \"$(docker ps -q -f name=^{name}$)\" ]; then (docker rm -f {name} >/dev/null 2>&1 || true) && docker run -d --name {name} --network {net} --restart unless-stopped -p {http}:80 -p {https}:443 -v {volume} {image} >/dev/null; fi",
        network = ensure_network(),
        image = image,
        name = name,
        net = NETWORK,
        http = proxy.http_port,
        https = proxy.https_port,
        volume = PROXY_CONFIG_VOLUME,
    )
}

/// Point the proxy at a freshly started container. Returns `None` for
/// services without proxy settings.
pub fn deploy_command(proxy: &ProxyConfig, project: &str, service: &ServicePlan, container: &str) -> Option<String> {
    let settings = service.config.proxy.as_ref()?;

    let mut args = vec![
        "docker".to_string(),
        "exec".to_string(),
        quote_arg(&proxy.container_name),
        "kamal-proxy".to_string(),
        "deploy".to_string(),
        quote_arg(&format!("{}-{}", project, service.name)),
        "--target".to_string(),
        quote_arg(&format!("{}:{}", container, settings.app_port)),
    ];
    for host in &settings.hosts {
        args.push("--host".to_string());
        args.push(quote_arg(host));
    }
    args.push("--health-check-path".to_string());
    args.push(quote_arg(&settings.health_path));
    if settings.tls {
        args.push("--tls".to_string());
    }

    Some(args.join(" "))
}
