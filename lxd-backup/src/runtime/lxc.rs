//! LXD runtime adapter built on the `lxc` client.
//!
//! State is read through `--format json` listings and `lxc query` against the
//! REST API instead of scraping human-oriented table output.

use super::ContainerRuntime;
use crate::config::RuntimeConfig;
use crate::job::NetworkIdentity;
use crate::process::Tool;
use crate::utils::CommandError;
use serde::Deserialize;
use std::ffi::OsStr;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct LxcRuntime {
    tool: Tool,
    bridges: Vec<String>,
    compression: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstanceSummary {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ImageSummary {
    #[serde(default)]
    aliases: Vec<ImageAlias>,
}

#[derive(Debug, Deserialize)]
struct ImageAlias {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Lease {
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    hwaddr: String,
    #[serde(default)]
    address: String,
}

impl LxcRuntime {
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            tool: Tool::new(&config.binary),
            bridges: config.bridges.clone(),
            compression: config.compression.clone(),
        }
    }

    fn publish_args(&self, container: &str, snapshot_label: &str, alias: &str) -> Vec<String> {
        let mut args = vec![
            "publish".to_string(),
            format!("{}/{}", container, snapshot_label),
            "--alias".to_string(),
            alias.to_string(),
        ];
        if let Some(compression) = &self.compression {
            args.push("--compression".to_string());
            args.push(compression.clone());
        }
        args
    }
}

impl ContainerRuntime for LxcRuntime {
    async fn check_available(&self) -> Result<(), CommandError> {
        let version = self.tool.output(["--version"]).await?;
        debug!("lxc client version {}", version.trim());
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool, CommandError> {
        let out = self
            .tool
            .output(["list", container, "--format", "json"])
            .await?;
        parse_instance_exists(&out, container)
    }

    async fn container_has_snapshot(
        &self,
        container: &str,
        label: &str,
    ) -> Result<bool, CommandError> {
        let out = self
            .tool
            .output(["query", &format!("/1.0/instances/{}/snapshots", container)])
            .await?;
        parse_has_snapshot(&out, label)
    }

    async fn image_exists(&self, alias: &str) -> Result<bool, CommandError> {
        let out = self.tool.output(["image", "list", "--format", "json"]).await?;
        parse_image_has_alias(&out, alias)
    }

    async fn query_network_identity(
        &self,
        container: &str,
    ) -> Result<Option<NetworkIdentity>, CommandError> {
        for bridge in &self.bridges {
            let out = match self
                .tool
                .output(["query", &format!("/1.0/networks/{}/leases", bridge)])
                .await
            {
                Ok(out) => out,
                Err(e) => {
                    warn!("Could not read leases on bridge {}: {}", bridge, e);
                    continue;
                }
            };
            if let Some(identity) = parse_lease_identity(&out, container)? {
                return Ok(Some(identity));
            }
        }
        Ok(None)
    }

    async fn snapshot(&self, container: &str, label: &str) -> Result<(), CommandError> {
        self.tool.run(["snapshot", container, label]).await
    }

    async fn publish(
        &self,
        container: &str,
        snapshot_label: &str,
        alias: &str,
    ) -> Result<(), CommandError> {
        self.tool
            .run(self.publish_args(container, snapshot_label, alias))
            .await
    }

    async fn export_image(&self, alias: &str, destination: &Path) -> Result<(), CommandError> {
        let args: [&OsStr; 4] = [
            OsStr::new("image"),
            OsStr::new("export"),
            OsStr::new(alias),
            destination.as_os_str(),
        ];
        self.tool.run(args).await
    }

    async fn delete_snapshot(&self, container: &str, label: &str) -> Result<(), CommandError> {
        self.tool
            .run(["delete", &format!("{}/{}", container, label)])
            .await
    }

    async fn delete_image(&self, alias: &str) -> Result<(), CommandError> {
        self.tool.run(["image", "delete", alias]).await
    }
}

fn parse_instance_exists(json: &str, container: &str) -> Result<bool, CommandError> {
    let instances: Vec<InstanceSummary> = serde_json::from_str(json)?;
    Ok(instances.iter().any(|i| i.name == container))
}

fn parse_has_snapshot(json: &str, label: &str) -> Result<bool, CommandError> {
    let urls: Vec<String> = serde_json::from_str(json)?;
    Ok(urls
        .iter()
        .filter_map(|url| url.rsplit_once("/snapshots/"))
        .any(|(_, name)| name == label))
}

fn parse_image_has_alias(json: &str, alias: &str) -> Result<bool, CommandError> {
    let images: Vec<ImageSummary> = serde_json::from_str(json)?;
    Ok(images
        .iter()
        .flat_map(|image| image.aliases.iter())
        .any(|a| a.name == alias))
}

fn parse_lease_identity(
    json: &str,
    container: &str,
) -> Result<Option<NetworkIdentity>, CommandError> {
    let leases: Vec<Lease> = serde_json::from_str(json)?;
    let candidates: Vec<(&Lease, IpAddr)> = leases
        .iter()
        .filter(|lease| lease.hostname == container && !lease.hwaddr.is_empty())
        .filter_map(|lease| lease.address.parse::<IpAddr>().ok().map(|ip| (lease, ip)))
        .collect();

    let chosen = candidates
        .iter()
        .find(|(_, ip)| ip.is_ipv4())
        .or_else(|| candidates.first());

    Ok(chosen.map(|(lease, ip)| NetworkIdentity {
        mac: lease.hwaddr.clone(),
        ip: *ip,
    }))
}
