//! Artifact naming.
//!
//! One run produces three artifacts (snapshot, image, archive) that all carry
//! the same name, so deletion during cleanup finds exactly what the pipeline
//! created. The name is a pure function of the container, the run timestamp
//! and, for [`NamingScheme::WithNetwork`], the container's network identity.
//!
//! Format version 2:
//!
//! | Scheme         | Name                                              |
//! |----------------|---------------------------------------------------|
//! | `plain`        | `{container}-BACKUP-{timestamp}-IMAGE`            |
//! | `with-network` | `{container}-BACKUP-{timestamp}-{mac}-{ip}-IMAGE` |
//!
//! `mac` is lower-case hex with separators removed. An IPv6 `ip` has its
//! colons replaced by `-`, since `lxc` reads anything before a `:` as a remote
//! name. When the identity is unknown, `with-network` falls back to the plain
//! form.

use super::{NetworkIdentity, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub const NAME_FORMAT_VERSION: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NamingScheme {
    #[default]
    Plain,
    WithNetwork,
}

impl std::str::FromStr for NamingScheme {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plain" => Ok(NamingScheme::Plain),
            "with-network" => Ok(NamingScheme::WithNetwork),
            other => Err(format!(
                "unknown naming scheme '{}' (expected 'plain' or 'with-network')",
                other
            )),
        }
    }
}

/// Name shared by the snapshot, the published image alias and the archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName(String);

impl ArtifactName {
    pub fn derive(
        container: &str,
        timestamp: &Timestamp,
        identity: Option<&NetworkIdentity>,
        scheme: NamingScheme,
    ) -> Self {
        let name = match (scheme, identity) {
            (NamingScheme::WithNetwork, Some(identity)) => format!(
                "{}-BACKUP-{}-{}-{}-IMAGE",
                container,
                timestamp,
                compact_mac(&identity.mac),
                name_safe_ip(identity.ip)
            ),
            _ => format!("{}-BACKUP-{}-IMAGE", container, timestamp),
        };
        ArtifactName(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn compact_mac(mac: &str) -> String {
    mac.chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn name_safe_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => v6.to_string().replace(':', "-"),
    }
}
