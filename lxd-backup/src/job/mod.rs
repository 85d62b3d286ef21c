//! Per-run job context.
//!
//! A [`BackupJob`] is derived once before the pipeline starts and passed to
//! every stage, so all artifacts in a run share one timestamp and one name.

pub mod naming;

use chrono::{DateTime, TimeZone};
use naming::{ArtifactName, NamingScheme};
use std::fmt;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// Sortable local time, minute resolution.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M";

const MAX_CONTAINER_NAME: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn capture<Tz: TimeZone>(now: DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Timestamp(now.format(TIMESTAMP_FORMAT).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// MAC and IP address the runtime's DHCP leases report for a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    pub mac: String,
    pub ip: IpAddr,
}

#[derive(Debug, Clone)]
pub struct BackupJob {
    container: String,
    work_dir: PathBuf,
    name: ArtifactName,
}

impl BackupJob {
    pub fn new(
        container: impl Into<String>,
        timestamp: Timestamp,
        identity: Option<NetworkIdentity>,
        work_dir: impl Into<PathBuf>,
        scheme: NamingScheme,
    ) -> Self {
        let container = container.into();
        let name = ArtifactName::derive(&container, &timestamp, identity.as_ref(), scheme);
        Self {
            container,
            work_dir: work_dir.into(),
            name,
        }
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn name(&self) -> &ArtifactName {
        &self.name
    }

    /// Snapshot label on the container.
    pub fn snapshot_label(&self) -> &str {
        self.name.as_str()
    }

    /// Alias of the published image.
    pub fn image_alias(&self) -> &str {
        self.name.as_str()
    }

    /// Target handed to `lxc image export`. The runtime appends an extension
    /// that follows the image compression (`.tar.gz`, `.tar.zst`, `.tar`, ...).
    pub fn export_target(&self) -> PathBuf {
        self.work_dir.join(self.name.as_str())
    }

    /// Whether `file_name` is something the export wrote for this job.
    pub fn is_export_output(&self, file_name: &str) -> bool {
        file_name
            .strip_prefix(self.name.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }

    /// Files in the work directory written by the export, sorted by name.
    pub async fn exported_files(&self) -> std::io::Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.work_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| self.is_export_output(n)) {
                files.push(entry.path());
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn report_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}-REPORT.txt", self.name))
    }
}

/// Check a container name against LXD's instance naming rules.
pub fn validate_container_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("container name is empty".to_string());
    }
    if name.len() > MAX_CONTAINER_NAME {
        return Err(format!(
            "container name '{}' is longer than {} characters",
            name, MAX_CONTAINER_NAME
        ));
    }
    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err(format!("container name '{}' must start with a letter", name));
    }
    if name.ends_with('-') {
        return Err(format!("container name '{}' must not end with '-'", name));
    }
    if let Some(bad) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '-') {
        return Err(format!(
            "container name '{}' contains invalid character '{}'",
            name, bad
        ));
    }
    Ok(())
}
