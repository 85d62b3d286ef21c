//! Object storage adapter built on `rclone`.

use super::{ObjectStorage, RemoteFile};
use crate::config::StorageConfig;
use crate::process::Tool;
use crate::utils::CommandError;
use serde::Deserialize;
use std::ffi::OsStr;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RcloneStorage {
    tool: Tool,
}

/// One entry of `rclone lsjson` output. `Size` is -1 when the backend does
/// not know it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListEntry {
    name: String,
    size: i64,
    #[serde(default)]
    is_dir: bool,
}

impl RcloneStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            tool: Tool::new(&config.binary),
        }
    }
}

/// `remote:path` as rclone expects it.
pub fn remote_spec(target: &str, path: &str) -> String {
    format!("{}:{}", target.trim_end_matches(':'), path)
}

impl ObjectStorage for RcloneStorage {
    async fn check_available(&self) -> Result<(), CommandError> {
        let version = self.tool.output(["version"]).await?;
        debug!(
            "rclone {}",
            version.lines().next().unwrap_or_default().trim()
        );
        Ok(())
    }

    async fn ensure_remote_directory(&self, target: &str, path: &str) -> Result<(), CommandError> {
        self.tool.run(["mkdir", &remote_spec(target, path)]).await
    }

    async fn upload_file(
        &self,
        local: &Path,
        target: &str,
        remote_dir: &str,
    ) -> Result<(), CommandError> {
        let remote = remote_spec(target, remote_dir);
        let args: [&OsStr; 3] = [OsStr::new("copy"), local.as_os_str(), OsStr::new(&remote)];
        self.tool.run(args).await
    }

    async fn remote_file(
        &self,
        target: &str,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<Option<RemoteFile>, CommandError> {
        let out = self
            .tool
            .output(["lsjson", "--files-only", &remote_spec(target, remote_dir)])
            .await?;
        parse_remote_file(&out, file_name)
    }
}

fn parse_remote_file(json: &str, file_name: &str) -> Result<Option<RemoteFile>, CommandError> {
    let entries: Vec<ListEntry> = serde_json::from_str(json)?;
    Ok(entries
        .into_iter()
        .find(|e| !e.is_dir && e.name == file_name)
        .map(|e| RemoteFile {
            size: u64::try_from(e.size).ok(),
            name: e.name,
        }))
}
