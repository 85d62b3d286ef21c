//! Object storage collaborator.

pub mod rclone;

use crate::utils::CommandError;
use std::path::Path;

pub use rclone::RcloneStorage;

/// A file found in a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub name: String,
    /// `None` when the backend cannot tell the size.
    pub size: Option<u64>,
}

/// Operations the backup pipeline needs from remote object storage.
///
/// `target` names the configured remote, `path` a directory on it.
#[allow(async_fn_in_trait)]
pub trait ObjectStorage {
    /// Confirm the storage client can be invoked.
    async fn check_available(&self) -> Result<(), CommandError>;

    async fn ensure_remote_directory(&self, target: &str, path: &str) -> Result<(), CommandError>;

    /// Copy `local` into the remote directory, keeping its file name.
    async fn upload_file(
        &self,
        local: &Path,
        target: &str,
        remote_dir: &str,
    ) -> Result<(), CommandError>;

    /// Look up `file_name` inside the remote directory, `None` if absent.
    async fn remote_file(
        &self,
        target: &str,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<Option<RemoteFile>, CommandError>;
}
