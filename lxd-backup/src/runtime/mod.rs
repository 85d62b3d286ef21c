//! Container runtime collaborator.
//!
//! The orchestrator only talks to the runtime through [`ContainerRuntime`];
//! [`lxc::LxcRuntime`] binds it to the LXD command-line client.

pub mod lxc;

use crate::job::NetworkIdentity;
use crate::utils::CommandError;
use std::path::Path;

pub use lxc::LxcRuntime;

/// Operations the backup pipeline needs from a container runtime.
///
/// Query methods answer from structured runtime state; mutating methods
/// report success or failure of a single runtime action.
#[allow(async_fn_in_trait)]
pub trait ContainerRuntime {
    /// Confirm the runtime client can be invoked.
    async fn check_available(&self) -> Result<(), CommandError>;

    async fn container_exists(&self, container: &str) -> Result<bool, CommandError>;

    async fn container_has_snapshot(
        &self,
        container: &str,
        label: &str,
    ) -> Result<bool, CommandError>;

    async fn image_exists(&self, alias: &str) -> Result<bool, CommandError>;

    /// Look up the container's MAC and IP address. `Ok(None)` when the
    /// runtime has no lease for it.
    async fn query_network_identity(
        &self,
        container: &str,
    ) -> Result<Option<NetworkIdentity>, CommandError>;

    async fn snapshot(&self, container: &str, label: &str) -> Result<(), CommandError>;

    async fn publish(
        &self,
        container: &str,
        snapshot_label: &str,
        alias: &str,
    ) -> Result<(), CommandError>;

    /// Export an image to `destination`; the runtime writes
    /// `{destination}.<ext>` with an extension matching the image compression.
    async fn export_image(&self, alias: &str, destination: &Path) -> Result<(), CommandError>;

    async fn delete_snapshot(&self, container: &str, label: &str) -> Result<(), CommandError>;

    async fn delete_image(&self, alias: &str) -> Result<(), CommandError>;
}
