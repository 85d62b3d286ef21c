//! Recording in-memory collaborators for pipeline tests.

use crate::job::NetworkIdentity;
use crate::runtime::ContainerRuntime;
use crate::storage::{ObjectStorage, RemoteFile};
use crate::utils::CommandError;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Mutating collaborator calls, in the order the pipeline issues them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Snapshot,
    Publish,
    ExportImage,
    EnsureRemoteDirectory,
    UploadFile,
    DeleteSnapshot,
    DeleteImage,
}

type CallLog = Arc<Mutex<Vec<Call>>>;

fn refused(call: Call) -> CommandError {
    CommandError::Failed {
        program: "fake".to_string(),
        status: "status 1".to_string(),
        stderr: format!("{:?} refused", call),
    }
}

#[derive(Default)]
struct RuntimeState {
    containers: HashSet<String>,
    snapshots: HashSet<(String, String)>,
    images: HashSet<String>,
    failing: HashSet<Call>,
    identity: Option<NetworkIdentity>,
    missing: bool,
    cancel_after: Option<(Call, CancellationToken)>,
    cancel_during: Option<(Call, CancellationToken)>,
    export_extension: Option<String>,
}

pub struct FakeRuntime {
    log: CallLog,
    state: Mutex<RuntimeState>,
}

impl FakeRuntime {
    pub fn new<I: IntoIterator<Item = S>, S: Into<String>>(containers: I) -> Self {
        let state = RuntimeState {
            containers: containers.into_iter().map(Into::into).collect(),
            ..Default::default()
        };
        Self {
            log: CallLog::default(),
            state: Mutex::new(state),
        }
    }

    pub fn log(&self) -> CallLog {
        Arc::clone(&self.log)
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.log.lock().unwrap().clone()
    }

    pub fn fail_on(&self, call: Call) {
        self.state.lock().unwrap().failing.insert(call);
    }

    pub fn set_missing(&self) {
        self.state.lock().unwrap().missing = true;
    }

    pub fn set_identity(&self, identity: NetworkIdentity) {
        self.state.lock().unwrap().identity = Some(identity);
    }

    /// Cancel `token` right after `call` succeeds.
    pub fn cancel_after(&self, call: Call, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after = Some((call, token));
    }

    /// Cancel `token` once `call` has started, then yield before finishing.
    pub fn cancel_during(&self, call: Call, token: CancellationToken) {
        self.state.lock().unwrap().cancel_during = Some((call, token));
    }

    /// Extension the export appends to its target, `tar.gz` by default.
    pub fn set_export_extension(&self, extension: &str) {
        self.state.lock().unwrap().export_extension = Some(extension.to_string());
    }

    pub fn add_snapshot(&self, container: &str, label: &str) {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .insert((container.to_string(), label.to_string()));
    }

    pub fn add_image(&self, alias: &str) {
        self.state.lock().unwrap().images.insert(alias.to_string());
    }

    pub fn has_snapshot(&self, container: &str, label: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .snapshots
            .contains(&(container.to_string(), label.to_string()))
    }

    pub fn has_image(&self, alias: &str) -> bool {
        self.state.lock().unwrap().images.contains(alias)
    }

    /// Record `call`; return whether it should fail.
    fn enter(&self, call: Call) -> Result<(), CommandError> {
        self.log.lock().unwrap().push(call);
        if self.state.lock().unwrap().failing.contains(&call) {
            return Err(refused(call));
        }
        Ok(())
    }

    async fn midway(&self, call: Call) {
        let token = {
            let state = self.state.lock().unwrap();
            state
                .cancel_during
                .as_ref()
                .filter(|(during, _)| *during == call)
                .map(|(_, token)| token.clone())
        };
        if let Some(token) = token {
            token.cancel();
            tokio::task::yield_now().await;
        }
    }

    fn leave(&self, call: Call) {
        let state = self.state.lock().unwrap();
        if let Some((after, token)) = &state.cancel_after {
            if *after == call {
                token.cancel();
            }
        }
    }
}

impl ContainerRuntime for FakeRuntime {
    async fn check_available(&self) -> Result<(), CommandError> {
        if self.state.lock().unwrap().missing {
            return Err(CommandError::ToolMissing {
                program: "lxc".to_string(),
            });
        }
        Ok(())
    }

    async fn container_exists(&self, container: &str) -> Result<bool, CommandError> {
        Ok(self.state.lock().unwrap().containers.contains(container))
    }

    async fn container_has_snapshot(
        &self,
        container: &str,
        label: &str,
    ) -> Result<bool, CommandError> {
        Ok(self.has_snapshot(container, label))
    }

    async fn image_exists(&self, alias: &str) -> Result<bool, CommandError> {
        Ok(self.has_image(alias))
    }

    async fn query_network_identity(
        &self,
        _container: &str,
    ) -> Result<Option<NetworkIdentity>, CommandError> {
        Ok(self.state.lock().unwrap().identity.clone())
    }

    async fn snapshot(&self, container: &str, label: &str) -> Result<(), CommandError> {
        self.enter(Call::Snapshot)?;
        self.add_snapshot(container, label);
        self.leave(Call::Snapshot);
        Ok(())
    }

    async fn publish(
        &self,
        container: &str,
        snapshot_label: &str,
        alias: &str,
    ) -> Result<(), CommandError> {
        self.enter(Call::Publish)?;
        self.midway(Call::Publish).await;
        if !self.has_snapshot(container, snapshot_label) {
            return Err(refused(Call::Publish));
        }
        self.add_image(alias);
        self.leave(Call::Publish);
        Ok(())
    }

    async fn export_image(&self, alias: &str, destination: &Path) -> Result<(), CommandError> {
        self.enter(Call::ExportImage)?;
        self.midway(Call::ExportImage).await;
        if !self.has_image(alias) {
            return Err(refused(Call::ExportImage));
        }
        let extension = self
            .state
            .lock()
            .unwrap()
            .export_extension
            .clone()
            .unwrap_or_else(|| "tar.gz".to_string());
        let mut archive = destination.as_os_str().to_os_string();
        archive.push(".");
        archive.push(extension);
        std::fs::write(PathBuf::from(archive), b"fake image archive")?;
        self.leave(Call::ExportImage);
        Ok(())
    }

    async fn delete_snapshot(&self, container: &str, label: &str) -> Result<(), CommandError> {
        self.enter(Call::DeleteSnapshot)?;
        self.state
            .lock()
            .unwrap()
            .snapshots
            .remove(&(container.to_string(), label.to_string()));
        Ok(())
    }

    async fn delete_image(&self, alias: &str) -> Result<(), CommandError> {
        self.enter(Call::DeleteImage)?;
        self.state.lock().unwrap().images.remove(alias);
        Ok(())
    }
}

#[derive(Default)]
struct StorageState {
    dirs: HashMap<String, HashMap<String, u64>>,
    failing: HashSet<Call>,
    missing: bool,
    drop_uploads: bool,
    unknown_sizes: bool,
}

pub struct FakeStorage {
    log: CallLog,
    state: Mutex<StorageState>,
}

impl FakeStorage {
    /// Storage recording into the same call log as `runtime`.
    pub fn sharing(runtime: &FakeRuntime) -> Self {
        Self {
            log: runtime.log(),
            state: Mutex::default(),
        }
    }

    pub fn fail_on(&self, call: Call) {
        self.state.lock().unwrap().failing.insert(call);
    }

    pub fn set_missing(&self) {
        self.state.lock().unwrap().missing = true;
    }

    /// Report uploads as successful without storing anything.
    pub fn drop_uploads(&self) {
        self.state.lock().unwrap().drop_uploads = true;
    }

    /// List files without sizes, like backends that cannot report them.
    pub fn hide_sizes(&self) {
        self.state.lock().unwrap().unknown_sizes = true;
    }

    pub fn files(&self, target: &str, dir: &str) -> Vec<String> {
        let key = format!("{}:{}", target, dir);
        let mut names: Vec<String> = self
            .state
            .lock()
            .unwrap()
            .dirs
            .get(&key)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn enter(&self, call: Call) -> Result<(), CommandError> {
        self.log.lock().unwrap().push(call);
        if self.state.lock().unwrap().failing.contains(&call) {
            return Err(refused(call));
        }
        Ok(())
    }
}

impl ObjectStorage for FakeStorage {
    async fn check_available(&self) -> Result<(), CommandError> {
        if self.state.lock().unwrap().missing {
            return Err(CommandError::ToolMissing {
                program: "rclone".to_string(),
            });
        }
        Ok(())
    }

    async fn ensure_remote_directory(&self, target: &str, path: &str) -> Result<(), CommandError> {
        self.enter(Call::EnsureRemoteDirectory)?;
        self.state
            .lock()
            .unwrap()
            .dirs
            .entry(format!("{}:{}", target, path))
            .or_default();
        Ok(())
    }

    async fn upload_file(
        &self,
        local: &Path,
        target: &str,
        remote_dir: &str,
    ) -> Result<(), CommandError> {
        self.enter(Call::UploadFile)?;
        let size = std::fs::metadata(local)?.len();
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut state = self.state.lock().unwrap();
        if state.drop_uploads {
            return Ok(());
        }
        match state.dirs.get_mut(&format!("{}:{}", target, remote_dir)) {
            Some(files) => {
                files.insert(name, size);
                Ok(())
            }
            None => Err(refused(Call::UploadFile)),
        }
    }

    async fn remote_file(
        &self,
        target: &str,
        remote_dir: &str,
        file_name: &str,
    ) -> Result<Option<RemoteFile>, CommandError> {
        let state = self.state.lock().unwrap();
        match state.dirs.get(&format!("{}:{}", target, remote_dir)) {
            Some(files) => Ok(files.get(file_name).map(|size| RemoteFile {
                name: file_name.to_string(),
                size: (!state.unknown_sizes).then_some(*size),
            })),
            None => Err(CommandError::Failed {
                program: "fake".to_string(),
                status: "status 3".to_string(),
                stderr: "directory not found".to_string(),
            }),
        }
    }
}
