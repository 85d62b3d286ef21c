//! Backup orchestrator - drives one container through the pipeline.
//!
//! Preflight validates the input and the collaborators without touching
//! anything. After that every stage is a single collaborator call raced
//! against the interrupt token:
//!
//! | Stage           | Call                                   |
//! |-----------------|----------------------------------------|
//! | SnapshotCreated | `snapshot(container, name)`            |
//! | ImagePublished  | `publish(container, name, name)`       |
//! | ImageExported   | `export_image(name, work_dir/name)`    |
//! | RemoteDirReady  | `ensure_remote_directory(remote, dir)` |
//! | Uploaded        | `upload_file(archive, remote, dir)`    |
//!
//! The export appends an extension that follows the image compression, so the
//! archive is located by scanning the work directory afterwards.
//!
//! The first failure or interrupt stops the pipeline. Snapshot and publish run
//! inside the LXD daemon and are allowed to finish once started; the interrupt
//! then takes effect before the next stage. Cleanup runs for every outcome
//! past preflight, success included.

pub mod cleanup;
pub mod report;
pub mod stage;

#[cfg(test)]
pub(crate) mod fakes;

use crate::config::Config;
use crate::job::naming::{NamingScheme, NAME_FORMAT_VERSION};
use crate::job::{validate_container_name, BackupJob, NetworkIdentity, Timestamp};
use crate::runtime::ContainerRuntime;
use crate::storage::ObjectStorage;
use crate::utils::{BackupError, CommandError, Result};
use chrono::{DateTime, Local};
use cleanup::{run_cleanup, CleanupOutcome, CleanupSet};
use report::RunReport;
use stage::PipelineStage;
use std::future::Future;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub remote: String,
    pub remote_dir: String,
    /// File name of the uploaded archive.
    pub archive: String,
    pub archive_bytes: u64,
}

/// Archive the export stage left in the work directory.
#[derive(Debug, Clone)]
struct ExportedArchive {
    path: PathBuf,
    file_name: String,
    bytes: u64,
}

/// Everything observable about one run.
#[derive(Debug)]
pub struct RunOutcome {
    /// `None` when the run stopped before the job could be derived.
    pub job: Option<BackupJob>,
    pub result: Result<RunSummary>,
    /// `None` when nothing was attempted.
    pub cleanup: Option<CleanupOutcome>,
    pub report: Vec<String>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn exit_code(&self) -> u8 {
        match &self.result {
            Ok(_) => 0,
            Err(e) => e.exit_code(),
        }
    }
}

pub struct Orchestrator<R, S> {
    runtime: R,
    storage: S,
    config: Config,
}

impl<R: ContainerRuntime, S: ObjectStorage> Orchestrator<R, S> {
    pub fn new(runtime: R, storage: S, config: Config) -> Self {
        Self {
            runtime,
            storage,
            config,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Back up `container`, using `now` as the run timestamp.
    pub async fn run(
        &self,
        container: &str,
        now: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let span = info_span!("backup", run_id = %Uuid::new_v4(), container = %container);
        self.run_inner(container, now, cancel).instrument(span).await
    }

    async fn run_inner(
        &self,
        container: &str,
        now: DateTime<Local>,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let report = RunReport::new();

        if let Err(e) = self.preflight(container, cancel, &report).await {
            report.fail(&format!("Backup of {} did not start: {}", container, e));
            return RunOutcome {
                job: None,
                result: Err(e),
                cleanup: None,
                report: report.lines(),
            };
        }

        let job = self.prepare_job(container, now, &report).await;
        if self.config.backup.report {
            if let Err(e) = report.attach_file(job.report_path()) {
                report.warn(&format!(
                    "Could not create report file {}: {}",
                    job.report_path().display(),
                    e
                ));
            }
        }

        let mut set = CleanupSet::new();
        let result = self.execute(&job, &mut set, &report, cancel).await;

        if let Err(BackupError::Interrupted(_)) = &result {
            report.warn("Interrupted, cleaning up before exit");
        }
        let cleanup = run_cleanup(&self.runtime, &job, &set, &report).await;
        if !cleanup.is_clean() {
            report.warn("Cleanup left artifacts behind, see lines above");
        }

        match &result {
            Ok(summary) => report.ok(&format!(
                "Backup of {} complete: {}:{}/{} ({} bytes)",
                job.container(),
                summary.remote,
                summary.remote_dir,
                summary.archive,
                summary.archive_bytes
            )),
            Err(e) => report.fail(&format!("Backup of {} failed: {}", job.container(), e)),
        }

        let interrupted = matches!(result, Err(BackupError::Interrupted(_)));
        self.ship_report(&job, &report, interrupted).await;

        RunOutcome {
            job: Some(job),
            result,
            cleanup: Some(cleanup),
            report: report.lines(),
        }
    }

    /// Checks that must pass before anything is created.
    async fn preflight(
        &self,
        container: &str,
        cancel: &CancellationToken,
        report: &RunReport,
    ) -> Result<()> {
        validate_container_name(container).map_err(BackupError::Precondition)?;

        self.runtime
            .check_available()
            .await
            .map_err(|e| BackupError::Precondition(format!("container runtime unavailable: {}", e)))?;
        self.storage
            .check_available()
            .await
            .map_err(|e| BackupError::Precondition(format!("object storage unavailable: {}", e)))?;

        match self.runtime.container_exists(container).await {
            Ok(true) => {}
            Ok(false) => {
                return Err(BackupError::Precondition(format!(
                    "container {} does not exist",
                    container
                )))
            }
            Err(e) => {
                return Err(BackupError::Precondition(format!(
                    "could not look up container {}: {}",
                    container, e
                )))
            }
        }

        let work_dir = &self.config.backup.work_dir;
        tokio::fs::create_dir_all(work_dir).await.map_err(|e| {
            BackupError::Precondition(format!(
                "cannot create work directory {}: {}",
                work_dir.display(),
                e
            ))
        })?;

        if cancel.is_cancelled() {
            return Err(BackupError::Interrupted(PipelineStage::Preflight));
        }

        report.ok(&format!("Preflight passed for container {}", container));
        Ok(())
    }

    /// Derive the job context: timestamp, optional network identity and the
    /// artifact name built from them.
    pub async fn prepare_job(
        &self,
        container: &str,
        now: DateTime<Local>,
        report: &RunReport,
    ) -> BackupJob {
        let timestamp = Timestamp::capture(now);
        let scheme = self.config.backup.naming;
        let identity = match scheme {
            NamingScheme::Plain => None,
            NamingScheme::WithNetwork => self.network_identity(container, report).await,
        };

        let job = BackupJob::new(
            container,
            timestamp,
            identity,
            &self.config.backup.work_dir,
            scheme,
        );
        info!("Artifact name (format v{}): {}", NAME_FORMAT_VERSION, job.name());
        job
    }

    async fn network_identity(&self, container: &str, report: &RunReport) -> Option<NetworkIdentity> {
        match self.runtime.query_network_identity(container).await {
            Ok(Some(identity)) => {
                info!("Network identity: mac {} ip {}", identity.mac, identity.ip);
                Some(identity)
            }
            Ok(None) => {
                report.warn(&format!(
                    "No network lease found for {}, naming without network identity",
                    container
                ));
                None
            }
            Err(e) => {
                report.warn(&format!(
                    "Network identity lookup for {} failed ({}), naming without it",
                    container, e
                ));
                None
            }
        }
    }

    async fn execute(
        &self,
        job: &BackupJob,
        set: &mut CleanupSet,
        report: &RunReport,
        cancel: &CancellationToken,
    ) -> Result<RunSummary> {
        let remote = self.config.storage.remote.as_str();
        let remote_dir = self.config.remote_dir(job.container());

        self.stage(
            PipelineStage::SnapshotCreated,
            set,
            report,
            cancel,
            self.runtime.snapshot(job.container(), job.snapshot_label()),
        )
        .await?;

        self.stage(
            PipelineStage::ImagePublished,
            set,
            report,
            cancel,
            self.runtime
                .publish(job.container(), job.snapshot_label(), job.image_alias()),
        )
        .await?;

        let archive = self
            .stage(
                PipelineStage::ImageExported,
                set,
                report,
                cancel,
                self.export(job),
            )
            .await?;

        self.stage(
            PipelineStage::RemoteDirReady,
            set,
            report,
            cancel,
            self.storage.ensure_remote_directory(remote, &remote_dir),
        )
        .await?;

        self.stage(
            PipelineStage::Uploaded,
            set,
            report,
            cancel,
            self.upload(&archive, remote, &remote_dir),
        )
        .await?;

        Ok(RunSummary {
            remote: remote.to_string(),
            remote_dir,
            archive: archive.file_name,
            archive_bytes: archive.bytes,
        })
    }

    /// Enter `stage` by awaiting `action`, unless the run is interrupted first.
    /// Stages that run to completion are not abandoned midway.
    async fn stage<T, F>(
        &self,
        stage: PipelineStage,
        set: &mut CleanupSet,
        report: &RunReport,
        cancel: &CancellationToken,
        action: F,
    ) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, CommandError>>,
    {
        if cancel.is_cancelled() {
            return Err(BackupError::Interrupted(stage));
        }

        set.include(stage);
        info!("Starting: {}", stage);

        let result = if stage.runs_to_completion() {
            let result = action.await;
            if cancel.is_cancelled() {
                warn!("Interrupted during {}, waited for it to finish", stage);
            }
            result
        } else {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(BackupError::Interrupted(stage)),
                result = action => result,
            }
        };

        match result {
            Ok(value) => {
                report.ok(&format!("Done: {}", stage));
                Ok(value)
            }
            Err(e) => {
                report.fail(&format!("FAILED: {}: {}", stage, e));
                Err(BackupError::stage(stage, e))
            }
        }
    }

    /// Export the image and find the single archive it wrote.
    async fn export(&self, job: &BackupJob) -> std::result::Result<ExportedArchive, CommandError> {
        self.runtime
            .export_image(job.image_alias(), &job.export_target())
            .await?;

        let path = match job.exported_files().await?.as_slice() {
            [single] => single.clone(),
            [] => {
                return Err(CommandError::Verification(format!(
                    "export reported success but no {}.* archive was produced in {}",
                    job.name(),
                    job.work_dir().display()
                )))
            }
            several => {
                // Split images (metadata + rootfs) are not a single archive
                return Err(CommandError::Verification(format!(
                    "export produced {} files instead of one archive: {}",
                    several.len(),
                    several
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )));
            }
        };

        let meta = tokio::fs::metadata(&path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Exported {} ({} bytes)", file_name, meta.len());
        Ok(ExportedArchive {
            path,
            file_name,
            bytes: meta.len(),
        })
    }

    /// Upload the archive, then compare remote and local sizes when
    /// verification is enabled.
    async fn upload(
        &self,
        archive: &ExportedArchive,
        remote: &str,
        remote_dir: &str,
    ) -> std::result::Result<(), CommandError> {
        self.storage
            .upload_file(&archive.path, remote, remote_dir)
            .await?;

        if !self.config.storage.verify_upload {
            return Ok(());
        }

        let file_name = archive.file_name.as_str();
        let local_bytes = archive.bytes;
        match self
            .storage
            .remote_file(remote, remote_dir, file_name)
            .await?
            .map(|found| found.size)
        {
            Some(Some(size)) if size == local_bytes => {
                info!("Verified {} on {}:{} ({} bytes)", file_name, remote, remote_dir, size);
                Ok(())
            }
            Some(Some(size)) => Err(CommandError::Verification(format!(
                "remote {} is {} bytes, local archive is {} bytes",
                file_name, size, local_bytes
            ))),
            Some(None) => {
                warn!(
                    "{} is present on {}:{} but the remote does not report its size, size not checked",
                    file_name, remote, remote_dir
                );
                Ok(())
            }
            None => Err(CommandError::Verification(format!(
                "{} not found on {}:{} after upload",
                file_name, remote, remote_dir
            ))),
        }
    }

    /// Upload the report file next to the archive and remove it locally.
    /// Never affects the run outcome.
    async fn ship_report(&self, job: &BackupJob, report: &RunReport, interrupted: bool) {
        let Some(path) = report.path() else {
            return;
        };
        if let Err(e) = report.close() {
            report.warn(&format!("Could not flush report {}: {}", path.display(), e));
        }
        if interrupted {
            report.warn(&format!("Report kept at {}", path.display()));
            return;
        }

        let remote = self.config.storage.remote.as_str();
        let remote_dir = self.config.remote_dir(job.container());
        let shipped = match self.storage.ensure_remote_directory(remote, &remote_dir).await {
            Ok(()) => self.storage.upload_file(&path, remote, &remote_dir).await,
            Err(e) => Err(e),
        };

        match shipped {
            Ok(()) => {
                info!("Report uploaded to {}:{}", remote, remote_dir);
                if let Err(e) = report.remove_file() {
                    report.warn(&format!("Could not remove report {}: {}", path.display(), e));
                }
            }
            Err(e) => report.warn(&format!(
                "Report upload failed ({}), kept at {}",
                e,
                path.display()
            )),
        }
    }
}
