//! Compensating cleanup.
//!
//! Runs after every pipeline outcome: success, stage failure or interrupt.
//! Each step first checks that its artifact still exists, so running the
//! aggregate twice, or on artifacts that were never created, is harmless.
//! Step failures are reported and never stop the remaining steps.

use super::report::RunReport;
use super::stage::PipelineStage;
use crate::job::BackupJob;
use crate::runtime::ContainerRuntime;
use std::io::ErrorKind;
use tracing::info;

/// Artifacts the pipeline may have created so far.
///
/// An artifact is included as soon as the stage producing it is attempted, so
/// a half-finished runtime call is still cleaned up.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupSet {
    snapshot: bool,
    image: bool,
    archive: bool,
}

impl CleanupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the artifact produced by entering `stage`.
    pub fn include(&mut self, stage: PipelineStage) {
        match stage {
            PipelineStage::SnapshotCreated => self.snapshot = true,
            PipelineStage::ImagePublished => self.image = true,
            PipelineStage::ImageExported => self.archive = true,
            PipelineStage::Preflight
            | PipelineStage::RemoteDirReady
            | PipelineStage::Uploaded => {}
        }
    }

    pub fn snapshot(&self) -> bool {
        self.snapshot
    }

    pub fn image(&self) -> bool {
        self.image
    }

    pub fn archive(&self) -> bool {
        self.archive
    }

    pub fn is_empty(&self) -> bool {
        !(self.snapshot || self.image || self.archive)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// Artifact not in the cleanup set.
    NotApplicable,
    AlreadyAbsent,
    Removed,
    Failed(String),
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub snapshot: StepOutcome,
    pub image: StepOutcome,
    pub archive: StepOutcome,
}

impl CleanupOutcome {
    pub fn is_clean(&self) -> bool {
        self.snapshot.is_success() && self.image.is_success() && self.archive.is_success()
    }
}

/// Remove every artifact in `set`. Always attempts all three steps.
pub async fn run_cleanup<R: ContainerRuntime>(
    runtime: &R,
    job: &BackupJob,
    set: &CleanupSet,
    report: &RunReport,
) -> CleanupOutcome {
    if set.is_empty() {
        info!("Cleanup: nothing was created");
    }

    let snapshot = if set.snapshot() {
        remove_snapshot(runtime, job).await
    } else {
        StepOutcome::NotApplicable
    };
    log_step(report, "snapshot", job.snapshot_label(), &snapshot);

    let image = if set.image() {
        remove_image(runtime, job).await
    } else {
        StepOutcome::NotApplicable
    };
    log_step(report, "image", job.image_alias(), &image);

    let archive = if set.archive() {
        remove_archive(job).await
    } else {
        StepOutcome::NotApplicable
    };
    log_step(
        report,
        "archive",
        &format!("{}.*", job.export_target().display()),
        &archive,
    );

    CleanupOutcome {
        snapshot,
        image,
        archive,
    }
}

async fn remove_snapshot<R: ContainerRuntime>(runtime: &R, job: &BackupJob) -> StepOutcome {
    match runtime
        .container_has_snapshot(job.container(), job.snapshot_label())
        .await
    {
        Ok(false) => StepOutcome::AlreadyAbsent,
        Ok(true) => match runtime
            .delete_snapshot(job.container(), job.snapshot_label())
            .await
        {
            Ok(()) => StepOutcome::Removed,
            Err(e) => StepOutcome::Failed(e.to_string()),
        },
        Err(e) => StepOutcome::Failed(format!("snapshot lookup failed: {}", e)),
    }
}

async fn remove_image<R: ContainerRuntime>(runtime: &R, job: &BackupJob) -> StepOutcome {
    match runtime.image_exists(job.image_alias()).await {
        Ok(false) => StepOutcome::AlreadyAbsent,
        Ok(true) => match runtime.delete_image(job.image_alias()).await {
            Ok(()) => StepOutcome::Removed,
            Err(e) => StepOutcome::Failed(e.to_string()),
        },
        Err(e) => StepOutcome::Failed(format!("image lookup failed: {}", e)),
    }
}

/// Remove whatever the export wrote, whichever extension it used.
async fn remove_archive(job: &BackupJob) -> StepOutcome {
    let files = match job.exported_files().await {
        Ok(files) => files,
        Err(e) => return StepOutcome::Failed(format!("archive lookup failed: {}", e)),
    };

    let mut removed = false;
    let mut failures = Vec::new();
    for file in &files {
        match tokio::fs::remove_file(file).await {
            Ok(()) => removed = true,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => failures.push(format!("{}: {}", file.display(), e)),
        }
    }

    if !failures.is_empty() {
        StepOutcome::Failed(failures.join("; "))
    } else if removed {
        StepOutcome::Removed
    } else {
        StepOutcome::AlreadyAbsent
    }
}

fn log_step(report: &RunReport, what: &str, name: &str, outcome: &StepOutcome) {
    match outcome {
        StepOutcome::NotApplicable => {}
        StepOutcome::AlreadyAbsent => {
            report.ok(&format!("Cleanup: {} {} already absent", what, name));
        }
        StepOutcome::Removed => {
            report.ok(&format!("Cleanup: removed {} {}", what, name));
        }
        StepOutcome::Failed(reason) => {
            report.fail(&format!(
                "Cleanup: could not remove {} {}: {}",
                what, name, reason
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::fakes::{Call, FakeRuntime};
    use crate::job::naming::NamingScheme;
    use crate::job::Timestamp;
    use chrono::{Local, TimeZone};
    use tempfile::TempDir;

    fn job(dir: &TempDir) -> BackupJob {
        let ts = Timestamp::capture(Local.with_ymd_and_hms(2026, 10, 16, 3, 0, 0).unwrap());
        BackupJob::new("web01", ts, None, dir.path(), NamingScheme::Plain)
    }

    fn archive(job: &BackupJob, extension: &str) -> std::path::PathBuf {
        job.work_dir().join(format!("{}.{}", job.name(), extension))
    }

    fn full_set() -> CleanupSet {
        let mut set = CleanupSet::new();
        for stage in PipelineStage::MUTATING {
            set.include(stage);
        }
        set
    }

    #[test]
    fn test_set_tracks_stages() {
        let mut set = CleanupSet::new();
        assert!(set.is_empty());
        set.include(PipelineStage::SnapshotCreated);
        assert!(set.snapshot() && !set.image() && !set.archive());
        set.include(PipelineStage::RemoteDirReady);
        assert!(!set.image() && !set.archive());
        assert_eq!(full_set(), {
            let mut s = set;
            s.include(PipelineStage::ImagePublished);
            s.include(PipelineStage::ImageExported);
            s
        });
    }

    #[tokio::test]
    async fn test_removes_everything_created() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let job = job(&dir);
        let runtime = FakeRuntime::new(["web01"]);
        runtime.add_snapshot("web01", job.snapshot_label());
        runtime.add_image(job.image_alias());
        std::fs::write(archive(&job, "tar.gz"), b"archive")?;

        let outcome = run_cleanup(&runtime, &job, &full_set(), &RunReport::new()).await;

        assert_eq!(outcome.snapshot, StepOutcome::Removed);
        assert_eq!(outcome.image, StepOutcome::Removed);
        assert_eq!(outcome.archive, StepOutcome::Removed);
        assert!(!archive(&job, "tar.gz").exists());
        assert!(!runtime.has_snapshot("web01", job.snapshot_label()));
        Ok(())
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let job = job(&dir);
        let runtime = FakeRuntime::new(["web01"]);
        runtime.add_snapshot("web01", job.snapshot_label());
        runtime.add_image(job.image_alias());
        std::fs::write(archive(&job, "tar.gz"), b"archive")?;
        let report = RunReport::new();

        let first = run_cleanup(&runtime, &job, &full_set(), &report).await;
        let second = run_cleanup(&runtime, &job, &full_set(), &report).await;

        assert!(first.is_clean());
        assert!(second.is_clean());
        assert_eq!(second.snapshot, StepOutcome::AlreadyAbsent);
        assert_eq!(second.image, StepOutcome::AlreadyAbsent);
        assert_eq!(second.archive, StepOutcome::AlreadyAbsent);
        assert_eq!(runtime.mutations().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_later_steps() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let job = job(&dir);
        let runtime = FakeRuntime::new(["web01"]);
        runtime.add_snapshot("web01", job.snapshot_label());
        runtime.add_image(job.image_alias());
        runtime.fail_on(Call::DeleteSnapshot);
        std::fs::write(archive(&job, "tar.gz"), b"archive")?;
        let report = RunReport::new();

        let outcome = run_cleanup(&runtime, &job, &full_set(), &report).await;

        assert!(matches!(outcome.snapshot, StepOutcome::Failed(_)));
        assert_eq!(outcome.image, StepOutcome::Removed);
        assert_eq!(outcome.archive, StepOutcome::Removed);
        assert!(!outcome.is_clean());
        assert!(report
            .lines()
            .iter()
            .any(|l| l.contains("[FAIL] Cleanup: could not remove snapshot")));
        Ok(())
    }

    #[tokio::test]
    async fn test_only_touches_included_artifacts() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let job = job(&dir);
        let runtime = FakeRuntime::new(["web01"]);
        runtime.add_snapshot("web01", job.snapshot_label());
        runtime.add_image(job.image_alias());
        std::fs::write(archive(&job, "tar.gz"), b"archive")?;

        let mut set = CleanupSet::new();
        set.include(PipelineStage::SnapshotCreated);
        let outcome = run_cleanup(&runtime, &job, &set, &RunReport::new()).await;

        assert_eq!(outcome.snapshot, StepOutcome::Removed);
        assert_eq!(outcome.image, StepOutcome::NotApplicable);
        assert_eq!(outcome.archive, StepOutcome::NotApplicable);
        assert_eq!(runtime.mutations(), vec![Call::DeleteSnapshot]);
        assert!(archive(&job, "tar.gz").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_removes_archive_of_any_compression() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        let job = job(&dir);
        let runtime = FakeRuntime::new(["web01"]);
        std::fs::write(archive(&job, "tar.zst"), b"archive")?;
        std::fs::write(job.report_path(), b"report")?;

        let mut set = CleanupSet::new();
        set.include(PipelineStage::ImageExported);
        let outcome = run_cleanup(&runtime, &job, &set, &RunReport::new()).await;

        assert_eq!(outcome.archive, StepOutcome::Removed);
        assert!(!archive(&job, "tar.zst").exists());
        assert!(job.report_path().exists());
        Ok(())
    }
}
