//! Pipeline stages, in the order they are entered.

use std::fmt;

/// A point in the backup pipeline. Each variant names the state reached once
/// the corresponding collaborator call succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PipelineStage {
    Preflight,
    SnapshotCreated,
    ImagePublished,
    ImageExported,
    RemoteDirReady,
    Uploaded,
}

impl PipelineStage {
    /// Stages after preflight, in execution order.
    pub const MUTATING: [PipelineStage; 5] = [
        PipelineStage::SnapshotCreated,
        PipelineStage::ImagePublished,
        PipelineStage::ImageExported,
        PipelineStage::RemoteDirReady,
        PipelineStage::Uploaded,
    ];

    pub fn next(self) -> Option<PipelineStage> {
        match self {
            PipelineStage::Preflight => Some(PipelineStage::SnapshotCreated),
            PipelineStage::SnapshotCreated => Some(PipelineStage::ImagePublished),
            PipelineStage::ImagePublished => Some(PipelineStage::ImageExported),
            PipelineStage::ImageExported => Some(PipelineStage::RemoteDirReady),
            PipelineStage::RemoteDirReady => Some(PipelineStage::Uploaded),
            PipelineStage::Uploaded => None,
        }
    }

    /// Stages whose work runs inside the LXD daemon. Killing the client does
    /// not stop the operation, so once started they are awaited even when the
    /// run is interrupted; otherwise the artifact could appear after cleanup.
    pub fn runs_to_completion(self) -> bool {
        matches!(
            self,
            PipelineStage::SnapshotCreated | PipelineStage::ImagePublished
        )
    }

    /// Human-readable action performed to reach this stage.
    pub fn action(self) -> &'static str {
        match self {
            PipelineStage::Preflight => "preflight",
            PipelineStage::SnapshotCreated => "create snapshot",
            PipelineStage::ImagePublished => "publish image",
            PipelineStage::ImageExported => "export image",
            PipelineStage::RemoteDirReady => "prepare remote directory",
            PipelineStage::Uploaded => "upload archive",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action())
    }
}
