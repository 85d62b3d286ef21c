//! Custom error types for the backup tool.

use crate::executor::stage::PipelineStage;
use thiserror::Error;

/// Failure reported by an external collaborator (`lxc`, `rclone`).
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("{program} not found or not executable")]
    ToolMissing { program: String },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected output: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Verification(String),
}

/// Orchestrator-level failure, one variant per class of outcome.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backup did not start: {0}")]
    Precondition(String),

    #[error("{stage} failed: {reason}")]
    Stage {
        stage: PipelineStage,
        reason: String,
    },

    #[error("Interrupted while entering {0}")]
    Interrupted(PipelineStage),
}

impl BackupError {
    pub fn stage(stage: PipelineStage, err: impl std::fmt::Display) -> Self {
        BackupError::Stage {
            stage,
            reason: err.to_string(),
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            BackupError::Stage { .. } => 1,
            BackupError::Config(_) | BackupError::Precondition(_) => 2,
            BackupError::Interrupted(_) => 130,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
