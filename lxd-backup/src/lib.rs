//! LXD container backup
//!
//! Snapshots a container, publishes the snapshot as an image, exports the
//! image to a local archive and uploads it to object storage, cleaning up the
//! intermediate artifacts whatever the outcome.

pub mod config;
pub mod executor;
pub mod job;
pub mod process;
pub mod runtime;
pub mod shutdown;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{Orchestrator, RunOutcome};
pub use utils::errors::{BackupError, CommandError};
