//! Per-run report.
//!
//! Every pipeline line goes to the tracing subscriber and is kept in memory.
//! Once the artifact name is known a report file can be attached; it receives
//! the backlog and all later lines so it can be shipped next to the archive.

use chrono::Local;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Ok,
    Fail,
    Warn,
}

impl Tag {
    fn as_str(self) -> &'static str {
        match self {
            Tag::Ok => "OK",
            Tag::Fail => "FAIL",
            Tag::Warn => "WARN",
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    lines: Vec<String>,
    path: Option<PathBuf>,
    file: Option<File>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    inner: Mutex<Inner>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Mirror the report to `path`, writing a header and every line recorded
    /// so far.
    pub fn attach_file(&self, path: impl Into<PathBuf>) -> std::io::Result<()> {
        let path = path.into();
        let mut file = File::create(&path)?;
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        writeln!(file, "lxd-backup v{} on {}", env!("CARGO_PKG_VERSION"), host)?;

        let mut inner = self.lock();
        for line in &inner.lines {
            writeln!(file, "{}", line)?;
        }
        inner.path = Some(path);
        inner.file = Some(file);
        Ok(())
    }

    /// Path of the attached report file, if any.
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().path.clone()
    }

    pub fn record(&self, tag: Tag, message: &str) {
        let line = format!(
            "{} [{}] {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            tag.as_str(),
            message
        );

        let mut inner = self.lock();
        if let Some(file) = inner.file.as_mut() {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Report file write failed, continuing without it: {}", e);
                inner.file = None;
            }
        }
        inner.lines.push(line);
    }

    pub fn ok(&self, message: &str) {
        info!("{}", message);
        self.record(Tag::Ok, message);
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", message);
        self.record(Tag::Warn, message);
    }

    pub fn fail(&self, message: &str) {
        error!("{}", message);
        self.record(Tag::Fail, message);
    }

    /// Lines recorded so far.
    pub fn lines(&self) -> Vec<String> {
        self.lock().lines.clone()
    }

    /// Flush and close the report file. Later lines stay in memory only.
    pub fn close(&self) -> std::io::Result<()> {
        let mut inner = self.lock();
        if let Some(mut file) = inner.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }

    /// Remove the report file from disk.
    pub fn remove_file(&self) -> std::io::Result<()> {
        self.close()?;
        if let Some(path) = self.lock().path.take() {
            remove_if_present(&path)?;
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
