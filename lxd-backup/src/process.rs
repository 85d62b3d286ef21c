//! Thin wrapper around external command-line tools.
//!
//! Children are killed when their future is dropped, so a stage abandoned on
//! interrupt does not leave a stray `lxc` or `rclone` process behind.

use crate::utils::CommandError;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct Tool {
    binary: PathBuf,
}

impl Tool {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn program(&self) -> String {
        self.binary.display().to_string()
    }

    /// Run the tool to completion and return its stdout.
    pub async fn output<I, S>(&self, args: I) -> Result<String, CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        debug!(
            "exec: {} {}",
            self.program(),
            args.iter()
                .map(|a| a.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        );

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound | ErrorKind::PermissionDenied => CommandError::ToolMissing {
                    program: self.program(),
                },
                _ => CommandError::Io(e),
            })?;

        if !output.status.success() {
            let status = match output.status.code() {
                Some(code) => format!("status {}", code),
                None => "signal".to_string(),
            };
            return Err(CommandError::Failed {
                program: self.program(),
                status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run the tool and discard its output.
    pub async fn run<I, S>(&self, args: I) -> Result<(), CommandError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.output(args).await.map(|_| ())
    }
}
