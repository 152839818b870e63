//! Process plumbing shared by the external programs the engine drives.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to launch '{tool}': {source}")]
    Launch {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error while running '{tool}': {source}")]
    Io {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("'{tool}' exited with {status}")]
    Failed { tool: String, status: ExitStatus },

    #[error("'{tool}' produced unusable output: {reason}")]
    MalformedOutput { tool: String, reason: String },
}

/// Outcome of one external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolRun {
    pub success: bool,
    /// The result file the caller asked for, if the program left one behind.
    pub artifact: Option<PathBuf>,
}

impl ToolRun {
    pub fn converged(&self) -> bool {
        self.artifact.is_some()
    }
}

/// Makes a binary given as a path absolute, so it still resolves from a
/// child's working directory. Bare names are left for `PATH` lookup.
pub fn resolve_binary(binary: PathBuf) -> PathBuf {
    if binary.components().count() < 2 {
        return binary;
    }
    std::path::absolute(&binary).unwrap_or(binary)
}

pub(crate) fn tool_name(binary: &Path) -> String {
    binary
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| binary.display().to_string())
}

/// Checks that `binary` can be started at all.
///
/// Only a failure to spawn counts; the check's exit status and output are ignored.
pub fn preflight(binary: &Path, check_arg: &str) -> Result<(), ToolError> {
    let tool = tool_name(binary);
    let status = Command::new(binary)
        .arg(check_arg)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map_err(|source| ToolError::Launch {
            tool: tool.clone(),
            source,
        })?;
    debug!(tool = %tool, %status, "Preflight check passed");
    Ok(())
}

/// Opens `path` for writing and returns two handles to it, for stdout and stderr.
pub(crate) fn log_handles(tool: &str, path: &Path) -> Result<(Stdio, Stdio), ToolError> {
    let io_err = |source| ToolError::Io {
        tool: tool.to_string(),
        source,
    };
    let log = File::create(path).map_err(io_err)?;
    let err = log.try_clone().map_err(io_err)?;
    Ok((Stdio::from(log), Stdio::from(err)))
}

pub(crate) fn run(tool: &str, command: &mut Command) -> Result<ExitStatus, ToolError> {
    debug!(tool = %tool, ?command, "Running external tool");
    command.status().map_err(|source| ToolError::Launch {
        tool: tool.to_string(),
        source,
    })
}

/// `path` as seen from a child process started in `work_dir`.
pub(crate) fn relative_to<'p>(work_dir: &Path, path: &'p Path) -> &'p Path {
    path.strip_prefix(work_dir).unwrap_or(path)
}

/// Returns `path` if the file exists.
pub(crate) fn artifact(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}
