//! Execution error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from script execution and the on-disk task workspace.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The script process could not be started at all
    #[error("Failed to spawn script process: {0}")]
    Spawn(#[source] std::io::Error),

    /// I/O failure while waiting on or reading from the process
    #[error("Script I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem failure in the task workspace
    #[error("Task workspace error at {path}: {source}")]
    Workspace {
        /// Path the operation touched
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },
}
