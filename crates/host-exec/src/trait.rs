//! ScriptExecutor trait for mocking
//!
//! This trait abstracts host process execution so the reconciler can be
//! unit-tested without launching real processes. The concrete `HostExecutor`
//! implements it; tests use `MockExecutor` (feature `test-util`).

use crate::error::ExecError;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::oneshot;

/// Identity of a freshly launched script process, delivered through the
/// start notification as soon as the OS process exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStarted {
    /// OS process id
    pub pid: u32,
    /// Exact command line used to launch the script
    pub command_line: String,
}

/// How a launched script ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOutcome {
    /// Process exited on its own within the timeout
    Completed {
        /// Process exit code; -1 when the process died to a signal
        exit_code: i32,
        /// Captured stdout, lossy UTF-8, truncated to the capture limit
        stdout: String,
        /// Captured stderr, lossy UTF-8, truncated to the capture limit
        stderr: String,
    },
    /// The wait exceeded the timeout; the child was killed best-effort
    TimedOut,
}

/// Result of a verified kill attempt.
///
/// Killing is a no-op unless the live process at the recorded pid also has
/// the recorded command line, which defends against pid reuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillResult {
    /// Signal delivered
    Killed,
    /// No process at the recorded pid
    NoSuchProcess,
    /// A process exists at the pid but its command line differs
    CommandLineMismatch {
        /// The live command line that was found instead
        actual: String,
    },
    /// Identity matched but signal delivery failed
    SignalFailed(String),
}

/// Host process execution operations.
///
/// All async methods must be `Send` to work with Tokio's work-stealing
/// runtime.
#[async_trait::async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Launches `bash <script>` and waits for it to finish.
    ///
    /// `started` resolves with the pid and command line as soon as the OS
    /// process exists; callers apply their own bounded wait on the receiver
    /// and must tolerate it never resolving. The returned future completes
    /// with the script outcome, bounded by `timeout`.
    async fn start_script(
        &self,
        script: PathBuf,
        timeout: Duration,
        started: oneshot::Sender<ProcessStarted>,
    ) -> Result<ScriptOutcome, ExecError>;

    /// Live command line of the process at `pid`, if one exists.
    fn find_process(&self, pid: u32) -> Option<String>;

    /// Sends SIGKILL to `pid` only when its live command line equals
    /// `command_line` exactly.
    fn kill_verified(&self, pid: u32, command_line: &str) -> KillResult;
}
