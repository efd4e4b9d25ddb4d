//! Host process executor
//!
//! Runs wrapper scripts through `/bin/bash` with piped stdio, reports the
//! process identity through the start notification, and enforces the
//! per-task timeout on the completion wait. Process-table queries go through
//! `sysinfo`.

use crate::error::ExecError;
use crate::exec_trait::{KillResult, ProcessStarted, ScriptExecutor, ScriptOutcome};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{Pid, PidExt, ProcessExt, System, SystemExt};
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::debug;

/// Shell used to launch wrapper scripts.
const SHELL: &str = "/bin/bash";

/// Upper bound per captured stream so status objects stay small.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

/// Executes scripts as real host processes.
#[derive(Debug, Clone, Default)]
pub struct HostExecutor;

impl HostExecutor {
    /// Creates a new executor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ScriptExecutor for HostExecutor {
    async fn start_script(
        &self,
        script: PathBuf,
        timeout: Duration,
        started: oneshot::Sender<ProcessStarted>,
    ) -> Result<ScriptOutcome, ExecError> {
        let command_line = format!("{SHELL} {}", script.display());

        let child = Command::new(SHELL)
            .arg(&script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Abandoning the wait (timeout below) must not leak the child
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;

        if let Some(pid) = child.id() {
            debug!(pid, %command_line, "script process started");
            // Receiver may already be gone if the caller stopped waiting
            let _ = started.send(ProcessStarted { pid, command_line });
        }

        match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(ScriptOutcome::Completed {
                // None means the process died to a signal
                exit_code: output.status.code().unwrap_or(-1),
                stdout: capture_lossy(&output.stdout),
                stderr: capture_lossy(&output.stderr),
            }),
            Ok(Err(e)) => Err(ExecError::Io(e)),
            Err(_) => {
                debug!(script = %script.display(), "script wait timed out");
                Ok(ScriptOutcome::TimedOut)
            }
        }
    }

    fn find_process(&self, pid: u32) -> Option<String> {
        let mut sys = System::new();
        let pid = Pid::from_u32(pid);
        if !sys.refresh_process(pid) {
            return None;
        }
        sys.process(pid).map(|p| p.cmd().join(" "))
    }

    fn kill_verified(&self, pid: u32, command_line: &str) -> KillResult {
        let mut sys = System::new();
        let sys_pid = Pid::from_u32(pid);
        if !sys.refresh_process(sys_pid) {
            return KillResult::NoSuchProcess;
        }
        let Some(process) = sys.process(sys_pid) else {
            return KillResult::NoSuchProcess;
        };

        // Pid reuse defense: the numeric id alone proves nothing
        let actual = process.cmd().join(" ");
        if actual != command_line {
            return KillResult::CommandLineMismatch { actual };
        }

        if process.kill() {
            KillResult::Killed
        } else {
            KillResult::SignalFailed(format!("kill signal to pid {pid} was not delivered"))
        }
    }
}

/// Lossy-UTF8 conversion bounded to the capture limit, cut on a char
/// boundary.
fn capture_lossy(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= MAX_CAPTURE_BYTES {
        return text.into_owned();
    }
    let mut end = MAX_CAPTURE_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = text[..end].to_string();
    truncated.push_str("\n[truncated]");
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("task.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/bash\n{body}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_start_script_reports_pid_and_exit_code() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "exit 3");
        let executor = HostExecutor::new();

        let (tx, rx) = oneshot::channel();
        let outcome = executor
            .start_script(script, Duration::from_secs(30), tx)
            .await
            .unwrap();

        let started = rx.await.unwrap();
        assert!(started.pid > 0);
        assert!(started.command_line.starts_with(SHELL));
        match outcome {
            ScriptOutcome::Completed { exit_code, .. } => assert_eq!(exit_code, 3),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_script_captures_output() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "echo out; echo err >&2");
        let executor = HostExecutor::new();

        let (tx, _rx) = oneshot::channel();
        let outcome = executor
            .start_script(script, Duration::from_secs(30), tx)
            .await
            .unwrap();

        match outcome {
            ScriptOutcome::Completed {
                exit_code,
                stdout,
                stderr,
            } => {
                assert_eq!(exit_code, 0);
                assert_eq!(stdout.trim(), "out");
                assert_eq!(stderr.trim(), "err");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_start_script_times_out() {
        let tmp = tempfile::tempdir().unwrap();
        let script = write_script(tmp.path(), "sleep 60");
        let executor = HostExecutor::new();

        let (tx, _rx) = oneshot::channel();
        let outcome = executor
            .start_script(script, Duration::from_millis(200), tx)
            .await
            .unwrap();

        assert_eq!(outcome, ScriptOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_start_script_missing_script_fails() {
        let executor = HostExecutor::new();
        let (tx, _rx) = oneshot::channel();
        // bash itself spawns fine; a missing script path makes it exit 127
        let outcome = executor
            .start_script(
                PathBuf::from("/definitely/not/a/script.sh"),
                Duration::from_secs(5),
                tx,
            )
            .await
            .unwrap();
        match outcome {
            ScriptOutcome::Completed { exit_code, .. } => assert_ne!(exit_code, 0),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_find_process_sees_self() {
        let executor = HostExecutor::new();
        let cmdline = executor.find_process(std::process::id());
        assert!(cmdline.is_some());
    }

    #[test]
    fn test_kill_verified_no_such_process() {
        let executor = HostExecutor::new();
        // Far above the default pid_max
        assert_eq!(
            executor.kill_verified(3_999_999, "whatever"),
            KillResult::NoSuchProcess
        );
    }

    #[test]
    fn test_kill_verified_command_line_mismatch() {
        let executor = HostExecutor::new();
        // Our own pid is live but its command line is not this
        let result = executor.kill_verified(std::process::id(), "/bin/bash /no/such/task.sh");
        assert!(matches!(result, KillResult::CommandLineMismatch { .. }));
    }

    #[test]
    fn test_capture_lossy_truncates() {
        let big = vec![b'a'; MAX_CAPTURE_BYTES + 10];
        let text = capture_lossy(&big);
        assert!(text.len() < big.len());
        assert!(text.ends_with("[truncated]"));

        let small = capture_lossy(b"hello");
        assert_eq!(small, "hello");
    }
}
