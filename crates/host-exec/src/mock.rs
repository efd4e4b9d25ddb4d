//! Mock ScriptExecutor for unit testing
//!
//! Stores a fake process table in memory and lets tests script the outcome
//! of each launch, so reconciler logic can be exercised without real
//! processes.

use crate::error::ExecError;
use crate::exec_trait::{KillResult, ProcessStarted, ScriptExecutor, ScriptOutcome};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct MockState {
    next_pid: u32,
    outcomes: VecDeque<ScriptOutcome>,
    started: Vec<PathBuf>,
    processes: HashMap<u32, String>,
    killed: Vec<u32>,
    fail_next_spawn: bool,
}

/// Mock executor for testing
///
/// Launches are recorded, outcomes are scripted with [`push_outcome`], and
/// the process table is seeded with [`add_process`] for kill tests.
///
/// [`push_outcome`]: MockExecutor::push_outcome
/// [`add_process`]: MockExecutor::add_process
#[derive(Debug, Clone, Default)]
pub struct MockExecutor {
    state: Arc<Mutex<MockState>>,
}

impl MockExecutor {
    /// Creates an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the outcome for the next launch. Launches beyond the queue
    /// complete successfully with exit code 0.
    pub fn push_outcome(&self, outcome: ScriptOutcome) {
        self.state.lock().unwrap().outcomes.push_back(outcome);
    }

    /// Makes the next launch fail as if the process could not be spawned.
    pub fn fail_next_spawn(&self) {
        self.state.lock().unwrap().fail_next_spawn = true;
    }

    /// Seeds the fake process table.
    pub fn add_process(&self, pid: u32, command_line: impl Into<String>) {
        self.state
            .lock()
            .unwrap()
            .processes
            .insert(pid, command_line.into());
    }

    /// Scripts launched so far, in order.
    #[must_use]
    pub fn started_scripts(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().started.clone()
    }

    /// Pids that received a verified kill, in order.
    #[must_use]
    pub fn killed_pids(&self) -> Vec<u32> {
        self.state.lock().unwrap().killed.clone()
    }
}

#[async_trait::async_trait]
impl ScriptExecutor for MockExecutor {
    async fn start_script(
        &self,
        script: PathBuf,
        _timeout: Duration,
        started: oneshot::Sender<ProcessStarted>,
    ) -> Result<ScriptOutcome, ExecError> {
        let (pid, command_line, outcome) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_next_spawn {
                state.fail_next_spawn = false;
                return Err(ExecError::Spawn(std::io::Error::other(
                    "mock spawn failure",
                )));
            }
            state.next_pid += 1;
            let pid = state.next_pid;
            let command_line = format!("/bin/bash {}", script.display());
            state.processes.insert(pid, command_line.clone());
            state.started.push(script);
            let outcome = state
                .outcomes
                .pop_front()
                .unwrap_or(ScriptOutcome::Completed {
                    exit_code: 0,
                    stdout: String::new(),
                    stderr: String::new(),
                });
            (pid, command_line, outcome)
        };

        let _ = started.send(ProcessStarted { pid, command_line });

        // The fake process leaves the table once its outcome is delivered
        if matches!(outcome, ScriptOutcome::Completed { .. }) {
            self.state.lock().unwrap().processes.remove(&pid);
        }
        Ok(outcome)
    }

    fn find_process(&self, pid: u32) -> Option<String> {
        self.state.lock().unwrap().processes.get(&pid).cloned()
    }

    fn kill_verified(&self, pid: u32, command_line: &str) -> KillResult {
        let mut state = self.state.lock().unwrap();
        let Some(actual) = state.processes.get(&pid).cloned() else {
            return KillResult::NoSuchProcess;
        };
        if actual != command_line {
            return KillResult::CommandLineMismatch { actual };
        }
        state.processes.remove(&pid);
        state.killed.push(pid);
        KillResult::Killed
    }
}
