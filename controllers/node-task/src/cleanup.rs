//! Idle cleanup sweep
//!
//! The periodic sweep is the authoritative garbage-collection path: it
//! detects orphaned and timed-out Running tasks, deletes terminal tasks
//! whose retention window has elapsed, and reclaims on-disk script
//! directories that no known task references. The event-driven reconcile
//! path defers all of this to the sweep so there is exactly one deleter.

use crate::error::ControllerError;
use crate::reconciler::{Reconciler, apply_status_patch, delete_task};
use chrono::{DateTime, Utc};
use crds::{ABORTED_EXIT_CODE, NodeTask, NodeTaskPhase, NodeTaskStatusPatch};
use host_exec::{KillResult, ScriptExecutor};
use kube::api::ListParams;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// What the sweep does with one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepAction {
    /// Running task recorded against a different agent: kill and mark
    MarkOrphaned,
    /// Running task past its timeout budget: kill and mark
    MarkTimeout,
    /// Terminal task past its retention window: delete
    Delete,
    /// Nothing to do this tick
    Keep,
}

/// Decides the sweep action for one task. Pure so retention and orphan
/// boundaries are testable without an API server.
pub fn sweep_action(task: &NodeTask, agent_id: &str, now: DateTime<Utc>) -> SweepAction {
    let Some(status) = task.status.as_ref() else {
        return SweepAction::Keep;
    };

    match status.phase {
        NodeTaskPhase::Running => {
            // A Running task recorded against another identity means its
            // executor died or was superseded; it is never silently adopted
            if status.agent_id.as_deref() != Some(agent_id) {
                return SweepAction::MarkOrphaned;
            }
            if let Some(start) = status.start_timestamp {
                if now - start >= task.timeout() {
                    return SweepAction::MarkTimeout;
                }
            }
            SweepAction::Keep
        }
        phase if phase.is_terminal() => match status.finish_timestamp {
            Some(finish) if now - finish >= task.retention() => SweepAction::Delete,
            Some(_) => SweepAction::Keep,
            // Terminal without a finish timestamp was not written by this
            // controller; expired by definition
            None => SweepAction::Delete,
        },
        // New/Pending belong to the event-driven path
        _ => SweepAction::Keep,
    }
}

/// Script directories on disk whose names no known task references.
pub fn orphan_run_dirs(known_run_ids: &HashSet<String>, on_disk: Vec<String>) -> Vec<String> {
    on_disk
        .into_iter()
        .filter(|run_id| !known_run_ids.contains(run_id))
        .collect()
}

/// Best-effort kill of a task's recorded process.
///
/// The pid alone is not trusted: the signal is sent only when the live
/// command line matches the recorded one exactly. Failure to deliver the
/// signal is logged and otherwise ignored; the status patch is what stops
/// the task being charged to its old owner.
pub fn kill_task_process(executor: &dyn ScriptExecutor, task: &NodeTask) {
    let name = task.metadata.name.as_deref().unwrap_or("<unknown>");
    let Some(status) = task.status.as_ref() else {
        return;
    };
    let (Some(pid), Some(command_line)) = (status.process_id, status.command_line.as_deref())
    else {
        debug!(task = name, "no recorded process identity to kill");
        return;
    };

    match executor.kill_verified(pid, command_line) {
        KillResult::Killed => info!(task = name, pid, "killed task process"),
        KillResult::NoSuchProcess => debug!(task = name, pid, "task process already gone"),
        KillResult::CommandLineMismatch { actual } => {
            debug!(task = name, pid, %actual, "pid was reused by another process, not killing");
        }
        KillResult::SignalFailed(msg) => {
            warn!(task = name, pid, %msg, "failed to deliver kill signal");
        }
    }
}

impl Reconciler {
    /// Runs one cleanup sweep over all of this node's tasks.
    pub async fn sweep(&self) -> Result<(), ControllerError> {
        if !self.is_leader() {
            debug!(node = %self.node_name(), "not the leader, skipping cleanup sweep");
            return Ok(());
        }

        let tasks = self.list_node_tasks().await?;
        let now = Utc::now();
        let mut known_run_ids = HashSet::new();

        for task in &tasks {
            let Some(name) = task.metadata.name.as_deref() else {
                continue;
            };
            let run_id = task.status.as_ref().and_then(|s| s.run_id.clone());

            match sweep_action(task, self.agent_id(), now) {
                SweepAction::MarkOrphaned => {
                    let previous = task
                        .status
                        .as_ref()
                        .and_then(|s| s.agent_id.as_deref())
                        .unwrap_or("<none>");
                    warn!(task = name, %previous, "task orphaned by a previous controller instance");
                    kill_task_process(self.executor(), task);
                    let patch = NodeTaskStatusPatch::terminal(
                        NodeTaskPhase::Orphaned,
                        ABORTED_EXIT_CODE,
                        now,
                    )
                    .error_text("task owner no longer matches the active leader".to_string());
                    apply_status_patch(self.api(), name, &patch).await?;
                    if let Some(run_id) = run_id {
                        known_run_ids.insert(run_id);
                    }
                }
                SweepAction::MarkTimeout => {
                    info!(task = name, "task exceeded its timeout, killing");
                    kill_task_process(self.executor(), task);
                    let patch = NodeTaskStatusPatch::terminal(
                        NodeTaskPhase::Timeout,
                        ABORTED_EXIT_CODE,
                        now,
                    )
                    .error_text("task exceeded its timeout".to_string());
                    apply_status_patch(self.api(), name, &patch).await?;
                    if let Some(run_id) = run_id {
                        known_run_ids.insert(run_id);
                    }
                }
                SweepAction::Delete => {
                    info!(task = name, "retention expired, deleting task");
                    delete_task(self.api(), name).await?;
                    // Reclaim its script directory in the same tick so the
                    // orphan-directory warning stays meaningful
                    if let Some(run_id) = run_id {
                        if let Err(e) = self.workspace().remove_run_dir(&run_id) {
                            warn!(task = name, %run_id, error = %e, "failed to remove script directory");
                        }
                    }
                }
                SweepAction::Keep => {
                    if let Some(run_id) = run_id {
                        known_run_ids.insert(run_id);
                    }
                }
            }
        }

        // Directories not referenced by any known task are garbage left by
        // a dead controller instance
        for run_id in orphan_run_dirs(&known_run_ids, self.workspace().list_run_dirs()?) {
            warn!(%run_id, "removing unreferenced task script directory");
            if let Err(e) = self.workspace().remove_run_dir(&run_id) {
                warn!(%run_id, error = %e, "failed to remove script directory");
            }
        }

        Ok(())
    }

    async fn list_node_tasks(&self) -> Result<Vec<NodeTask>, ControllerError> {
        let tasks = self.api().list(&ListParams::default()).await?;
        Ok(tasks
            .items
            .into_iter()
            .filter(|t| t.spec.node == self.node_name())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{NodeTaskSpec, NodeTaskStatus};
    use host_exec::MockExecutor;
    use kube::api::ObjectMeta;

    const AGENT: &str = "node-0-self";

    fn running_task(agent_id: &str, started_secs_ago: i64) -> NodeTask {
        task_with_status(NodeTaskStatus {
            phase: NodeTaskPhase::Running,
            agent_id: Some(agent_id.to_string()),
            process_id: Some(42),
            command_line: Some("/bin/bash /mnt/host/node-agent/node-tasks/r1/task.sh".to_string()),
            run_id: Some("r1".to_string()),
            start_timestamp: Some(Utc::now() - chrono::Duration::seconds(started_secs_ago)),
            ..Default::default()
        })
    }

    fn terminal_task(finished_secs_ago: i64, retention_seconds: u32) -> NodeTask {
        let mut task = task_with_status(NodeTaskStatus {
            phase: NodeTaskPhase::Finished,
            exit_code: Some(0),
            finish_timestamp: Some(Utc::now() - chrono::Duration::seconds(finished_secs_ago)),
            ..Default::default()
        });
        task.spec.retention_seconds = retention_seconds;
        task
    }

    fn task_with_status(status: NodeTaskStatus) -> NodeTask {
        NodeTask {
            metadata: ObjectMeta {
                name: Some("task-1".to_string()),
                ..Default::default()
            },
            spec: NodeTaskSpec {
                node: "node-0".to_string(),
                bash_script: "true".to_string(),
                timeout_seconds: 30,
                retention_seconds: 3600,
                capture_output: true,
            },
            status: Some(status),
        }
    }

    #[test]
    fn test_sweep_keeps_healthy_running_task() {
        let task = running_task(AGENT, 5);
        assert_eq!(sweep_action(&task, AGENT, Utc::now()), SweepAction::Keep);
    }

    #[test]
    fn test_sweep_orphans_foreign_running_task() {
        // A Running task recorded by a previous instance is orphaned,
        // never adopted
        let task = running_task("node-0-previous", 5);
        assert_eq!(
            sweep_action(&task, AGENT, Utc::now()),
            SweepAction::MarkOrphaned
        );
    }

    #[test]
    fn test_sweep_times_out_overdue_running_task() {
        // timeout_seconds = 30; started 31s ago
        let task = running_task(AGENT, 31);
        assert_eq!(
            sweep_action(&task, AGENT, Utc::now()),
            SweepAction::MarkTimeout
        );
    }

    #[test]
    fn test_sweep_retention_boundary() {
        // One second past retention: delete
        let expired = terminal_task(3601, 3600);
        assert_eq!(sweep_action(&expired, AGENT, Utc::now()), SweepAction::Delete);

        // One second inside retention: keep
        let retained = terminal_task(3599, 3600);
        assert_eq!(sweep_action(&retained, AGENT, Utc::now()), SweepAction::Keep);
    }

    #[test]
    fn test_sweep_ignores_pending_tasks() {
        let task = task_with_status(NodeTaskStatus {
            phase: NodeTaskPhase::Pending,
            ..Default::default()
        });
        assert_eq!(sweep_action(&task, AGENT, Utc::now()), SweepAction::Keep);
    }

    #[test]
    fn test_orphan_run_dirs() {
        let known: HashSet<String> = ["a".to_string(), "c".to_string()].into();
        let orphans = orphan_run_dirs(
            &known,
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        );
        assert_eq!(orphans, vec!["b".to_string()]);
    }

    #[test]
    fn test_kill_requires_matching_command_line() {
        let executor = MockExecutor::new();
        // The recorded pid now belongs to an unrelated process
        executor.add_process(42, "/usr/bin/unrelated --daemon");

        let task = running_task("node-0-previous", 5);
        kill_task_process(&executor, &task);
        assert!(executor.killed_pids().is_empty(), "mismatched pid must not be killed");
    }

    #[test]
    fn test_kill_is_noop_without_live_process() {
        let executor = MockExecutor::new();
        let task = running_task("node-0-previous", 5);
        kill_task_process(&executor, &task);
        assert!(executor.killed_pids().is_empty());
    }

    #[test]
    fn test_kill_matching_process() {
        let executor = MockExecutor::new();
        executor.add_process(42, "/bin/bash /mnt/host/node-agent/node-tasks/r1/task.sh");

        let task = running_task("node-0-previous", 5);
        kill_task_process(&executor, &task);
        assert_eq!(executor.killed_pids(), vec![42]);
    }
}
