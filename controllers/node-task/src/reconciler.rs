//! Reconciliation logic for NodeTask CRDs.
//!
//! Drives each task assigned to this node through its lifecycle:
//! `New → Pending → Running → {Finished | Failed | Timeout | Orphaned}`.
//! Phases only move forward. The event-driven path here handles validation,
//! acceptance, and execution; timeout/orphan detection and all garbage
//! collection live in the idle sweep (see `cleanup`).

use crate::error::ControllerError;
use crate::leader::LeaseHolder;
use chrono::Utc;
use crds::{
    ABORTED_EXIT_CODE, NodeTask, NodeTaskPhase, NodeTaskStatusPatch, ValidationError,
    format_runtime, node_owner_reference,
};
use host_exec::{ScriptExecutor, ScriptOutcome, TaskWorkspace};
use k8s_openapi::api::core::v1::Node;
use kube::Api;
use kube::api::{DeleteParams, Patch, PatchParams};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bounded wait for the script process to report its OS process id. The
/// Running patch is issued with whatever identity is known when it elapses.
const START_NOTIFY_WAIT: Duration = Duration::from_secs(15);

/// What the event-driven reconcile path does with one task.
#[derive(Debug)]
pub enum TaskAction {
    /// Spec failed validation; delete the resource, bypassing retention
    DeleteInvalid(ValidationError),
    /// Task targets a different node
    SkipOtherNode,
    /// New task: initialize status and attach the node owner reference
    MarkPending,
    /// Pending task assigned to this node: launch it
    Execute,
    /// Running or terminal: nothing to do here (the sweep owns both)
    NoAction,
}

/// Decides the reconcile action for one task. Pure so the state machine is
/// testable without an API server.
pub fn task_action(task: &NodeTask, node_name: &str) -> TaskAction {
    // Malformed tasks are deleted by whichever instance sees them first;
    // a task with no node would otherwise never find an owner
    if let Err(e) = task.spec.validate() {
        return TaskAction::DeleteInvalid(e);
    }
    if task.spec.node != node_name {
        return TaskAction::SkipOtherNode;
    }
    match task.phase() {
        NodeTaskPhase::New => TaskAction::MarkPending,
        NodeTaskPhase::Pending => TaskAction::Execute,
        // Running tasks we own finish through the background waiter;
        // everything else is the sweep's business
        _ => TaskAction::NoAction,
    }
}

/// Reconciles NodeTask resources for one node.
pub struct Reconciler {
    api: Api<NodeTask>,
    node_api: Api<Node>,
    executor: Arc<dyn ScriptExecutor>,
    workspace: TaskWorkspace,
    lease: Arc<dyn LeaseHolder>,
    node_name: String,
    agent_id: String,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        api: Api<NodeTask>,
        node_api: Api<Node>,
        executor: Arc<dyn ScriptExecutor>,
        workspace: TaskWorkspace,
        lease: Arc<dyn LeaseHolder>,
        node_name: String,
        agent_id: String,
    ) -> Self {
        Self {
            api,
            node_api,
            executor,
            workspace,
            lease,
            node_name,
            agent_id,
        }
    }

    /// Identity under which this instance runs and owns tasks.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub(crate) fn node_name(&self) -> &str {
        &self.node_name
    }

    pub(crate) fn api(&self) -> &Api<NodeTask> {
        &self.api
    }

    pub(crate) fn executor(&self) -> &dyn ScriptExecutor {
        &*self.executor
    }

    pub(crate) fn workspace(&self) -> &TaskWorkspace {
        &self.workspace
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.lease.is_leader()
    }

    /// Reconciles one NodeTask event.
    pub async fn reconcile(&self, task: &NodeTask) -> Result<(), ControllerError> {
        let name = task
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| ControllerError::InvalidConfig("NodeTask missing name".to_string()))?;

        match task_action(task, &self.node_name) {
            TaskAction::DeleteInvalid(reason) => {
                warn!(task = name, %reason, "deleting invalid NodeTask");
                delete_task(&self.api, name).await
            }
            TaskAction::SkipOtherNode => {
                debug!(task = name, node = %task.spec.node, "task targets another node");
                Ok(())
            }
            TaskAction::MarkPending | TaskAction::Execute if !self.lease.is_leader() => {
                debug!(task = name, "not the leader for this node, skipping");
                Ok(())
            }
            TaskAction::MarkPending => self.mark_pending(name).await,
            TaskAction::Execute => self.execute(name, task).await,
            TaskAction::NoAction => {
                debug!(task = name, phase = ?task.phase(), "no reconcile action");
                Ok(())
            }
        }
    }

    /// `New → Pending`: attach the node owner reference and initialize the
    /// status subresource.
    async fn mark_pending(&self, name: &str) -> Result<(), ControllerError> {
        info!(task = name, node = %self.node_name, "accepting new task");

        // Owner reference gives us cascading delete when the node goes away.
        // Missing it degrades GC, not execution, so failures only warn.
        match self.node_api.get(&self.node_name).await {
            Ok(node) => match node_owner_reference(&node) {
                Some(owner) => {
                    let patch = serde_json::json!({ "metadata": { "ownerReferences": [owner] } });
                    if let Err(e) = self
                        .api
                        .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await
                    {
                        warn!(task = name, error = %e, "failed to attach node owner reference");
                    }
                }
                None => warn!(task = name, node = %self.node_name, "node has no name/uid for owner reference"),
            },
            Err(e) => {
                warn!(task = name, node = %self.node_name, error = %e, "failed to read node for owner reference");
            }
        }

        apply_status_patch(&self.api, name, &NodeTaskStatusPatch::pending()).await
    }

    /// `Pending → Running`: write the wrapper script, launch it, record the
    /// process identity, and hand completion to a background waiter bounded
    /// by the task's timeout.
    async fn execute(&self, name: &str, task: &NodeTask) -> Result<(), ControllerError> {
        let run_id = Uuid::new_v4().to_string();
        info!(task = name, run_id = %run_id, "executing task");

        let script = match self.workspace.write_script(&run_id, &task.spec.bash_script) {
            Ok(path) => path,
            Err(e) => {
                // Could not even stage the script; terminal without Running
                return self.mark_launch_failed(name, &e.to_string()).await;
            }
        };

        let timeout = Duration::from_secs(u64::from(task.spec.timeout_seconds));
        let (started_tx, started_rx) = oneshot::channel();
        let executor = Arc::clone(&self.executor);
        let wait = tokio::spawn(async move { executor.start_script(script, timeout, started_tx).await });

        // Bounded wait for the process identity; the one-shot resolves as
        // soon as the OS process exists
        let started = match tokio::time::timeout(START_NOTIFY_WAIT, started_rx).await {
            Ok(Ok(started)) => Some(started),
            Ok(Err(_)) => {
                // Sender dropped without a notification: the launch failed
                let error = match wait.await {
                    Ok(Err(e)) => e.to_string(),
                    Ok(Ok(_)) => "script finished without reporting a process id".to_string(),
                    Err(e) => format!("script task aborted: {e}"),
                };
                warn!(task = name, %error, "task failed to launch");
                return self.mark_launch_failed(name, &error).await;
            }
            Err(_) => {
                warn!(task = name, "timed out waiting for the script process id");
                None
            }
        };

        let start_timestamp = Utc::now();
        let running = NodeTaskStatusPatch::running(
            &self.agent_id,
            started.as_ref().map(|s| s.pid),
            started.map(|s| s.command_line),
            &run_id,
            start_timestamp,
        );
        apply_status_patch(&self.api, name, &running).await?;

        // Completion must not block reconciliation of other tasks
        let api = self.api.clone();
        let task_name = name.to_string();
        let capture = task.spec.capture_output;
        tokio::spawn(async move {
            let outcome = wait.await;
            let finish = Utc::now();
            let runtime = format_runtime(finish - start_timestamp);

            let patch = match outcome {
                Ok(Ok(ScriptOutcome::Completed {
                    exit_code,
                    stdout,
                    stderr,
                })) => {
                    let phase = if exit_code == 0 {
                        NodeTaskPhase::Finished
                    } else {
                        NodeTaskPhase::Failed
                    };
                    info!(task = %task_name, ?phase, exit_code, %runtime, "task completed");
                    let patch =
                        NodeTaskStatusPatch::terminal(phase, exit_code, finish).runtime(runtime);
                    if capture {
                        patch.captured(stdout, stderr)
                    } else {
                        patch
                    }
                }
                Ok(Ok(ScriptOutcome::TimedOut)) => {
                    info!(task = %task_name, %runtime, "task exceeded its timeout");
                    NodeTaskStatusPatch::terminal(NodeTaskPhase::Timeout, ABORTED_EXIT_CODE, finish)
                        .runtime(runtime)
                        .error_text("task exceeded its timeout".to_string())
                }
                Ok(Err(e)) => {
                    warn!(task = %task_name, error = %e, "task process failed");
                    NodeTaskStatusPatch::terminal(NodeTaskPhase::Failed, ABORTED_EXIT_CODE, finish)
                        .runtime(runtime)
                        .error_text(e.to_string())
                }
                Err(e) => {
                    warn!(task = %task_name, error = %e, "task wait aborted");
                    NodeTaskStatusPatch::terminal(NodeTaskPhase::Failed, ABORTED_EXIT_CODE, finish)
                        .runtime(runtime)
                        .error_text(format!("script wait aborted: {e}"))
                }
            };

            if let Err(e) = apply_status_patch(&api, &task_name, &patch).await {
                warn!(task = %task_name, error = %e, "failed to record task outcome");
            }
        });

        Ok(())
    }

    /// Launch failures are terminal Failed, bypassing Running entirely.
    async fn mark_launch_failed(&self, name: &str, error: &str) -> Result<(), ControllerError> {
        let patch = NodeTaskStatusPatch::terminal(NodeTaskPhase::Failed, ABORTED_EXIT_CODE, Utc::now())
            .error_text(error.to_string());
        apply_status_patch(&self.api, name, &patch).await
    }
}

/// Issues a status merge patch, tolerating a task deleted mid-flight.
pub(crate) async fn apply_status_patch(
    api: &Api<NodeTask>,
    name: &str,
    patch: &NodeTaskStatusPatch,
) -> Result<(), ControllerError> {
    let pp = PatchParams::default();
    match api
        .patch_status(name, &pp, &Patch::Merge(&patch.to_merge_patch()))
        .await
    {
        Ok(_) => {
            debug!(task = name, phase = ?patch.phase(), "status patched");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(task = name, "task disappeared before status patch");
            Ok(())
        }
        Err(e) => Err(ControllerError::Kube(e)),
    }
}

/// Deletes a task, tolerating it already being gone.
pub(crate) async fn delete_task(api: &Api<NodeTask>, name: &str) -> Result<(), ControllerError> {
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(ae)) if ae.code == 404 => {
            debug!(task = name, "task already deleted");
            Ok(())
        }
        Err(e) => Err(ControllerError::Kube(e)),
    }
}
