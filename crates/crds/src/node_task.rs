//! NodeTask CRD
//!
//! A cluster-scoped resource describing one shell script to run on exactly
//! one node. The node-task controller on the target node drives the task
//! through its lifecycle and records the outcome in the status subresource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Exit code recorded for tasks that were killed rather than ran to
/// completion (timeout or orphan).
pub const ABORTED_EXIT_CODE: i32 = -1;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "neonkube.io",
    version = "v1alpha1",
    kind = "NodeTask",
    status = "NodeTaskStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaskSpec {
    /// Name of the node the script must run on
    pub node: String,

    /// Raw Bash script body executed on the host
    pub bash_script: String,

    /// Wall-clock budget in seconds, measured from process start
    pub timeout_seconds: u32,

    /// How long the finished task record is kept past its finish timestamp,
    /// in seconds
    pub retention_seconds: u32,

    /// Capture stdout/stderr into the task status
    #[serde(default = "default_capture_output")]
    pub capture_output: bool,
}

fn default_capture_output() -> bool {
    true
}

/// Spec validation failures. These are non-retryable: the controller deletes
/// the offending resource instead of requeueing it.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// spec.node is empty
    #[error("spec.node must name the target node")]
    MissingNode,

    /// spec.bashScript is empty
    #[error("spec.bashScript must not be empty")]
    EmptyScript,

    /// spec.timeoutSeconds is zero
    #[error("spec.timeoutSeconds must be greater than zero")]
    ZeroTimeout,
}

impl NodeTaskSpec {
    /// Validates the immutable task spec.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.node.trim().is_empty() {
            return Err(ValidationError::MissingNode);
        }
        if self.bash_script.trim().is_empty() {
            return Err(ValidationError::EmptyScript);
        }
        if self.timeout_seconds == 0 {
            return Err(ValidationError::ZeroTimeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeTaskStatus {
    /// Lifecycle phase
    pub phase: NodeTaskPhase,

    /// Identity of the controller instance that last ran the task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    /// OS process id of the launched script
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,

    /// Exact command line used to launch the script, compared against the
    /// live process table before any kill
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_line: Option<String>,

    /// UUID naming the on-disk script directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,

    /// When the process was launched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// When the task reached a terminal phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_timestamp: Option<chrono::DateTime<chrono::Utc>>,

    /// Human-formatted run duration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<String>,

    /// Process exit code; -1 for tasks that were killed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Captured stdout, when requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Captured stderr or launch error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// NodeTask lifecycle phase
///
/// Phases advance only forward: New → Pending → Running → one of the four
/// terminal phases. The terminal phases are equivalent for retention purposes
/// and distinguished for diagnostics.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NodeTaskPhase {
    /// Created but not yet seen by the controller
    #[default]
    New,

    /// Accepted, waiting for execution
    Pending,

    /// Script process is running on the node
    Running,

    /// Process exited with code 0
    Finished,

    /// Process exited non-zero, or could not be launched at all
    Failed,

    /// Killed after exceeding its timeout budget
    Timeout,

    /// Recorded owner no longer matches the active leader; process killed
    Orphaned,
}

impl NodeTaskPhase {
    /// True for the four end states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Finished | Self::Failed | Self::Timeout | Self::Orphaned
        )
    }

    /// Position along the lifecycle. Terminal phases share the last slot,
    /// so a legal transition never decreases the rank.
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::New => 0,
            Self::Pending => 1,
            Self::Running => 2,
            Self::Finished | Self::Failed | Self::Timeout | Self::Orphaned => 3,
        }
    }
}

impl NodeTask {
    /// Current phase, `New` when the status subresource is unset.
    #[must_use]
    pub fn phase(&self) -> NodeTaskPhase {
        self.status.as_ref().map_or_else(NodeTaskPhase::default, |s| s.phase)
    }

    /// Execution budget from the spec.
    #[must_use]
    pub fn timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.spec.timeout_seconds))
    }

    /// Retention window from the spec.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.spec.retention_seconds))
    }
}

/// Formats a run duration for `status.runtime`, e.g. `2m30s`.
#[must_use]
pub fn format_runtime(runtime: chrono::Duration) -> String {
    let total = runtime.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
