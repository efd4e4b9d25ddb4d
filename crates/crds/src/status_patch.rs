//! Field-level status patch builder for NodeTask
//!
//! Status mutations are issued as merge patches against the status
//! subresource. Building them through this type keeps every mutation
//! strongly typed: only the fields a transition actually sets are
//! serialized, and every patch carries a phase.

use crate::node_task::NodeTaskPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Serialized shape of a status merge patch. Unset fields are omitted so the
/// merge leaves them untouched.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct StatusFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    phase: Option<NodeTaskPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    process_id: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command_line: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    finish_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Builder for NodeTask status merge patches.
///
/// Constructors cover the lifecycle transitions; the chained methods attach
/// optional detail (captured output, error text, formatted runtime).
#[derive(Debug, Clone)]
pub struct NodeTaskStatusPatch {
    fields: StatusFields,
}

impl NodeTaskStatusPatch {
    /// New task accepted: `New → Pending`.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            fields: StatusFields {
                phase: Some(NodeTaskPhase::Pending),
                ..StatusFields::default()
            },
        }
    }

    /// Script launched: `Pending → Running`, recording the executing agent
    /// and the best-known process identity.
    #[must_use]
    pub fn running(
        agent_id: &str,
        process_id: Option<u32>,
        command_line: Option<String>,
        run_id: &str,
        start_timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            fields: StatusFields {
                phase: Some(NodeTaskPhase::Running),
                agent_id: Some(agent_id.to_string()),
                process_id,
                command_line,
                run_id: Some(run_id.to_string()),
                start_timestamp: Some(start_timestamp),
                ..StatusFields::default()
            },
        }
    }

    /// Transition into one of the four terminal phases.
    ///
    /// Callers must pass a terminal phase; a non-terminal phase here is a
    /// programming error.
    #[must_use]
    pub fn terminal(
        phase: NodeTaskPhase,
        exit_code: i32,
        finish_timestamp: DateTime<Utc>,
    ) -> Self {
        debug_assert!(phase.is_terminal(), "terminal patch built for {phase:?}");
        Self {
            fields: StatusFields {
                phase: Some(phase),
                exit_code: Some(exit_code),
                finish_timestamp: Some(finish_timestamp),
                ..StatusFields::default()
            },
        }
    }

    /// Attaches the human-formatted run duration.
    #[must_use]
    pub fn runtime(mut self, runtime: String) -> Self {
        self.fields.runtime = Some(runtime);
        self
    }

    /// Attaches captured stdout/stderr.
    #[must_use]
    pub fn captured(mut self, stdout: String, stderr: String) -> Self {
        if !stdout.is_empty() {
            self.fields.output = Some(stdout);
        }
        if !stderr.is_empty() {
            self.fields.error = Some(stderr);
        }
        self
    }

    /// Attaches error text (launch failures, orphan/timeout notes).
    #[must_use]
    pub fn error_text(mut self, text: String) -> Self {
        self.fields.error = Some(text);
        self
    }

    /// Phase carried by this patch.
    #[must_use]
    pub fn phase(&self) -> NodeTaskPhase {
        // Every constructor sets the phase
        self.fields.phase.unwrap_or_default()
    }

    /// Renders the merge-patch document for `Api::patch_status`.
    #[must_use]
    pub fn to_merge_patch(&self) -> serde_json::Value {
        serde_json::json!({ "status": self.fields })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_patch_sets_only_phase() {
        let patch = NodeTaskStatusPatch::pending().to_merge_patch();
        let status = patch.get("status").unwrap();
        assert_eq!(status.get("phase"), Some(&serde_json::json!("Pending")));
        assert_eq!(status.as_object().unwrap().len(), 1, "only phase should be set");
    }

    #[test]
    fn test_running_patch_records_process_identity() {
        let start = Utc::now();
        let patch = NodeTaskStatusPatch::running(
            "node-0-a1b2",
            Some(4711),
            Some("/bin/bash /mnt/host/node-agent/node-tasks/r1/task.sh".to_string()),
            "r1",
            start,
        )
        .to_merge_patch();

        let status = patch.get("status").unwrap();
        assert_eq!(status.get("phase"), Some(&serde_json::json!("Running")));
        assert_eq!(status.get("agentId"), Some(&serde_json::json!("node-0-a1b2")));
        assert_eq!(status.get("processId"), Some(&serde_json::json!(4711)));
        assert_eq!(status.get("runId"), Some(&serde_json::json!("r1")));
        assert!(status.get("startTimestamp").is_some());
        assert!(status.get("finishTimestamp").is_none());
    }

    #[test]
    fn test_running_patch_tolerates_unknown_process() {
        // Start notification can time out; the patch still reflects
        // best-known state
        let patch =
            NodeTaskStatusPatch::running("agent", None, None, "r2", Utc::now()).to_merge_patch();
        let status = patch.get("status").unwrap();
        assert!(status.get("processId").is_none());
        assert!(status.get("commandLine").is_none());
    }

    #[test]
    fn test_terminal_patch_with_capture() {
        let patch = NodeTaskStatusPatch::terminal(NodeTaskPhase::Failed, 3, Utc::now())
            .runtime("2s".to_string())
            .captured("out".to_string(), "err".to_string())
            .to_merge_patch();

        let status = patch.get("status").unwrap();
        assert_eq!(status.get("phase"), Some(&serde_json::json!("Failed")));
        assert_eq!(status.get("exitCode"), Some(&serde_json::json!(3)));
        assert_eq!(status.get("runtime"), Some(&serde_json::json!("2s")));
        assert_eq!(status.get("output"), Some(&serde_json::json!("out")));
        assert_eq!(status.get("error"), Some(&serde_json::json!("err")));
    }

    #[test]
    fn test_captured_skips_empty_streams() {
        let patch = NodeTaskStatusPatch::terminal(NodeTaskPhase::Finished, 0, Utc::now())
            .captured(String::new(), String::new())
            .to_merge_patch();
        let status = patch.get("status").unwrap();
        assert!(status.get("output").is_none());
        assert!(status.get("error").is_none());
    }
}
