//! Unit tests for the NodeTask reconciler

#[cfg(test)]
mod tests {
    use crate::reconciler::{TaskAction, task_action};
    use crds::{NodeTask, NodeTaskPhase, NodeTaskSpec, NodeTaskStatus};
    use kube::api::ObjectMeta;

    const NODE: &str = "node-0";

    fn task(phase: Option<NodeTaskPhase>) -> NodeTask {
        NodeTask {
            metadata: ObjectMeta {
                name: Some("task-1".to_string()),
                ..Default::default()
            },
            spec: NodeTaskSpec {
                node: NODE.to_string(),
                bash_script: "exit 3".to_string(),
                timeout_seconds: 30,
                retention_seconds: 3600,
                capture_output: true,
            },
            status: phase.map(|phase| NodeTaskStatus {
                phase,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_new_task_is_accepted() {
        // Unset status and explicit New both mean "not yet seen"
        assert!(matches!(task_action(&task(None), NODE), TaskAction::MarkPending));
        assert!(matches!(
            task_action(&task(Some(NodeTaskPhase::New)), NODE),
            TaskAction::MarkPending
        ));
    }

    #[test]
    fn test_pending_task_is_executed() {
        assert!(matches!(
            task_action(&task(Some(NodeTaskPhase::Pending)), NODE),
            TaskAction::Execute
        ));
    }

    #[test]
    fn test_running_task_is_not_relaunched() {
        // Repeated reconciles of an already-Running task must not launch
        // the script again
        assert!(matches!(
            task_action(&task(Some(NodeTaskPhase::Running)), NODE),
            TaskAction::NoAction
        ));
    }

    #[test]
    fn test_terminal_tasks_defer_to_the_sweep() {
        for phase in [
            NodeTaskPhase::Finished,
            NodeTaskPhase::Failed,
            NodeTaskPhase::Timeout,
            NodeTaskPhase::Orphaned,
        ] {
            assert!(matches!(
                task_action(&task(Some(phase)), NODE),
                TaskAction::NoAction
            ));
        }
    }

    #[test]
    fn test_foreign_node_task_is_skipped() {
        let mut foreign = task(None);
        foreign.spec.node = "node-1".to_string();
        assert!(matches!(
            task_action(&foreign, NODE),
            TaskAction::SkipOtherNode
        ));
    }

    #[test]
    fn test_invalid_task_is_deleted_before_pending() {
        // A task with no target node never reaches Pending
        let mut invalid = task(None);
        invalid.spec.node = String::new();
        assert!(matches!(
            task_action(&invalid, NODE),
            TaskAction::DeleteInvalid(_)
        ));

        // Validation outranks phase: even a terminal malformed task goes
        let mut invalid = task(Some(NodeTaskPhase::Finished));
        invalid.spec.bash_script = String::new();
        assert!(matches!(
            task_action(&invalid, NODE),
            TaskAction::DeleteInvalid(_)
        ));
    }

    // Note: The execute path (Running patch, background completion waiter)
    // needs a mocked Kubernetes API (kube::Api) for full coverage. The
    // executor side is already covered through MockExecutor in the cleanup
    // tests and in host-exec itself.

    #[tokio::test]
    #[ignore] // Ignored until Kubernetes API mocking is implemented
    async fn test_execute_patches_running_then_terminal() {
        // Setup: MockExecutor scripted with exit code 3
        // TODO: Mock kube API to accept patch_status calls and record the
        // patch sequence: Running (with agentId/runId) then Failed with
        // exitCode=3 and a runtime
    }

    #[tokio::test]
    #[ignore] // Ignored until Kubernetes API mocking is implemented
    async fn test_launch_failure_bypasses_running() {
        // Setup: MockExecutor::fail_next_spawn
        // TODO: Mock kube API and assert the only status patch is terminal
        // Failed with exitCode=-1 and the spawn error text
    }
}
