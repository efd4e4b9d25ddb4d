//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires together the
//! reconciler, the NodeTask watcher, the lease loop, and the periodic
//! cleanup sweep for the Node Task Controller.

use crate::config::Config;
use crate::error::ControllerError;
use crate::leader::{LeaseHolder, LeaseLock};
use crate::reconciler::Reconciler;
use crate::watcher::Watcher;
use crds::NodeTask;
use host_exec::{HostExecutor, TaskWorkspace};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};
use uuid::Uuid;

/// Main controller for node task management.
pub struct Controller {
    task_watcher: JoinHandle<Result<(), ControllerError>>,
    sweeper: JoinHandle<()>,
    lease_loop: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Node Task Controller");

        // Create Kubernetes client
        let client = Client::try_default().await?;

        // NodeTask is cluster-scoped; tasks for other nodes are filtered
        // in the reconciler
        let task_api: Api<NodeTask> = Api::all(client.clone());
        let node_api: Api<Node> = Api::all(client.clone());

        // Fresh identity per instance so a restart is distinguishable from
        // the process that died
        let agent_id = format!("{}-{}", config.node_name, Uuid::new_v4());
        info!(agent_id = %agent_id, "controller identity");

        let lease_lock = Arc::new(LeaseLock::new(
            client,
            &config.lease_namespace,
            &config.node_name,
            &agent_id,
            config.lease_duration_seconds,
        ));

        let reconciler = Arc::new(Reconciler::new(
            task_api.clone(),
            node_api,
            Arc::new(HostExecutor::new()),
            TaskWorkspace::new(&config.host_root),
            Arc::clone(&lease_lock) as Arc<dyn LeaseHolder>,
            config.node_name.clone(),
            agent_id,
        ));

        // Lease loop keeps is_leader() current for the other two tasks
        let lease_loop = tokio::spawn({
            let lease_lock = Arc::clone(&lease_lock);
            let retry = config.lease_retry;
            async move { lease_lock.run(retry).await }
        });

        let watcher_instance = Watcher::new(Arc::clone(&reconciler), task_api);
        let task_watcher = tokio::spawn(async move { watcher_instance.watch_node_tasks().await });

        // Periodic idle tick driving orphan/timeout detection and GC
        let sweeper = tokio::spawn({
            let reconciler = Arc::clone(&reconciler);
            let interval = config.sweep_interval;
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = reconciler.sweep().await {
                        error!("Cleanup sweep failed: {}", e);
                    }
                }
            }
        });

        Ok(Self {
            task_watcher,
            sweeper,
            lease_loop,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Node Task Controller running");

        // The watcher and sweeper run forever; any exit is a failure
        let result = tokio::select! {
            result = &mut self.task_watcher => {
                result
                    .map_err(|e| ControllerError::Watch(format!("NodeTask watcher panicked: {e}")))?
            }
            result = &mut self.sweeper => {
                result
                    .map_err(|e| ControllerError::Watch(format!("Cleanup sweeper panicked: {e}")))?;
                Err(ControllerError::Watch("Cleanup sweeper exited".to_string()))
            }
        };

        self.lease_loop.abort();
        result
    }
}
