//! Kubernetes resource watchers.
//!
//! This module handles watching NodeTask resources for changes and
//! triggering reconciliation. Reconcile errors are logged without
//! terminating the stream; the sweep retries anything that matters.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::NodeTask;
use futures::TryStreamExt;
use kube::Api;
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Watches NodeTask resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    api: Api<NodeTask>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, api: Api<NodeTask>) -> Self {
        Self { reconciler, api }
    }

    /// Starts watching NodeTask resources.
    pub async fn watch_node_tasks(&self) -> Result<(), ControllerError> {
        info!("Starting NodeTask watcher");

        let mut stream = Box::pin(watcher(self.api.clone(), watcher::Config::default()));

        while let Some(event) = stream
            .try_next()
            .await
            .map_err(|e| ControllerError::Watch(format!("Watcher stream error: {e}")))?
        {
            match event {
                watcher::Event::Apply(task) => {
                    let name = task.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("NodeTask applied: {}", name);

                    if let Err(e) = self.reconciler.reconcile(&task).await {
                        error!("Failed to reconcile NodeTask {}: {}", name, e);
                    }
                }
                watcher::Event::Delete(task) => {
                    let name = task.metadata.name.as_deref().unwrap_or("<unknown>");
                    info!("NodeTask deleted: {}", name);
                    // The next sweep reclaims its script directory
                }
                watcher::Event::Init => {
                    info!("NodeTask watcher initialized");
                }
                watcher::Event::InitApply(task) => {
                    let name = task.metadata.name.as_deref().unwrap_or("<unknown>");
                    debug!("NodeTask init apply: {}", name);

                    if let Err(e) = self.reconciler.reconcile(&task).await {
                        warn!("Failed to reconcile NodeTask {}: {}", name, e);
                    }
                }
                watcher::Event::InitDone => {
                    info!("NodeTask watcher initialization complete");
                }
            }
        }

        Ok(())
    }
}
