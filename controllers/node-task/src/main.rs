//! Node Task Controller
//!
//! Runs `NodeTask` scripts on their target node. Each node runs one
//! controller instance; the per-node lease decides which instance may
//! execute and kill task processes. The controller drives every task
//! through its lifecycle (Pending, Running, then a terminal phase),
//! detects tasks orphaned by a previous instance, enforces timeouts, and
//! garbage-collects finished tasks and their on-disk script directories.

mod cleanup;
mod config;
mod controller;
mod error;
mod leader;
mod reconciler;
mod watcher;
#[cfg(test)]
mod reconciler_test;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    info!("Starting Node Task Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Host root: {}", config.host_root.display());
    info!("  Lease namespace: {}", config.lease_namespace);
    info!("  Sweep interval: {:?}", config.sweep_interval);

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
