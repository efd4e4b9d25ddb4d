//! Controller configuration.
//!
//! All configuration comes from environment variables, following the
//! conventions of the other node-level controllers: required values fail
//! startup, everything else has a default.

use crate::error::ControllerError;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default host mount root inside the controller pod.
const DEFAULT_HOST_ROOT: &str = "/mnt/host";

/// Default namespace holding the per-node leases.
const DEFAULT_LEASE_NAMESPACE: &str = "kube-system";

/// Runtime configuration for one controller instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this instance is responsible for
    pub node_name: String,

    /// Host filesystem mount root; task script directories live below it
    pub host_root: PathBuf,

    /// Namespace holding the per-node lease
    pub lease_namespace: String,

    /// How long an unrenewed lease stays valid
    pub lease_duration_seconds: u32,

    /// How often the lease is acquired/renewed
    pub lease_retry: Duration,

    /// How often the idle cleanup sweep runs
    pub sweep_interval: Duration,
}

impl Config {
    /// Loads configuration from the environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        let node_name = env::var("NODE_NAME").map_err(|_| {
            ControllerError::InvalidConfig("NODE_NAME environment variable is required".to_string())
        })?;

        let host_root = env::var("HOST_ROOT")
            .unwrap_or_else(|_| DEFAULT_HOST_ROOT.to_string())
            .into();
        let lease_namespace =
            env::var("LEASE_NAMESPACE").unwrap_or_else(|_| DEFAULT_LEASE_NAMESPACE.to_string());

        // The conventional controller-manager lease triple: 15s duration,
        // renew well inside it, short retry
        let lease_duration_seconds = env_u32("LEASE_DURATION_SECONDS", 15)?;
        let lease_retry = Duration::from_secs(u64::from(env_u32("LEASE_RETRY_SECONDS", 2)?));
        let sweep_interval = Duration::from_secs(u64::from(env_u32("SWEEP_INTERVAL_SECONDS", 30)?));

        Ok(Self {
            node_name,
            host_root,
            lease_namespace,
            lease_duration_seconds,
            lease_retry,
            sweep_interval,
        })
    }
}

fn env_u32(name: &str, default: u32) -> Result<u32, ControllerError> {
    match env::var(name) {
        Ok(value) => value.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("{name} must be an integer, got {value:?}"))
        }),
        Err(_) => Ok(default),
    }
}
