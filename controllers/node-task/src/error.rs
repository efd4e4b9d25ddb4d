//! Controller-specific error types.
//!
//! This module defines error types specific to the Node Task Controller
//! that are not covered by upstream library errors.

use host_exec::ExecError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Node Task Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Host execution or task workspace error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Task spec failed validation
    #[error("Task validation failed: {0}")]
    #[allow(dead_code)] // Reserved for future use
    Validation(#[from] crds::ValidationError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
