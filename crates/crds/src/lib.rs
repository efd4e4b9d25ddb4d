//! neonKUBE CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the neonKUBE node-task
//! controller.

pub mod node_task;
pub mod owner;
pub mod status_patch;

pub use node_task::*;
pub use owner::*;
pub use status_patch::*;
