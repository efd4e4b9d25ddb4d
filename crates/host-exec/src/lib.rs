//! Host Script Execution
//!
//! Launches node-task scripts as host processes and provides the process
//! control the cleanup sweep relies on: pid lookup, command-line
//! verification, and verified kill.
//!
//! # Example
//!
//! ```no_run
//! use host_exec::{HostExecutor, ScriptExecutor, TaskWorkspace};
//! use std::time::Duration;
//! use tokio::sync::oneshot;
//!
//! # async fn example() -> Result<(), host_exec::ExecError> {
//! let workspace = TaskWorkspace::new("/mnt/host");
//! let script = workspace.write_script("2f9d", "echo hello")?;
//!
//! let executor = HostExecutor::new();
//! let (started_tx, mut started_rx) = oneshot::channel();
//! let outcome = executor
//!     .start_script(script, Duration::from_secs(30), started_tx)
//!     .await?;
//! # let _ = (outcome, started_rx.try_recv());
//! # Ok(())
//! # }
//! ```

pub mod error;
#[path = "trait.rs"]
pub mod exec_trait;
pub mod executor;
pub mod workspace;
#[cfg(feature = "test-util")]
pub mod mock;

pub use error::ExecError;
pub use exec_trait::{KillResult, ProcessStarted, ScriptExecutor, ScriptOutcome};
pub use executor::HostExecutor;
pub use workspace::TaskWorkspace;
#[cfg(feature = "test-util")]
pub use mock::MockExecutor;
