//! Running state machines.
//!
//! [`Interpreter`] is the entry point: register definitions and task
//! resources, start executions, then poll or await them.

pub mod config;
mod driver;
pub mod error;
pub mod service;
pub mod snapshot;
pub mod task;

pub use config::{InterpreterConfig, InterpreterConfigBuilder, UnknownResourcePolicy};
pub use error::{ConfigError, ExecutionError, SnapshotError};
pub use service::{ExecutionDescription, Interpreter, StartedExecution};
pub use snapshot::{Snapshot, SNAPSHOT_VERSION};
pub use task::{AsyncFnHandler, FnHandler, ResourceRegistry, TaskHandler};
