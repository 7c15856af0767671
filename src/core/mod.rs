//! Core value types shared by the parser and the interpreter.
//!
//! This module contains:
//! - Compiled reference paths (`$.a.b`, `$$.Map.Item.Value`)
//! - Error names and failure values
//! - Execution status and state type enumerations
//! - The append-only event history
//!
//! Nothing in this module performs I/O.

mod failure;
mod history;
mod path;
mod status;

pub use failure::{ErrorName, Failure};
pub use history::{EventHistory, HistoryEvent, HistoryEventType};
pub use path::{JsonPath, PathError, PathRoot, Segment};
pub use status::{ExecutionStatus, StateType};
