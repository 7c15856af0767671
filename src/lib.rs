//! Stepwise: an Amazon States Language interpreter
//!
//! Stepwise parses ASL state machine definitions into an immutable,
//! typed tree and runs executions of them locally. Parsing is pure and
//! structural; running is driven by Tokio, with Task work supplied by
//! registered handlers.
//!
//! # Core Concepts
//!
//! - **Definition**: a parsed, cached state machine (`definition`)
//! - **Evaluation**: paths, choice rules, templates and intrinsics (`eval`)
//! - **Execution**: one run of a definition, its status and event history (`execution`)
//!
//! # Example
//!
//! ```rust
//! use stepwise::{DefinitionRef, ExecutionStatus, Interpreter};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let interpreter = Interpreter::new();
//! let key = DefinitionRef::new("router", 1);
//! interpreter.register_definition(&key, r#"{
//!     "StartAt": "Route",
//!     "States": {
//!         "Route": {
//!             "Type": "Choice",
//!             "Choices": [{"Variable": "$.V", "StringEquals": "A", "Next": "X"}],
//!             "Default": "Y"
//!         },
//!         "X": {"Type": "Pass", "Result": "went to X", "End": true},
//!         "Y": {"Type": "Pass", "Result": "went to Y", "End": true}
//!     }
//! }"#).unwrap();
//!
//! let run = interpreter.start_execution(&key, None, json!({"V": "A"})).unwrap();
//! let done = interpreter.wait_for_completion(&run.execution_id).await.unwrap();
//! assert_eq!(done.status, ExecutionStatus::Succeeded);
//! assert_eq!(done.output, Some(json!("went to X")));
//! # }
//! ```

pub mod core;
pub mod definition;
pub mod eval;
pub mod execution;

// Re-export commonly used types
pub use core::{ErrorName, ExecutionStatus, Failure, HistoryEvent, HistoryEventType};
pub use definition::{parse, DefinitionRef, ParseError, StateMachine};
pub use execution::{
    ExecutionDescription, ExecutionError, Interpreter, InterpreterConfig, ResourceRegistry,
    Snapshot, TaskHandler,
};
