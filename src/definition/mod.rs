//! State machine definitions.
//!
//! Turns Amazon States Language JSON into an immutable, typed component
//! tree. Parsing is purely structural: it validates shapes and references
//! but never evaluates data.
//!
//! # Example
//!
//! ```rust
//! use stepwise::definition::{parse, StateKind};
//!
//! let machine = parse(r#"{
//!     "StartAt": "Check",
//!     "States": {
//!         "Check": {
//!             "Type": "Choice",
//!             "Choices": [{"Variable": "$.v", "StringEquals": "A", "Next": "Yes"}],
//!             "Default": "No"
//!         },
//!         "Yes": {"Type": "Succeed"},
//!         "No": {"Type": "Fail", "Error": "NotA"}
//!     }
//! }"#).unwrap();
//!
//! assert!(matches!(machine.state("Check").unwrap().kind, StateKind::Choice(_)));
//! ```

pub mod cache;
pub mod choice;
pub mod error;
pub mod model;
pub mod parser;
pub mod template;

pub use cache::{DefinitionCache, DefinitionRef};
pub use choice::{ChoiceRule, Comparison, ComparisonOperator, Operand, OperandKind};
pub use error::{DefinitionIssue, ParseError};
pub use model::{
    Catcher, ChoiceBranch, ChoiceState, DataFlow, FailState, MapState, ParallelState, PassState,
    PathFilter, ResultPath, Retrier, State, StateKind, StateMachine, SucceedState, TaskState,
    Transition, WaitDuration, WaitState,
};
pub use parser::{parse, parse_value};
pub use template::{IntrinsicArg, IntrinsicCall, IntrinsicFunction, PayloadTemplate};
