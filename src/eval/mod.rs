//! Runtime evaluation of paths, choice rules, templates and intrinsics.
//!
//! Everything here is synchronous and side-effect free apart from the
//! event log handle carried by [`Environment`].

pub mod dataflow;
pub mod environment;
pub mod intrinsic;
pub mod operators;

pub use dataflow::{apply_result_path, filter, finish_output, prepare_input, render_template};
pub use environment::{Environment, EventLog, ExecutionContext, OperandStack, StackValue};
pub use intrinsic::evaluate_intrinsic;
pub use operators::{compare, evaluate_rule, wildcard_match};
