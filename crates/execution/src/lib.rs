//! Execution-layer primitives: the operator/task model and the operators that
//! run inside one task.
//!
//! Key modules:
//! - [`operator`]: operators, their typed slots and links
//! - [`task`]: per-location operator sets and the task driver
//! - [`ops`]: operator implementations over tuple streams
//! - [`expressions`]: compiled scalar expressions
//! - [`context`]: node services and per-task context

pub mod context;
pub mod expressions;
pub mod operator;
pub mod ops;
pub mod stream;
pub mod task;

#[cfg(test)]
mod test_util;

pub use context::{NodeServices, SharedTaskContext, TaskContext};
pub use expressions::{compile_expr, PhysicalExpr};
pub use operator::{InputSlot, Link, Operator, OperatorKind, Output, OutputHint, ReceiveExec, SendExec};
pub use stream::{empty_stream, tuple_stream, SendableTupleStream, StreamAdapter, TupleStream};
pub use task::{Task, TaskOutcome, TaskState};
