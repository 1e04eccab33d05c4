//! Physical plan consumed by the job builder: an operator tree whose nodes
//! may carry an assigned location.

pub mod explain;
pub mod expr;
pub mod physical_plan;

pub use explain::{explain_plan, fmt_expr};
pub use expr::*;
pub use physical_plan::*;
