//! Distributed job layer: lowers a located plan into per-location tasks,
//! dispatches them and drives them to one result.
//!
//! Key modules:
//! - [`job`]: the location to task table and its id generator
//! - [`builder`]: plan lowering and exchange insertion
//! - [`runner`]: dispatch, cancellation and error consolidation
//! - [`node`] / [`cluster`]: task runtime per location, in-process cluster
//! - [`server`]: TCP node server and remote dispatcher

pub mod builder;
pub mod cluster;
pub mod explain;
pub mod job;
pub mod node;
pub mod runner;
pub mod server;

#[cfg(test)]
mod test_util;

pub use builder::{build_job, exchange, ProducerOutput};
pub use cluster::LocalCluster;
pub use explain::explain_job;
pub use job::{IdGenerator, Job};
pub use node::Node;
pub use runner::{JobResult, JobRunner, TaskDispatcher};
pub use server::{serve, RemoteError, TaskReport, TcpDispatcher};
