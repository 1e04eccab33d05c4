//! Shared configuration, error types, IDs, and observability primitives for Shardex crates.
//!
//! Architecture role:
//! - defines execution/runtime configuration passed across layers
//! - provides the common [`ShardexError`] / [`Result`] contracts
//! - hosts the prometheus-backed metrics registry
//!
//! Key modules:
//! - [`config`]
//! - [`error`]
//! - [`ids`]
//! - [`metrics`]

pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;

pub use config::ExecConfig;
pub use error::{Result, ShardexError};
pub use ids::*;
pub use metrics::{global_metrics, MetricsRegistry};
