//! Storage-facing contracts consumed by execution: store instances, table and
//! partition metadata, and the partition router.

pub mod catalog;
pub mod partition;
pub mod provider;

pub use catalog::*;
pub use partition::{calc_part_id, validate_distributions, PartitionStrategy, HASH_FUNC_NAME, RANGE_FUNC_NAME};
pub use provider::*;
