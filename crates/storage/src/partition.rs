//! Partition router: maps an encoded key to the partition owning it.
//!
//! Routing runs once per mutated row, so strategies only borrow the key and
//! the distribution table.

use shardex_common::{PartitionId, Result, ShardexError};

use crate::catalog::RangeDistribution;

pub const RANGE_FUNC_NAME: &str = "RANGE";
pub const HASH_FUNC_NAME: &str = "HASH";

pub trait PartitionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `distributions` must have passed [`validate`](Self::validate).
    fn calc_part_id(&self, key: &[u8], distributions: &[RangeDistribution]) -> Result<PartitionId>;

    /// Check that `distributions` is a distribution table this strategy can
    /// route over.
    fn validate(&self, distributions: &[RangeDistribution]) -> Result<()> {
        let mut ids: Vec<PartitionId> = distributions.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        match ids.windows(2).find(|w| w[0] == w[1]) {
            Some(w) => Err(ShardexError::Construction(format!(
                "partition {} appears twice in the distribution table",
                w[0]
            ))),
            None => Ok(()),
        }
    }
}

/// Greatest start key not above the key owns it.
#[derive(Debug, Default, Clone, Copy)]
pub struct RangeStrategy;

impl PartitionStrategy for RangeStrategy {
    fn name(&self) -> &'static str {
        RANGE_FUNC_NAME
    }

    fn calc_part_id(&self, key: &[u8], distributions: &[RangeDistribution]) -> Result<PartitionId> {
        let idx = distributions.partition_point(|d| d.start_key.as_slice() <= key);
        if idx == 0 {
            return Err(ShardexError::Routing(format!(
                "key {} is below the first partition boundary",
                hex(key)
            )));
        }
        let owner = &distributions[idx - 1];
        if !owner.end_key.is_empty() && key >= owner.end_key.as_slice() {
            return Err(ShardexError::Routing(format!(
                "key {} is outside partition {} [{}, {})",
                hex(key),
                owner.id,
                hex(&owner.start_key),
                hex(&owner.end_key)
            )));
        }
        Ok(owner.id)
    }

    /// Ranges sorted by start key, non-overlapping, only the last unbounded.
    fn validate(&self, distributions: &[RangeDistribution]) -> Result<()> {
        for w in distributions.windows(2) {
            let (prev, next) = (&w[0], &w[1]);
            if prev.start_key >= next.start_key {
                return Err(ShardexError::Construction(format!(
                    "partition {} starts at {} but follows partition {} starting at {}",
                    next.id,
                    hex(&next.start_key),
                    prev.id,
                    hex(&prev.start_key)
                )));
            }
            if prev.end_key.is_empty() || prev.end_key > next.start_key {
                return Err(ShardexError::Construction(format!(
                    "partition {} overlaps partition {}",
                    prev.id, next.id
                )));
            }
        }
        if let Some(bad) = distributions
            .iter()
            .find(|d| !d.end_key.is_empty() && d.end_key <= d.start_key)
        {
            return Err(ShardexError::Construction(format!("partition {} has an empty range", bad.id)));
        }
        Ok(())
    }
}

/// CRC32C of the key modulo the bucket count; buckets follow partition id order.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashStrategy;

impl PartitionStrategy for HashStrategy {
    fn name(&self) -> &'static str {
        HASH_FUNC_NAME
    }

    fn calc_part_id(&self, key: &[u8], distributions: &[RangeDistribution]) -> Result<PartitionId> {
        if distributions.is_empty() {
            return Err(ShardexError::Routing(
                "hash routing over an empty distribution table".to_string(),
            ));
        }
        let bucket = crc32c::crc32c(key) as usize % distributions.len();
        // nth smallest id without sorting or allocating
        let ids_below = |id: PartitionId| distributions.iter().filter(|d| d.id < id).count();
        distributions
            .iter()
            .map(|d| d.id)
            .find(|&id| ids_below(id) == bucket)
            .ok_or_else(|| ShardexError::Routing("duplicate partition ids in distribution table".to_string()))
    }
}

static RANGE: RangeStrategy = RangeStrategy;
static HASH: HashStrategy = HashStrategy;

/// Look up a strategy by its declared function name (case-insensitive).
pub fn strategy(func_name: &str) -> Result<&'static dyn PartitionStrategy> {
    if func_name.eq_ignore_ascii_case(RANGE_FUNC_NAME) {
        Ok(&RANGE)
    } else if func_name.eq_ignore_ascii_case(HASH_FUNC_NAME) {
        Ok(&HASH)
    } else {
        Err(ShardexError::Routing(format!(
            "unknown partition function '{func_name}'"
        )))
    }
}

/// Check a distribution table against the strategy named `func_name`.
pub fn validate_distributions(func_name: &str, distributions: &[RangeDistribution]) -> Result<()> {
    let strategy = strategy(func_name).map_err(|e| ShardexError::Construction(e.to_string()))?;
    strategy.validate(distributions)
}

pub fn calc_part_id(func_name: &str, key: &[u8], distributions: &[RangeDistribution]) -> Result<PartitionId> {
    strategy(func_name)?.calc_part_id(key, distributions)
}

fn hex(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "MIN".to_string();
    }
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
