use arrow_schema::SchemaRef;
use serde::{Deserialize, Serialize};
use shardex_codec::TableCodec;
use shardex_common::{Location, PartitionId, Result, ShardexError, TableId};

use crate::partition::RANGE_FUNC_NAME;

/// Partition function declared by a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionDefinition {
    pub func_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub id: TableId,
    pub name: String,
    pub schema: SchemaRef,
    /// Primary key column indexes into `schema`, in key order.
    pub key_columns: Vec<usize>,
    #[serde(default)]
    pub partition: Option<PartitionDefinition>,
}

impl TableDefinition {
    pub fn codec(&self) -> Result<TableCodec> {
        TableCodec::new(self.schema.clone(), self.key_columns.clone())
    }

    /// Declared partition function, RANGE when none is declared.
    pub fn partition_func(&self) -> &str {
        self.partition
            .as_ref()
            .map(|p| p.func_name.as_str())
            .unwrap_or(RANGE_FUNC_NAME)
    }
}

/// One entry of a table's distribution table.
///
/// The range is `[start_key, end_key)` over encoded keys. An empty
/// `start_key` is the minimum key and an empty `end_key` is unbounded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDistribution {
    pub id: PartitionId,
    #[serde(default)]
    pub start_key: Vec<u8>,
    #[serde(default)]
    pub end_key: Vec<u8>,
    pub location: Location,
}

impl RangeDistribution {
    pub fn contains(&self, key: &[u8]) -> bool {
        self.start_key.as_slice() <= key && (self.end_key.is_empty() || key < self.end_key.as_slice())
    }
}

/// Split the key space at `boundaries`, one partition per interval.
///
/// The first partition starts at the minimum key and the last is unbounded.
/// Partition ids are assigned from 1 in key order.
pub fn ranges_from_boundaries(boundaries: &[Vec<u8>], locations: &[Location]) -> Result<Vec<RangeDistribution>> {
    if locations.len() != boundaries.len() + 1 {
        return Err(ShardexError::InvalidConfig(format!(
            "{} boundaries need {} locations, got {}",
            boundaries.len(),
            boundaries.len() + 1,
            locations.len()
        )));
    }
    if boundaries.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ShardexError::InvalidConfig(
            "range boundaries must be strictly increasing".to_string(),
        ));
    }
    let mut starts = Vec::with_capacity(locations.len());
    starts.push(Vec::new());
    starts.extend(boundaries.iter().cloned());
    Ok(starts
        .iter()
        .enumerate()
        .zip(locations)
        .map(|((idx, start), location)| RangeDistribution {
            id: PartitionId(idx as u64 + 1),
            start_key: start.clone(),
            end_key: boundaries.get(idx).cloned().unwrap_or_default(),
            location: location.clone(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow_schema::{DataType, Field, Schema};
    use shardex_codec::{encode_key, Value};
    use shardex_common::{Location, PartitionId, TableId};

    use super::{ranges_from_boundaries, TableDefinition};

    #[test]
    fn boundaries_become_half_open_ranges() {
        let b100 = encode_key(&[Value::Int(100)]);
        let b200 = encode_key(&[Value::Int(200)]);
        let locs: Vec<_> = (0..3).map(|i| Location::new("n", 9000 + i)).collect();
        let ranges = ranges_from_boundaries(&[b100.clone(), b200.clone()], &locs).expect("ranges");
        assert_eq!(ranges.len(), 3);
        assert!(ranges[0].start_key.is_empty());
        assert_eq!(ranges[0].end_key, b100);
        assert_eq!(ranges[1].start_key, b100);
        assert!(ranges[2].end_key.is_empty());
        assert_eq!(ranges[2].id, PartitionId(3));
        assert!(ranges[1].contains(&b100));
        assert!(!ranges[1].contains(&b200));
    }

    #[test]
    fn rejects_unsorted_boundaries() {
        let locs: Vec<_> = (0..3).map(|i| Location::new("n", 9000 + i)).collect();
        let b = vec![encode_key(&[Value::Int(2)]), encode_key(&[Value::Int(1)])];
        assert!(ranges_from_boundaries(&b, &locs).is_err());
        assert!(ranges_from_boundaries(&b[..1], &locs).is_err());
    }

    #[test]
    fn table_without_partition_function_defaults_to_range() {
        let table = TableDefinition {
            id: TableId(1),
            name: "t".to_string(),
            schema: Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)])),
            key_columns: vec![0],
            partition: None,
        };
        assert_eq!(table.partition_func(), "RANGE");
        assert!(table.codec().is_ok());
    }
}
