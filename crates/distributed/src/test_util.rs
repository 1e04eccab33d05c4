//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use arrow_schema::{DataType, Field, Schema};
use shardex_codec::{encode_key, Value};
use shardex_common::{Location, TableId};
use shardex_storage::{ranges_from_boundaries, RangeDistribution, TableDefinition};

/// `orders(id, amount)` split at 100 and 200. A single location owns every
/// partition; three locations own one partition each.
pub(crate) fn orders_table(locations: &[Location]) -> (TableDefinition, Vec<RangeDistribution>) {
    let table = TableDefinition {
        id: TableId(7),
        name: "orders".to_string(),
        schema: Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("amount", DataType::Float64, true),
        ])),
        key_columns: vec![0],
        partition: None,
    };
    let owners: Vec<Location> = match locations {
        [only] => vec![only.clone(); 3],
        many => many.to_vec(),
    };
    let bounds = vec![encode_key(&[Value::Int(100)]), encode_key(&[Value::Int(200)])];
    let dists = ranges_from_boundaries(&bounds, &owners).expect("ranges");
    (table, dists)
}
