//! Leaf operators: literal rows, point lookups and partition scans.

use std::sync::Arc;

use arrow_schema::SchemaRef;
use futures::{stream, TryStreamExt};
use shardex_codec::{convert_tuple, KeyValue, TableCodec, Tuple};
use shardex_common::{PartitionId, Result, ShardexError};
use shardex_planner::{GetByKeysExec, PartScanExec, TableSource, ValuesExec};
use shardex_storage::{calc_part_id, RangeDistribution};
use tracing::debug;

use super::{in_table, partition_store};
use crate::context::{NodeServices, SharedTaskContext};
use crate::expressions::{accepts, compile_predicate, PhysicalExpr};
use crate::stream::{tuple_stream, SendableTupleStream};

pub(super) fn values(exec: &ValuesExec) -> Result<SendableTupleStream> {
    let rows = exec
        .rows
        .iter()
        .map(|r| convert_tuple(&exec.schema, r))
        .collect::<Result<Vec<_>>>()?;
    Ok(tuple_stream(exec.schema.clone(), stream::iter(rows.into_iter().map(Ok))))
}

pub(super) fn get_by_keys(exec: &GetByKeysExec, ctx: &SharedTaskContext) -> Result<SendableTupleStream> {
    let reader = SourceReader::new(&exec.source, ctx)?;
    let schema = reader.schema.clone();
    let keys = exec.keys.clone();
    Ok(lazy_rows(schema, async move { reader.lookup(&keys) }))
}

pub(super) fn part_scan(exec: &PartScanExec, ctx: &SharedTaskContext) -> Result<SendableTupleStream> {
    let reader = SourceReader::new(&exec.source, ctx)?;
    let schema = reader.schema.clone();
    let partition = exec.partition;
    Ok(lazy_rows(schema, async move { reader.scan(partition) }))
}

/// Rows are fetched when the stream is first polled.
fn lazy_rows<F>(schema: SchemaRef, fetch: F) -> SendableTupleStream
where
    F: std::future::Future<Output = Result<Vec<Tuple>>> + Send + 'static,
{
    let rows = stream::once(fetch)
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
        .try_flatten();
    tuple_stream(schema, rows)
}

struct SourceReader {
    source: TableSource,
    codec: TableCodec,
    filter: Option<Arc<dyn PhysicalExpr>>,
    schema: SchemaRef,
    node: Arc<NodeServices>,
}

impl SourceReader {
    fn new(source: &TableSource, ctx: &SharedTaskContext) -> Result<Self> {
        let codec = source.table.codec()?;
        let filter = source
            .filter
            .as_ref()
            .map(|f| compile_predicate(f, &source.table.schema))
            .transpose()?;
        Ok(Self {
            source: source.clone(),
            codec,
            filter,
            schema: source.output_schema()?,
            node: ctx.node.clone(),
        })
    }

    fn lookup(&self, keys: &[Tuple]) -> Result<Vec<Tuple>> {
        let table = &self.source.table;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let encoded = self.codec.encode_key(key).map_err(in_table(&table.name))?;
            let part = calc_part_id(table.partition_func(), &encoded, &self.source.distributions)
                .map_err(in_table(&table.name))?;
            let store = partition_store(&self.node, table.id, &self.source.distributions, part)
                .map_err(in_table(&table.name))?;
            let Some(value) = store.get(&encoded)? else {
                continue;
            };
            let row = self.codec.decode(&KeyValue { key: encoded, value })?;
            if let Some(row) = self.accept(row)? {
                out.push(row);
            }
        }
        debug!(table = %table.name, keys = keys.len(), found = out.len(), "point lookup done");
        Ok(out)
    }

    fn scan(&self, partition: Option<PartitionId>) -> Result<Vec<Tuple>> {
        let table = &self.source.table;
        let parts: Vec<&RangeDistribution> = match partition {
            Some(p) => vec![self
                .source
                .distributions
                .iter()
                .find(|d| d.id == p)
                .ok_or_else(|| ShardexError::Routing(format!("table '{}' has no partition {p}", table.name)))?],
            None => self
                .source
                .distributions
                .iter()
                .filter(|d| d.location == self.node.location)
                .collect(),
        };
        let mut out = Vec::new();
        for dist in parts {
            let store = partition_store(&self.node, table.id, &self.source.distributions, dist.id)
                .map_err(in_table(&table.name))?;
            for kv in store.scan(&dist.start_key, &dist.end_key)? {
                let row = self.codec.decode(&kv)?;
                if let Some(row) = self.accept(row)? {
                    out.push(row);
                }
            }
        }
        debug!(table = %table.name, partition = ?partition, rows = out.len(), "partition scan done");
        Ok(out)
    }

    fn accept(&self, row: Tuple) -> Result<Option<Tuple>> {
        if let Some(filter) = &self.filter {
            if !accepts(filter.as_ref(), &row)? {
                return Ok(None);
            }
        }
        Ok(Some(match &self.source.selection {
            Some(cols) => cols.iter().map(|&c| row[c].clone()).collect(),
            None => row,
        }))
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use shardex_codec::Value;
    use shardex_common::{PartitionId, ShardexError};
    use shardex_planner::{BinaryOp, Expr, GetByKeysExec, PartScanExec, TableSource, ValuesExec};

    use super::{get_by_keys, part_scan, values};
    use crate::test_util::{insert_rows, int_str_schema, local_node, remote_users, task_ctx, users_table};

    #[tokio::test]
    async fn values_converts_rows_to_schema() {
        let schema = int_str_schema();
        let exec = ValuesExec {
            schema: schema.clone(),
            rows: vec![vec![Value::Double(3.0), Value::Str("c".into())]],
        };
        let rows: Vec<_> = values(&exec).expect("values").try_collect().await.expect("rows");
        assert_eq!(rows, vec![vec![Value::Int(3), Value::Str("c".into())]]);
    }

    #[tokio::test]
    async fn lookup_skips_missing_keys_and_applies_filter() {
        let node = local_node("a");
        let (table, dists) = users_table(&node.location);
        insert_rows(&node, &table, &dists, &[(1, "ann"), (2, "bob"), (30, "cy")]);
        let ctx = task_ctx(node);

        let exec = GetByKeysExec {
            source: TableSource {
                table: table.clone(),
                distributions: dists.clone(),
                filter: Some(Expr::binary(Expr::col(0), BinaryOp::NotEq, Expr::lit(Value::Int(2)))),
                selection: Some(vec![1]),
            },
            keys: vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(7)], vec![Value::Int(30)]],
        };
        let rows: Vec<_> = get_by_keys(&exec, &ctx).expect("op").try_collect().await.expect("rows");
        assert_eq!(rows, vec![vec![Value::Str("ann".into())], vec![Value::Str("cy".into())]]);
    }

    #[tokio::test]
    async fn scan_of_one_partition_stays_in_its_range() {
        let node = local_node("a");
        let (table, dists) = users_table(&node.location);
        insert_rows(&node, &table, &dists, &[(1, "ann"), (10, "bob"), (30, "cy")]);
        let ctx = task_ctx(node);

        let exec = PartScanExec {
            source: TableSource {
                table,
                distributions: dists,
                filter: None,
                selection: None,
            },
            partition: Some(PartitionId(2)),
        };
        let rows: Vec<_> = part_scan(&exec, &ctx).expect("op").try_collect().await.expect("rows");
        assert_eq!(rows, vec![vec![Value::Int(10), Value::Str("bob".into())]]);
    }

    #[tokio::test]
    async fn scan_of_remote_partition_is_a_routing_error() {
        let node = local_node("a");
        let (table, dists) = remote_users("elsewhere");
        let ctx = task_ctx(node);
        let exec = PartScanExec {
            source: TableSource {
                table,
                distributions: dists,
                filter: None,
                selection: None,
            },
            partition: Some(PartitionId(1)),
        };
        let err = part_scan(&exec, &ctx)
            .expect("op")
            .try_collect::<Vec<_>>()
            .await
            .expect_err("remote partition");
        assert!(matches!(err, ShardexError::Routing(_)), "{err}");
    }
}
