//! Inner equi-join: the build side is drained into a hash table keyed by
//! the encoded join key, then the probe side streams through it.

use std::collections::HashMap;

use arrow_schema::SchemaRef;
use futures::{stream, TryStreamExt};
use shardex_codec::{encode_key, Tuple, Value};
use shardex_common::{Result, ShardexError};
use shardex_planner::HashJoinExec;
use tracing::debug;

use crate::stream::{tuple_stream, SendableTupleStream};

pub(super) fn hash_join(
    exec: &HashJoinExec,
    schema: SchemaRef,
    probe: SendableTupleStream,
    build: SendableTupleStream,
) -> Result<SendableTupleStream> {
    check_keys(exec, &probe.schema(), &build.schema())?;
    let probe_keys = exec.probe_keys.clone();
    let build_keys = exec.build_keys.clone();

    let out = stream::once(async move {
        let table = build_table(build, &build_keys).await?;
        let matched = probe
            .map_ok(move |row| stream::iter(joined_rows(&table, &probe_keys, row)))
            .try_flatten();
        Ok::<_, ShardexError>(matched)
    })
    .try_flatten();
    Ok(tuple_stream(schema, out))
}

async fn build_table(build: SendableTupleStream, keys: &[usize]) -> Result<HashMap<Vec<u8>, Vec<Tuple>>> {
    let rows: Vec<Tuple> = build.try_collect().await?;
    let mut table: HashMap<Vec<u8>, Vec<Tuple>> = HashMap::new();
    let mut kept = 0usize;
    for row in rows {
        if let Some(key) = join_key(&row, keys) {
            table.entry(key).or_default().push(row);
            kept += 1;
        }
    }
    debug!(keys = table.len(), rows = kept, "hash join build side ready");
    Ok(table)
}

fn joined_rows(table: &HashMap<Vec<u8>, Vec<Tuple>>, keys: &[usize], row: Tuple) -> Vec<Result<Tuple>> {
    let Some(builds) = join_key(&row, keys).and_then(|k| table.get(&k)) else {
        return Vec::new();
    };
    builds
        .iter()
        .map(|b| Ok(row.iter().chain(b.iter()).cloned().collect()))
        .collect()
}

/// Encoded key, or `None` when any key column is null.
fn join_key(row: &[Value], cols: &[usize]) -> Option<Vec<u8>> {
    let mut key = Vec::with_capacity(cols.len());
    for &c in cols {
        let v = row.get(c)?;
        if v.is_null() {
            return None;
        }
        key.push(v.clone());
    }
    Some(encode_key(&key))
}

fn check_keys(exec: &HashJoinExec, probe: &SchemaRef, build: &SchemaRef) -> Result<()> {
    if exec.probe_keys.len() != exec.build_keys.len() || exec.probe_keys.is_empty() {
        return Err(ShardexError::Construction(format!(
            "hash join needs matching non-empty key lists, got {} and {}",
            exec.probe_keys.len(),
            exec.build_keys.len()
        )));
    }
    for (&p, &b) in exec.probe_keys.iter().zip(&exec.build_keys) {
        let (Some(pf), Some(bf)) = (probe.fields().get(p), build.fields().get(b)) else {
            return Err(ShardexError::Construction(format!("hash join key #{p}/#{b} out of range")));
        };
        if pf.data_type() != bf.data_type() {
            return Err(ShardexError::Construction(format!(
                "hash join key '{}' ({}) does not match '{}' ({})",
                pf.name(),
                pf.data_type(),
                bf.name(),
                bf.data_type()
            )));
        }
    }
    Ok(())
}
