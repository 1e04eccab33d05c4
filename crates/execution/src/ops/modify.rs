//! Write operators and the count aggregation above them.

use std::time::Instant;

use futures::{stream, StreamExt};
use shardex_codec::{convert_tuple, Tuple, Value};
use shardex_common::{global_metrics, Result, ShardexError};
use shardex_planner::{count_schema, ModifyExec, ModifyKind};
use shardex_storage::calc_part_id;
use tracing::debug;

use super::{in_table, partition_store};
use crate::context::SharedTaskContext;
use crate::stream::{tuple_stream, SendableTupleStream};

/// Apply every input row to its owning partition and emit one row holding
/// the number of rows actually affected.
pub(super) fn modify(exec: &ModifyExec, input: SendableTupleStream, ctx: &SharedTaskContext) -> Result<SendableTupleStream> {
    let codec = exec.table.codec()?;
    let exec = exec.clone();
    let ctx = ctx.clone();
    let count = async move {
        let started = Instant::now();
        let table = &exec.table;
        let mut input = input;
        let (mut seen, mut affected) = (0u64, 0u64);
        while let Some(row) = input.next().await {
            let row = convert_tuple(&table.schema, &row?).map_err(in_table(&table.name))?;
            let kv = codec.encode(&row).map_err(in_table(&table.name))?;
            let part = calc_part_id(table.partition_func(), &kv.key, &exec.distributions)
                .map_err(in_table(&table.name))?;
            let store = partition_store(&ctx.node, table.id, &exec.distributions, part)
                .map_err(in_table(&table.name))?;
            let applied = match exec.kind {
                ModifyKind::Insert => store.insert(kv)?,
                ModifyKind::Update => store.update(kv)?,
                ModifyKind::Delete => store.delete(&kv.key)?,
            };
            seen += 1;
            affected += u64::from(applied);
        }
        global_metrics().record_operator(
            ctx.job_id.0,
            ctx.task_id.0,
            "Modify",
            seen,
            affected,
            started.elapsed().as_secs_f64(),
        );
        debug!(table = %table.name, kind = ?exec.kind, seen, affected, "modify done");
        Ok::<_, ShardexError>(vec![Value::Int(count_value(affected)?)])
    };
    Ok(tuple_stream(count_schema(), stream::once(count)))
}

/// Sum the single count row of every input into one count row.
pub(super) fn sum_up(inputs: Vec<SendableTupleStream>) -> SendableTupleStream {
    let total = async move {
        let mut all = stream::select_all(inputs);
        let mut total = 0i64;
        while let Some(row) = all.next().await {
            total = row?
                .first()
                .and_then(Value::as_i64)
                .and_then(|n| total.checked_add(n))
                .ok_or_else(|| ShardexError::Execution("sum up input is not a row count".to_string()))?;
        }
        Ok::<Tuple, ShardexError>(vec![Value::Int(total)])
    };
    tuple_stream(count_schema(), stream::once(total))
}

fn count_value(n: u64) -> Result<i64> {
    i64::try_from(n).map_err(|_| ShardexError::Execution(format!("row count {n} overflows")))
}
