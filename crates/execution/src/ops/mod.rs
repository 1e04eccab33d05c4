//! Operator implementations.
//!
//! Non-terminal operators turn their input streams into one output stream;
//! terminal operators (send, root) consume their input and drive the task.

mod exchange;
mod join;
mod modify;
mod source;
mod transform;

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use shardex_codec::Tuple;
use shardex_common::{global_metrics, Location, PartitionId, Result, ShardexError, TableId};
use shardex_storage::{RangeDistribution, StoreInstance};

use crate::context::{NodeServices, SharedTaskContext};
use crate::operator::{Operator, OperatorKind};
use crate::stream::SendableTupleStream;

/// Build the output stream of a non-terminal operator.
pub fn execute(op: &Operator, mut inputs: Vec<SendableTupleStream>, ctx: &SharedTaskContext) -> Result<SendableTupleStream> {
    let schema = op
        .outputs
        .first()
        .map(|o| o.schema.clone())
        .ok_or_else(|| ShardexError::Construction(format!("operator {} ({}) has no output", op.id, op.name())))?;
    match &op.kind {
        OperatorKind::Values(exec) => source::values(exec),
        OperatorKind::GetByKeys(exec) => source::get_by_keys(exec, ctx),
        OperatorKind::PartScan(exec) => source::part_scan(exec, ctx),
        OperatorKind::Filter(exec) => transform::filter(exec, pop_input(op, &mut inputs)?),
        OperatorKind::Project(exec) => transform::project(exec, pop_input(op, &mut inputs)?),
        OperatorKind::HashJoin(exec) => {
            let build = pop_input(op, &mut inputs)?;
            let probe = pop_input(op, &mut inputs)?;
            join::hash_join(exec, schema, probe, build)
        }
        OperatorKind::Modify(exec) => modify::modify(exec, pop_input(op, &mut inputs)?, ctx),
        OperatorKind::SumUp => Ok(modify::sum_up(inputs)),
        OperatorKind::Receive(exec) => Ok(exchange::receive(exec, schema, ctx)),
        OperatorKind::Send(_) | OperatorKind::Root => Err(ShardexError::Construction(format!(
            "terminal operator {} ({}) has no output stream",
            op.id,
            op.name()
        ))),
    }
}

/// Drive a terminal operator to completion; returns the rows a root collected.
pub async fn run_terminal(op: Operator, mut inputs: Vec<SendableTupleStream>, ctx: SharedTaskContext) -> Result<Vec<Tuple>> {
    let input = pop_input(&op, &mut inputs)?;
    let started = Instant::now();
    let (consumed, rows) = match &op.kind {
        OperatorKind::Send(exec) => (exchange::run_send(exec, input, &ctx).await?, Vec::new()),
        OperatorKind::Root => {
            let rows = collect_root(input).await?;
            (rows.len() as u64, rows)
        }
        _ => {
            return Err(ShardexError::Construction(format!(
                "operator {} ({}) is not terminal",
                op.id,
                op.name()
            )))
        }
    };
    global_metrics().record_operator(
        ctx.job_id.0,
        ctx.task_id.0,
        op.name(),
        consumed,
        rows.len() as u64,
        started.elapsed().as_secs_f64(),
    );
    Ok(rows)
}

fn pop_input(op: &Operator, inputs: &mut Vec<SendableTupleStream>) -> Result<SendableTupleStream> {
    inputs
        .pop()
        .ok_or_else(|| ShardexError::Construction(format!("operator {} ({}) is missing an input", op.id, op.name())))
}

async fn collect_root(mut input: SendableTupleStream) -> Result<Vec<Tuple>> {
    let mut rows = Vec::new();
    while let Some(t) = input.next().await {
        rows.push(t?);
    }
    Ok(rows)
}

/// Store instance of `part`, which must live on this node.
pub(crate) fn partition_store(
    node: &NodeServices,
    table: TableId,
    distributions: &[RangeDistribution],
    part: PartitionId,
) -> Result<Arc<dyn StoreInstance>> {
    let dist = distributions
        .iter()
        .find(|d| d.id == part)
        .ok_or_else(|| ShardexError::Routing(format!("partition {part} of table {table} is not in the distribution table")))?;
    check_local(node, &dist.location, table, part)?;
    node.stores.instance(table, part)
}

fn check_local(node: &NodeServices, owner: &Location, table: TableId, part: PartitionId) -> Result<()> {
    if *owner != node.location {
        return Err(ShardexError::Routing(format!(
            "partition {part} of table {table} lives at {owner}, not at {}",
            node.location
        )));
    }
    Ok(())
}

/// Prefix codec and routing errors with the table they concern.
pub(crate) fn in_table(table: &str) -> impl Fn(ShardexError) -> ShardexError + '_ {
    move |e| match e {
        ShardexError::Codec(m) => ShardexError::Codec(format!("table '{table}': {m}")),
        ShardexError::Routing(m) => ShardexError::Routing(format!("table '{table}': {m}")),
        other => other,
    }
}
