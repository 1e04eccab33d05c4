//! Lowers a located physical plan into a [`Job`].
//!
//! Every plan node becomes one operator in the task of its location. Edges
//! between two locations are never linked directly: [`exchange`] puts a send
//! operator into the producing task and a receive operator into the consuming
//! one, and the consumer reads from the receive side instead.

use arrow_schema::SchemaRef;
use shardex_common::{JobId, Location, OperatorId, Result, ShardexError, Tag};
use shardex_execution::{Operator, OperatorKind, OutputHint, ReceiveExec, SendExec};
use shardex_planner::{PhysicalOp, PlanNode};
use tracing::debug;

use crate::job::Job;

/// One output of an operator already placed in the job.
#[derive(Debug, Clone)]
pub struct ProducerOutput {
    pub location: Location,
    pub operator: OperatorId,
    pub output: usize,
    pub schema: SchemaRef,
    pub hint: OutputHint,
}

/// Build the job for `plan`. A root collector is appended at the plan's
/// top location unless the plan already ends in one.
pub fn build_job(id: JobId, plan: &PlanNode) -> Result<Job> {
    let job = Job::new(id);
    match plan.op {
        PhysicalOp::Root => {
            let [input] = plan.inputs.as_slice() else {
                return Err(ShardexError::Construction(format!(
                    "Root expects 1 input(s), got {}",
                    plan.inputs.len()
                )));
            };
            let produced = lower(&job, input)?;
            let location = plan.location.clone().unwrap_or_else(|| produced.location.clone());
            add_root(&job, produced, &location)?;
        }
        _ => {
            let produced = lower(&job, plan)?;
            let location = produced.location.clone();
            add_root(&job, produced, &location)?;
        }
    }
    job.validate()?;
    debug!(job_id = %id, tasks = job.locations().len(), "job built");
    Ok(job)
}

fn add_root(job: &Job, produced: ProducerOutput, location: &Location) -> Result<()> {
    let produced = exchange(job, produced, location)?;
    let root = job.next_operator_id();
    job.add_operator(
        location,
        Operator::new(root, OperatorKind::Root, vec![produced.schema.clone()], produced.schema.clone()),
    )?;
    job.link(location, produced.operator, produced.output, root, 0)
}

fn lower(job: &Job, node: &PlanNode) -> Result<ProducerOutput> {
    if matches!(node.op, PhysicalOp::Root) {
        return Err(ShardexError::Construction("Root may only appear at the top of a plan".to_string()));
    }
    let inputs = node
        .inputs
        .iter()
        .map(|input| lower(job, input))
        .collect::<Result<Vec<_>>>()?;
    let location = node
        .location
        .clone()
        .or_else(|| inputs.first().map(|p| p.location.clone()))
        .ok_or_else(|| ShardexError::Construction(format!("{} has no location", node.op.name())))?;

    let schemas: Vec<SchemaRef> = inputs.iter().map(|p| p.schema.clone()).collect();
    let schema = node.op.output_schema(&schemas)?;
    let hint = hint_for(&node.op, &inputs);

    let id = job.next_operator_id();
    let mut op = Operator::new(id, node.op.clone().into(), schemas, schema.clone());
    if let Some(out) = op.outputs.first_mut() {
        out.hint = hint.clone();
    }
    job.add_operator(&location, op)?;

    for (slot, produced) in inputs.into_iter().enumerate() {
        let produced = exchange(job, produced, &location)?;
        job.link(&location, produced.operator, produced.output, id, slot)?;
    }
    Ok(ProducerOutput {
        location,
        operator: id,
        output: 0,
        schema,
        hint,
    })
}

fn hint_for(op: &PhysicalOp, inputs: &[ProducerOutput]) -> OutputHint {
    match op {
        PhysicalOp::PartScan(scan) => OutputHint {
            partition: scan.partition,
            to_sum_up: false,
        },
        PhysicalOp::Modify(_) => OutputHint {
            partition: inputs.first().and_then(|p| p.hint.partition),
            to_sum_up: true,
        },
        PhysicalOp::Filter(_) | PhysicalOp::Project(_) => {
            inputs.first().map(|p| p.hint.clone()).unwrap_or_default()
        }
        _ => OutputHint::default(),
    }
}

/// Make `produced` available at `target`.
///
/// Same location: returned unchanged. Otherwise a send operator is added to
/// the producer's task, wired to `produced`, and a receive operator with a
/// fresh id is added to the task at `target`; that id is the tag shared by
/// the pair. The receive output carries the producer's hints and is returned
/// as the new producer.
pub fn exchange(job: &Job, produced: ProducerOutput, target: &Location) -> Result<ProducerOutput> {
    if &produced.location == target {
        return Ok(produced);
    }
    let receive_id = job.next_operator_id();
    let send_id = job.next_operator_id();
    let tag = Tag::new(job.id(), receive_id);

    let send = Operator::new(
        send_id,
        OperatorKind::Send(SendExec {
            target: target.clone(),
            tag,
        }),
        vec![produced.schema.clone()],
        produced.schema.clone(),
    );
    job.add_operator(&produced.location, send)?;
    job.link(&produced.location, produced.operator, produced.output, send_id, 0)?;

    let receive = Operator::new(
        receive_id,
        OperatorKind::Receive(ReceiveExec {
            source: produced.location.clone(),
            tag,
        }),
        vec![],
        produced.schema.clone(),
    );
    job.add_operator(target, receive)?;
    job.with_output(target, receive_id, 0, |out| out.hint = produced.hint.clone())?;

    debug!(job_id = %job.id(), %tag, from = %produced.location, to = %target, "exchange inserted");
    Ok(ProducerOutput {
        location: target.clone(),
        operator: receive_id,
        output: 0,
        schema: produced.schema,
        hint: produced.hint,
    })
}
