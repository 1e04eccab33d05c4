//! A task is the set of operators a job runs at one location, linked into
//! a DAG. Running it builds one stream per operator output and drives every
//! terminal operator until its input is exhausted.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use arrow_schema::SchemaRef;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use shardex_codec::Tuple;
use shardex_common::{JobId, Location, OperatorId, Result, ShardexError, TaskId};
use tracing::{debug, info};

use crate::context::SharedTaskContext;
use crate::operator::{Link, Operator, OperatorKind};
use crate::ops;
use crate::stream::SendableTupleStream;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Created,
    Running,
    Finished,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Completion state for the result of a run.
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => TaskState::Finished,
            Err(e) if e.is_cancellation() => TaskState::Cancelled,
            Err(_) => TaskState::Failed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Created => "created",
            TaskState::Running => "running",
            TaskState::Finished => "finished",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// What a finished task hands back to the job: the rows its root collected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: TaskId,
    pub rows: Vec<Tuple>,
    /// Schema of `rows`; `None` when the task has no root.
    pub schema: Option<SchemaRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub location: Location,
    pub operators: BTreeMap<OperatorId, Operator>,
    #[serde(default)]
    pub state: TaskState,
}

impl Task {
    pub fn new(id: TaskId, job_id: JobId, location: Location) -> Self {
        Self {
            id,
            job_id,
            location,
            operators: BTreeMap::new(),
            state: TaskState::Created,
        }
    }

    pub fn put_operator(&mut self, op: Operator) -> Result<()> {
        if self.operators.contains_key(&op.id) {
            return Err(ShardexError::Construction(format!(
                "operator {} already in task {}",
                op.id, self.id
            )));
        }
        self.operators.insert(op.id, op);
        Ok(())
    }

    pub fn operator(&self, id: OperatorId) -> Result<&Operator> {
        self.operators
            .get(&id)
            .ok_or_else(|| ShardexError::Construction(format!("operator {id} not in task {}", self.id)))
    }

    pub fn operator_mut(&mut self, id: OperatorId) -> Result<&mut Operator> {
        let task = self.id;
        self.operators
            .get_mut(&id)
            .ok_or_else(|| ShardexError::Construction(format!("operator {id} not in task {task}")))
    }

    /// Connect output `output` of `from` to input slot `input` of `to`.
    pub fn link(&mut self, from: OperatorId, output: usize, to: OperatorId, input: usize) -> Result<()> {
        let in_schema = self
            .operator(to)?
            .inputs
            .get(input)
            .map(|slot| slot.schema.clone())
            .ok_or_else(|| ShardexError::Construction(format!("operator {to} has no input {input}")))?;
        if self.feeder_of(to, input).is_some() {
            return Err(ShardexError::Construction(format!("input {input} of operator {to} is already fed")));
        }
        let out = self
            .operator_mut(from)?
            .outputs
            .get_mut(output)
            .ok_or_else(|| ShardexError::Construction(format!("operator {from} has no output {output}")))?;
        if out.link.is_some() {
            return Err(ShardexError::Construction(format!("output {output} of operator {from} is already linked")));
        }
        if out.schema != in_schema {
            return Err(ShardexError::Construction(format!(
                "schema of operator {from} output {output} does not match operator {to} input {input}"
            )));
        }
        out.link = Some(Link { operator: to, input });
        Ok(())
    }

    fn feeder_of(&self, to: OperatorId, input: usize) -> Option<OperatorId> {
        self.operators.values().find_map(|op| {
            op.outputs
                .iter()
                .any(|o| o.link == Some(Link { operator: to, input }))
                .then_some(op.id)
        })
    }

    pub fn terminals(&self) -> impl Iterator<Item = &Operator> {
        self.operators.values().filter(|op| op.kind.is_terminal())
    }

    /// Every output linked, every input fed exactly once with a matching
    /// schema, and at least one terminal operator.
    pub fn validate(&self) -> Result<()> {
        let mut fed: HashMap<(OperatorId, usize), usize> = HashMap::new();
        for op in self.operators.values() {
            for (idx, out) in op.outputs.iter().enumerate() {
                let link = out.link.ok_or_else(|| {
                    ShardexError::Construction(format!(
                        "output {idx} of operator {} ({}) in task {} is not linked",
                        op.id,
                        op.name(),
                        self.id
                    ))
                })?;
                let target = self.operator(link.operator)?;
                let slot = target.inputs.get(link.input).ok_or_else(|| {
                    ShardexError::Construction(format!("operator {} has no input {}", link.operator, link.input))
                })?;
                if slot.schema != out.schema {
                    return Err(ShardexError::Construction(format!(
                        "schema mismatch on link {} -> {}:{}",
                        op.id, link.operator, link.input
                    )));
                }
                *fed.entry((link.operator, link.input)).or_default() += 1;
            }
        }
        for op in self.operators.values() {
            for idx in 0..op.inputs.len() {
                match fed.get(&(op.id, idx)).copied().unwrap_or(0) {
                    1 => {}
                    0 => {
                        return Err(ShardexError::Construction(format!(
                            "input {idx} of operator {} ({}) in task {} is not fed",
                            op.id,
                            op.name(),
                            self.id
                        )))
                    }
                    n => {
                        return Err(ShardexError::Construction(format!(
                            "input {idx} of operator {} is fed {n} times",
                            op.id
                        )))
                    }
                }
            }
        }
        if self.terminals().next().is_none() {
            return Err(ShardexError::Construction(format!("task {} has no terminal operator", self.id)));
        }
        Ok(())
    }

    /// Run every terminal operator to completion. `state` moves to
    /// `Running` and then to the completion state of the run.
    pub async fn run(&mut self, ctx: SharedTaskContext) -> Result<TaskOutcome> {
        self.state = TaskState::Running;
        let result = self.drive(ctx).await;
        self.state = TaskState::of(&result);
        result
    }

    async fn drive(&self, ctx: SharedTaskContext) -> Result<TaskOutcome> {
        self.validate()?;
        let started = Instant::now();
        info!(job_id = %self.job_id, task_id = %self.id, location = %self.location, operators = self.operators.len(), "task started");

        let feeders = self.feeders();
        let mut drivers = Vec::new();
        let mut root_schema = None;
        for op in self.terminals() {
            let inputs = self.input_streams(op, &feeders, &ctx, 0)?;
            if matches!(op.kind, OperatorKind::Root) {
                root_schema = op.inputs.first().map(|slot| slot.schema.clone());
            }
            drivers.push(ops::run_terminal(op.clone(), inputs, ctx.clone()));
        }

        let results = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => {
                return Err(ShardexError::Cancelled(format!("task {} of job {} cancelled", self.id, self.job_id)));
            }
            r = try_join_all(drivers) => r?,
        };
        let rows: Vec<Tuple> = results.into_iter().flatten().collect();
        info!(
            job_id = %self.job_id,
            task_id = %self.id,
            rows = rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "task completed"
        );
        Ok(TaskOutcome {
            task_id: self.id,
            rows,
            schema: root_schema,
        })
    }

    fn feeders(&self) -> HashMap<(OperatorId, usize), OperatorId> {
        self.operators
            .values()
            .flat_map(|op| {
                op.outputs
                    .iter()
                    .filter_map(move |o| o.link.map(|l| ((l.operator, l.input), op.id)))
            })
            .collect()
    }

    fn input_streams(
        &self,
        op: &Operator,
        feeders: &HashMap<(OperatorId, usize), OperatorId>,
        ctx: &SharedTaskContext,
        depth: usize,
    ) -> Result<Vec<SendableTupleStream>> {
        if depth > self.operators.len() {
            return Err(ShardexError::Construction(format!("task {} contains a cycle", self.id)));
        }
        (0..op.inputs.len())
            .map(|idx| {
                let producer = feeders
                    .get(&(op.id, idx))
                    .ok_or_else(|| ShardexError::Construction(format!("input {idx} of operator {} is not fed", op.id)))?;
                let producer = self.operator(*producer)?;
                let inputs = self.input_streams(producer, feeders, ctx, depth + 1)?;
                debug!(task_id = %self.id, operator = %producer.id, kind = producer.name(), "operator built");
                ops::execute(producer, inputs, ctx)
            })
            .collect()
    }
}
