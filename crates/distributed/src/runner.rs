//! Job driver: dispatches every task of a job, waits for all of them, and
//! turns the first failure into one error for the whole job.

use std::sync::Arc;
use std::time::Instant;

use arrow_schema::SchemaRef;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use shardex_codec::Tuple;
use shardex_common::{ExecConfig, JobId, Result, ShardexError};
use shardex_execution::{Task, TaskOutcome};
use shardex_transaction::{LockType, SessionId, TransactionService, TxnState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::job::Job;

/// Runs a task at its location.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Run `task` to completion. `cancel` fires when a sibling task failed
    /// or the job was cancelled.
    async fn dispatch(&self, task: Task, cancel: CancellationToken) -> Result<TaskOutcome>;

    /// Release per-job state left at every location.
    async fn release_job(&self, _job: JobId) {}
}

fn specificity(e: &ShardexError) -> u8 {
    match e {
        ShardexError::Cancelled(_) => 0,
        ShardexError::Transport(_) => 1,
        _ => 2,
    }
}

/// Rows collected by the job's root.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub schema: Option<SchemaRef>,
    pub rows: Vec<Tuple>,
}

impl JobResult {
    /// The single count a mutation job reports.
    pub fn affected_rows(&self) -> Option<i64> {
        match self.rows.as_slice() {
            [row] => match row.as_slice() {
                [shardex_codec::Value::Int(n)] => Some(*n),
                _ => None,
            },
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct JobRunner {
    dispatcher: Arc<dyn TaskDispatcher>,
    config: ExecConfig,
}

impl JobRunner {
    pub fn new(dispatcher: Arc<dyn TaskDispatcher>, config: ExecConfig) -> Self {
        Self { dispatcher, config }
    }

    /// Run every task of `job` and return what its root collected.
    ///
    /// On the first failure all other tasks are cancelled. The job then fails
    /// with the most specific error any task reported: a cancellation only
    /// when nothing else failed, and a transport error (which is what a
    /// receiver sees when its sender aborts) only when no task reported the
    /// underlying cause. No rows are returned from a failed job.
    pub async fn run(&self, job: &Job) -> Result<JobResult> {
        self.run_with_cancel(job, &CancellationToken::new()).await
    }

    /// [`run`](Self::run) that also stops every task of the job when
    /// `cancel` fires or when the returned future is dropped.
    pub async fn run_with_cancel(&self, job: &Job, cancel: &CancellationToken) -> Result<JobResult> {
        job.validate()?;
        let started = Instant::now();
        let span = info_span!("job", job_id = %job.id());
        let result = self.drive(job, cancel.child_token()).instrument(span).await;
        self.dispatcher.release_job(job.id()).await;
        match &result {
            Ok(r) => info!(job_id = %job.id(), rows = r.rows.len(), elapsed_ms = started.elapsed().as_millis() as u64, "job finished"),
            Err(e) => error!(job_id = %job.id(), error = %e, "job failed"),
        }
        result
    }

    async fn drive(&self, job: &Job, cancel: CancellationToken) -> Result<JobResult> {
        let _cancel_on_drop = cancel.clone().drop_guard();
        let mut running: FuturesUnordered<_> = job
            .tasks()
            .into_iter()
            .map(|task| {
                let dispatcher = self.dispatcher.clone();
                let cancel = cancel.child_token();
                let (task_id, location) = (task.id, task.location.clone());
                async move { (task_id, location, dispatcher.dispatch(task, cancel).await) }
            })
            .collect();
        debug!(job_id = %job.id(), tasks = running.len(), "tasks dispatched");

        let grace = self.config.task_cancel_grace();
        let mut failure: Option<ShardexError> = None;
        let mut result = JobResult::default();
        loop {
            let next = if failure.is_some() {
                match tokio::time::timeout(grace, running.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(job_id = %job.id(), pending = running.len(), "tasks still running after cancellation grace");
                        break;
                    }
                }
            } else {
                running.next().await
            };
            let Some((task_id, location, outcome)) = next else {
                break;
            };
            match outcome {
                Ok(outcome) => {
                    debug!(job_id = %job.id(), task_id = %task_id, location = %location, "task finished");
                    if outcome.schema.is_some() {
                        result.schema = outcome.schema;
                        result.rows = outcome.rows;
                    }
                }
                Err(e) => match &failure {
                    None if e.is_cancellation() && cancel.is_cancelled() => {
                        info!(job_id = %job.id(), task_id = %task_id, location = %location, "job cancelled");
                        failure = Some(e);
                    }
                    None => {
                        warn!(job_id = %job.id(), task_id = %task_id, location = %location, error = %e, "task failed, cancelling job");
                        cancel.cancel();
                        failure = Some(e);
                    }
                    Some(current) if specificity(&e) > specificity(current) => {
                        debug!(job_id = %job.id(), task_id = %task_id, replaced = %current, error = %e, "more specific task error");
                        failure = Some(e);
                    }
                    Some(_) => debug!(job_id = %job.id(), task_id = %task_id, error = %e, "further task error"),
                },
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(result),
        }
    }

    /// Run `job` as statement `sql` of `session`.
    ///
    /// The job holds a metadata lock on the tables it writes while it runs,
    /// and the session takes write locks on them first. Without an active
    /// transaction the statement runs in its own pessimistic one, committed
    /// on success and rolled back on failure. Killing the session cancels
    /// the job.
    pub async fn run_in_transaction(
        &self,
        job: &Job,
        txn: &TransactionService,
        session: SessionId,
        sql: &str,
    ) -> Result<JobResult> {
        let implicit = !matches!(txn.state(session)?, TxnState::Active(_));
        if implicit {
            txn.begin(session, true)?;
        }
        let tables = job.modified_tables();
        let kill = txn.kill_token(session)?;
        let result: Result<JobResult> = async {
            txn.register_mdl(session, job.id(), tables.clone())?;
            txn.record_statement(session, sql)?;
            if !tables.is_empty() {
                txn.lock_table(session, &tables, LockType::Write).await?;
            }
            self.run_with_cancel(job, &kill).await
        }
        .await;
        txn.release_mdl(session, job.id());

        if implicit {
            match &result {
                Ok(_) => {
                    txn.commit(session)?;
                }
                Err(e) => {
                    debug!(session = %session, error = %e, "rolling back implicit transaction");
                    if let Err(rb) = txn.rollback(session) {
                        warn!(session = %session, error = %rb, "rollback after failed statement failed");
                    }
                }
            }
        }
        result
    }
}
