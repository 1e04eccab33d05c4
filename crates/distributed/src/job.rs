//! A job is one compiled statement lowered onto the cluster: one task per
//! location, created on demand while the plan is lowered.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use shardex_common::{JobId, Location, OperatorId, Result, ShardexError, TaskId};
use shardex_execution::{Operator, OperatorKind, Task};

/// Hands out operator and task ids unique within one job.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Location to task table of one job.
///
/// Tasks are created the first time an operator is placed at a location and
/// are only reachable through the job until [`Job::tasks`] snapshots them for
/// dispatch. All mutation goes through the table lock.
#[derive(Debug)]
pub struct Job {
    id: JobId,
    ids: IdGenerator,
    tasks: Mutex<BTreeMap<Location, Task>>,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Self {
            id,
            ids: IdGenerator::new(),
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub fn next_operator_id(&self) -> OperatorId {
        OperatorId(self.ids.next_id())
    }

    /// Id of the task at `location`, creating the task if needed.
    pub fn get_or_create(&self, location: &Location) -> TaskId {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get(location) {
            return task.id;
        }
        let id = TaskId(self.ids.next_id());
        tasks.insert(location.clone(), Task::new(id, self.id, location.clone()));
        id
    }

    pub fn add_operator(&self, location: &Location, op: Operator) -> Result<()> {
        self.get_or_create(location);
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(location)
            .ok_or_else(|| ShardexError::Construction(format!("no task at {location}")))?;
        task.put_operator(op)
    }

    /// Link two operators of the task at `location`.
    pub fn link(&self, location: &Location, from: OperatorId, output: usize, to: OperatorId, input: usize) -> Result<()> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(location)
            .ok_or_else(|| ShardexError::Construction(format!("no task at {location}")))?;
        task.link(from, output, to, input)
    }

    /// Apply `f` to one output of an operator at `location`.
    pub(crate) fn with_output<R>(
        &self,
        location: &Location,
        op: OperatorId,
        output: usize,
        f: impl FnOnce(&mut shardex_execution::Output) -> R,
    ) -> Result<R> {
        let mut tasks = self.tasks.lock();
        let task = tasks
            .get_mut(location)
            .ok_or_else(|| ShardexError::Construction(format!("no task at {location}")))?;
        let out = task
            .operator_mut(op)?
            .outputs
            .get_mut(output)
            .ok_or_else(|| ShardexError::Construction(format!("operator {op} has no output {output}")))?;
        Ok(f(out))
    }

    /// Every task valid and exactly one root in the job.
    pub fn validate(&self) -> Result<()> {
        let tasks = self.tasks.lock();
        if tasks.is_empty() {
            return Err(ShardexError::Construction(format!("job {} has no tasks", self.id)));
        }
        let mut roots = 0;
        for task in tasks.values() {
            task.validate()?;
            roots += task
                .operators
                .values()
                .filter(|op| matches!(op.kind, OperatorKind::Root))
                .count();
        }
        if roots != 1 {
            return Err(ShardexError::Construction(format!(
                "job {} has {roots} root operators, expected 1",
                self.id
            )));
        }
        Ok(())
    }

    /// Snapshot of the tasks in location order.
    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().values().cloned().collect()
    }

    pub fn task_at(&self, location: &Location) -> Option<Task> {
        self.tasks.lock().get(location).cloned()
    }

    pub fn locations(&self) -> Vec<Location> {
        self.tasks.lock().keys().cloned().collect()
    }

    /// Names of the tables written by this job, sorted and deduplicated.
    pub fn modified_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .lock()
            .values()
            .flat_map(|t| t.operators.values())
            .filter_map(|op| match &op.kind {
                OperatorKind::Modify(m) => Some(m.table.name.clone()),
                _ => None,
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }
}
