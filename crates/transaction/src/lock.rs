//! Table-granularity read/write locks.
//!
//! Each table has its own state and wake-up signal, so waiters on one table
//! never contend with grants on another. Locks are re-entrant per session and
//! a sole reader may upgrade to a writer.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shardex_common::{global_metrics, Result, ShardexError};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::service::SessionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
}

impl LockType {
    pub fn as_str(self) -> &'static str {
        match self {
            LockType::Read => "read",
            LockType::Write => "write",
        }
    }
}

#[derive(Debug, Default)]
struct LockState {
    readers: HashSet<SessionId>,
    writer: Option<SessionId>,
    /// Commit timestamp of the last transaction that wrote the table.
    version: i64,
}

impl LockState {
    fn try_grant(&mut self, session: SessionId, mode: LockType) -> bool {
        let writer_ok = self.writer.map_or(true, |w| w == session);
        match mode {
            LockType::Read => {
                if writer_ok {
                    self.readers.insert(session);
                }
                writer_ok
            }
            LockType::Write => {
                let readers_ok = self.readers.iter().all(|r| *r == session);
                if writer_ok && readers_ok {
                    self.writer = Some(session);
                }
                writer_ok && readers_ok
            }
        }
    }

    fn release(&mut self, session: SessionId) -> bool {
        let was_reader = self.readers.remove(&session);
        let was_writer = self.writer == Some(session);
        if was_writer {
            self.writer = None;
        }
        was_reader || was_writer
    }
}

#[derive(Debug, Default)]
struct TableLock {
    state: Mutex<LockState>,
    released: Notify,
}

#[derive(Debug, Default)]
pub struct TableLockManager {
    tables: Mutex<HashMap<String, Arc<TableLock>>>,
}

impl TableLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self, name: &str) -> Arc<TableLock> {
        self.tables.lock().entry(name.to_string()).or_default().clone()
    }

    /// Acquire `mode` on `table` for `session`, waiting for conflicting holders
    /// to release. Fails with a retryable timeout after `wait`, or with
    /// `Cancelled` once `cancel` fires.
    pub async fn acquire(
        &self,
        table: &str,
        session: SessionId,
        mode: LockType,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let lock = self.table(table);
        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let released = lock.released.notified();
            tokio::pin!(released);
            // register for wake-ups before checking, so a release in between is not lost
            released.as_mut().enable();
            if lock.state.lock().try_grant(session, mode) {
                let waited = started.elapsed();
                global_metrics().record_lock_wait(mode.as_str(), waited.as_secs_f64());
                debug!(table, session = %session, mode = mode.as_str(), waited_ms = waited.as_millis() as u64, "table lock granted");
                return Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(ShardexError::Cancelled(format!("lock wait on table {table} killed")));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    let waited_ms = started.elapsed().as_millis() as u64;
                    warn!(table, session = %session, mode = mode.as_str(), waited_ms, "table lock wait timed out");
                    global_metrics().record_lock_wait(mode.as_str(), started.elapsed().as_secs_f64());
                    return Err(ShardexError::LockTimeout {
                        table: table.to_string(),
                        waited_ms,
                    });
                }
                _ = &mut released => {}
            }
        }
    }

    /// Release whatever `session` holds on `table` and wake its waiters.
    pub fn release(&self, table: &str, session: SessionId) {
        let Some(lock) = self.tables.lock().get(table).cloned() else {
            return;
        };
        if lock.state.lock().release(session) {
            lock.released.notify_waiters();
        }
    }

    pub fn version(&self, table: &str) -> i64 {
        self.tables
            .lock()
            .get(table)
            .map(|l| l.state.lock().version)
            .unwrap_or(0)
    }

    pub fn bump_version(&self, table: &str, commit_ts: i64) {
        let lock = self.table(table);
        let mut state = lock.state.lock();
        state.version = state.version.max(commit_ts);
    }
}
