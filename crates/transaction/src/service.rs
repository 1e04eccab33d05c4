//! Sessions and their transactions.
//!
//! A session holds at most one live transaction. Pessimistic transactions
//! block in `lock_table` until the lock is granted; optimistic ones only
//! record the tables and validate them at commit against the commit
//! timestamps of other writers.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use shardex_common::{global_metrics, ExecConfig, JobId, Result, ShardexError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::TsoClock;
use crate::lock::{LockType, TableLockManager};

/// Client connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnMode {
    Pessimistic,
    Optimistic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxnState {
    None,
    Active(TxnMode),
    Committed,
    RolledBack,
}

/// One row of `get_mdl_info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdlInfoRow {
    pub job_id: i64,
    pub start_ts: i64,
    /// Every statement of the transaction, each followed by `;`.
    pub sql_history: String,
}

#[derive(Debug)]
struct Transaction {
    start_ts: i64,
    mode: TxnMode,
    sql: Vec<String>,
    locks: BTreeMap<String, LockType>,
}

#[derive(Debug)]
struct Session {
    txn: Option<Transaction>,
    /// Metadata locks held by running jobs, with the tables each touches.
    mdl: BTreeMap<JobId, Vec<String>>,
    last_state: TxnState,
    kill: CancellationToken,
}

impl Session {
    fn active(&mut self, id: SessionId) -> Result<&mut Transaction> {
        self.txn
            .as_mut()
            .ok_or_else(|| ShardexError::InvalidTxnState(format!("session {id} has no active transaction")))
    }
}

/// Coordinator of every session on this front end.
#[derive(Debug)]
pub struct TransactionService {
    clock: TsoClock,
    locks: TableLockManager,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    next_session: AtomicU64,
    config: ExecConfig,
}

impl TransactionService {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            clock: TsoClock::new(),
            locks: TableLockManager::new(),
            sessions: RwLock::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            config,
        }
    }

    pub fn open_session(&self) -> SessionId {
        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        self.sessions.write().insert(
            id,
            Arc::new(Mutex::new(Session {
                txn: None,
                mdl: BTreeMap::new(),
                last_state: TxnState::None,
                kill: CancellationToken::new(),
            })),
        );
        debug!(session = %id, "session opened");
        id
    }

    /// Roll back whatever is live and forget the session.
    pub fn close_session(&self, id: SessionId) {
        if let Ok(s) = self.session(id) {
            s.lock().kill.cancel();
            if let Err(e) = self.rollback(id) {
                debug!(session = %id, error = %e, "nothing to roll back on close");
            }
        }
        self.sessions.write().remove(&id);
    }

    fn session(&self, id: SessionId) -> Result<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| ShardexError::InvalidTxnState(format!("unknown session {id}")))
    }

    pub fn state(&self, id: SessionId) -> Result<TxnState> {
        let s = self.session(id)?;
        let s = s.lock();
        Ok(match &s.txn {
            Some(t) => TxnState::Active(t.mode),
            None => s.last_state,
        })
    }

    /// Start a transaction; returns its start timestamp.
    pub fn begin(&self, id: SessionId, pessimistic: bool) -> Result<i64> {
        let s = self.session(id)?;
        let mut s = s.lock();
        if s.txn.is_some() {
            return Err(ShardexError::InvalidTxnState(format!(
                "session {id} already has an active transaction"
            )));
        }
        let mode = if pessimistic {
            TxnMode::Pessimistic
        } else {
            TxnMode::Optimistic
        };
        let start_ts = self.clock.next_ts();
        s.txn = Some(Transaction {
            start_ts,
            mode,
            sql: Vec::new(),
            locks: BTreeMap::new(),
        });
        info!(session = %id, start_ts, mode = ?mode, "transaction started");
        Ok(start_ts)
    }

    /// Take table locks for the active transaction.
    ///
    /// Pessimistic transactions wait up to `lock_wait_timeout` per table; on
    /// failure the locks taken by this call are released again. Optimistic
    /// transactions only record the tables.
    pub async fn lock_table(&self, id: SessionId, tables: &[String], lock_type: LockType) -> Result<()> {
        let s = self.session(id)?;
        let (mode, start_ts, kill) = {
            let mut s = s.lock();
            let kill = s.kill.clone();
            let txn = s.active(id)?;
            (txn.mode, txn.start_ts, kill)
        };
        let mut taken = Vec::new();
        if mode == TxnMode::Pessimistic {
            for table in tables {
                let acquired = self
                    .locks
                    .acquire(table, id, lock_type, self.config.lock_wait_timeout(), &kill)
                    .await;
                if let Err(e) = acquired {
                    self.release_taken(id, &s.lock(), &taken);
                    return Err(e);
                }
                taken.push(table.clone());
            }
        }
        let mut s = s.lock();
        // the transaction may have ended while this call waited
        if !s.txn.as_ref().is_some_and(|t| t.start_ts == start_ts) {
            self.release_taken(id, &s, &taken);
            return Err(ShardexError::InvalidTxnState(format!(
                "transaction {start_ts} of session {id} ended while waiting for table locks"
            )));
        }
        let txn = s.active(id)?;
        for table in tables {
            let held = txn.locks.entry(table.clone()).or_insert(lock_type);
            if lock_type == LockType::Write {
                *held = LockType::Write;
            }
        }
        debug!(session = %id, tables = ?tables, lock_type = lock_type.as_str(), "tables locked");
        Ok(())
    }

    /// Release the tables in `taken` that the session's live transaction
    /// does not already hold.
    fn release_taken(&self, id: SessionId, s: &Session, taken: &[String]) {
        let held = s.txn.as_ref().map(|t| &t.locks);
        for table in taken.iter().filter(|t| held.map_or(true, |h| !h.contains_key(*t))) {
            self.locks.release(table, id);
        }
    }

    /// Release every table lock without ending the transaction.
    pub fn unlock_table(&self, id: SessionId) -> Result<()> {
        let s = self.session(id)?;
        let mut s = s.lock();
        let txn = s.active(id)?;
        let locks = std::mem::take(&mut txn.locks);
        for table in locks.keys() {
            self.locks.release(table, id);
        }
        debug!(session = %id, released = locks.len(), "tables unlocked");
        Ok(())
    }

    /// Append a statement to the active transaction's history.
    pub fn record_statement(&self, id: SessionId, sql: &str) -> Result<()> {
        let s = self.session(id)?;
        let mut s = s.lock();
        s.active(id)?.sql.push(sql.to_string());
        Ok(())
    }

    /// Commit; returns the commit timestamp.
    ///
    /// Optimistic transactions fail with a retryable conflict when a table
    /// they write was committed by someone else after they started; the
    /// transaction is rolled back in that case.
    pub fn commit(&self, id: SessionId) -> Result<i64> {
        let s = self.session(id)?;
        let mut s = s.lock();
        let txn = s
            .txn
            .take()
            .ok_or_else(|| ShardexError::InvalidTxnState(format!("session {id} has no active transaction")))?;
        if txn.mode == TxnMode::Optimistic {
            let conflict = txn
                .locks
                .iter()
                .filter(|(_, l)| **l == LockType::Write)
                .find(|(t, _)| self.locks.version(t) > txn.start_ts)
                .map(|(t, _)| t.clone());
            if let Some(table) = conflict {
                let msg = format!("table {table} was written after start_ts {}", txn.start_ts);
                self.finish(id, &mut s, txn, TxnState::RolledBack);
                global_metrics().inc_txn_outcome("conflict");
                warn!(session = %id, error = %msg, "optimistic commit aborted");
                return Err(ShardexError::TxnConflict(msg));
            }
        }
        let commit_ts = self.clock.next_ts();
        for (table, l) in &txn.locks {
            if *l == LockType::Write {
                self.locks.bump_version(table, commit_ts);
            }
        }
        let start_ts = txn.start_ts;
        self.finish(id, &mut s, txn, TxnState::Committed);
        global_metrics().inc_txn_outcome("commit");
        info!(session = %id, start_ts, commit_ts, "transaction committed");
        Ok(commit_ts)
    }

    pub fn rollback(&self, id: SessionId) -> Result<()> {
        let s = self.session(id)?;
        let mut s = s.lock();
        let txn = s
            .txn
            .take()
            .ok_or_else(|| ShardexError::InvalidTxnState(format!("session {id} has no active transaction")))?;
        let start_ts = txn.start_ts;
        self.finish(id, &mut s, txn, TxnState::RolledBack);
        global_metrics().inc_txn_outcome("rollback");
        info!(session = %id, start_ts, "transaction rolled back");
        Ok(())
    }

    fn finish(&self, id: SessionId, s: &mut Session, mut txn: Transaction, end: TxnState) {
        for table in txn.locks.keys() {
            self.locks.release(table, id);
        }
        txn.locks.clear();
        s.mdl.clear();
        s.last_state = end;
    }

    /// Record the metadata lock a running job holds on `tables`.
    pub fn register_mdl(&self, id: SessionId, job: JobId, tables: Vec<String>) -> Result<()> {
        let s = self.session(id)?;
        s.lock().mdl.insert(job, tables);
        Ok(())
    }

    pub fn release_mdl(&self, id: SessionId, job: JobId) {
        if let Ok(s) = self.session(id) {
            s.lock().mdl.remove(&job);
        }
    }

    /// Token fired by the next [`kill`](Self::kill) of the session.
    pub fn kill_token(&self, id: SessionId) -> Result<CancellationToken> {
        Ok(self.session(id)?.lock().kill.clone())
    }

    /// Cancel the session's pending lock waits and running jobs. Later waits
    /// and jobs are unaffected.
    pub fn kill(&self, id: SessionId) -> Result<()> {
        let s = self.session(id)?;
        let mut s = s.lock();
        let old = std::mem::replace(&mut s.kill, CancellationToken::new());
        old.cancel();
        warn!(session = %id, "session killed");
        Ok(())
    }

    /// One row per session that has an active transaction and at least one
    /// metadata lock: the first job id, the start timestamp and the
    /// statement history.
    ///
    /// Iterates a snapshot of the session set taken at call time.
    pub fn get_mdl_info(&self) -> impl Iterator<Item = MdlInfoRow> {
        let snapshot: Vec<_> = {
            let sessions = self.sessions.read();
            let mut ids: Vec<_> = sessions.keys().copied().collect();
            ids.sort_unstable();
            ids.into_iter().filter_map(|id| sessions.get(&id).cloned()).collect()
        };
        snapshot.into_iter().filter_map(|s| {
            let s = s.lock();
            let (job, _) = s.mdl.iter().next()?;
            let txn = s.txn.as_ref()?;
            Some(MdlInfoRow {
                job_id: job.0 as i64,
                start_ts: txn.start_ts,
                sql_history: txn.sql.iter().map(|q| format!("{q};")).collect(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use shardex_common::{ExecConfig, JobId, ShardexError};

    use super::{TransactionService, TxnMode, TxnState};
    use crate::lock::LockType;

    fn service() -> TransactionService {
        TransactionService::new(ExecConfig::default())
    }

    #[test]
    fn begin_twice_is_an_error() {
        let svc = service();
        let s = svc.open_session();
        svc.begin(s, true).expect("begin");
        assert_eq!(svc.state(s).expect("state"), TxnState::Active(TxnMode::Pessimistic));
        assert!(matches!(svc.begin(s, false), Err(ShardexError::InvalidTxnState(_))));
        svc.rollback(s).expect("rollback");
        assert_eq!(svc.state(s).expect("state"), TxnState::RolledBack);
        assert!(svc.commit(s).is_err());
    }

    #[tokio::test]
    async fn optimistic_commit_detects_later_writer() {
        let svc = service();
        let (a, b) = (svc.open_session(), svc.open_session());
        svc.begin(a, false).expect("begin a");
        svc.lock_table(a, &["t".to_string()], LockType::Write).await.expect("record");

        svc.begin(b, true).expect("begin b");
        svc.lock_table(b, &["t".to_string()], LockType::Write).await.expect("lock b");
        svc.commit(b).expect("commit b");

        let err = svc.commit(a).expect_err("conflict");
        assert!(err.is_retryable());
        assert_eq!(svc.state(a).expect("state"), TxnState::RolledBack);
    }

    #[test]
    fn commit_clears_history_and_mdl() {
        let svc = service();
        let s = svc.open_session();
        svc.begin(s, true).expect("begin");
        svc.record_statement(s, "insert into t values (1)").expect("record");
        svc.register_mdl(s, JobId(9), vec!["t".into()]).expect("mdl");
        assert_eq!(svc.get_mdl_info().count(), 1);
        svc.commit(s).expect("commit");
        assert_eq!(svc.get_mdl_info().count(), 0);
        assert!(svc.record_statement(s, "select 1").is_err());
    }
}
