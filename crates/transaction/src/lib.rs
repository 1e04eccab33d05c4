//! Transaction coordination for statements run as distributed jobs.
//!
//! Architecture role:
//! - hands out start/commit timestamps from a monotonic clock
//! - grants table-granularity read/write locks, blocking pessimistic waiters
//! - tracks sessions, their transactions, statement history and metadata locks
//!
//! Key modules:
//! - [`clock`]
//! - [`lock`]
//! - [`service`]

pub mod clock;
pub mod lock;
pub mod service;

pub use clock::TsoClock;
pub use lock::{LockType, TableLockManager};
pub use service::{MdlInfoRow, SessionId, TransactionService, TxnMode, TxnState};
