use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Tuples accumulated by a send operator before one IPC batch is shipped.
    pub batch_size_rows: usize,
    /// Bound of each receive endpoint's inbound queue, in messages.
    pub exchange_queue_capacity: usize,
    pub connect_timeout_ms: u64,
    /// Pessimistic table lock wait before the request fails as retryable.
    pub lock_wait_timeout_ms: u64,
    /// How long the job driver waits for cancelled tasks to wind down.
    pub task_cancel_grace_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            batch_size_rows: 1024,
            exchange_queue_capacity: 64,
            connect_timeout_ms: 5_000,
            lock_wait_timeout_ms: 50_000,
            task_cancel_grace_ms: 1_000,
        }
    }
}

impl ExecConfig {
    /// Defaults overridden by `SHARDEX_*` environment variables.
    ///
    /// Unparseable values fall back to the default for that field.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            batch_size_rows: env_or("SHARDEX_BATCH_SIZE_ROWS", d.batch_size_rows),
            exchange_queue_capacity: env_or(
                "SHARDEX_EXCHANGE_QUEUE_CAPACITY",
                d.exchange_queue_capacity,
            ),
            connect_timeout_ms: env_or("SHARDEX_CONNECT_TIMEOUT_MS", d.connect_timeout_ms),
            lock_wait_timeout_ms: env_or("SHARDEX_LOCK_WAIT_TIMEOUT_MS", d.lock_wait_timeout_ms),
            task_cancel_grace_ms: env_or("SHARDEX_TASK_CANCEL_GRACE_MS", d.task_cancel_grace_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn task_cancel_grace(&self) -> Duration {
        Duration::from_millis(self.task_cancel_grace_ms)
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
