use thiserror::Error;

/// Canonical Shardex error taxonomy used across crates.
///
/// Classification guidance:
/// - [`ShardexError::Construction`]: malformed plan, unresolved location, unlinked output;
///   raised before any task starts
/// - [`ShardexError::Transport`] / [`ShardexError::Unreachable`]: channel and connection
///   failures; fatal to the owning task and to the whole job
/// - [`ShardexError::Routing`]: a key outside every known partition range
/// - [`ShardexError::LockTimeout`] / [`ShardexError::TxnConflict`]: retryable contention
/// - [`ShardexError::Codec`]: a tuple that does not fit the target schema
#[derive(Debug, Error)]
pub enum ShardexError {
    /// Invalid or inconsistent configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Job graph construction failures.
    ///
    /// Examples:
    /// - plan node without a resolvable location
    /// - output slot not linked to a consumer
    /// - link schema mismatch between producer and consumer
    #[error("construction error: {0}")]
    Construction(String),

    /// Channel write/read failures and protocol violations after a channel is open.
    #[error("transport error: {0}")]
    Transport(String),

    /// A location could not be reached when opening a channel or dispatching a task.
    #[error("could not reach location {location}: {reason}")]
    Unreachable {
        /// `host:port` of the unreachable location.
        location: String,
        /// Underlying failure description.
        reason: String,
    },

    /// Key routing failures.
    #[error("routing error: {0}")]
    Routing(String),

    /// Tuple conversion or key/value encoding failures.
    #[error("codec error: {0}")]
    Codec(String),

    /// Runtime operator failures not covered by a more specific variant.
    #[error("execution error: {0}")]
    Execution(String),

    /// A pessimistic lock could not be acquired in time.
    #[error("lock wait timeout on table {table} after {waited_ms}ms")]
    LockTimeout {
        /// Table the lock was requested for.
        table: String,
        /// Time spent waiting.
        waited_ms: u64,
    },

    /// Optimistic validation failed at commit.
    #[error("transaction conflict: {0}")]
    TxnConflict(String),

    /// Transaction control called in a state that does not allow it.
    #[error("invalid transaction state: {0}")]
    InvalidTxnState(String),

    /// The job, task or wait was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Valid request for a shape not implemented in this version.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ShardexError {
    /// Whether a client may retry the statement or transaction unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShardexError::LockTimeout { .. } | ShardexError::TxnConflict(_)
        )
    }

    /// Whether this error is only a consequence of another failure's teardown.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ShardexError::Cancelled(_))
    }
}

/// Standard Shardex result alias.
pub type Result<T> = std::result::Result<T, ShardexError>;
