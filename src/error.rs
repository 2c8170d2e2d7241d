use std::io;
use thiserror::Error;

use crate::ids::IdType;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the write path.
///
/// Nothing here is retried automatically: structural violations and ordering
/// violations are fatal to the transaction, illegal-state errors signal
/// caller misuse, and corruption errors come from the durable log.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A chain neighbor's endpoints do not match the record being spliced,
    /// or a record referenced by a chain pointer is missing or not in use.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    /// Operating on a record already deleted in this transaction,
    /// double-prepare, commit-without-prepare, rollback-after-commit.
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// The commit sequence number is not exactly last-committed + 1.
    #[error("commit tx {commit_tx} is not next transaction (last committed {last_committed})")]
    OrderingViolation { commit_tx: u64, last_committed: u64 },
    #[error("id space exhausted for {0:?}")]
    IdSpaceExhausted(IdType),
    #[error("corruption detected: {0}")]
    Corruption(String),
}
