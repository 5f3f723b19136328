//! Crate-wide error taxonomy.

use thiserror::Error;

use crate::{PageId, TableId, TransactionId};

#[derive(Error, Debug)]
pub enum StorageError {
    /// A lock could not be acquired within the bounded retries. The
    /// owning transaction must be aborted; this may be a false positive
    /// under contention.
    #[error("possible deadlock: transaction {tx} timed out waiting for page {page}")]
    PossibleDeadlock { tx: TransactionId, page: PageId },

    /// Eviction found no clean victim: every cached page is dirty and
    /// uncommitted pages are never written back.
    #[error("cache exhausted: all {capacity} cached pages are dirty")]
    CacheExhausted { capacity: usize },

    #[error("page {page} is full")]
    PageFull { page: PageId },

    #[error("tuple schema does not match page schema")]
    SchemaMismatch,

    #[error("tuple is not stored on page {page}")]
    TupleNotOnPage { page: PageId },

    #[error("tuple has no storage location")]
    TupleNotFound,

    #[error("no field named '{name}'")]
    FieldNotFound { name: String },

    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: PageId, reason: String },

    #[error("unknown table {0}")]
    UnknownTable(TableId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
