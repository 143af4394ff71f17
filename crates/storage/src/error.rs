use quarry_primitives::Timestamp;
use thiserror::Error;

use crate::block::TupleSlot;

/// Errors surfaced by block and data-table operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StorageError {
    /// The version-chain head of the slot belongs to another live
    /// transaction or to a commit newer than the writer's snapshot. The
    /// writer's must-abort flag has been set.
    #[error("write-write conflict on {0:?}")]
    WriteWriteConflict(TupleSlot),
    /// The slot holds no version visible to the transaction.
    #[error("tuple {0:?} is not visible to this transaction")]
    NotVisible(TupleSlot),
    /// The redo row references a column the table's block layout does not
    /// have; the transaction must abort.
    #[error("projected row does not fit the table's block layout")]
    LayoutMismatch,
    /// The block store's configured allocation limit was exceeded.
    #[error("block store exhausted: {limit} blocks outstanding")]
    BlockCapacity { limit: usize },
}

/// Errors surfaced by index operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum IndexError {
    /// `insert_unique` or `conditional_insert` found the key already bound
    /// to a live tuple.
    #[error("duplicate key in unique index")]
    DuplicateKey,
    /// An ordered scan was requested of an unordered (hash) index.
    #[error("index does not support ordered scans")]
    NotOrdered,
}

/// Errors surfaced by the transaction manager.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TransactionError {
    /// The transaction had its must-abort flag set; the commit attempt was
    /// diverted to an abort.
    #[error("transaction begun at {begin} was aborted instead of committed")]
    Aborted { begin: Timestamp },
}
