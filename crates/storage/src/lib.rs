//! The storage kernel: blocks, MVCC data tables, transactions, garbage
//! collection and indexes.
//!
//! Everything in this crate speaks physical [`ColId`]s; logical column
//! oids and schemas live one layer up, in the catalog crate. The pieces
//! fit together like this:
//!
//! * a [`BlockLayout`] describes where each attribute of a tuple lives
//!   inside a fixed-size [`block`](block::Block) owned by a [`DataTable`];
//! * [`ProjectionInit`]/[`ProjectedRow`] are the packed buffers all reads
//!   and writes travel through;
//! * the [`DataTable`] maintains a newest-first version chain of
//!   [undo records](undo) per tuple slot and answers snapshot-visibility
//!   questions for a [`TransactionContext`];
//! * the [`TransactionManager`] issues timestamps and drives
//!   commit/abort, publishing committed transactions to the
//!   [`GarbageCollector`], which reclaims versions and runs
//!   [deferred actions](DeferredActionManager) at safe epochs;
//! * [`index::Index`] maps caller-defined keys to tuple slots, with
//!   MVCC-aware uniqueness.
//!
//! [`ColId`]: quarry_primitives::ColId

pub mod block;
pub mod data_table;
pub mod error;
pub mod gc;
pub mod index;
pub mod layout;
pub mod log;
pub mod projection;
pub mod transaction;
pub mod undo;

pub use block::{BlockStore, TupleSlot, DEFAULT_BLOCK_SIZE};
pub use data_table::{DataTable, SlotIterator};
pub use error::{IndexError, StorageError, TransactionError};
pub use gc::{DeferredActionManager, GarbageCollector};
pub use layout::{AttrSize, BlockLayout};
pub use log::{CommitAck, LogRecord, LogSink, MemoryLogSink};
pub use projection::{ProjectedColumns, ProjectedRow, ProjectionInit};
pub use transaction::{CommitReceipt, DurabilityHandle, TransactionContext, TransactionManager};

/// The result type of fallible storage operations.
pub type Result<T, E = error::StorageError> = std::result::Result<T, E>;
