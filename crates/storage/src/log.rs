//! The log sink interface: where commit-time redo is published.
//!
//! The byte format of the durable log belongs to the log subsystem; this
//! crate only promises an append-only, commit-timestamp-ordered record
//! stream and a durability acknowledgement per committed transaction.

use parking_lot::Mutex;
use quarry_primitives::{TableOid, Timestamp};

use crate::block::TupleSlot;
use crate::projection::ProjectedRow;

/// One logical log record. Redo deltas are self-describing: the projected
/// row carries its projection initializer.
#[derive(Clone, Debug)]
pub enum LogRecord {
    /// An insert or update of the given columns.
    Redo {
        table: TableOid,
        slot: TupleSlot,
        delta: ProjectedRow,
    },
    /// A logical delete.
    Delete { table: TableOid, slot: TupleSlot },
    /// The commit record closing a transaction's run of records.
    Commit { begin: Timestamp, commit: Timestamp },
}

/// Fired by a sink once a committed transaction's records are durable.
pub struct CommitAck {
    commit: Timestamp,
    tx: crossbeam_channel::Sender<Timestamp>,
}

impl CommitAck {
    pub(crate) fn new(commit: Timestamp, tx: crossbeam_channel::Sender<Timestamp>) -> Self {
        CommitAck { commit, tx }
    }

    /// Reports the records as durable, resolving the committer's
    /// [`DurabilityHandle`](crate::transaction::DurabilityHandle).
    pub fn durable(self) {
        let _ = self.tx.send(self.commit);
    }
}

/// An ordered sink for committed transactions' records.
pub trait LogSink: Send + Sync {
    /// Appends one committed transaction's records, the closing
    /// [`LogRecord::Commit`] included. The sink must fire `ack` once the
    /// records are durable; it may do so after returning.
    fn append(&self, records: Vec<LogRecord>, ack: CommitAck);
}

/// An in-memory sink that acknowledges immediately. Backs the tests.
#[derive(Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record appended so far, in append order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// The number of records appended so far.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LogSink for MemoryLogSink {
    fn append(&self, records: Vec<LogRecord>, ack: CommitAck) {
        self.records.lock().extend(records);
        ack.durable();
    }
}
