//! Undo records and the per-slot version chain.
//!
//! Every write installs an undo record at the head of the written slot's
//! chain: the before-image of an update, a tombstone-undo for a delete,
//! or a nonexistence marker for an insert. Records are stamped with the
//! installing transaction's begin timestamp and re-stamped with its
//! commit timestamp when it commits; readers walk a chain newest-first,
//! applying records until they reach a version visible to their snapshot.
//!
//! A record is shared between the slot's chain and the owning
//! transaction's undo buffer. The buffer is the record's arena: the
//! garbage collector unlinks the chain reference once no live transaction
//! can reach the record, and the last `Arc` drop frees it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use quarry_primitives::{TableOid, Timestamp};

use crate::block::{Block, TupleSlot};
use crate::projection::ProjectedRow;

/// What undoing this record means for the slot.
#[derive(Debug)]
pub(crate) enum UndoPayload {
    /// The tuple did not exist before: undoing marks it nonexistent.
    Insert,
    /// The before-image of the touched columns.
    Update(ProjectedRow),
    /// The tuple was live before: undoing clears the tombstone.
    Delete,
}

/// One link in a slot's newest-first version chain.
pub struct UndoRecord {
    pub(crate) table: TableOid,
    pub(crate) slot: TupleSlot,
    pub(crate) block: Weak<Block>,
    /// The installer's begin timestamp, replaced by its commit timestamp
    /// at commit.
    ts: AtomicU64,
    pub(crate) payload: UndoPayload,
    /// The next-older record. Guarded by its own lock because readers
    /// traverse chains after releasing the block lock, concurrently with
    /// the garbage collector unlinking under it.
    pub(crate) next: Mutex<Option<Arc<UndoRecord>>>,
}

impl UndoRecord {
    pub(crate) fn new(
        table: TableOid,
        slot: TupleSlot,
        block: &Arc<Block>,
        txn_begin: Timestamp,
        payload: UndoPayload,
        next: Option<Arc<UndoRecord>>,
    ) -> Arc<Self> {
        Arc::new(UndoRecord {
            table,
            slot,
            block: Arc::downgrade(block),
            ts: AtomicU64::new(txn_begin.0),
            payload,
            next: Mutex::new(next),
        })
    }

    /// The record's current stamp: the installer's begin timestamp while
    /// the installer is live, its commit timestamp afterwards.
    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        Timestamp(self.ts.load(Ordering::Acquire))
    }

    pub(crate) fn stamp(&self, commit: Timestamp) {
        debug_assert!(commit.is_commit());
        self.ts.store(commit.0, Ordering::Release);
    }

    /// The next-older record in the chain, if any.
    pub fn next(&self) -> Option<Arc<UndoRecord>> {
        self.next.lock().clone()
    }

    /// Whether the version this record installed is visible to a snapshot
    /// begun at `begin`: it is the reader's own write, or its installer
    /// committed no later than `begin`.
    #[inline]
    pub fn visible_to(&self, begin: Timestamp) -> bool {
        version_visible(self.timestamp(), begin)
    }

    /// Reverts this record's write in place and pops it off its chain.
    /// Called only while the installing transaction aborts; the record is
    /// necessarily the chain head, since conflict detection keeps other
    /// writers from stacking on an uncommitted version.
    pub(crate) fn rollback(&self) {
        let Some(block) = self.block.upgrade() else {
            return;
        };
        let mut guard = block.inner.write();
        let slot = self.slot.slot;
        match &self.payload {
            UndoPayload::Insert => {
                // The slot keeps its presence bit until the GC reclaims
                // it; the tombstone hides it from every snapshot.
                guard.set_deleted(slot, true);
            }
            UndoPayload::Delete => guard.set_deleted(slot, false),
            UndoPayload::Update(before) => guard.apply_row(&block.layout, slot, before),
        }
        let head = guard.version_heads[slot as usize].take();
        debug_assert!(head.as_deref().map(|h| std::ptr::eq(h, self)).unwrap_or(false));
        guard.version_heads[slot as usize] = self.next();
    }
}

impl std::fmt::Debug for UndoRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UndoRecord")
            .field("table", &self.table)
            .field("slot", &self.slot)
            .field("ts", &self.timestamp())
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}

/// The one visibility rule: a version stamped `ts` is visible to a
/// snapshot begun at `begin` iff it is the snapshot's own uncommitted
/// write or its installer committed at or before `begin`.
#[inline]
pub(crate) fn version_visible(ts: Timestamp, begin: Timestamp) -> bool {
    ts == begin || (ts.is_commit() && ts <= begin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_rule() {
        let begin = Timestamp::begin(10);
        // Own write.
        assert!(version_visible(Timestamp::begin(10), begin));
        // Another live transaction's write.
        assert!(!version_visible(Timestamp::begin(9), begin));
        assert!(!version_visible(Timestamp::begin(11), begin));
        // Older and newer commits.
        assert!(version_visible(Timestamp::commit(9), begin));
        assert!(!version_visible(Timestamp::commit(11), begin));
    }
}
