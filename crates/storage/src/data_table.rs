//! The data table: a thin MVCC layer over storage blocks.
//!
//! A `DataTable` handles visibility and version maintenance for one
//! table's tuples. SQL-level concepts (column oids, schemas, nullability
//! rules) do not exist at this level; callers speak physical col-ids
//! through projected rows.

use std::sync::Arc;

use parking_lot::RwLock;
use quarry_primitives::TableOid;

use crate::block::{Block, BlockStore, TupleSlot};
use crate::error::StorageError;
use crate::layout::BlockLayout;
use crate::log::LogRecord;
use crate::projection::{ProjectedColumns, ProjectedRow};
use crate::transaction::TransactionContext;
use crate::undo::{UndoPayload, UndoRecord};
use crate::Result;

/// A table's tuple storage plus per-slot version chains.
pub struct DataTable {
    oid: TableOid,
    layout: Arc<BlockLayout>,
    store: Arc<BlockStore>,
    blocks: RwLock<Vec<Arc<Block>>>,
}

impl DataTable {
    /// Creates a table drawing blocks of `layout`'s shape from `store`.
    pub fn new(store: Arc<BlockStore>, layout: Arc<BlockLayout>, oid: TableOid) -> Result<Arc<Self>> {
        let first = store.allocate(layout.clone())?;
        Ok(Arc::new(DataTable {
            oid,
            layout,
            store,
            blocks: RwLock::new(vec![first]),
        }))
    }

    /// The owning table's oid, stamped into log records.
    #[inline]
    pub fn oid(&self) -> TableOid {
        self.oid
    }

    /// The physical layout of this table's tuples.
    #[inline]
    pub fn layout(&self) -> &Arc<BlockLayout> {
        &self.layout
    }

    /// Materializes the tuple at `slot` as visible to `txn` into `out`.
    /// Returns false if no version of the slot is visible to `txn`.
    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow) -> bool {
        let (mut deleted, mut cursor) = {
            let blocks = self.blocks.read();
            let Some(block) = blocks.get(slot.block as usize) else {
                return false;
            };
            let guard = block.inner.read();
            if slot.slot >= guard.insert_head || !guard.is_present(slot.slot) {
                return false;
            }
            // Image, tombstone flag and chain head are captured under one
            // guard; everything after works on the copy.
            guard.read_row(&block.layout, slot.slot, out);
            (guard.is_deleted(slot.slot), guard.version_heads[slot.slot as usize].clone())
        };

        let begin = txn.begin_ts();
        while let Some(record) = cursor {
            if record.visible_to(begin) {
                break;
            }
            match &record.payload {
                UndoPayload::Insert => return false,
                UndoPayload::Delete => deleted = false,
                UndoPayload::Update(before) => out.copy_from(before),
            }
            cursor = record.next();
        }
        !deleted
    }

    /// Whether any version of `slot` is visible to `txn`. The chain walk
    /// only has to track existence, so no image is materialized.
    pub fn is_visible(&self, txn: &TransactionContext, slot: TupleSlot) -> bool {
        let Some((mut deleted, mut cursor)) = self.slot_state(slot) else {
            return false;
        };
        let begin = txn.begin_ts();
        while let Some(record) = cursor {
            if record.visible_to(begin) {
                break;
            }
            match &record.payload {
                UndoPayload::Insert => return false,
                UndoPayload::Delete => deleted = false,
                UndoPayload::Update(_) => {}
            }
            cursor = record.next();
        }
        !deleted
    }

    /// Whether `slot` could hold a live tuple from *some* transaction's
    /// point of view: it is visible to `txn`, its newest committed state
    /// is live, or a live writer has an uncommitted claim on it. This is
    /// the predicate MVCC-aware uniqueness checks need: a key counts as
    /// taken until every version holding it is dead to everyone.
    pub fn may_be_live(&self, txn: &TransactionContext, slot: TupleSlot) -> bool {
        let Some((deleted_now, head)) = self.slot_state(slot) else {
            return false;
        };
        if let Some(record) = &head {
            let ts = record.timestamp();
            if ts.is_begin() && ts != txn.begin_ts() {
                // Pending writer; assume it commits.
                return true;
            }
        }
        if !deleted_now {
            return true;
        }
        // Newest committed state is a delete; the slot still matters if
        // an older version remains visible to this transaction.
        self.is_visible(txn, slot)
    }

    pub(crate) fn slot_state(&self, slot: TupleSlot) -> Option<(bool, Option<Arc<UndoRecord>>)> {
        let blocks = self.blocks.read();
        let block = blocks.get(slot.block as usize)?;
        let guard = block.inner.read();
        if slot.slot >= guard.insert_head || !guard.is_present(slot.slot) {
            return None;
        }
        Some((guard.is_deleted(slot.slot), guard.version_heads[slot.slot as usize].clone()))
    }

    /// Inserts `redo` into a fresh slot. The tuple is invisible to every
    /// other transaction until `txn` commits.
    pub fn insert(&self, txn: &TransactionContext, redo: &ProjectedRow) -> Result<TupleSlot> {
        if !self.layout.contains_all(redo.col_ids()) {
            txn.set_must_abort();
            return Err(StorageError::LayoutMismatch);
        }

        loop {
            let (block_idx, block) = {
                let blocks = self.blocks.read();
                (blocks.len() - 1, blocks.last().cloned().unwrap())
            };
            {
                let mut guard = block.inner.write();
                if guard.insert_head < self.layout.num_slots() {
                    let offset = guard.insert_head;
                    guard.insert_head += 1;
                    guard.mark_present(offset);
                    guard.set_deleted(offset, false);
                    guard.clear_tuple(&block.layout, offset);

                    let slot = TupleSlot {
                        block: block_idx as u32,
                        slot: offset,
                    };
                    let record = UndoRecord::new(self.oid, slot, &block, txn.begin_ts(), UndoPayload::Insert, None);
                    guard.version_heads[offset as usize] = Some(record.clone());
                    guard.apply_row(&block.layout, offset, redo);
                    drop(guard);

                    txn.record_write(
                        record,
                        LogRecord::Redo {
                            table: self.oid,
                            slot,
                            delta: redo.clone(),
                        },
                    );
                    return Ok(slot);
                }
            }

            // The insertion block filled up; install a new one. Re-check
            // under the list lock, another writer may have won the race.
            let mut blocks = self.blocks.write();
            let full = blocks.last().unwrap().inner.read().insert_head >= self.layout.num_slots();
            if full {
                let fresh = self.store.allocate(self.layout.clone())?;
                blocks.push(fresh);
            }
        }
    }

    /// Applies `redo` to the tuple at `slot` in place, saving the
    /// before-image of the touched columns in `txn`'s undo buffer.
    pub fn update(&self, txn: &TransactionContext, slot: TupleSlot, redo: &ProjectedRow) -> Result<()> {
        if !self.layout.contains_all(redo.col_ids()) {
            txn.set_must_abort();
            return Err(StorageError::LayoutMismatch);
        }
        self.write(txn, slot, Some(redo))
    }

    /// Installs a delete tombstone on the tuple at `slot`.
    pub fn delete(&self, txn: &TransactionContext, slot: TupleSlot) -> Result<()> {
        self.write(txn, slot, None)
    }

    /// The shared write path: conflict-check the chain head, install an
    /// undo record, apply the change in place. `redo` of `None` means
    /// delete.
    fn write(&self, txn: &TransactionContext, slot: TupleSlot, redo: Option<&ProjectedRow>) -> Result<()> {
        let begin = txn.begin_ts();
        let blocks = self.blocks.read();
        let Some(block) = blocks.get(slot.block as usize) else {
            return Err(StorageError::NotVisible(slot));
        };

        let mut guard = block.inner.write();
        if slot.slot >= guard.insert_head || !guard.is_present(slot.slot) {
            return Err(StorageError::NotVisible(slot));
        }

        let head = guard.version_heads[slot.slot as usize].clone();
        if let Some(h) = &head {
            let ts = h.timestamp();
            let other_live = ts.is_begin() && ts != begin;
            let newer_commit = ts.is_commit() && ts > begin;
            if other_live || newer_commit {
                txn.set_must_abort();
                return Err(StorageError::WriteWriteConflict(slot));
            }
        }
        if guard.is_deleted(slot.slot) {
            // Deleted by this transaction or by a commit within our
            // snapshot; either way there is nothing left to write to.
            return Err(StorageError::NotVisible(slot));
        }

        let (payload, log_record) = match redo {
            Some(redo) => {
                let before = guard.capture_row(&block.layout, slot.slot, redo.init());
                (
                    UndoPayload::Update(before),
                    LogRecord::Redo {
                        table: self.oid,
                        slot,
                        delta: redo.clone(),
                    },
                )
            }
            None => (UndoPayload::Delete, LogRecord::Delete { table: self.oid, slot }),
        };
        let record = UndoRecord::new(self.oid, slot, block, begin, payload, head);
        guard.version_heads[slot.slot as usize] = Some(record.clone());
        match redo {
            Some(redo) => guard.apply_row(&block.layout, slot.slot, redo),
            None => guard.set_deleted(slot.slot, true),
        }
        drop(guard);

        txn.record_write(record, log_record);
        Ok(())
    }

    /// An iterator positioned at the first slot, with the end snapshotted
    /// at the current insert frontier.
    pub fn begin(&self) -> SlotIterator {
        SlotIterator {
            current: TupleSlot { block: 0, slot: 0 },
            end: self.end(),
            slots_per_block: self.layout.num_slots(),
        }
    }

    /// The current end sentinel: one past the last claimed slot.
    pub fn end(&self) -> TupleSlot {
        let blocks = self.blocks.read();
        let last = blocks.len() - 1;
        let head = blocks[last].inner.read().insert_head;
        TupleSlot {
            block: last as u32,
            slot: head,
        }
    }

    /// Fills `out` with the tuples visible to `txn` starting at `iter`,
    /// up to the batch capacity, and advances `iter` past the last slot
    /// examined.
    pub fn scan(&self, txn: &TransactionContext, iter: &mut SlotIterator, out: &mut ProjectedColumns) {
        out.clear();
        while !iter.done() && !out.is_full() {
            let slot = iter.current;
            let row = out.append(slot);
            if !self.select(txn, slot, row) {
                out.discard_last();
            }
            iter.advance();
        }
    }
}

/// A cursor over every claimed slot of a table, in storage order.
///
/// The end is snapshotted at creation: slots inserted afterwards are not
/// walked, which is transactionally harmless: they could not be visible
/// to a snapshot that was taken before them anyway.
#[derive(Clone, Copy, Debug)]
pub struct SlotIterator {
    current: TupleSlot,
    end: TupleSlot,
    slots_per_block: u32,
}

impl SlotIterator {
    /// The slot the iterator is positioned at.
    #[inline]
    pub fn current(&self) -> TupleSlot {
        self.current
    }

    /// Whether the iterator reached its end sentinel.
    #[inline]
    pub fn done(&self) -> bool {
        self.current >= self.end
    }

    /// Advances to the next slot, moving to the next block past the last
    /// slot of the current one.
    pub fn advance(&mut self) {
        self.current.slot += 1;
        if self.current.slot >= self.slots_per_block {
            self.current.block += 1;
            self.current.slot = 0;
        }
    }
}
