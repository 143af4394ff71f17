//! Fixed-size storage blocks and the store that hands them out.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use quarry_primitives::ColId;

use crate::error::StorageError;
use crate::layout::{BlockLayout, VARLEN_INLINE_THRESHOLD};
use crate::projection::{ProjectedRow, ProjectionInit};
use crate::undo::UndoRecord;
use crate::Result;

/// The default block size: 1 MiB.
pub const DEFAULT_BLOCK_SIZE: u32 = 1 << 20;

/// The address of one tuple: a table-relative block number and the slot
/// within that block.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TupleSlot {
    /// The block number within the owning table.
    pub block: u32,
    /// The slot within the block.
    pub slot: u32,
}

/// Hands out storage blocks, bounded by an allocation limit.
///
/// The store is shared process-wide; every data table draws its blocks
/// from one store. Blocks return their capacity to the store when they
/// are dropped.
pub struct BlockStore {
    block_size: u32,
    limit: usize,
    outstanding: AtomicUsize,
}

impl BlockStore {
    /// A store handing out blocks of `block_size` bytes, with at most
    /// `limit` blocks outstanding at once.
    pub fn new(block_size: u32, limit: usize) -> Arc<Self> {
        Arc::new(BlockStore {
            block_size,
            limit,
            outstanding: AtomicUsize::new(0),
        })
    }

    /// A store with the default block size and an effectively unbounded
    /// limit.
    pub fn with_defaults() -> Arc<Self> {
        Self::new(DEFAULT_BLOCK_SIZE, usize::MAX)
    }

    /// The block size this store hands out.
    #[inline]
    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// The number of blocks currently outstanding.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }

    pub(crate) fn allocate(self: &Arc<Self>, layout: Arc<BlockLayout>) -> Result<Arc<Block>> {
        let prev = self.outstanding.fetch_add(1, Ordering::Relaxed);
        if prev >= self.limit {
            self.outstanding.fetch_sub(1, Ordering::Relaxed);
            return Err(StorageError::BlockCapacity { limit: self.limit });
        }
        let num_slots = layout.num_slots() as usize;
        let bitmap_words = num_slots.div_ceil(64);
        let inner = BlockInner {
            insert_head: 0,
            present: vec![0u64; bitmap_words].into(),
            tombstone: vec![0u64; bitmap_words].into(),
            data: vec![0u8; (layout.tuple_size() as usize) * num_slots].into(),
            varlen_pool: Vec::new(),
            varlen_free: Vec::new(),
            version_heads: vec![None; num_slots].into(),
        };
        Ok(Arc::new(Block {
            layout,
            store: self.clone(),
            inner: RwLock::new(inner),
        }))
    }
}

/// One storage block: a slab of tuple slots for a single layout, plus the
/// per-slot metadata MVCC needs.
///
/// A single [`RwLock`] guards each block. Readers hold the shared lock
/// only long enough to copy an image out and capture the version-chain
/// head; writers hold the exclusive lock across conflict check, chain
/// install and in-place apply.
pub(crate) struct Block {
    pub(crate) layout: Arc<BlockLayout>,
    store: Arc<BlockStore>,
    pub(crate) inner: RwLock<BlockInner>,
}

impl Drop for Block {
    fn drop(&mut self) {
        self.store.outstanding.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) struct BlockInner {
    /// The next never-claimed slot; advances monotonically.
    pub(crate) insert_head: u32,
    /// One bit per slot: set exactly once when the slot is claimed,
    /// cleared only by the garbage collector.
    present: Box<[u64]>,
    /// One bit per slot: the in-place logical-delete flag.
    tombstone: Box<[u64]>,
    data: Box<[u8]>,
    varlen_pool: Vec<Option<Box<[u8]>>>,
    varlen_free: Vec<u32>,
    /// Newest-first version-chain heads, one per slot.
    pub(crate) version_heads: Box<[Option<Arc<UndoRecord>>]>,
}

#[inline]
fn bit(words: &[u64], i: u32) -> bool {
    words[(i / 64) as usize] & (1 << (i % 64)) != 0
}

#[inline]
fn set_bit(words: &mut [u64], i: u32, value: bool) {
    let word = &mut words[(i / 64) as usize];
    if value {
        *word |= 1 << (i % 64);
    } else {
        *word &= !(1 << (i % 64));
    }
}

impl BlockInner {
    #[inline]
    pub(crate) fn is_present(&self, slot: u32) -> bool {
        bit(&self.present, slot)
    }

    pub(crate) fn mark_present(&mut self, slot: u32) {
        debug_assert!(!self.is_present(slot), "presence bit is set exactly once");
        set_bit(&mut self.present, slot, true);
    }

    /// Reserved for the garbage collector.
    pub(crate) fn clear_present(&mut self, slot: u32) {
        set_bit(&mut self.present, slot, false);
    }

    #[inline]
    pub(crate) fn is_deleted(&self, slot: u32) -> bool {
        bit(&self.tombstone, slot)
    }

    pub(crate) fn set_deleted(&mut self, slot: u32, deleted: bool) {
        set_bit(&mut self.tombstone, slot, deleted);
    }

    #[inline]
    fn tuple_offset(&self, layout: &BlockLayout, slot: u32) -> usize {
        (slot as usize) * (layout.tuple_size() as usize)
    }

    fn attr_range(&self, layout: &BlockLayout, slot: u32, col: ColId) -> std::ops::Range<usize> {
        let start = self.tuple_offset(layout, slot) + layout.attr_offset(col) as usize;
        start..start + layout.attr_size(col) as usize
    }

    fn is_attr_null(&self, layout: &BlockLayout, slot: u32, col: ColId) -> bool {
        let byte = self.tuple_offset(layout, slot) + col.idx() / 8;
        self.data[byte] & (1 << (col.idx() % 8)) != 0
    }

    fn set_attr_null(&mut self, layout: &BlockLayout, slot: u32, col: ColId, null: bool) {
        let byte = self.tuple_offset(layout, slot) + col.idx() / 8;
        if null {
            self.data[byte] |= 1 << (col.idx() % 8);
        } else {
            self.data[byte] &= !(1 << (col.idx() % 8));
        }
    }

    /// Sets every column of the tuple at `slot` to null, releasing varlen
    /// payloads. Freshly claimed slots start this way.
    pub(crate) fn clear_tuple(&mut self, layout: &BlockLayout, slot: u32) {
        for col in layout.all_cols() {
            if layout.is_varlen(col) {
                self.release_varlen(layout, slot, col);
            }
            self.set_attr_null(layout, slot, col, true);
        }
    }

    fn read_varlen(&self, layout: &BlockLayout, slot: u32, col: ColId) -> &[u8] {
        let range = self.attr_range(layout, slot, col);
        let entry = &self.data[range];
        let len = u32::from_le_bytes(entry[0..4].try_into().unwrap()) as usize;
        if len <= VARLEN_INLINE_THRESHOLD {
            &entry[4..4 + len]
        } else {
            let idx = u32::from_le_bytes(entry[4..8].try_into().unwrap()) as usize;
            self.varlen_pool[idx].as_deref().expect("varlen entry points at a freed pool slot")
        }
    }

    fn write_varlen(&mut self, layout: &BlockLayout, slot: u32, col: ColId, payload: &[u8]) {
        self.release_varlen(layout, slot, col);
        let range = self.attr_range(layout, slot, col);
        if payload.len() <= VARLEN_INLINE_THRESHOLD {
            let entry = &mut self.data[range];
            entry[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            entry[4..4 + payload.len()].copy_from_slice(payload);
        } else {
            let idx = match self.varlen_free.pop() {
                Some(idx) => {
                    self.varlen_pool[idx as usize] = Some(payload.into());
                    idx
                }
                None => {
                    self.varlen_pool.push(Some(payload.into()));
                    (self.varlen_pool.len() - 1) as u32
                }
            };
            let entry = &mut self.data[range];
            entry[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
            entry[4..8].copy_from_slice(&idx.to_le_bytes());
        }
        self.set_attr_null(layout, slot, col, false);
    }

    /// Frees the pool payload behind a varlen attribute, if any, without
    /// touching the null bit.
    fn release_varlen(&mut self, layout: &BlockLayout, slot: u32, col: ColId) {
        if self.is_attr_null(layout, slot, col) {
            return;
        }
        let range = self.attr_range(layout, slot, col);
        let entry = &self.data[range];
        let len = u32::from_le_bytes(entry[0..4].try_into().unwrap()) as usize;
        if len > VARLEN_INLINE_THRESHOLD {
            let idx = u32::from_le_bytes(entry[4..8].try_into().unwrap());
            self.varlen_pool[idx as usize] = None;
            self.varlen_free.push(idx);
        }
    }

    /// Releases every varlen payload of the tuple at `slot`. Called by the
    /// garbage collector when it reclaims the slot.
    pub(crate) fn release_tuple_varlens(&mut self, layout: &BlockLayout, slot: u32) {
        for col in layout.all_cols() {
            if layout.is_varlen(col) {
                self.release_varlen(layout, slot, col);
                self.set_attr_null(layout, slot, col, true);
            }
        }
    }

    /// Materializes the projected columns of the tuple at `slot` into
    /// `out`, copying values and null bits.
    pub(crate) fn read_row(&self, layout: &BlockLayout, slot: u32, out: &mut ProjectedRow) {
        for (i, &col) in out.col_ids().to_vec().iter().enumerate() {
            if self.is_attr_null(layout, slot, col) {
                out.set_null(i);
            } else if layout.is_varlen(col) {
                let payload = self.read_varlen(layout, slot, col).to_vec();
                out.set_varlen(i, &payload);
            } else {
                let range = self.attr_range(layout, slot, col);
                let bytes = self.data[range].to_vec();
                out.set_raw(i, &bytes);
            }
        }
    }

    /// Builds a fresh projected row of `init`'s columns from the tuple at
    /// `slot`; the before-image capture used by updates.
    pub(crate) fn capture_row(&self, layout: &BlockLayout, slot: u32, init: &Arc<ProjectionInit>) -> ProjectedRow {
        let mut row = init.initialize_row();
        self.read_row(layout, slot, &mut row);
        row
    }

    /// Applies every column of `row` to the tuple at `slot` in place.
    pub(crate) fn apply_row(&mut self, layout: &BlockLayout, slot: u32, row: &ProjectedRow) {
        for (i, &col) in row.col_ids().iter().enumerate() {
            if row.is_null(i) {
                if layout.is_varlen(col) {
                    self.release_varlen(layout, slot, col);
                }
                self.set_attr_null(layout, slot, col, true);
            } else if layout.is_varlen(col) {
                let payload = row.varlen(i).expect("non-null varlen column has a payload");
                self.write_varlen(layout, slot, col, payload);
            } else {
                let range = self.attr_range(layout, slot, col);
                self.data[range].copy_from_slice(row.raw(i));
                self.set_attr_null(layout, slot, col, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AttrSize;

    fn block() -> Arc<Block> {
        let store = BlockStore::new(4096, 8);
        let (layout, _) = BlockLayout::compute(4096, &[AttrSize::Fixed(8), AttrSize::Fixed(4), AttrSize::Varlen]);
        store.allocate(Arc::new(layout)).unwrap()
    }

    #[test]
    fn store_enforces_its_limit() {
        let store = BlockStore::new(4096, 2);
        let (layout, _) = BlockLayout::compute(4096, &[AttrSize::Fixed(8)]);
        let layout = Arc::new(layout);
        let _a = store.allocate(layout.clone()).unwrap();
        let b = store.allocate(layout.clone()).unwrap();
        assert_eq!(store.outstanding(), 2);
        assert!(matches!(store.allocate(layout.clone()), Err(StorageError::BlockCapacity { limit: 2 })));
        drop(b);
        assert_eq!(store.outstanding(), 1);
        assert!(store.allocate(layout).is_ok());
    }

    #[test]
    fn presence_and_tombstone_bits() {
        let block = block();
        let mut g = block.inner.write();
        assert!(!g.is_present(3));
        g.mark_present(3);
        assert!(g.is_present(3));
        assert!(!g.is_deleted(3));
        g.set_deleted(3, true);
        assert!(g.is_deleted(3));
        g.clear_present(3);
        assert!(!g.is_present(3));
    }

    #[test]
    fn tuple_write_read_roundtrip_including_varlens() {
        let block = block();
        let layout = block.layout.clone();
        let init = ProjectionInit::new(&layout, &layout.all_cols());

        let mut row = init.initialize_row();
        row.set::<u64>(0, 42);
        row.set::<u32>(1, 7);
        row.set_varlen(2, b"a varlen payload that spills to the pool");

        let mut g = block.inner.write();
        g.clear_tuple(&layout, 5);
        g.apply_row(&layout, 5, &row);
        let out = g.capture_row(&layout, 5, &init);
        assert_eq!(out.get::<u64>(0), 42);
        assert_eq!(out.get::<u32>(1), 7);
        assert_eq!(out.varlen(2), Some(&b"a varlen payload that spills to the pool"[..]));

        // Inline payloads round-trip too.
        row.set_varlen(2, b"short");
        g.apply_row(&layout, 5, &row);
        let out = g.capture_row(&layout, 5, &init);
        assert_eq!(out.varlen(2), Some(&b"short"[..]));
    }
}
