//! Projected rows: packed, self-describing buffers over a subset of a
//! layout's columns.

use std::sync::Arc;

use bytemuck::Pod;
use quarry_primitives::ColId;

use crate::block::TupleSlot;
use crate::layout::BlockLayout;

/// A reusable, immutable recipe for building projected rows over a fixed
/// set of columns of one layout.
///
/// The column set is canonicalized to layout order (wider fixed columns
/// first, varlens last; equivalently ascending [`ColId`], since the
/// layout assigned ids in exactly that order), and per-column byte offsets, the null
/// bitmap size and the packed row size are precomputed so that
/// initializing a row is a single zeroing allocation.
#[derive(Debug, PartialEq, Eq)]
pub struct ProjectionInit {
    col_ids: Box<[ColId]>,
    attr_sizes: Box<[u16]>,
    varlen_idx: Box<[u16]>,
    offsets: Box<[u32]>,
    null_bitmap_size: u32,
    row_size: u32,
    num_varlens: u16,
}

const NOT_VARLEN: u16 = u16::MAX;

impl ProjectionInit {
    /// Builds an initializer for `cols` of `layout`.
    ///
    /// # Panics
    ///
    /// Panics if `cols` is empty, contains duplicates, or references a
    /// column the layout does not have.
    pub fn new(layout: &BlockLayout, cols: &[ColId]) -> Arc<Self> {
        assert!(!cols.is_empty(), "a projection needs at least one column");
        assert!(layout.contains_all(cols), "projection references unknown columns");

        let mut col_ids: Vec<ColId> = cols.to_vec();
        col_ids.sort_unstable();
        col_ids.dedup();
        assert_eq!(col_ids.len(), cols.len(), "projection contains duplicate columns");

        let null_bitmap_size = col_ids.len().div_ceil(8) as u32;
        let mut offset = null_bitmap_size;
        let mut attr_sizes = Vec::with_capacity(col_ids.len());
        let mut offsets = Vec::with_capacity(col_ids.len());
        let mut varlen_idx = Vec::with_capacity(col_ids.len());
        let mut num_varlens = 0u16;
        for &col in &col_ids {
            let size = layout.attr_size(col);
            attr_sizes.push(size);
            offsets.push(offset);
            offset += u32::from(size);
            if layout.is_varlen(col) {
                varlen_idx.push(num_varlens);
                num_varlens += 1;
            } else {
                varlen_idx.push(NOT_VARLEN);
            }
        }

        Arc::new(ProjectionInit {
            col_ids: col_ids.into(),
            attr_sizes: attr_sizes.into(),
            varlen_idx: varlen_idx.into(),
            offsets: offsets.into(),
            null_bitmap_size,
            row_size: offset,
            num_varlens,
        })
    }

    /// The number of projected columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.col_ids.len()
    }

    /// The projected col-ids, in canonical order.
    #[inline]
    pub fn col_ids(&self) -> &[ColId] {
        &self.col_ids
    }

    /// The packed size of one projected row.
    #[inline]
    pub fn projected_row_size(&self) -> usize {
        self.row_size as usize
    }

    /// The projection position of `col`, if projected.
    #[inline]
    pub fn index_of(&self, col: ColId) -> Option<usize> {
        self.col_ids.binary_search(&col).ok()
    }

    /// The stored width of the column at projection position `i`.
    #[inline]
    pub fn attr_size(&self, i: usize) -> u16 {
        self.attr_sizes[i]
    }

    /// Whether the column at projection position `i` is a varlen.
    #[inline]
    pub fn is_varlen(&self, i: usize) -> bool {
        self.varlen_idx[i] != NOT_VARLEN
    }

    /// Allocates a fresh, all-null projected row.
    pub fn initialize_row(self: &Arc<Self>) -> ProjectedRow {
        let mut data = vec![0u8; self.row_size as usize].into_boxed_slice();
        // All columns start out null.
        for i in 0..self.num_cols() {
            data[i / 8] |= 1 << (i % 8);
        }
        ProjectedRow {
            init: self.clone(),
            data,
            varlens: vec![None; self.num_varlens as usize].into(),
        }
    }

    /// Allocates an empty batch able to hold `max_tuples` projected rows.
    pub fn initialize_columns(self: &Arc<Self>, max_tuples: usize) -> ProjectedColumns {
        ProjectedColumns {
            init: self.clone(),
            max_tuples,
            rows: Vec::with_capacity(max_tuples),
            slots: Vec::with_capacity(max_tuples),
        }
    }
}

/// One projected tuple: a null bitmap plus packed attribute values, with
/// varlen payloads owned out of line.
#[derive(Clone, Debug)]
pub struct ProjectedRow {
    init: Arc<ProjectionInit>,
    data: Box<[u8]>,
    varlens: Box<[Option<Box<[u8]>>]>,
}

impl ProjectedRow {
    /// The initializer this row was built from.
    #[inline]
    pub fn init(&self) -> &Arc<ProjectionInit> {
        &self.init
    }

    /// The number of projected columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.init.num_cols()
    }

    /// The projected col-ids, in canonical order.
    #[inline]
    pub fn col_ids(&self) -> &[ColId] {
        self.init.col_ids()
    }

    /// Whether the column at projection position `i` is null.
    #[inline]
    pub fn is_null(&self, i: usize) -> bool {
        self.data[i / 8] & (1 << (i % 8)) != 0
    }

    /// Nulls out the column at projection position `i`.
    pub fn set_null(&mut self, i: usize) {
        self.data[i / 8] |= 1 << (i % 8);
        if let Some(v) = self.varlen_slot(i) {
            self.varlens[v] = None;
        }
    }

    #[inline]
    fn clear_null(&mut self, i: usize) {
        self.data[i / 8] &= !(1 << (i % 8));
    }

    #[inline]
    fn varlen_slot(&self, i: usize) -> Option<usize> {
        let v = self.init.varlen_idx[i];
        (v != NOT_VARLEN).then_some(v as usize)
    }

    fn range(&self, i: usize) -> std::ops::Range<usize> {
        let start = self.init.offsets[i] as usize;
        start..start + self.init.attr_sizes[i] as usize
    }

    /// The raw attribute bytes at projection position `i`, null or not.
    #[inline]
    pub fn raw(&self, i: usize) -> &[u8] {
        &self.data[self.range(i)]
    }

    /// Writes the raw attribute bytes at projection position `i` and
    /// clears its null bit.
    pub fn set_raw(&mut self, i: usize, bytes: &[u8]) {
        let range = self.range(i);
        debug_assert_eq!(range.len(), bytes.len());
        self.data[range].copy_from_slice(bytes);
        self.clear_null(i);
    }

    /// Writes the fixed-width value at projection position `i`, clearing
    /// its null bit.
    pub fn set<T: Pod>(&mut self, i: usize, value: T) {
        self.set_raw(i, bytemuck::bytes_of(&value));
    }

    /// Reads the fixed-width value at projection position `i` without a
    /// null check.
    pub fn get<T: Pod>(&self, i: usize) -> T {
        bytemuck::pod_read_unaligned(self.raw(i))
    }

    /// Reads the fixed-width value at projection position `i`, or `None`
    /// if the column is null.
    pub fn get_checked<T: Pod>(&self, i: usize) -> Option<T> {
        (!self.is_null(i)).then(|| self.get(i))
    }

    /// Stores a varlen payload at projection position `i`, clearing its
    /// null bit.
    pub fn set_varlen(&mut self, i: usize, payload: &[u8]) {
        let v = self.varlen_slot(i).expect("set_varlen on a fixed-width column");
        self.varlens[v] = Some(payload.into());
        self.clear_null(i);
    }

    /// The varlen payload at projection position `i`, or `None` if null.
    pub fn varlen(&self, i: usize) -> Option<&[u8]> {
        let v = self.varlen_slot(i)?;
        if self.is_null(i) {
            return None;
        }
        self.varlens[v].as_deref()
    }

    /// Copies every column of `delta` that this row also projects,
    /// overwriting value and null state. Used when reconstructing older
    /// versions from before-images and when applying redo deltas.
    pub fn copy_from(&mut self, delta: &ProjectedRow) {
        for (j, &col) in delta.col_ids().iter().enumerate() {
            let Some(i) = self.init.index_of(col) else {
                continue;
            };
            if delta.is_null(j) {
                self.set_null(i);
            } else if let Some(v) = delta.varlen_slot(j) {
                let payload = delta.varlens[v].clone();
                let mine = self.varlen_slot(i).expect("column is varlen in one projection only");
                self.varlens[mine] = payload;
                self.clear_null(i);
            } else {
                self.set_raw(i, delta.raw(j));
            }
        }
    }
}

/// A batch of projected rows plus the slots they were read from; the
/// output buffer of table scans.
#[derive(Debug)]
pub struct ProjectedColumns {
    init: Arc<ProjectionInit>,
    max_tuples: usize,
    rows: Vec<ProjectedRow>,
    slots: Vec<TupleSlot>,
}

impl ProjectedColumns {
    /// The initializer the batch rows are built from.
    #[inline]
    pub fn init(&self) -> &Arc<ProjectionInit> {
        &self.init
    }

    /// The number of materialized tuples.
    #[inline]
    pub fn num_tuples(&self) -> usize {
        self.rows.len()
    }

    /// The batch capacity.
    #[inline]
    pub fn max_tuples(&self) -> usize {
        self.max_tuples
    }

    /// Whether the batch is at capacity.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.rows.len() == self.max_tuples
    }

    /// The `i`-th materialized row.
    #[inline]
    pub fn row(&self, i: usize) -> &ProjectedRow {
        &self.rows[i]
    }

    /// The slot the `i`-th row was read from.
    #[inline]
    pub fn slot(&self, i: usize) -> TupleSlot {
        self.slots[i]
    }

    /// Drops all materialized tuples, keeping the capacity.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.slots.clear();
    }

    /// Appends a fresh all-null row for `slot` and returns it for filling.
    pub(crate) fn append(&mut self, slot: TupleSlot) -> &mut ProjectedRow {
        debug_assert!(!self.is_full());
        self.slots.push(slot);
        self.rows.push(self.init.initialize_row());
        self.rows.last_mut().unwrap()
    }

    /// Drops the most recently appended row; a scan takes a row back when
    /// the slot turned out to be invisible.
    pub(crate) fn discard_last(&mut self) {
        self.rows.pop();
        self.slots.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AttrSize;
    use proptest::prelude::*;

    fn test_layout() -> BlockLayout {
        // u64, u32, u16, u8, varlen, declared shuffled.
        let (layout, _) = BlockLayout::compute(
            1 << 16,
            &[
                AttrSize::Fixed(2),
                AttrSize::Varlen,
                AttrSize::Fixed(8),
                AttrSize::Fixed(1),
                AttrSize::Fixed(4),
            ],
        );
        layout
    }

    #[test]
    fn canonical_order_is_ascending_col_id() {
        let layout = test_layout();
        let init = ProjectionInit::new(&layout, &[ColId(3), ColId(0), ColId(4)]);
        assert_eq!(init.col_ids(), &[ColId(0), ColId(3), ColId(4)]);
        assert_eq!(init.index_of(ColId(3)), Some(1));
        assert_eq!(init.index_of(ColId(1)), None);
    }

    #[test]
    fn rows_start_out_all_null() {
        let layout = test_layout();
        let init = ProjectionInit::new(&layout, &layout.all_cols());
        let row = init.initialize_row();
        for i in 0..row.num_cols() {
            assert!(row.is_null(i));
        }
    }

    #[test]
    fn write_then_read_roundtrips() {
        let layout = test_layout();
        let init = ProjectionInit::new(&layout, &layout.all_cols());
        let mut row = init.initialize_row();
        row.set::<u64>(0, 0xdead_beef_cafe_f00d);
        row.set::<u32>(1, 77);
        row.set::<u16>(2, 12);
        row.set::<u8>(3, 3);
        row.set_varlen(4, b"hello quarry");
        assert_eq!(row.get::<u64>(0), 0xdead_beef_cafe_f00d);
        assert_eq!(row.get_checked::<u32>(1), Some(77));
        assert_eq!(row.varlen(4), Some(&b"hello quarry"[..]));
        row.set_null(1);
        assert_eq!(row.get_checked::<u32>(1), None);
    }

    #[test]
    fn copy_from_applies_only_overlapping_columns() {
        let layout = test_layout();
        let all = ProjectionInit::new(&layout, &layout.all_cols());
        let delta_init = ProjectionInit::new(&layout, &[ColId(1), ColId(4)]);

        let mut row = all.initialize_row();
        row.set::<u64>(0, 1);
        row.set::<u32>(1, 2);
        row.set_varlen(4, b"old");

        let mut delta = delta_init.initialize_row();
        delta.set::<u32>(0, 99);
        delta.set_varlen(1, b"new value, long enough to not inline");

        row.copy_from(&delta);
        assert_eq!(row.get::<u64>(0), 1);
        assert_eq!(row.get::<u32>(1), 99);
        assert_eq!(row.varlen(4), Some(&b"new value, long enough to not inline"[..]));
    }

    proptest! {
        #[test]
        fn fixed_width_roundtrip(a in any::<u64>(), b in any::<u32>(), c in any::<u16>(), d in any::<u8>()) {
            let layout = test_layout();
            let init = ProjectionInit::new(&layout, &layout.all_cols());
            let mut row = init.initialize_row();
            row.set(0, a);
            row.set(1, b);
            row.set(2, c);
            row.set(3, d);
            prop_assert_eq!(row.get::<u64>(0), a);
            prop_assert_eq!(row.get::<u32>(1), b);
            prop_assert_eq!(row.get::<u16>(2), c);
            prop_assert_eq!(row.get::<u8>(3), d);
        }

        #[test]
        fn varlen_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            let layout = test_layout();
            let init = ProjectionInit::new(&layout, &[ColId(4)]);
            let mut row = init.initialize_row();
            row.set_varlen(0, &payload);
            prop_assert_eq!(row.varlen(0), Some(&payload[..]));
        }
    }
}
