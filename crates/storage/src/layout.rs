//! Block layouts: the physical shape of a table's tuples.

use quarry_primitives::ColId;

/// The fixed size of a varlen entry within a tuple. Payloads up to
/// [`VARLEN_INLINE_THRESHOLD`] bytes are stored inline in the entry;
/// longer payloads live in the owning block's varlen pool.
pub const VARLEN_ENTRY_SIZE: u16 = 16;

/// The largest varlen payload stored inline in its entry.
pub const VARLEN_INLINE_THRESHOLD: usize = 12;

/// The declared size of one attribute, before layout reordering.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AttrSize {
    /// A fixed-width attribute of the given byte width (1, 2, 4 or 8).
    Fixed(u16),
    /// A variable-length attribute, stored as a [`VARLEN_ENTRY_SIZE`]-byte
    /// entry.
    Varlen,
}

impl AttrSize {
    /// The width this attribute occupies within a tuple slot.
    pub fn stored_size(self) -> u16 {
        match self {
            AttrSize::Fixed(n) => n,
            AttrSize::Varlen => VARLEN_ENTRY_SIZE,
        }
    }

    /// Whether this attribute is variable-length.
    pub fn is_varlen(self) -> bool {
        matches!(self, AttrSize::Varlen)
    }
}

/// The precomputed physical layout of one table's tuples within a block.
///
/// Attributes are reordered at construction: fixed-width columns by
/// descending width, varlen entries last. The layout assigns each
/// attribute its [`ColId`] in that order and reports, per col-id, the
/// byte offset of the attribute within a tuple slot. A tuple slot is a
/// per-tuple null bitmap followed by the packed attributes.
#[derive(Debug)]
pub struct BlockLayout {
    attr_sizes: Box<[u16]>,
    varlen: Box<[bool]>,
    offsets: Box<[u32]>,
    null_bitmap_size: u32,
    tuple_size: u32,
    num_slots: u32,
}

impl BlockLayout {
    /// Computes the layout of `attrs` (given in declaration order) for
    /// blocks of `block_size` bytes. Returns the layout together with the
    /// [`ColId`] assigned to each input attribute, by input position.
    ///
    /// # Panics
    ///
    /// Panics if `attrs` is empty or if a single tuple does not fit in a
    /// block; both indicate a bug in the caller.
    pub fn compute(block_size: u32, attrs: &[AttrSize]) -> (Self, Vec<ColId>) {
        assert!(!attrs.is_empty(), "a layout needs at least one attribute");
        assert!(attrs.len() <= u16::MAX as usize);

        // Stable-sort the declaration positions: wider fixed attributes
        // first, varlens last. Stability keeps declaration order among
        // equals, which makes col-id assignment deterministic.
        let mut order: Vec<usize> = (0..attrs.len()).collect();
        order.sort_by_key(|&i| (attrs[i].is_varlen(), std::cmp::Reverse(attrs[i].stored_size())));

        let mut col_ids = vec![ColId(0); attrs.len()];
        let mut attr_sizes = Vec::with_capacity(attrs.len());
        let mut varlen = Vec::with_capacity(attrs.len());

        let null_bitmap_size = attrs.len().div_ceil(8) as u32;
        let mut offset = null_bitmap_size;
        let mut offsets = Vec::with_capacity(attrs.len());
        for (col_id, &pos) in order.iter().enumerate() {
            col_ids[pos] = ColId(col_id as u16);
            attr_sizes.push(attrs[pos].stored_size());
            varlen.push(attrs[pos].is_varlen());
            offsets.push(offset);
            offset += u32::from(attrs[pos].stored_size());
        }

        let tuple_size = offset;
        let num_slots = block_size / tuple_size;
        assert!(num_slots > 0, "tuple of {tuple_size} bytes does not fit a {block_size}-byte block");

        let layout = BlockLayout {
            attr_sizes: attr_sizes.into(),
            varlen: varlen.into(),
            offsets: offsets.into(),
            null_bitmap_size,
            tuple_size,
            num_slots,
        };
        (layout, col_ids)
    }

    /// The number of attributes in this layout.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.attr_sizes.len()
    }

    /// The stored width of `col`, in bytes.
    #[inline]
    pub fn attr_size(&self, col: ColId) -> u16 {
        self.attr_sizes[col.idx()]
    }

    /// Whether `col` is a varlen attribute.
    #[inline]
    pub fn is_varlen(&self, col: ColId) -> bool {
        self.varlen[col.idx()]
    }

    /// The byte offset of `col` within a tuple slot.
    #[inline]
    pub fn attr_offset(&self, col: ColId) -> u32 {
        self.offsets[col.idx()]
    }

    /// The size of one tuple slot, null bitmap included.
    #[inline]
    pub fn tuple_size(&self) -> u32 {
        self.tuple_size
    }

    /// The size of the per-tuple null bitmap prefix.
    #[inline]
    pub fn null_bitmap_size(&self) -> u32 {
        self.null_bitmap_size
    }

    /// The number of tuple slots per block.
    #[inline]
    pub fn num_slots(&self) -> u32 {
        self.num_slots
    }

    /// All col-ids of this layout, in layout order.
    pub fn all_cols(&self) -> Vec<ColId> {
        (0..self.num_cols() as u16).map(ColId).collect()
    }

    /// Whether every column of `cols` exists in this layout.
    pub fn contains_all(&self, cols: &[ColId]) -> bool {
        cols.iter().all(|c| c.idx() < self.num_cols())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorders_wider_attrs_first_and_varlens_last() {
        let (layout, col_ids) = BlockLayout::compute(
            4096,
            &[AttrSize::Fixed(1), AttrSize::Varlen, AttrSize::Fixed(8), AttrSize::Fixed(4)],
        );
        // Declaration order: u8, varlen, u64, u32.
        // Layout order must be: u64, u32, u8, varlen.
        assert_eq!(col_ids, vec![ColId(2), ColId(3), ColId(0), ColId(1)]);
        assert_eq!(layout.attr_size(ColId(0)), 8);
        assert_eq!(layout.attr_size(ColId(1)), 4);
        assert_eq!(layout.attr_size(ColId(2)), 1);
        assert_eq!(layout.attr_size(ColId(3)), VARLEN_ENTRY_SIZE);
        assert!(layout.is_varlen(ColId(3)));
        assert!(!layout.is_varlen(ColId(0)));
    }

    #[test]
    fn offsets_are_packed_after_the_null_bitmap() {
        let (layout, _) = BlockLayout::compute(4096, &[AttrSize::Fixed(8), AttrSize::Fixed(4)]);
        assert_eq!(layout.null_bitmap_size(), 1);
        assert_eq!(layout.attr_offset(ColId(0)), 1);
        assert_eq!(layout.attr_offset(ColId(1)), 9);
        assert_eq!(layout.tuple_size(), 13);
        assert_eq!(layout.num_slots(), 4096 / 13);
    }

    #[test]
    fn ties_keep_declaration_order() {
        let (_, col_ids) = BlockLayout::compute(4096, &[AttrSize::Fixed(4), AttrSize::Fixed(4)]);
        assert_eq!(col_ids, vec![ColId(0), ColId(1)]);
    }
}
