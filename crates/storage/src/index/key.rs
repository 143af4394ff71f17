//! Index key families.
//!
//! Keys are byte strings compared bytewise, so every encoder here must be
//! order-preserving. Two families exist: the compact-ints key packs
//! big-endian, sign-flipped integers (the fast path for integer key
//! schemas), and the generic key handles nullable and variable-length
//! key columns with a memcomparable escape encoding.

use std::sync::Arc;

use quarry_primitives::ColId;
use smallvec::SmallVec;

use crate::layout::BlockLayout;
use crate::projection::{ProjectedRow, ProjectionInit};

/// An encoded index key. Ordering is plain bytewise comparison.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct IndexKey(SmallVec<[u8; 24]>);

/// How one key column is encoded.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyColumn {
    /// A fixed-width integer of 1, 2, 4 or 8 bytes.
    Int { size: u16, signed: bool },
    /// A variable-length byte string.
    Varlen,
}

/// The key family a schema encodes with.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KeyFamily {
    /// Packed big-endian sign-flipped integers; not-null only.
    CompactInts,
    /// Null markers plus escape-encoded varlens; handles everything.
    Generic,
}

/// The recipe for building keys out of projected rows: which table
/// columns participate, in which order, and how each is encoded.
///
/// The projection initializer canonicalizes column order by width, which
/// is not the key order; `order` maps each key position back to its
/// projection position.
pub struct KeySchema {
    key_init: Arc<ProjectionInit>,
    order: Box<[usize]>,
    columns: Box<[KeyColumn]>,
    family: KeyFamily,
}

impl KeySchema {
    /// Builds a key schema over `cols` of `layout`, in key order. The
    /// compact-ints family is chosen when every column is a not-null
    /// integer encoding; anything else selects the generic family.
    pub fn new(layout: &BlockLayout, cols: &[(ColId, KeyColumn)]) -> Self {
        let col_ids: Vec<ColId> = cols.iter().map(|(c, _)| *c).collect();
        let key_init = ProjectionInit::new(layout, &col_ids);
        let order = col_ids
            .iter()
            .map(|c| key_init.index_of(*c).expect("key column is projected"))
            .collect();
        let columns: Box<[KeyColumn]> = cols.iter().map(|(_, k)| *k).collect();
        let family = if columns.iter().all(|c| matches!(c, KeyColumn::Int { .. })) {
            KeyFamily::CompactInts
        } else {
            KeyFamily::Generic
        };
        KeySchema {
            key_init,
            order,
            columns,
            family,
        }
    }

    /// The initializer callers fill key rows with.
    pub fn key_initializer(&self) -> &Arc<ProjectionInit> {
        &self.key_init
    }

    /// The family this schema encodes with.
    pub fn family(&self) -> KeyFamily {
        self.family
    }

    /// The key columns' col-ids, in key order (the comparison order),
    /// which may differ from the initializer's canonical order.
    pub fn key_col_ids(&self) -> Vec<ColId> {
        self.order.iter().map(|&i| self.key_init.col_ids()[i]).collect()
    }

    /// Encodes `row` (built from [`Self::key_initializer`]) into a key.
    pub fn encode(&self, row: &ProjectedRow) -> IndexKey {
        debug_assert_eq!(row.init().as_ref(), self.key_init.as_ref());
        let mut bytes = SmallVec::new();
        for (k, column) in self.columns.iter().enumerate() {
            let i = self.order[k];
            match (self.family, column) {
                (KeyFamily::CompactInts, KeyColumn::Int { size, signed }) => {
                    debug_assert!(!row.is_null(i), "compact-ints keys are not-null");
                    encode_int(&mut bytes, row, i, *size, *signed);
                }
                (KeyFamily::Generic, KeyColumn::Int { size, signed }) => {
                    if row.is_null(i) {
                        bytes.push(0);
                    } else {
                        bytes.push(1);
                        encode_int(&mut bytes, row, i, *size, *signed);
                    }
                }
                (_, KeyColumn::Varlen) => match row.varlen(i) {
                    None => bytes.push(0),
                    Some(payload) => {
                        bytes.push(1);
                        encode_varlen(&mut bytes, payload);
                    }
                },
            }
        }
        IndexKey(bytes)
    }
}

/// Big-endian with the sign bit flipped for signed columns, so that the
/// bytewise order of the encoding matches the numeric order.
fn encode_int(out: &mut SmallVec<[u8; 24]>, row: &ProjectedRow, i: usize, size: u16, signed: bool) {
    let mut value = match size {
        1 => u64::from(row.get::<u8>(i)),
        2 => u64::from(row.get::<u16>(i)),
        4 => u64::from(row.get::<u32>(i)),
        8 => row.get::<u64>(i),
        _ => unreachable!("integer key columns are 1, 2, 4 or 8 bytes"),
    };
    if signed {
        value ^= 1 << (u32::from(size) * 8 - 1);
    }
    out.extend_from_slice(&value.to_be_bytes()[8 - size as usize..]);
}

/// Memcomparable escape encoding: `0x00` bytes become `0x00 0xFF` and the
/// value is closed with a `0x00 0x00` terminator, preserving prefix order
/// for byte strings of different lengths.
fn encode_varlen(out: &mut SmallVec<[u8; 24]>, payload: &[u8]) {
    for &b in payload {
        out.push(b);
        if b == 0 {
            out.push(0xFF);
        }
    }
    out.extend_from_slice(&[0, 0]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::AttrSize;

    fn int_schema() -> (BlockLayout, Vec<ColId>) {
        BlockLayout::compute(4096, &[AttrSize::Fixed(8), AttrSize::Fixed(4)])
    }

    #[test]
    fn all_int_schemas_pick_compact_ints() {
        let (layout, cols) = int_schema();
        let schema = KeySchema::new(
            &layout,
            &[
                (cols[0], KeyColumn::Int { size: 8, signed: true }),
                (cols[1], KeyColumn::Int { size: 4, signed: false }),
            ],
        );
        assert_eq!(schema.family(), KeyFamily::CompactInts);
    }

    #[test]
    fn varlen_schemas_fall_back_to_generic() {
        let (layout, cols) = BlockLayout::compute(4096, &[AttrSize::Varlen, AttrSize::Fixed(4)]);
        let schema = KeySchema::new(
            &layout,
            &[
                (cols[0], KeyColumn::Varlen),
                (cols[1], KeyColumn::Int { size: 4, signed: false }),
            ],
        );
        assert_eq!(schema.family(), KeyFamily::Generic);
    }

    #[test]
    fn signed_compact_ints_order_like_the_integers() {
        let (layout, cols) = int_schema();
        let schema = KeySchema::new(&layout, &[(cols[0], KeyColumn::Int { size: 8, signed: true })]);
        let key_of = |v: i64| {
            let mut row = schema.key_initializer().initialize_row();
            row.set(0, v as u64);
            schema.encode(&row)
        };
        let mut keys = vec![key_of(3), key_of(-5), key_of(0), key_of(i64::MIN), key_of(i64::MAX)];
        keys.sort();
        assert_eq!(
            keys,
            vec![key_of(i64::MIN), key_of(-5), key_of(0), key_of(3), key_of(i64::MAX)]
        );
    }

    #[test]
    fn multi_column_keys_order_lexicographically() {
        let (layout, cols) = int_schema();
        let schema = KeySchema::new(
            &layout,
            &[
                (cols[1], KeyColumn::Int { size: 4, signed: false }),
                (cols[0], KeyColumn::Int { size: 8, signed: false }),
            ],
        );
        let key_of = |a: u32, b: u64| {
            let mut row = schema.key_initializer().initialize_row();
            let a_pos = schema.key_initializer().index_of(cols[1]).unwrap();
            let b_pos = schema.key_initializer().index_of(cols[0]).unwrap();
            row.set(a_pos, a);
            row.set(b_pos, b);
            // Keys are built from the row regardless of projection order.
            schema.encode(&row)
        };
        assert!(key_of(1, 9) < key_of(2, 0));
        assert!(key_of(2, 0) < key_of(2, 1));
    }

    #[test]
    fn generic_varlen_keys_preserve_prefix_order() {
        let (layout, cols) = BlockLayout::compute(4096, &[AttrSize::Varlen]);
        let schema = KeySchema::new(&layout, &[(cols[0], KeyColumn::Varlen)]);
        let key_of = |s: &[u8]| {
            let mut row = schema.key_initializer().initialize_row();
            row.set_varlen(0, s);
            schema.encode(&row)
        };
        assert!(key_of(b"ab") < key_of(b"abc"));
        assert!(key_of(b"a") < key_of(b"a\0b"));
        assert!(key_of(b"a\0b") < key_of(b"ab"));
        // Nulls sort first.
        let null_key = {
            let row = schema.key_initializer().initialize_row();
            schema.encode(&row)
        };
        assert!(null_key < key_of(b""));
    }
}
