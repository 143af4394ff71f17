//! The index abstraction: caller-defined keys mapped to tuple slots.
//!
//! Indexes are MVCC-aware only at their edges: the entries themselves
//! are version-free `(key, slot)` pairs, and every lookup filters slots
//! through the owning table's visibility check. Maintenance follows the
//! transaction's outcome: an insert is undone if the transaction
//! aborts, and a delete's entry removal is deferred past the epoch so
//! older snapshots keep finding the slot.

mod key;

pub use key::{IndexKey, KeyColumn, KeyFamily, KeySchema};

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::RwLock;
use quarry_primitives::IndexOid;

use crate::block::TupleSlot;
use crate::data_table::DataTable;
use crate::error::IndexError;
use crate::projection::{ProjectedRow, ProjectionInit};
use crate::transaction::TransactionContext;

type SlotSet = BTreeSet<TupleSlot>;

enum IndexState {
    /// B-tree-backed; supports ordered scans.
    Ordered(BTreeMap<IndexKey, SlotSet>),
    /// Hash-backed; equality lookups only.
    Hash(HashMap<IndexKey, SlotSet>),
}

/// The outcome of [`Index::conditional_insert`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ConditionalInsert {
    /// Whether the `(key, slot)` pair was inserted.
    pub inserted: bool,
    /// Whether some current holder of the key satisfied the predicate.
    pub satisfied: bool,
}

/// A mapping from keys to tuple slots over one data table.
pub struct Index {
    oid: IndexOid,
    table: Arc<DataTable>,
    schema: KeySchema,
    unique: bool,
    state: RwLock<IndexState>,
}

impl Index {
    /// An ordered (B-tree-backed) index.
    pub fn new_ordered(oid: IndexOid, table: Arc<DataTable>, schema: KeySchema, unique: bool) -> Arc<Self> {
        Arc::new(Index {
            oid,
            table,
            schema,
            unique,
            state: RwLock::new(IndexState::Ordered(BTreeMap::new())),
        })
    }

    /// An unordered (hash-backed) index.
    pub fn new_hash(oid: IndexOid, table: Arc<DataTable>, schema: KeySchema, unique: bool) -> Arc<Self> {
        Arc::new(Index {
            oid,
            table,
            schema,
            unique,
            state: RwLock::new(IndexState::Hash(HashMap::new())),
        })
    }

    #[inline]
    pub fn oid(&self) -> IndexOid {
        self.oid
    }

    #[inline]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Whether this index supports ordered scans.
    pub fn is_ordered(&self) -> bool {
        matches!(&*self.state.read(), IndexState::Ordered(_))
    }

    /// The key family of this index's key schema.
    pub fn key_family(&self) -> KeyFamily {
        self.schema.family()
    }

    /// The initializer key rows are built from.
    pub fn key_initializer(&self) -> &Arc<ProjectionInit> {
        self.schema.key_initializer()
    }

    /// The key columns' col-ids, in key order.
    pub fn key_col_ids(&self) -> Vec<quarry_primitives::ColId> {
        self.schema.key_col_ids()
    }

    /// The table this index maps into.
    pub fn table(&self) -> &Arc<DataTable> {
        &self.table
    }

    /// Unconditionally inserts `(key, slot)`; duplicates are allowed. The
    /// entry is taken back out if `txn` aborts.
    pub fn insert(self: &Arc<Self>, txn: &TransactionContext, key: &ProjectedRow, slot: TupleSlot) {
        let encoded = self.schema.encode(key);
        self.entry_insert(encoded.clone(), slot);
        let index = self.clone();
        txn.register_abort_action(move |_, _| index.erase(&encoded, slot));
    }

    /// Inserts `(key, slot)` unless the key is already bound to a tuple
    /// that is, or may become, live. The MVCC shape of a unique
    /// constraint.
    pub fn insert_unique(
        self: &Arc<Self>,
        txn: &TransactionContext,
        key: &ProjectedRow,
        slot: TupleSlot,
    ) -> Result<(), IndexError> {
        debug_assert!(self.unique);
        let table = self.table.clone();
        let outcome = self.conditional_insert(txn, key, slot, move |txn, existing| table.may_be_live(txn, existing));
        if outcome.satisfied {
            return Err(IndexError::DuplicateKey);
        }
        Ok(())
    }

    /// Atomically tests every current value for `key` against
    /// `predicate`: if any satisfies it nothing is inserted, otherwise
    /// `(key, slot)` goes in. The entry is taken back out if `txn`
    /// aborts.
    pub fn conditional_insert(
        self: &Arc<Self>,
        txn: &TransactionContext,
        key: &ProjectedRow,
        slot: TupleSlot,
        predicate: impl Fn(&TransactionContext, TupleSlot) -> bool,
    ) -> ConditionalInsert {
        let encoded = self.schema.encode(key);
        let mut state = self.state.write();
        let existing = match &*state {
            IndexState::Ordered(map) => map.get(&encoded),
            IndexState::Hash(map) => map.get(&encoded),
        };
        if let Some(slots) = existing {
            if slots.iter().any(|&s| predicate(txn, s)) {
                return ConditionalInsert {
                    inserted: false,
                    satisfied: true,
                };
            }
        }
        match &mut *state {
            IndexState::Ordered(map) => map.entry(encoded.clone()).or_default().insert(slot),
            IndexState::Hash(map) => map.entry(encoded.clone()).or_default().insert(slot),
        };
        drop(state);

        let index = self.clone();
        txn.register_abort_action(move |_, _| index.erase(&encoded, slot));
        ConditionalInsert {
            inserted: true,
            satisfied: false,
        }
    }

    /// Removes exactly the `(key, slot)` pair, once `txn` commits and the
    /// epoch has passed the commit, since older snapshots must keep
    /// finding the slot until then.
    pub fn delete(self: &Arc<Self>, txn: &TransactionContext, key: &ProjectedRow, slot: TupleSlot) {
        let encoded = self.schema.encode(key);
        let index = self.clone();
        txn.register_commit_action(move |deferred, _| {
            deferred.defer(move || index.erase(&encoded, slot));
        });
    }

    fn entry_insert(&self, key: IndexKey, slot: TupleSlot) {
        let mut state = self.state.write();
        match &mut *state {
            IndexState::Ordered(map) => map.entry(key).or_default().insert(slot),
            IndexState::Hash(map) => map.entry(key).or_default().insert(slot),
        };
    }

    fn erase(&self, key: &IndexKey, slot: TupleSlot) {
        let mut state = self.state.write();
        match &mut *state {
            IndexState::Ordered(map) => {
                if let Some(slots) = map.get_mut(key) {
                    slots.remove(&slot);
                    if slots.is_empty() {
                        map.remove(key);
                    }
                }
            }
            IndexState::Hash(map) => {
                if let Some(slots) = map.get_mut(key) {
                    slots.remove(&slot);
                    if slots.is_empty() {
                        map.remove(key);
                    }
                }
            }
        }
    }

    /// Appends to `out` every slot bound to `key` whose tuple is visible
    /// to `txn`.
    pub fn scan_key(&self, txn: &TransactionContext, key: &ProjectedRow, out: &mut Vec<TupleSlot>) {
        let encoded = self.schema.encode(key);
        let state = self.state.read();
        let slots = match &*state {
            IndexState::Ordered(map) => map.get(&encoded),
            IndexState::Hash(map) => map.get(&encoded),
        };
        if let Some(slots) = slots {
            out.extend(slots.iter().copied().filter(|&s| self.table.is_visible(txn, s)));
        }
    }

    /// Appends to `out` the visible slots whose keys fall between `low`
    /// and `high`, ascending, stopping after `limit` slots if given.
    pub fn scan_ascending(
        &self,
        txn: &TransactionContext,
        low: Bound<&ProjectedRow>,
        high: Bound<&ProjectedRow>,
        limit: Option<usize>,
        out: &mut Vec<TupleSlot>,
    ) -> Result<(), IndexError> {
        self.scan_range(txn, low, high, limit, false, out)
    }

    /// Like [`Self::scan_ascending`], in descending key order.
    pub fn scan_descending(
        &self,
        txn: &TransactionContext,
        low: Bound<&ProjectedRow>,
        high: Bound<&ProjectedRow>,
        limit: Option<usize>,
        out: &mut Vec<TupleSlot>,
    ) -> Result<(), IndexError> {
        self.scan_range(txn, low, high, limit, true, out)
    }

    fn scan_range(
        &self,
        txn: &TransactionContext,
        low: Bound<&ProjectedRow>,
        high: Bound<&ProjectedRow>,
        limit: Option<usize>,
        descending: bool,
        out: &mut Vec<TupleSlot>,
    ) -> Result<(), IndexError> {
        let encode = |b: Bound<&ProjectedRow>| match b {
            Bound::Included(r) => Bound::Included(self.schema.encode(r)),
            Bound::Excluded(r) => Bound::Excluded(self.schema.encode(r)),
            Bound::Unbounded => Bound::Unbounded,
        };
        let (low, high) = (encode(low), encode(high));
        let limit = limit.unwrap_or(usize::MAX);

        let state = self.state.read();
        let IndexState::Ordered(map) = &*state else {
            return Err(IndexError::NotOrdered);
        };
        let range = map.range((low, high));
        let mut emit = |slots: &SlotSet| {
            for &slot in slots {
                if out.len() >= limit {
                    return false;
                }
                if self.table.is_visible(txn, slot) {
                    out.push(slot);
                }
            }
            true
        };
        if descending {
            for (_, slots) in range.rev() {
                if !emit(slots) {
                    break;
                }
            }
        } else {
            for (_, slots) in range {
                if !emit(slots) {
                    break;
                }
            }
        }
        Ok(())
    }
}
