//! The SQL-table wrapper: the first layer that speaks column oids.
//!
//! Storage assigns physical col-ids by reordering attributes for
//! alignment; the catalog hands out stable column oids. This wrapper owns
//! the translation and exposes projection initializers keyed by oid, so
//! nothing above it ever touches a col-id.

use std::sync::Arc;

use quarry_primitives::{ColId, ColOid, IdMap, TableOid, TypeId};
use quarry_storage::index::{KeyColumn, KeySchema};
use quarry_storage::{
    AttrSize, BlockLayout, BlockStore, DataTable, ProjectedColumns, ProjectedRow, ProjectionInit, SlotIterator,
    StorageError, TupleSlot,
};

use crate::schema::Schema;
use crate::TransactionContext;

/// An oid-to-projection-position map for one projection of one table.
#[derive(Clone, Debug)]
pub struct ProjectionMap {
    positions: IdMap<ColOid, usize>,
}

impl ProjectionMap {
    /// The projection position of `oid`, if projected.
    pub fn position(&self, oid: ColOid) -> Option<usize> {
        self.positions.get(&oid).copied()
    }

    /// The projection position of `oid`; the column must be projected.
    pub fn idx(&self, oid: ColOid) -> usize {
        self.positions[&oid]
    }
}

/// A table with a schema: a data table plus the oid↔col-id translation.
pub struct SqlTable {
    oid: TableOid,
    schema: Schema,
    table: Arc<DataTable>,
    col_ids: IdMap<ColOid, ColId>,
}

impl SqlTable {
    /// Allocates storage for `schema` (whose columns must carry assigned
    /// oids) and wires up the translation maps.
    pub fn new(store: &Arc<BlockStore>, schema: Schema, oid: TableOid) -> Result<Arc<Self>, StorageError> {
        debug_assert!(
            schema.columns().iter().all(|c| c.oid().is_valid()),
            "schema columns must have assigned oids"
        );
        let attrs: Vec<AttrSize> = schema
            .columns()
            .iter()
            .map(|c| match c.type_id() {
                t if t.is_varlen() => AttrSize::Varlen,
                t => AttrSize::Fixed(t.size()),
            })
            .collect();
        let (layout, assigned) = BlockLayout::compute(store.block_size(), &attrs);
        let table = DataTable::new(store.clone(), Arc::new(layout), oid)?;

        let mut col_ids = IdMap::default();
        for (column, col_id) in schema.columns().iter().zip(assigned) {
            col_ids.insert(column.oid(), col_id);
        }
        Ok(Arc::new(SqlTable {
            oid,
            schema,
            table,
            col_ids,
        }))
    }

    #[inline]
    pub fn oid(&self) -> TableOid {
        self.oid
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The underlying versioned storage.
    pub fn data_table(&self) -> &Arc<DataTable> {
        &self.table
    }

    /// Constant-time oid → col-id translation.
    pub fn col_id_for_oid(&self, oid: ColOid) -> Option<ColId> {
        self.col_ids.get(&oid).copied()
    }

    /// Linear col-id → oid translation; rare paths (recovery) only.
    pub fn oid_for_col_id(&self, col_id: ColId) -> Option<ColOid> {
        self.col_ids
            .iter()
            .find(|(_, &id)| id == col_id)
            .map(|(&oid, _)| oid)
    }

    fn translate(&self, col_oids: &[ColOid]) -> Vec<ColId> {
        col_oids
            .iter()
            .map(|oid| self.col_ids[oid])
            .collect()
    }

    /// A projected-row initializer over `col_oids`, with the map from oid
    /// to projection position.
    pub fn initializer_for_projected_row(&self, col_oids: &[ColOid]) -> (Arc<ProjectionInit>, ProjectionMap) {
        let init = ProjectionInit::new(self.table.layout(), &self.translate(col_oids));
        let map = self.projection_map(col_oids, &init);
        (init, map)
    }

    /// A projected-columns batch over `col_oids`, with its map.
    pub fn initializer_for_projected_columns(
        &self,
        col_oids: &[ColOid],
        max_tuples: usize,
    ) -> (ProjectedColumns, ProjectionMap) {
        let (init, map) = self.initializer_for_projected_row(col_oids);
        (init.initialize_columns(max_tuples), map)
    }

    /// The oid-to-offset map for an existing initializer over `col_oids`.
    pub fn projection_map_for_oids(&self, col_oids: &[ColOid]) -> ProjectionMap {
        let init = ProjectionInit::new(self.table.layout(), &self.translate(col_oids));
        self.projection_map(col_oids, &init)
    }

    fn projection_map(&self, col_oids: &[ColOid], init: &Arc<ProjectionInit>) -> ProjectionMap {
        let mut positions = IdMap::default();
        for &oid in col_oids {
            let col_id = self.col_ids[&oid];
            positions.insert(oid, init.index_of(col_id).expect("projected column"));
        }
        ProjectionMap { positions }
    }

    /// The key schema for an index over `col_oids`, in key order.
    pub fn key_schema(&self, col_oids: &[ColOid]) -> KeySchema {
        let cols: Vec<(ColId, KeyColumn)> = col_oids
            .iter()
            .map(|oid| {
                let column = self
                    .schema
                    .column_by_oid(*oid)
                    .expect("key column exists in the schema");
                (self.col_ids[oid], key_column_for(column.type_id()))
            })
            .collect();
        KeySchema::new(self.table.layout(), &cols)
    }

    pub fn select(&self, txn: &TransactionContext, slot: TupleSlot, out: &mut ProjectedRow) -> bool {
        self.table.select(txn, slot, out)
    }

    pub fn insert(&self, txn: &TransactionContext, redo: &ProjectedRow) -> Result<TupleSlot, StorageError> {
        self.table.insert(txn, redo)
    }

    pub fn update(&self, txn: &TransactionContext, slot: TupleSlot, redo: &ProjectedRow) -> Result<(), StorageError> {
        self.table.update(txn, slot, redo)
    }

    pub fn delete(&self, txn: &TransactionContext, slot: TupleSlot) -> Result<(), StorageError> {
        self.table.delete(txn, slot)
    }

    pub fn begin(&self) -> SlotIterator {
        self.table.begin()
    }

    pub fn scan(&self, txn: &TransactionContext, iter: &mut SlotIterator, out: &mut ProjectedColumns) {
        self.table.scan(txn, iter, out)
    }
}

/// How a table column of the given type participates in an index key.
fn key_column_for(type_id: TypeId) -> KeyColumn {
    match type_id {
        TypeId::Boolean => KeyColumn::Int { size: 1, signed: false },
        TypeId::TinyInt => KeyColumn::Int { size: 1, signed: true },
        TypeId::SmallInt => KeyColumn::Int { size: 2, signed: true },
        TypeId::Integer => KeyColumn::Int { size: 4, signed: true },
        TypeId::BigInt | TypeId::Decimal => KeyColumn::Int { size: 8, signed: true },
        TypeId::Timestamp => KeyColumn::Int { size: 8, signed: false },
        TypeId::Date => KeyColumn::Int { size: 4, signed: false },
        TypeId::Varchar | TypeId::Varbinary => KeyColumn::Varlen,
        TypeId::Invalid => unreachable!("invalid type in a key schema"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Column;
    use quarry_storage::TransactionManager;

    fn sample() -> (Arc<quarry_storage::TransactionManager>, Arc<SqlTable>) {
        let store = BlockStore::new(1 << 16, 256);
        let mut schema = Schema::new(vec![
            Column::new("id", TypeId::Integer, false),
            Column::new("name", TypeId::Varchar, true),
            Column::new("balance", TypeId::BigInt, false),
        ]);
        schema.assign_col_oids();
        let table = SqlTable::new(&store, schema, TableOid(2001)).unwrap();
        (TransactionManager::new(), table)
    }

    #[test]
    fn oid_translation_is_bidirectional() {
        let (_, table) = sample();
        // Layout order is balance(8), id(4), name(varlen): the physical
        // ids differ from declaration order.
        let id = table.col_id_for_oid(ColOid(1)).unwrap();
        let name = table.col_id_for_oid(ColOid(2)).unwrap();
        let balance = table.col_id_for_oid(ColOid(3)).unwrap();
        assert_eq!(balance, ColId(0));
        assert_eq!(id, ColId(1));
        assert_eq!(name, ColId(2));
        for oid in [ColOid(1), ColOid(2), ColOid(3)] {
            let col_id = table.col_id_for_oid(oid).unwrap();
            assert_eq!(table.oid_for_col_id(col_id), Some(oid));
        }
    }

    #[test]
    fn projected_io_by_oid_roundtrips() {
        let (mgr, table) = sample();
        let (init, map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2), ColOid(3)]);

        let txn = mgr.begin();
        let mut row = init.initialize_row();
        row.set::<u32>(map.idx(ColOid(1)), 7);
        row.set_varlen(map.idx(ColOid(2)), b"alice");
        row.set::<u64>(map.idx(ColOid(3)), 10_000);
        let slot = table.insert(&txn, &row).unwrap();

        let mut out = init.initialize_row();
        assert!(table.select(&txn, slot, &mut out));
        assert_eq!(out.get::<u32>(map.idx(ColOid(1))), 7);
        assert_eq!(out.varlen(map.idx(ColOid(2))), Some(&b"alice"[..]));
        assert_eq!(out.get::<u64>(map.idx(ColOid(3))), 10_000);
        mgr.commit(txn).unwrap();
    }

    #[test]
    fn partial_projections_see_only_their_columns() {
        let (mgr, table) = sample();
        let (all, all_map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2), ColOid(3)]);
        let (some, some_map) = table.initializer_for_projected_row(&[ColOid(2)]);

        let txn = mgr.begin();
        let mut row = all.initialize_row();
        row.set::<u32>(all_map.idx(ColOid(1)), 1);
        row.set_varlen(all_map.idx(ColOid(2)), b"bob");
        row.set::<u64>(all_map.idx(ColOid(3)), 5);
        let slot = table.insert(&txn, &row).unwrap();

        let mut out = some.initialize_row();
        assert!(table.select(&txn, slot, &mut out));
        assert_eq!(out.varlen(some_map.idx(ColOid(2))), Some(&b"bob"[..]));
        assert_eq!(out.num_cols(), 1);
        mgr.commit(txn).unwrap();
    }
}
