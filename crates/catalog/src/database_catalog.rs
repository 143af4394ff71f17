//! The per-database catalog: self-describing metadata over the storage
//! primitives it describes.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use quarry_primitives::{
    ColOid, DatabaseOid, IndexOid, NamespaceOid, TableOid, Timestamp, TypeId, INVALID_INDEX_OID, INVALID_NAMESPACE_OID,
    INVALID_TABLE_OID,
};
use itertools::Itertools as _;
use quarry_storage::index::Index;
use quarry_storage::{BlockStore, ProjectedRow, ProjectionInit, TransactionContext, TupleSlot};

use crate::error::{CatalogError, Result};
use crate::heap::{CatalogObject, ObjectHandle, ObjectHeap};
use crate::pg;
use crate::pg::attribute::PgAttributeRow;
use crate::pg::class::{ClassKind, PgClassRow};
use crate::pg::index::PgIndexRow;
use crate::pg::namespace::PgNamespaceRow;
use crate::pg::types::PgTypeRow;
use crate::schema::{Column, IndexBacking, IndexColumn, IndexSchema, Schema};
use crate::sql_table::{ProjectionMap, SqlTable};

/// One catalog table's storage plus its cached all-columns projection.
pub(crate) struct CatalogTable {
    pub(crate) table: Arc<SqlTable>,
    pub(crate) init: Arc<ProjectionInit>,
    pub(crate) map: ProjectionMap,
}

impl CatalogTable {
    pub(crate) fn build(store: &Arc<BlockStore>, schema: Schema, oid: TableOid, all_cols: &[ColOid]) -> Result<Self> {
        let table = SqlTable::new(store, schema, oid)?;
        let (init, map) = table.initializer_for_projected_row(all_cols);
        Ok(CatalogTable { table, init, map })
    }

    pub(crate) fn row(&self) -> ProjectedRow {
        self.init.initialize_row()
    }

    /// Reads the full row at `slot` as visible to `txn`.
    pub(crate) fn read(&self, txn: &TransactionContext, slot: TupleSlot) -> Option<ProjectedRow> {
        let mut row = self.row();
        self.table.select(txn, slot, &mut row).then_some(row)
    }
}

/// An ordered catalog index over `cols` of `table`.
pub(crate) fn catalog_index(table: &CatalogTable, oid: IndexOid, cols: &[ColOid], unique: bool) -> Arc<Index> {
    let schema = table.table.key_schema(cols);
    Index::new_ordered(oid, table.table.data_table().clone(), schema, unique)
}

/// The projection position of `col` within `index`'s key rows.
fn key_pos(table: &Arc<SqlTable>, index: &Index, col: ColOid) -> usize {
    let col_id = table.col_id_for_oid(col).expect("key column belongs to the table");
    index.key_initializer().index_of(col_id).expect("key column is projected")
}

/// The metadata catalog of one database.
///
/// Constructed in two phases: [`DatabaseCatalog::new`] builds every
/// catalog table and index in memory without touching storage, and
/// [`DatabaseCatalog::bootstrap`] inserts the self-describing entries
/// inside one transaction, which must be committed before any accessor is
/// handed out.
pub struct DatabaseCatalog {
    db_oid: DatabaseOid,
    store: Arc<BlockStore>,
    heap: Arc<ObjectHeap>,
    next_oid: AtomicU32,
    /// The last successful DDL commit timestamp. A transaction may
    /// install a DDL change only if its begin is at or after this point;
    /// DML never consults it.
    ddl_lock: Arc<AtomicU64>,
    bootstrapped: AtomicBool,

    namespaces: CatalogTable,
    namespaces_oid_index: Arc<Index>,
    namespaces_name_index: Arc<Index>,

    classes: CatalogTable,
    classes_oid_index: Arc<Index>,
    classes_name_index: Arc<Index>,
    classes_namespace_index: Arc<Index>,

    indexes: CatalogTable,
    indexes_oid_index: Arc<Index>,
    indexes_table_index: Arc<Index>,

    columns: CatalogTable,
    columns_oid_index: Arc<Index>,
    columns_name_index: Arc<Index>,
    columns_class_index: Arc<Index>,

    types: CatalogTable,
    types_oid_index: Arc<Index>,
    types_name_index: Arc<Index>,
    types_namespace_index: Arc<Index>,

    constraints: CatalogTable,
    constraints_oid_index: Arc<Index>,
    constraints_name_index: Arc<Index>,
    constraints_namespace_index: Arc<Index>,
    constraints_table_index: Arc<Index>,
    constraints_index_index: Arc<Index>,
    constraints_foreigntable_index: Arc<Index>,
}

impl DatabaseCatalog {
    /// Phase 1: constructs the catalog tables and their indexes.
    pub fn new(db_oid: DatabaseOid, store: Arc<BlockStore>) -> Result<Arc<Self>> {
        use pg::attribute as att;
        use pg::class as cls;
        use pg::constraint as con;
        use pg::index as idx;
        use pg::namespace as nsp;
        use pg::types as typ;

        let namespaces = CatalogTable::build(&store, nsp::table_schema(), nsp::NAMESPACE_TABLE_OID, &nsp::ALL_COL_OIDS)?;
        let namespaces_oid_index = catalog_index(&namespaces, nsp::NAMESPACE_OID_INDEX_OID, &[nsp::NSPOID_COL_OID], true);
        let namespaces_name_index =
            catalog_index(&namespaces, nsp::NAMESPACE_NAME_INDEX_OID, &[nsp::NSPNAME_COL_OID], true);

        let classes = CatalogTable::build(&store, cls::table_schema(), cls::CLASS_TABLE_OID, &cls::ALL_COL_OIDS)?;
        let classes_oid_index = catalog_index(&classes, cls::CLASS_OID_INDEX_OID, &[cls::RELOID_COL_OID], true);
        let classes_name_index = catalog_index(
            &classes,
            cls::CLASS_NAME_INDEX_OID,
            &[cls::RELNAME_COL_OID, cls::RELNAMESPACE_COL_OID],
            true,
        );
        let classes_namespace_index =
            catalog_index(&classes, cls::CLASS_NAMESPACE_INDEX_OID, &[cls::RELNAMESPACE_COL_OID], false);

        let indexes = CatalogTable::build(&store, idx::table_schema(), idx::INDEX_TABLE_OID, &idx::ALL_COL_OIDS)?;
        let indexes_oid_index = catalog_index(&indexes, idx::INDEX_OID_INDEX_OID, &[idx::INDOID_COL_OID], true);
        let indexes_table_index = catalog_index(&indexes, idx::INDEX_TABLE_INDEX_OID, &[idx::INDRELID_COL_OID], false);

        let columns = CatalogTable::build(&store, att::table_schema(), att::COLUMN_TABLE_OID, &att::ALL_COL_OIDS)?;
        let columns_oid_index = catalog_index(
            &columns,
            att::COLUMN_OID_INDEX_OID,
            &[att::ATTRELID_COL_OID, att::ATTNUM_COL_OID],
            true,
        );
        let columns_name_index = catalog_index(
            &columns,
            att::COLUMN_NAME_INDEX_OID,
            &[att::ATTRELID_COL_OID, att::ATTNAME_COL_OID],
            true,
        );
        let columns_class_index =
            catalog_index(&columns, att::COLUMN_CLASS_INDEX_OID, &[att::ATTRELID_COL_OID], false);

        let types = CatalogTable::build(&store, typ::table_schema(), typ::TYPE_TABLE_OID, &typ::ALL_COL_OIDS)?;
        let types_oid_index = catalog_index(&types, typ::TYPE_OID_INDEX_OID, &[typ::TYPOID_COL_OID], true);
        let types_name_index = catalog_index(&types, typ::TYPE_NAME_INDEX_OID, &[typ::TYPNAME_COL_OID], true);
        let types_namespace_index =
            catalog_index(&types, typ::TYPE_NAMESPACE_INDEX_OID, &[typ::TYPNAMESPACE_COL_OID], false);

        let constraints =
            CatalogTable::build(&store, con::table_schema(), con::CONSTRAINT_TABLE_OID, &con::ALL_COL_OIDS)?;
        let constraints_oid_index =
            catalog_index(&constraints, con::CONSTRAINT_OID_INDEX_OID, &[con::CONOID_COL_OID], true);
        let constraints_name_index =
            catalog_index(&constraints, con::CONSTRAINT_NAME_INDEX_OID, &[con::CONNAME_COL_OID], true);
        let constraints_namespace_index = catalog_index(
            &constraints,
            con::CONSTRAINT_NAMESPACE_INDEX_OID,
            &[con::CONNAMESPACE_COL_OID],
            false,
        );
        let constraints_table_index =
            catalog_index(&constraints, con::CONSTRAINT_TABLE_INDEX_OID, &[con::CONRELID_COL_OID], false);
        let constraints_index_index =
            catalog_index(&constraints, con::CONSTRAINT_INDEX_INDEX_OID, &[con::CONINDID_COL_OID], false);
        let constraints_foreigntable_index = catalog_index(
            &constraints,
            con::CONSTRAINT_FOREIGNTABLE_INDEX_OID,
            &[con::CONFRELID_COL_OID],
            false,
        );

        Ok(Arc::new(DatabaseCatalog {
            db_oid,
            store,
            heap: Arc::new(ObjectHeap::new()),
            next_oid: AtomicU32::new(pg::START_OID),
            ddl_lock: Arc::new(AtomicU64::new(0)),
            bootstrapped: AtomicBool::new(false),
            namespaces,
            namespaces_oid_index,
            namespaces_name_index,
            classes,
            classes_oid_index,
            classes_name_index,
            classes_namespace_index,
            indexes,
            indexes_oid_index,
            indexes_table_index,
            columns,
            columns_oid_index,
            columns_name_index,
            columns_class_index,
            types,
            types_oid_index,
            types_name_index,
            types_namespace_index,
            constraints,
            constraints_oid_index,
            constraints_name_index,
            constraints_namespace_index,
            constraints_table_index,
            constraints_index_index,
            constraints_foreigntable_index,
        }))
    }

    /// The database this catalog belongs to.
    pub fn oid(&self) -> DatabaseOid {
        self.db_oid
    }

    /// The block store catalog and user tables draw from.
    pub fn block_store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    fn next_oid(&self) -> u32 {
        self.next_oid.fetch_add(1, Ordering::Relaxed)
    }

    /// Rejects DDL from transactions older than the last committed DDL
    /// change, and schedules the lock advance for commit time.
    fn acquire_ddl_lock(&self, txn: &TransactionContext) -> Result<()> {
        let last = Timestamp(self.ddl_lock.load(Ordering::SeqCst));
        if last > txn.begin_ts() {
            txn.set_must_abort();
            return Err(CatalogError::DdlLockRejection);
        }
        let lock = self.ddl_lock.clone();
        txn.register_commit_action(move |_, commit| {
            lock.fetch_max(commit.0, Ordering::SeqCst);
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Bootstrap
    // ------------------------------------------------------------------

    /// Phase 2: inserts the self-describing entries. Must be committed
    /// before any accessor is handed out; calling it twice is rejected.
    pub fn bootstrap(self: &Arc<Self>, txn: &TransactionContext) -> Result<()> {
        use pg::namespace as nsp;

        if self.bootstrapped.swap(true, Ordering::SeqCst) {
            return Err(CatalogError::Bootstrap("database is already bootstrapped".into()));
        }
        log::debug!("bootstrapping catalog of database {}", self.db_oid);
        self.acquire_ddl_lock(txn)?;

        self.create_namespace_entry(txn, nsp::NAMESPACE_CATALOG_NAMESPACE_OID, "pg_catalog")?;
        self.create_namespace_entry(txn, nsp::NAMESPACE_DEFAULT_NAMESPACE_OID, "public")?;

        self.bootstrap_types(txn)?;

        self.bootstrap_class(
            txn,
            &self.namespaces,
            "pg_namespace",
            &[
                (&self.namespaces_oid_index, "pg_namespace_oid_index", true),
                (&self.namespaces_name_index, "pg_namespace_name_index", false),
            ],
        )?;
        self.bootstrap_class(
            txn,
            &self.classes,
            "pg_class",
            &[
                (&self.classes_oid_index, "pg_class_oid_index", true),
                (&self.classes_name_index, "pg_class_name_index", false),
                (&self.classes_namespace_index, "pg_class_namespace_index", false),
            ],
        )?;
        self.bootstrap_class(
            txn,
            &self.indexes,
            "pg_index",
            &[
                (&self.indexes_oid_index, "pg_index_oid_index", true),
                (&self.indexes_table_index, "pg_index_table_index", false),
            ],
        )?;
        self.bootstrap_class(
            txn,
            &self.columns,
            "pg_attribute",
            &[
                (&self.columns_oid_index, "pg_attribute_oid_index", true),
                (&self.columns_name_index, "pg_attribute_name_index", false),
                (&self.columns_class_index, "pg_attribute_class_index", false),
            ],
        )?;
        self.bootstrap_class(
            txn,
            &self.types,
            "pg_type",
            &[
                (&self.types_oid_index, "pg_type_oid_index", true),
                (&self.types_name_index, "pg_type_name_index", false),
                (&self.types_namespace_index, "pg_type_namespace_index", false),
            ],
        )?;
        self.bootstrap_class(
            txn,
            &self.constraints,
            "pg_constraint",
            &[
                (&self.constraints_oid_index, "pg_constraint_oid_index", true),
                (&self.constraints_name_index, "pg_constraint_name_index", false),
                (&self.constraints_namespace_index, "pg_constraint_namespace_index", false),
                (&self.constraints_table_index, "pg_constraint_table_index", false),
                (&self.constraints_index_index, "pg_constraint_index_index", false),
                (&self.constraints_foreigntable_index, "pg_constraint_foreigntable_index", false),
            ],
        )?;

        log::debug!("catalog of database {} bootstrapped", self.db_oid);
        Ok(())
    }

    /// Registers one catalog table and its indexes in the catalog itself.
    fn bootstrap_class(
        self: &Arc<Self>,
        txn: &TransactionContext,
        table: &CatalogTable,
        name: &str,
        indexes: &[(&Arc<Index>, &str, bool)],
    ) -> Result<()> {
        let ns = pg::namespace::NAMESPACE_CATALOG_NAMESPACE_OID;
        let table_oid = table.table.oid();
        let schema = Arc::new(table.table.schema().clone());
        let next_col_oid = schema.num_columns() as u32 + 1;
        let schema_handle = self.heap.insert(CatalogObject::TableSchema(schema.clone()));
        self.create_table_entry(txn, table_oid, ns, name, &schema, schema_handle, next_col_oid)
            .map_err(|e| CatalogError::Bootstrap(format!("creating {name}: {e}")))?;
        self.set_table_pointer(txn, table_oid, table.table.clone())
            .map_err(|e| CatalogError::Bootstrap(format!("publishing {name}: {e}")))?;

        for &(index, index_name, primary) in indexes {
            let key_columns: Vec<IndexColumn> = index
                .key_col_ids()
                .into_iter()
                .map(|col_id| {
                    let col_oid = table.table.oid_for_col_id(col_id).expect("catalog key column");
                    let column = schema.column_by_oid(col_oid).expect("catalog key column");
                    IndexColumn::new(column.name(), column.type_id(), col_oid)
                })
                .collect();
            let index_schema = Arc::new(IndexSchema::new(
                key_columns,
                IndexBacking::Ordered,
                index.is_unique(),
                primary,
            ));
            let schema_handle = self.heap.insert(CatalogObject::IndexSchema(index_schema.clone()));
            self.create_index_entry(txn, ns, table_oid, index.oid(), index_name, &index_schema, schema_handle)
                .map_err(|e| CatalogError::Bootstrap(format!("creating {index_name}: {e}")))?;
            self.set_index_pointer(txn, index.oid(), index.clone())
                .map_err(|e| CatalogError::Bootstrap(format!("publishing {index_name}: {e}")))?;
        }
        Ok(())
    }

    /// Inserts the built-in type tags into `pg_type`.
    fn bootstrap_types(&self, txn: &TransactionContext) -> Result<()> {
        for tag in TypeId::ALL {
            let row = PgTypeRow::builtin(tag, pg::namespace::NAMESPACE_CATALOG_NAMESPACE_OID);
            self.insert_type_record(txn, &row)
                .map_err(|e| CatalogError::Bootstrap(format!("inserting type {}: {e}", tag.name())))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Namespaces
    // ------------------------------------------------------------------

    /// Creates a namespace. Fails with [`CatalogError::OidConflict`] if
    /// the name is taken.
    pub fn create_namespace(&self, txn: &TransactionContext, name: &str) -> Result<NamespaceOid> {
        self.acquire_ddl_lock(txn)?;
        let oid = NamespaceOid(self.next_oid());
        self.create_namespace_entry(txn, oid, name)?;
        Ok(oid)
    }

    fn create_namespace_entry(&self, txn: &TransactionContext, oid: NamespaceOid, name: &str) -> Result<()> {
        log::trace!("NAMESPACE CREATING: {name} ({oid})");
        let row = PgNamespaceRow {
            oid,
            name: name.to_string(),
        };
        let mut pr = self.namespaces.row();
        row.write_into(&mut pr, &self.namespaces.map);
        let slot = self.namespaces.table.insert(txn, &pr)?;

        let mut key = self.namespaces_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid.0);
        self.unique_insert(txn, &self.namespaces_oid_index, &key, slot, name)?;

        let mut key = self.namespaces_name_index.key_initializer().initialize_row();
        key.set_varlen(0, name.as_bytes());
        self.unique_insert(txn, &self.namespaces_name_index, &key, slot, name)?;
        Ok(())
    }

    /// Resolves a namespace name; the invalid oid if absent.
    pub fn get_namespace_oid(&self, txn: &TransactionContext, name: &str) -> NamespaceOid {
        let mut key = self.namespaces_name_index.key_initializer().initialize_row();
        key.set_varlen(0, name.as_bytes());
        let mut slots = Vec::new();
        self.namespaces_name_index.scan_key(txn, &key, &mut slots);
        let Some(&slot) = slots.first() else {
            return INVALID_NAMESPACE_OID;
        };
        match self.namespaces.read(txn, slot) {
            Some(row) => PgNamespaceRow::read_from(&row, &self.namespaces.map).oid,
            None => INVALID_NAMESPACE_OID,
        }
    }

    /// Drops a namespace. The reserved namespaces and namespaces that
    /// still contain classes are refused.
    pub fn delete_namespace(&self, txn: &TransactionContext, ns: NamespaceOid) -> Result<()> {
        use pg::namespace::{NAMESPACE_CATALOG_NAMESPACE_OID, NAMESPACE_DEFAULT_NAMESPACE_OID};
        self.acquire_ddl_lock(txn)?;
        if ns == NAMESPACE_CATALOG_NAMESPACE_OID || ns == NAMESPACE_DEFAULT_NAMESPACE_OID {
            return Err(CatalogError::NamespaceInUse {
                reason: "the reserved namespaces cannot be dropped",
            });
        }

        let mut key = self.classes_namespace_index.key_initializer().initialize_row();
        key.set::<u32>(0, ns.0);
        let mut members = Vec::new();
        self.classes_namespace_index.scan_key(txn, &key, &mut members);
        if !members.is_empty() {
            return Err(CatalogError::NamespaceInUse {
                reason: "namespace still contains tables or indexes",
            });
        }

        let mut key = self.namespaces_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, ns.0);
        let mut slots = Vec::new();
        self.namespaces_oid_index.scan_key(txn, &key, &mut slots);
        let Some(&slot) = slots.first() else {
            return Err(CatalogError::InvalidReference { oid: ns.0 });
        };
        let row = self
            .namespaces
            .read(txn, slot)
            .map(|pr| PgNamespaceRow::read_from(&pr, &self.namespaces.map))
            .ok_or(CatalogError::InvalidReference { oid: ns.0 })?;

        log::trace!("NAMESPACE DROPPING: {} ({ns})", row.name);
        self.namespaces.table.delete(txn, slot)?;

        let mut key = self.namespaces_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, ns.0);
        self.namespaces_oid_index.delete(txn, &key, slot);
        let mut key = self.namespaces_name_index.key_initializer().initialize_row();
        key.set_varlen(0, row.name.as_bytes());
        self.namespaces_name_index.delete(txn, &key, slot);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Creates a table entry and its column entries, assigning column
    /// oids from 1 in declaration order. Storage is *not* allocated here;
    /// the caller must allocate a [`SqlTable`] and publish it through
    /// [`Self::set_table_pointer`] before committing.
    pub fn create_table(
        &self,
        txn: &TransactionContext,
        ns: NamespaceOid,
        name: &str,
        schema: Schema,
    ) -> Result<TableOid> {
        self.acquire_ddl_lock(txn)?;
        let table_oid = TableOid(self.next_oid());

        let mut schema = schema;
        let next_col_oid = schema.assign_col_oids();
        let schema = Arc::new(schema);
        let schema_handle = self.heap.insert(CatalogObject::TableSchema(schema.clone()));
        let heap = self.heap.clone();
        txn.register_abort_action(move |_, _| {
            heap.remove(schema_handle);
        });

        self.create_table_entry(txn, table_oid, ns, name, &schema, schema_handle, next_col_oid)?;
        Ok(table_oid)
    }

    fn create_table_entry(
        &self,
        txn: &TransactionContext,
        table_oid: TableOid,
        ns: NamespaceOid,
        name: &str,
        schema: &Arc<Schema>,
        schema_handle: ObjectHandle,
        next_col_oid: u32,
    ) -> Result<()> {
        log::trace!("TABLE CREATING: {name} ({table_oid})");
        let row = PgClassRow {
            oid: table_oid.0,
            name: name.to_string(),
            namespace: ns,
            kind: ClassKind::RegularTable,
            schema: schema_handle,
            ptr: ObjectHandle::INVALID,
            next_col_oid,
        };
        self.insert_class_record(txn, &row)?;
        for column in schema.columns() {
            self.create_attribute(txn, table_oid.0, column)?;
        }
        log::trace!("TABLE CREATED: {name} ({table_oid})");
        Ok(())
    }

    /// Publishes the storage pointer of a table. Succeeds only if the
    /// entry is visible to `txn` and the pointer is not already set.
    pub fn set_table_pointer(&self, txn: &TransactionContext, table: TableOid, ptr: Arc<SqlTable>) -> Result<()> {
        let (slot, row) = self
            .class_row_for_oid(txn, table.0)?
            .ok_or(CatalogError::InvalidReference { oid: table.0 })?;
        if row.kind != ClassKind::RegularTable || row.ptr.is_valid() {
            return Err(CatalogError::InvalidReference { oid: table.0 });
        }
        let handle = self.heap.insert(CatalogObject::Table(ptr));
        let heap = self.heap.clone();
        txn.register_abort_action(move |_, _| {
            heap.remove(handle);
        });
        self.update_class_pointer(txn, slot, handle)
    }

    /// The storage object of a table.
    pub fn get_table(&self, txn: &TransactionContext, table: TableOid) -> Result<Arc<SqlTable>> {
        let (_, row) = self
            .class_row_for_oid(txn, table.0)?
            .ok_or(CatalogError::InvalidReference { oid: table.0 })?;
        if row.kind != ClassKind::RegularTable {
            return Err(CatalogError::InvalidReference { oid: table.0 });
        }
        self.heap
            .table(row.ptr)
            .ok_or(CatalogError::InvalidReference { oid: table.0 })
    }

    /// The schema of a table. Readers see the old schema under MVCC
    /// while a concurrent schema change is in flight.
    pub fn get_schema(&self, txn: &TransactionContext, table: TableOid) -> Result<Arc<Schema>> {
        let (_, row) = self
            .class_row_for_oid(txn, table.0)?
            .ok_or(CatalogError::InvalidReference { oid: table.0 })?;
        if row.kind != ClassKind::RegularTable {
            return Err(CatalogError::InvalidReference { oid: table.0 });
        }
        self.heap
            .table_schema(row.schema)
            .ok_or(CatalogError::InvalidReference { oid: table.0 })
    }

    /// Drops a table: deletes its `pg_class` and `pg_attribute` entries
    /// and defers destruction of the schema and storage objects to a safe
    /// epoch. Tables that still have constraints are refused.
    pub fn delete_table(&self, txn: &TransactionContext, table: TableOid) -> Result<()> {
        self.acquire_ddl_lock(txn)?;
        let (slot, row) = self
            .class_row_for_oid(txn, table.0)?
            .ok_or(CatalogError::InvalidReference { oid: table.0 })?;
        if row.kind != ClassKind::RegularTable {
            return Err(CatalogError::InvalidReference { oid: table.0 });
        }

        let mut key = self.constraints_table_index.key_initializer().initialize_row();
        key.set::<u32>(0, table.0);
        let mut constrained = Vec::new();
        self.constraints_table_index.scan_key(txn, &key, &mut constrained);
        if !constrained.is_empty() {
            return Err(CatalogError::ConstraintsRemain { table });
        }

        log::trace!("TABLE DROPPING: {} ({table})", row.name);
        self.classes.table.delete(txn, slot)?;
        self.delete_class_index_entries(txn, &row, slot);
        self.delete_columns(txn, table.0)?;

        let heap = self.heap.clone();
        let schema_handle = row.schema;
        let ptr_handle = row.ptr;
        txn.register_commit_action(move |deferred, _| {
            deferred.defer(move || {
                heap.remove(schema_handle);
                heap.remove(ptr_handle);
            });
        });
        log::trace!("TABLE DROPPED: {table}");
        Ok(())
    }

    /// Resolves `(ns, name)` to a table oid; the invalid oid when absent
    /// or when the name belongs to an index.
    pub fn get_table_oid(&self, txn: &TransactionContext, ns: NamespaceOid, name: &str) -> TableOid {
        match self.class_oid_kind(txn, ns, name) {
            Some((oid, ClassKind::RegularTable)) => TableOid(oid),
            _ => INVALID_TABLE_OID,
        }
    }

    // ------------------------------------------------------------------
    // Indexes
    // ------------------------------------------------------------------

    /// Creates an index entry. As with tables, the caller allocates the
    /// index object and publishes it via [`Self::set_index_pointer`]
    /// before committing.
    pub fn create_index(
        &self,
        txn: &TransactionContext,
        ns: NamespaceOid,
        table: TableOid,
        name: &str,
        schema: IndexSchema,
    ) -> Result<IndexOid> {
        self.acquire_ddl_lock(txn)?;
        // The indexed table must exist and be a table.
        let (_, class_row) = self
            .class_row_for_oid(txn, table.0)?
            .ok_or(CatalogError::InvalidReference { oid: table.0 })?;
        if class_row.kind != ClassKind::RegularTable {
            return Err(CatalogError::InvalidReference { oid: table.0 });
        }

        let index_oid = IndexOid(self.next_oid());
        let schema = Arc::new(schema);
        let schema_handle = self.heap.insert(CatalogObject::IndexSchema(schema.clone()));
        let heap = self.heap.clone();
        txn.register_abort_action(move |_, _| {
            heap.remove(schema_handle);
        });
        self.create_index_entry(txn, ns, table, index_oid, name, &schema, schema_handle)?;
        Ok(index_oid)
    }

    fn create_index_entry(
        &self,
        txn: &TransactionContext,
        ns: NamespaceOid,
        table: TableOid,
        index_oid: IndexOid,
        name: &str,
        schema: &Arc<IndexSchema>,
        schema_handle: ObjectHandle,
    ) -> Result<()> {
        log::trace!("INDEX CREATING: {name} ({index_oid}) on table {table}");
        let row = PgClassRow {
            oid: index_oid.0,
            name: name.to_string(),
            namespace: ns,
            kind: ClassKind::Index,
            schema: schema_handle,
            ptr: ObjectHandle::INVALID,
            next_col_oid: schema.columns().len() as u32 + 1,
        };
        self.insert_class_record(txn, &row)?;

        // Attribute rows for the key columns, numbered from 1 in key
        // order.
        for (i, key_column) in schema.columns().iter().enumerate() {
            let column = Column::with_oid(key_column.name(), key_column.type_id(), false, i as u32 + 1);
            self.create_attribute(txn, index_oid.0, &column)?;
        }

        let index_row = PgIndexRow::from_schema(index_oid, table, schema);
        self.insert_index_record(txn, &index_row, name)?;
        log::trace!("INDEX CREATED: {name} ({index_oid})");
        Ok(())
    }

    /// Publishes the storage pointer of an index.
    pub fn set_index_pointer(&self, txn: &TransactionContext, index: IndexOid, ptr: Arc<Index>) -> Result<()> {
        let (slot, row) = self
            .class_row_for_oid(txn, index.0)?
            .ok_or(CatalogError::InvalidReference { oid: index.0 })?;
        if row.kind != ClassKind::Index || row.ptr.is_valid() {
            return Err(CatalogError::InvalidReference { oid: index.0 });
        }
        let handle = self.heap.insert(CatalogObject::Index(ptr));
        let heap = self.heap.clone();
        txn.register_abort_action(move |_, _| {
            heap.remove(handle);
        });
        self.update_class_pointer(txn, slot, handle)
    }

    /// The storage object of an index.
    pub fn get_index(&self, txn: &TransactionContext, index: IndexOid) -> Result<Arc<Index>> {
        let (_, row) = self
            .class_row_for_oid(txn, index.0)?
            .ok_or(CatalogError::InvalidReference { oid: index.0 })?;
        if row.kind != ClassKind::Index {
            return Err(CatalogError::InvalidReference { oid: index.0 });
        }
        self.heap
            .index(row.ptr)
            .ok_or(CatalogError::InvalidReference { oid: index.0 })
    }

    /// The key schema of an index.
    pub fn get_index_schema(&self, txn: &TransactionContext, index: IndexOid) -> Result<Arc<IndexSchema>> {
        let (_, row) = self
            .class_row_for_oid(txn, index.0)?
            .ok_or(CatalogError::InvalidReference { oid: index.0 })?;
        if row.kind != ClassKind::Index {
            return Err(CatalogError::InvalidReference { oid: index.0 });
        }
        self.heap
            .index_schema(row.schema)
            .ok_or(CatalogError::InvalidReference { oid: index.0 })
    }

    /// Drops an index: deletes its `pg_class`, `pg_attribute` and
    /// `pg_index` entries. The index object is freed only after a double
    /// deferral, since concurrent transactions may still reach it through
    /// catalog lookups begun under the previous epoch.
    pub fn delete_index(&self, txn: &TransactionContext, index: IndexOid) -> Result<()> {
        self.acquire_ddl_lock(txn)?;
        let (class_slot, class_row) = self
            .class_row_for_oid(txn, index.0)?
            .ok_or(CatalogError::InvalidReference { oid: index.0 })?;
        if class_row.kind != ClassKind::Index {
            return Err(CatalogError::InvalidReference { oid: index.0 });
        }

        log::trace!("INDEX DROPPING: {} ({index})", class_row.name);
        self.classes.table.delete(txn, class_slot)?;
        self.delete_class_index_entries(txn, &class_row, class_slot);
        self.delete_columns(txn, index.0)?;

        // The pg_index entry and its index entries.
        let mut key = self.indexes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, index.0);
        let mut slots = Vec::new();
        self.indexes_oid_index.scan_key(txn, &key, &mut slots);
        let Some(&index_slot) = slots.first() else {
            return Err(CatalogError::InvalidReference { oid: index.0 });
        };
        let index_row = self
            .indexes
            .read(txn, index_slot)
            .map(|pr| PgIndexRow::read_from(&pr, &self.indexes.map))
            .ok_or(CatalogError::InvalidReference { oid: index.0 })?;
        self.indexes.table.delete(txn, index_slot)?;

        let mut key = self.indexes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, index.0);
        self.indexes_oid_index.delete(txn, &key, index_slot);
        let mut key = self.indexes_table_index.key_initializer().initialize_row();
        key.set::<u32>(0, index_row.indrelid.0);
        self.indexes_table_index.delete(txn, &key, index_slot);

        let heap = self.heap.clone();
        let schema_handle = class_row.schema;
        let ptr_handle = class_row.ptr;
        txn.register_commit_action(move |deferred, _| {
            deferred.defer_double(move || {
                heap.remove(schema_handle);
                heap.remove(ptr_handle);
            });
        });
        log::trace!("INDEX DROPPED: {index}");
        Ok(())
    }

    /// Every index defined on `table`, visible to `txn`.
    pub fn get_indexes(&self, txn: &TransactionContext, table: TableOid) -> Vec<IndexOid> {
        let mut key = self.indexes_table_index.key_initializer().initialize_row();
        key.set::<u32>(0, table.0);
        let mut slots = Vec::new();
        self.indexes_table_index.scan_key(txn, &key, &mut slots);
        slots
            .into_iter()
            .filter_map(|slot| self.indexes.read(txn, slot))
            .map(|pr| PgIndexRow::read_from(&pr, &self.indexes.map).indoid)
            .collect()
    }

    /// Resolves `(ns, name)` to an index oid; the invalid oid when absent
    /// or when the name belongs to a table.
    pub fn get_index_oid(&self, txn: &TransactionContext, ns: NamespaceOid, name: &str) -> IndexOid {
        match self.class_oid_kind(txn, ns, name) {
            Some((oid, ClassKind::Index)) => IndexOid(oid),
            _ => INVALID_INDEX_OID,
        }
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    fn create_attribute(&self, txn: &TransactionContext, class_oid: u32, column: &Column) -> Result<()> {
        let (adbin, adsrc) = match column.default() {
            Some(default) => {
                let handle = self.heap.insert(CatalogObject::Default(Arc::new(default.clone())));
                let heap = self.heap.clone();
                txn.register_abort_action(move |_, _| {
                    heap.remove(handle);
                });
                (handle, Some(default.to_json()))
            }
            None => (ObjectHandle::INVALID, None),
        };
        let row = PgAttributeRow {
            attnum: column.oid(),
            attrelid: class_oid,
            attname: column.name().to_string(),
            atttypid: column.type_id().oid(),
            attlen: column.type_id().size(),
            attnotnull: !column.nullable(),
            adbin,
            adsrc,
        };
        self.insert_attribute_record(txn, &row)
    }

    /// The attribute rows of a class, in column-oid order. Used by
    /// recovery and tests; regular schema access goes through the heap.
    pub fn get_columns(&self, txn: &TransactionContext, class_oid: u32) -> Vec<PgAttributeRow> {
        let mut key = self.columns_class_index.key_initializer().initialize_row();
        key.set::<u32>(0, class_oid);
        let mut slots = Vec::new();
        self.columns_class_index.scan_key(txn, &key, &mut slots);
        slots
            .into_iter()
            .filter_map(|slot| self.columns.read(txn, slot))
            .map(|pr| PgAttributeRow::read_from(&pr, &self.columns.map))
            .sorted_by_key(|r| r.attnum)
            .collect()
    }

    fn delete_columns(&self, txn: &TransactionContext, class_oid: u32) -> Result<()> {
        let mut key = self.columns_class_index.key_initializer().initialize_row();
        key.set::<u32>(0, class_oid);
        let mut slots = Vec::new();
        self.columns_class_index.scan_key(txn, &key, &mut slots);

        for slot in slots {
            let Some(pr) = self.columns.read(txn, slot) else {
                continue;
            };
            let row = PgAttributeRow::read_from(&pr, &self.columns.map);
            self.columns.table.delete(txn, slot)?;

            let sql = &self.columns.table;
            let oid_index = &self.columns_oid_index;
            let mut key = oid_index.key_initializer().initialize_row();
            key.set::<u32>(key_pos(sql, oid_index, pg::attribute::ATTRELID_COL_OID), row.attrelid);
            key.set::<u32>(key_pos(sql, oid_index, pg::attribute::ATTNUM_COL_OID), row.attnum.0);
            oid_index.delete(txn, &key, slot);

            let name_index = &self.columns_name_index;
            let mut key = name_index.key_initializer().initialize_row();
            key.set::<u32>(key_pos(sql, name_index, pg::attribute::ATTRELID_COL_OID), row.attrelid);
            key.set_varlen(key_pos(sql, name_index, pg::attribute::ATTNAME_COL_OID), row.attname.as_bytes());
            name_index.delete(txn, &key, slot);

            let mut key = self.columns_class_index.key_initializer().initialize_row();
            key.set::<u32>(0, row.attrelid);
            self.columns_class_index.delete(txn, &key, slot);

            if row.adbin.is_valid() {
                let heap = self.heap.clone();
                let handle = row.adbin;
                txn.register_commit_action(move |deferred, _| {
                    deferred.defer(move || {
                        heap.remove(handle);
                    });
                });
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery hooks
    // ------------------------------------------------------------------

    /// Restores the oid counter after replaying persisted state: scans
    /// the catalog for the maximum observed oid.
    pub fn recompute_next_oid(&self, txn: &TransactionContext) {
        let mut max_oid = 0u32;
        let mut slots = Vec::new();
        self.namespaces_oid_index
            .scan_ascending(txn, std::ops::Bound::Unbounded, std::ops::Bound::Unbounded, None, &mut slots)
            .expect("catalog indexes are ordered");
        for slot in slots.drain(..) {
            if let Some(pr) = self.namespaces.read(txn, slot) {
                max_oid = max_oid.max(PgNamespaceRow::read_from(&pr, &self.namespaces.map).oid.0);
            }
        }
        self.classes_oid_index
            .scan_ascending(txn, std::ops::Bound::Unbounded, std::ops::Bound::Unbounded, None, &mut slots)
            .expect("catalog indexes are ordered");
        for slot in slots.drain(..) {
            if let Some(pr) = self.classes.read(txn, slot) {
                max_oid = max_oid.max(PgClassRow::read_from(&pr, &self.classes.map).oid);
            }
        }
        self.next_oid
            .store(max_oid.max(pg::START_OID - 1) + 1, Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // Shared internals
    // ------------------------------------------------------------------

    /// A unique-index insert that converts a duplicate into an oid
    /// conflict and dooms the transaction: the table row went in first,
    /// so the transaction can no longer commit as-is.
    fn unique_insert(
        &self,
        txn: &TransactionContext,
        index: &Arc<Index>,
        key: &ProjectedRow,
        slot: TupleSlot,
        name: &str,
    ) -> Result<()> {
        index.insert_unique(txn, key, slot).map_err(|_| {
            txn.set_must_abort();
            CatalogError::OidConflict { name: name.to_string() }
        })
    }

    fn insert_class_record(&self, txn: &TransactionContext, row: &PgClassRow) -> Result<()> {
        let mut pr = self.classes.row();
        row.write_into(&mut pr, &self.classes.map);
        let slot = self.classes.table.insert(txn, &pr)?;

        let mut key = self.classes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.oid);
        self.unique_insert(txn, &self.classes_oid_index, &key, slot, &row.name)?;

        let sql = &self.classes.table;
        let name_index = &self.classes_name_index;
        let mut key = name_index.key_initializer().initialize_row();
        key.set_varlen(key_pos(sql, name_index, pg::class::RELNAME_COL_OID), row.name.as_bytes());
        key.set::<u32>(key_pos(sql, name_index, pg::class::RELNAMESPACE_COL_OID), row.namespace.0);
        self.unique_insert(txn, name_index, &key, slot, &row.name)?;

        let mut key = self.classes_namespace_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.namespace.0);
        self.classes_namespace_index.insert(txn, &key, slot);
        Ok(())
    }

    fn delete_class_index_entries(&self, txn: &TransactionContext, row: &PgClassRow, slot: TupleSlot) {
        let mut key = self.classes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.oid);
        self.classes_oid_index.delete(txn, &key, slot);

        let sql = &self.classes.table;
        let name_index = &self.classes_name_index;
        let mut key = name_index.key_initializer().initialize_row();
        key.set_varlen(key_pos(sql, name_index, pg::class::RELNAME_COL_OID), row.name.as_bytes());
        key.set::<u32>(key_pos(sql, name_index, pg::class::RELNAMESPACE_COL_OID), row.namespace.0);
        name_index.delete(txn, &key, slot);

        let mut key = self.classes_namespace_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.namespace.0);
        self.classes_namespace_index.delete(txn, &key, slot);
    }

    fn update_class_pointer(&self, txn: &TransactionContext, slot: TupleSlot, handle: ObjectHandle) -> Result<()> {
        let (init, map) = self
            .classes
            .table
            .initializer_for_projected_row(&[pg::class::REL_PTR_COL_OID]);
        let mut pr = init.initialize_row();
        pr.set::<u64>(map.idx(pg::class::REL_PTR_COL_OID), handle.0);
        self.classes.table.update(txn, slot, &pr)?;
        Ok(())
    }

    fn insert_attribute_record(&self, txn: &TransactionContext, row: &PgAttributeRow) -> Result<()> {
        let mut pr = self.columns.row();
        row.write_into(&mut pr, &self.columns.map);
        let slot = self.columns.table.insert(txn, &pr)?;

        let sql = &self.columns.table;
        let oid_index = &self.columns_oid_index;
        let mut key = oid_index.key_initializer().initialize_row();
        key.set::<u32>(key_pos(sql, oid_index, pg::attribute::ATTRELID_COL_OID), row.attrelid);
        key.set::<u32>(key_pos(sql, oid_index, pg::attribute::ATTNUM_COL_OID), row.attnum.0);
        self.unique_insert(txn, oid_index, &key, slot, &row.attname)?;

        let name_index = &self.columns_name_index;
        let mut key = name_index.key_initializer().initialize_row();
        key.set::<u32>(key_pos(sql, name_index, pg::attribute::ATTRELID_COL_OID), row.attrelid);
        key.set_varlen(key_pos(sql, name_index, pg::attribute::ATTNAME_COL_OID), row.attname.as_bytes());
        self.unique_insert(txn, name_index, &key, slot, &row.attname)?;

        let mut key = self.columns_class_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.attrelid);
        self.columns_class_index.insert(txn, &key, slot);
        Ok(())
    }

    fn insert_index_record(&self, txn: &TransactionContext, row: &PgIndexRow, name: &str) -> Result<()> {
        let mut pr = self.indexes.row();
        row.write_into(&mut pr, &self.indexes.map);
        let slot = self.indexes.table.insert(txn, &pr)?;

        let mut key = self.indexes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.indoid.0);
        self.unique_insert(txn, &self.indexes_oid_index, &key, slot, name)?;

        let mut key = self.indexes_table_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.indrelid.0);
        self.indexes_table_index.insert(txn, &key, slot);
        Ok(())
    }

    fn insert_type_record(&self, txn: &TransactionContext, row: &PgTypeRow) -> Result<()> {
        let mut pr = self.types.row();
        row.write_into(&mut pr, &self.types.map);
        let slot = self.types.table.insert(txn, &pr)?;

        let mut key = self.types_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.oid.0);
        self.unique_insert(txn, &self.types_oid_index, &key, slot, &row.name)?;

        let mut key = self.types_name_index.key_initializer().initialize_row();
        key.set_varlen(0, row.name.as_bytes());
        self.unique_insert(txn, &self.types_name_index, &key, slot, &row.name)?;

        let mut key = self.types_namespace_index.key_initializer().initialize_row();
        key.set::<u32>(0, row.namespace.0);
        self.types_namespace_index.insert(txn, &key, slot);
        Ok(())
    }

    /// Looks up a `pg_type` row by oid. Mostly of interest to tests and
    /// the layers that map SQL type names.
    pub fn get_type(&self, txn: &TransactionContext, oid: quarry_primitives::TypeOid) -> Option<PgTypeRow> {
        let mut key = self.types_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid.0);
        let mut slots = Vec::new();
        self.types_oid_index.scan_key(txn, &key, &mut slots);
        let slot = *slots.first()?;
        self.types
            .read(txn, slot)
            .map(|pr| PgTypeRow::read_from(&pr, &self.types.map))
    }

    /// Resolves a class name within a namespace to its oid and kind.
    fn class_oid_kind(&self, txn: &TransactionContext, ns: NamespaceOid, name: &str) -> Option<(u32, ClassKind)> {
        let sql = &self.classes.table;
        let name_index = &self.classes_name_index;
        let mut key = name_index.key_initializer().initialize_row();
        key.set_varlen(key_pos(sql, name_index, pg::class::RELNAME_COL_OID), name.as_bytes());
        key.set::<u32>(key_pos(sql, name_index, pg::class::RELNAMESPACE_COL_OID), ns.0);
        let mut slots = Vec::new();
        name_index.scan_key(txn, &key, &mut slots);
        let slot = *slots.first()?;
        let row = self.classes.read(txn, slot)?;
        let row = PgClassRow::read_from(&row, &self.classes.map);
        Some((row.oid, row.kind))
    }

    /// Looks up a `pg_class` row by oid, visibility-filtered.
    fn class_row_for_oid(&self, txn: &TransactionContext, oid: u32) -> Result<Option<(TupleSlot, PgClassRow)>> {
        let mut key = self.classes_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid);
        let mut slots = Vec::new();
        self.classes_oid_index.scan_key(txn, &key, &mut slots);
        debug_assert!(slots.len() <= 1, "pg_class oid index is unique");
        let Some(&slot) = slots.first() else {
            return Ok(None);
        };
        Ok(self
            .classes
            .read(txn, slot)
            .map(|pr| (slot, PgClassRow::read_from(&pr, &self.classes.map))))
    }
}
