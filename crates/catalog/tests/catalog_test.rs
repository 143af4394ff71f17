//! End-to-end catalog tests: bootstrap shape, DDL lifecycles, snapshot
//! isolation across schema changes, and deferred object reclamation.

use std::sync::{Arc, Weak};

use quarry_catalog::pg;
use quarry_catalog::{
    Catalog, CatalogAccessor, CatalogError, Column, DatabaseCatalog, DefaultValue, IndexBacking, IndexColumn,
    IndexSchema, Schema, SqlTable, TransactionContext, TransactionManager,
};
use quarry_primitives::{
    ColOid, NamespaceOid, TableOid, TypeId, INVALID_DATABASE_OID, INVALID_INDEX_OID, INVALID_NAMESPACE_OID,
    INVALID_TABLE_OID,
};
use pretty_assertions::assert_eq;
use quarry_storage::{BlockStore, GarbageCollector, TransactionError};

struct Fixture {
    mgr: Arc<TransactionManager>,
    catalog: Arc<Catalog>,
    db: Arc<DatabaseCatalog>,
    gc: GarbageCollector,
}

fn fixture() -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let mgr = TransactionManager::new();
    let store = BlockStore::new(1 << 18, 1 << 16);
    let catalog = Catalog::new(mgr.clone(), store).unwrap();

    let txn = mgr.begin();
    let oid = catalog.create_database(&txn, "quarry").unwrap();
    mgr.commit(txn).unwrap();
    let db = catalog.get_database(oid).unwrap();
    Fixture {
        gc: GarbageCollector::new(mgr.clone()),
        mgr,
        catalog,
        db,
    }
}

fn public() -> NamespaceOid {
    pg::namespace::NAMESPACE_DEFAULT_NAMESPACE_OID
}

fn pg_catalog() -> NamespaceOid {
    pg::namespace::NAMESPACE_CATALOG_NAMESPACE_OID
}

fn user_table_schema() -> Schema {
    Schema::new(vec![
        Column::new("id", TypeId::Integer, false),
        Column::new("v", TypeId::Integer, false),
    ])
}

/// Allocates storage for a freshly created table and publishes it, the
/// way the execution layer is expected to.
fn allocate_and_publish(f: &Fixture, txn: &TransactionContext, table: TableOid) -> Arc<SqlTable> {
    let accessor = CatalogAccessor::new(f.db.clone(), txn);
    let schema = accessor.get_schema(table).unwrap();
    let storage = SqlTable::new(f.db.block_store(), (*schema).clone(), table).unwrap();
    accessor.set_table_pointer(table, storage.clone()).unwrap();
    storage
}

#[test]
fn bootstrap_populates_the_documented_shape() {
    let f = fixture();
    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);

    // The reserved namespaces.
    assert_eq!(accessor.get_namespace_oid("pg_catalog"), pg_catalog());
    assert_eq!(accessor.get_namespace_oid("public"), public());

    // Every catalog table under its reserved oid.
    #[rustfmt::skip]
    let tables = [
        ("pg_namespace", pg::namespace::NAMESPACE_TABLE_OID),
        ("pg_class", pg::class::CLASS_TABLE_OID),
        ("pg_index", pg::index::INDEX_TABLE_OID),
        ("pg_attribute", pg::attribute::COLUMN_TABLE_OID),
        ("pg_type", pg::types::TYPE_TABLE_OID),
        ("pg_constraint", pg::constraint::CONSTRAINT_TABLE_OID),
    ];
    for (name, oid) in tables {
        assert_eq!(accessor.get_table_oid(pg_catalog(), name), oid, "{name}");
        assert!(accessor.get_table(oid).is_ok(), "{name} has a published pointer");
        assert!(accessor.get_schema(oid).is_ok(), "{name} has a published schema");
    }

    // Every catalog index under its reserved oid.
    #[rustfmt::skip]
    let indexes = [
        ("pg_namespace_oid_index", pg::namespace::NAMESPACE_OID_INDEX_OID),
        ("pg_namespace_name_index", pg::namespace::NAMESPACE_NAME_INDEX_OID),
        ("pg_class_oid_index", pg::class::CLASS_OID_INDEX_OID),
        ("pg_class_name_index", pg::class::CLASS_NAME_INDEX_OID),
        ("pg_class_namespace_index", pg::class::CLASS_NAMESPACE_INDEX_OID),
        ("pg_index_oid_index", pg::index::INDEX_OID_INDEX_OID),
        ("pg_index_table_index", pg::index::INDEX_TABLE_INDEX_OID),
        ("pg_attribute_oid_index", pg::attribute::COLUMN_OID_INDEX_OID),
        ("pg_attribute_name_index", pg::attribute::COLUMN_NAME_INDEX_OID),
        ("pg_attribute_class_index", pg::attribute::COLUMN_CLASS_INDEX_OID),
        ("pg_type_oid_index", pg::types::TYPE_OID_INDEX_OID),
        ("pg_type_name_index", pg::types::TYPE_NAME_INDEX_OID),
        ("pg_type_namespace_index", pg::types::TYPE_NAMESPACE_INDEX_OID),
        ("pg_constraint_oid_index", pg::constraint::CONSTRAINT_OID_INDEX_OID),
        ("pg_constraint_name_index", pg::constraint::CONSTRAINT_NAME_INDEX_OID),
        ("pg_constraint_namespace_index", pg::constraint::CONSTRAINT_NAMESPACE_INDEX_OID),
        ("pg_constraint_table_index", pg::constraint::CONSTRAINT_TABLE_INDEX_OID),
        ("pg_constraint_index_index", pg::constraint::CONSTRAINT_INDEX_INDEX_OID),
        ("pg_constraint_foreigntable_index", pg::constraint::CONSTRAINT_FOREIGNTABLE_INDEX_OID),
    ];
    for (name, oid) in indexes {
        assert_eq!(accessor.get_index_oid(pg_catalog(), name), oid, "{name}");
        assert!(accessor.get_index(oid).is_ok(), "{name} has a published pointer");
        assert!(accessor.get_index_schema(oid).is_ok(), "{name} has a published schema");
    }

    // pg_class's own indexes are registered in pg_index.
    let class_indexes = accessor.get_indexes(pg::class::CLASS_TABLE_OID);
    assert_eq!(
        {
            let mut sorted = class_indexes.clone();
            sorted.sort();
            sorted
        },
        vec![
            pg::class::CLASS_OID_INDEX_OID,
            pg::class::CLASS_NAME_INDEX_OID,
            pg::class::CLASS_NAMESPACE_INDEX_OID,
        ]
    );

    // The built-in type tags, with their documented widths.
    for tag in TypeId::ALL {
        let row = f.db.get_type(&txn, tag.oid()).expect("built-in type is present");
        assert_eq!(row.name, tag.name());
        assert_eq!(row.len, tag.size());
        assert_eq!(row.by_val, tag.is_by_val());
        assert_eq!(row.namespace, pg_catalog());
    }

    // pg_attribute describes every catalog table's columns.
    let class_cols = f.db.get_columns(&txn, pg::class::CLASS_TABLE_OID.0);
    let names: Vec<&str> = class_cols.iter().map(|c| c.attname.as_str()).collect();
    assert_eq!(
        names,
        vec!["reloid", "relname", "relnamespace", "relkind", "rel_schema", "rel_ptr", "rel_nextcoloid"]
    );
    for (i, col) in class_cols.iter().enumerate() {
        assert_eq!(col.attnum, ColOid(i as u32 + 1));
        assert_eq!(col.attrelid, pg::class::CLASS_TABLE_OID.0);
    }

    f.mgr.commit(txn).unwrap();
}

#[test]
fn bootstrapping_twice_is_rejected() {
    let f = fixture();
    let txn = f.mgr.begin();
    assert!(matches!(f.db.bootstrap(&txn), Err(CatalogError::Bootstrap(_))));
    f.mgr.abort(txn);

    // A second database of the same name is a conflict too.
    let txn = f.mgr.begin();
    let err = f.catalog.create_database(&txn, "quarry").unwrap_err();
    assert!(matches!(err, CatalogError::OidConflict { .. }));
    assert!(f.mgr.commit(txn).is_err());
}

/// Scenario: create a namespace and a table, insert, and read the row
/// back from a later snapshot.
#[test]
fn create_insert_select_roundtrip() -> anyhow::Result<()> {
    let f = fixture();

    let t1 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t1);
    let ns = accessor.create_namespace("app").unwrap();
    assert_ne!(ns, INVALID_NAMESPACE_OID);
    let toid = accessor.create_table(ns, "t", user_table_schema()).unwrap();
    assert_ne!(toid, INVALID_TABLE_OID);
    // Storage has not been allocated yet.
    assert!(matches!(accessor.get_table(toid), Err(CatalogError::InvalidReference { .. })));
    allocate_and_publish(&f, &t1, toid);
    f.mgr.commit(t1).unwrap();

    let t2 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t2);
    assert_eq!(accessor.get_table_oid(ns, "t"), toid);
    let table = accessor.get_table(toid).unwrap();
    let (init, map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2)]);
    let mut row = init.initialize_row();
    row.set::<u32>(map.idx(ColOid(1)), 1);
    row.set::<u32>(map.idx(ColOid(2)), 42);
    let slot = table.insert(&t2, &row).unwrap();
    f.mgr.commit(t2).unwrap();

    let t3 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t3);
    let table = accessor.get_table(toid).unwrap();
    let mut out = init.initialize_row();
    assert!(table.select(&t3, slot, &mut out));
    assert_eq!(out.get::<u32>(map.idx(ColOid(1))), 1);
    assert_eq!(out.get::<u32>(map.idx(ColOid(2))), 42);
    f.mgr.commit(t3)?;
    Ok(())
}

#[test]
fn duplicate_names_conflict() {
    let f = fixture();
    let t1 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t1);
    accessor.create_namespace("dup").unwrap();
    f.mgr.commit(t1).unwrap();

    let t2 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t2);
    let err = accessor.create_namespace("dup").unwrap_err();
    assert_eq!(
        err,
        CatalogError::OidConflict {
            name: "dup".to_string()
        }
    );
    assert!(t2.must_abort());
    assert!(matches!(f.mgr.commit(t2), Err(TransactionError::Aborted { .. })));
}

#[test]
fn wrong_kind_lookups_are_invalid_references() {
    let f = fixture();
    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);

    // get_table on an index oid and get_index on a table oid both fail.
    let idx_oid = pg::namespace::NAMESPACE_OID_INDEX_OID;
    assert!(matches!(
        accessor.get_table(TableOid(idx_oid.0)),
        Err(CatalogError::InvalidReference { .. })
    ));
    assert!(matches!(
        accessor.get_index(quarry_primitives::IndexOid(pg::class::CLASS_TABLE_OID.0)),
        Err(CatalogError::InvalidReference { .. })
    ));
    // Name lookups of the wrong kind return the invalid oid.
    assert_eq!(accessor.get_table_oid(pg_catalog(), "pg_class_oid_index"), INVALID_TABLE_OID);
    assert_eq!(accessor.get_index_oid(pg_catalog(), "pg_class"), INVALID_INDEX_OID);
    f.mgr.commit(txn).unwrap();
}

/// Scenario: a long-running transaction must not see an index committed
/// after its snapshot was taken.
#[test]
fn snapshot_isolation_across_ddl() {
    let f = fixture();

    let setup = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &setup);
    let toid = accessor.create_table(public(), "t", user_table_schema()).unwrap();
    let storage = allocate_and_publish(&f, &setup, toid);
    f.mgr.commit(setup).unwrap();

    let t_long = f.mgr.begin();

    let t_ddl = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t_ddl);
    let schema = accessor.get_schema(toid).unwrap();
    let id_col = schema.column_by_name("id").unwrap();
    let idx_schema = IndexSchema::new(
        vec![IndexColumn::new("id", id_col.type_id(), id_col.oid())],
        IndexBacking::Ordered,
        true,
        true,
    );
    let idx_oid = accessor.create_index(public(), toid, "idx", idx_schema).unwrap();
    let index = quarry_storage::index::Index::new_ordered(
        idx_oid,
        storage.data_table().clone(),
        storage.key_schema(&[id_col.oid()]),
        true,
    );
    accessor.set_index_pointer(idx_oid, index).unwrap();
    f.mgr.commit(t_ddl).unwrap();

    // The old snapshot cannot see the new index.
    let accessor = CatalogAccessor::new(f.db.clone(), &t_long);
    assert_eq!(accessor.get_index_oid(public(), "idx"), INVALID_INDEX_OID);
    assert!(accessor.get_indexes(toid).is_empty());
    f.mgr.commit(t_long).unwrap();

    // A fresh snapshot sees it.
    let later = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &later);
    assert_eq!(accessor.get_index_oid(public(), "idx"), idx_oid);
    assert_eq!(accessor.get_indexes(toid), vec![idx_oid]);
    f.mgr.commit(later).unwrap();
}

#[test]
fn ddl_lock_rejects_older_writers() {
    let f = fixture();
    let t_old = f.mgr.begin();

    let t_new = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t_new);
    accessor.create_namespace("fresh").unwrap();
    f.mgr.commit(t_new).unwrap();

    let accessor = CatalogAccessor::new(f.db.clone(), &t_old);
    assert_eq!(accessor.create_namespace("stale").unwrap_err(), CatalogError::DdlLockRejection);
    assert!(t_old.must_abort());
    assert!(f.mgr.commit(t_old).is_err());
}

/// Scenario: a dropped table stays reachable for transactions that
/// acquired it before the drop committed, and its storage object is only
/// freed once the epoch has passed every such transaction.
#[test]
fn dropped_tables_are_freed_only_after_the_epoch_passes() {
    let f = fixture();

    let setup = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &setup);
    let toid = accessor.create_table(public(), "doomed", user_table_schema()).unwrap();
    allocate_and_publish(&f, &setup, toid);
    f.mgr.commit(setup).unwrap();

    // T2 acquires the table before the drop.
    let t2 = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &t2);
    let held: Arc<SqlTable> = accessor.get_table(toid).unwrap();
    let watch: Weak<SqlTable> = Arc::downgrade(&held);

    let dropper = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &dropper);
    accessor.drop_table(toid).unwrap();
    f.mgr.commit(dropper).unwrap();

    // T2 still works against its pre-acquired handle.
    let (init, map) = held.initializer_for_projected_row(&[ColOid(1), ColOid(2)]);
    let mut row = init.initialize_row();
    row.set::<u32>(map.idx(ColOid(1)), 9);
    row.set::<u32>(map.idx(ColOid(2)), 9);
    assert!(held.insert(&t2, &row).is_ok());

    // GC may run arbitrarily often; the object survives while T2 lives.
    f.gc.perform_gc();
    f.gc.perform_gc();
    drop(held);
    assert!(watch.upgrade().is_some(), "the epoch has not passed T2's begin yet");

    f.mgr.abort(t2);
    f.gc.perform_gc();
    f.gc.perform_gc();
    assert!(watch.upgrade().is_none(), "the storage object must be freed after the epoch");
}

/// Dropping an index frees its object only after a double deferral.
#[test]
fn dropped_indexes_take_two_epochs_to_free() {
    let f = fixture();

    let setup = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &setup);
    let toid = accessor.create_table(public(), "t", user_table_schema()).unwrap();
    let storage = allocate_and_publish(&f, &setup, toid);
    let schema = accessor.get_schema(toid).unwrap();
    let id_col = schema.column_by_name("id").unwrap();
    let idx_oid = accessor
        .create_index(
            public(),
            toid,
            "t_id_idx",
            IndexSchema::new(
                vec![IndexColumn::new("id", id_col.type_id(), id_col.oid())],
                IndexBacking::Ordered,
                true,
                true,
            ),
        )
        .unwrap();
    let index = quarry_storage::index::Index::new_ordered(
        idx_oid,
        storage.data_table().clone(),
        storage.key_schema(&[id_col.oid()]),
        true,
    );
    accessor.set_index_pointer(idx_oid, index.clone()).unwrap();
    f.mgr.commit(setup).unwrap();

    let watch = Arc::downgrade(&index);
    drop(index);

    let dropper = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &dropper);
    accessor.drop_index(idx_oid).unwrap();
    f.mgr.commit(dropper).unwrap();

    // First cycle: the deferral is re-stamped, not run.
    f.gc.perform_gc();
    assert!(watch.upgrade().is_some(), "double deferral must survive the first epoch");
    // Second cycle: now it runs.
    f.gc.perform_gc();
    assert!(watch.upgrade().is_none());
}

#[test]
fn dropped_tables_disappear_from_lookups_and_attributes() {
    let f = fixture();
    let setup = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &setup);
    let toid = accessor.create_table(public(), "t", user_table_schema()).unwrap();
    allocate_and_publish(&f, &setup, toid);
    f.mgr.commit(setup).unwrap();

    let dropper = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &dropper);
    assert_eq!(f.db.get_columns(&dropper, toid.0).len(), 2);
    accessor.drop_table(toid).unwrap();
    // The same transaction no longer sees the entry or its columns.
    assert_eq!(accessor.get_table_oid(public(), "t"), INVALID_TABLE_OID);
    assert!(f.db.get_columns(&dropper, toid.0).is_empty());
    f.mgr.commit(dropper).unwrap();

    let later = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &later);
    assert_eq!(accessor.get_table_oid(public(), "t"), INVALID_TABLE_OID);
    assert!(matches!(accessor.get_table(toid), Err(CatalogError::InvalidReference { .. })));
    // The name is reusable.
    let again = accessor.create_table(public(), "t", user_table_schema()).unwrap();
    assert_ne!(again, toid);
    f.mgr.commit(later).unwrap();
}

#[test]
fn namespace_drop_rules() {
    let f = fixture();
    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);

    assert!(matches!(
        accessor.drop_namespace(pg_catalog()),
        Err(CatalogError::NamespaceInUse { .. })
    ));

    let ns = accessor.create_namespace("busy").unwrap();
    let toid = accessor.create_table(ns, "t", user_table_schema()).unwrap();
    allocate_and_publish(&f, &txn, toid);
    assert!(matches!(
        accessor.drop_namespace(ns),
        Err(CatalogError::NamespaceInUse { .. })
    ));

    accessor.drop_table(toid).unwrap();
    accessor.drop_namespace(ns).unwrap();
    assert_eq!(accessor.get_namespace_oid("busy"), INVALID_NAMESPACE_OID);
    f.mgr.commit(txn).unwrap();
}

#[test]
fn aborted_ddl_leaves_no_trace() {
    let f = fixture();
    let doomed = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &doomed);
    let ns = accessor.create_namespace("ghost").unwrap();
    let toid = accessor.create_table(ns, "t", user_table_schema()).unwrap();
    allocate_and_publish(&f, &doomed, toid);
    f.mgr.abort(doomed);

    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);
    assert_eq!(accessor.get_namespace_oid("ghost"), INVALID_NAMESPACE_OID);
    assert!(matches!(accessor.get_table(toid), Err(CatalogError::InvalidReference { .. })));
    // The names are free for reuse.
    accessor.create_namespace("ghost").unwrap();
    f.mgr.commit(txn).unwrap();
}

#[test]
fn default_values_roundtrip_through_pg_attribute() {
    let f = fixture();
    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);
    let schema = Schema::new(vec![
        Column::new("id", TypeId::Integer, false),
        Column::new("note", TypeId::Varchar, true).with_default(DefaultValue::Varchar("n/a".into())),
    ]);
    let toid = accessor.create_table(public(), "with_defaults", schema).unwrap();

    let columns = f.db.get_columns(&txn, toid.0);
    assert_eq!(columns.len(), 2);
    assert!(columns[0].adsrc.is_none());
    let src = columns[1].adsrc.as_ref().expect("default serialized to adsrc");
    assert_eq!(DefaultValue::from_json(src).unwrap(), DefaultValue::Varchar("n/a".into()));
    assert!(columns[1].adbin.is_valid());
    f.mgr.abort(txn);
}

#[test]
fn oids_are_unique_and_monotonic_and_recoverable() {
    let f = fixture();
    let txn = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);

    let ns = accessor.create_namespace("a").unwrap();
    let t1 = accessor.create_table(ns, "t1", user_table_schema()).unwrap();
    let t2 = accessor.create_table(ns, "t2", user_table_schema()).unwrap();
    assert!(ns.0 >= pg::START_OID);
    assert!(ns.0 < t1.0 && t1.0 < t2.0);
    f.mgr.commit(txn).unwrap();

    // Recovery rebuilds the counter from the observed maximum.
    let txn = f.mgr.begin();
    f.db.recompute_next_oid(&txn);
    let accessor = CatalogAccessor::new(f.db.clone(), &txn);
    let t3 = accessor.create_table(ns, "t3", user_table_schema()).unwrap();
    assert!(t3.0 > t2.0);
    f.mgr.commit(txn).unwrap();
}

/// Scenario: a primary-key index published through the catalog enforces
/// uniqueness against MVCC visibility, including uncommitted claims.
#[test]
fn published_unique_index_enforces_primary_keys() {
    let f = fixture();

    let setup = f.mgr.begin();
    let accessor = CatalogAccessor::new(f.db.clone(), &setup);
    let toid = accessor.create_table(public(), "u", user_table_schema()).unwrap();
    let storage = allocate_and_publish(&f, &setup, toid);
    let schema = accessor.get_schema(toid).unwrap();
    let id_col = schema.column_by_name("id").unwrap();
    let idx_oid = accessor
        .create_index(
            public(),
            toid,
            "u_pkey",
            IndexSchema::new(
                vec![IndexColumn::new("id", id_col.type_id(), id_col.oid())],
                IndexBacking::Ordered,
                true,
                true,
            ),
        )
        .unwrap();
    accessor
        .set_index_pointer(
            idx_oid,
            quarry_storage::index::Index::new_ordered(
                idx_oid,
                storage.data_table().clone(),
                storage.key_schema(&[id_col.oid()]),
                true,
            ),
        )
        .unwrap();
    f.mgr.commit(setup).unwrap();

    // Unqualified lookups resolve through the default namespace.
    let t1 = f.mgr.begin();
    let t2 = f.mgr.begin();
    let accessor1 = CatalogAccessor::new(f.db.clone(), &t1);
    assert_eq!(accessor1.table_oid("u"), toid);
    assert_eq!(accessor1.index_oid("u_pkey"), idx_oid);
    let index_schema = accessor1.get_index_schema(idx_oid).unwrap();
    assert!(index_schema.is_unique() && index_schema.is_primary());

    /// Inserts a row keyed by `id` through the published catalog objects.
    fn insert_key(
        accessor: &CatalogAccessor,
        toid: TableOid,
        idx_oid: quarry_primitives::IndexOid,
        id: u32,
    ) -> Result<(), quarry_storage::IndexError> {
        let txn = accessor.txn();
        let table = accessor.get_table(toid).unwrap();
        let index = accessor.get_index(idx_oid).unwrap();
        let (init, map) = table.initializer_for_projected_row(&[ColOid(1), ColOid(2)]);
        let mut row = init.initialize_row();
        row.set::<u32>(map.idx(ColOid(1)), id);
        row.set::<u32>(map.idx(ColOid(2)), 0);
        let slot = table.insert(txn, &row).unwrap();
        let mut key = index.key_initializer().initialize_row();
        key.set::<u32>(0, id);
        index.insert_unique(txn, &key, slot)
    }

    // T1 claims id=1 and has not committed; T2's claim must observe it.
    insert_key(&accessor1, toid, idx_oid, 1).unwrap();
    let accessor2 = CatalogAccessor::new(f.db.clone(), &t2);
    assert!(insert_key(&accessor2, toid, idx_oid, 1).is_err());
    f.mgr.abort(t2);
    f.mgr.commit(t1).unwrap();

    // A later claim still conflicts with the committed holder.
    let t3 = f.mgr.begin();
    let accessor3 = CatalogAccessor::new(f.db.clone(), &t3);
    assert!(insert_key(&accessor3, toid, idx_oid, 1).is_err());
    insert_key(&accessor3, toid, idx_oid, 2).unwrap();
    f.mgr.commit(t3).unwrap();
}

#[test]
fn database_registry_lifecycle() {
    let f = fixture();
    let txn = f.mgr.begin();
    assert_eq!(f.catalog.get_database_oid(&txn, "quarry"), f.db.oid());
    assert_eq!(f.catalog.get_database_oid(&txn, "absent"), INVALID_DATABASE_OID);

    let other = f.catalog.create_database(&txn, "other").unwrap();
    // Not reachable until the creating transaction commits.
    assert!(f.catalog.get_database(other).is_err());
    f.mgr.commit(txn).unwrap();
    assert!(f.catalog.get_database(other).is_ok());

    let txn = f.mgr.begin();
    f.catalog.delete_database(&txn, other).unwrap();
    f.mgr.commit(txn).unwrap();
    f.gc.perform_gc();
    assert!(f.catalog.get_database(other).is_err());

    let txn = f.mgr.begin();
    assert_eq!(f.catalog.get_database_oid(&txn, "other"), INVALID_DATABASE_OID);
    f.mgr.commit(txn).unwrap();
}
