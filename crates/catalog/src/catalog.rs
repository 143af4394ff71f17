//! The process-wide catalog: a registry of databases plus the
//! cluster-level `pg_database` table.
//!
//! There is no catalog singleton; the registry is an ordinary value
//! scoped to whoever owns the process's storage stack.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use quarry_primitives::{DatabaseOid, IdMap, INVALID_DATABASE_OID};
use quarry_storage::index::Index;
use quarry_storage::{BlockStore, TransactionContext, TransactionManager};

use crate::database_catalog::{catalog_index, CatalogTable, DatabaseCatalog};
use crate::error::{CatalogError, Result};
use crate::pg::database as db;
use crate::pg::database::PgDatabaseRow;

/// The registry of databases in this process.
pub struct Catalog {
    txn_manager: Arc<TransactionManager>,
    store: Arc<BlockStore>,
    databases_table: CatalogTable,
    databases_oid_index: Arc<Index>,
    databases_name_index: Arc<Index>,
    /// Bootstrapped catalogs, published at create-database commit.
    databases: RwLock<IdMap<DatabaseOid, Arc<DatabaseCatalog>>>,
    next_db_oid: AtomicU32,
}

impl Catalog {
    pub fn new(txn_manager: Arc<TransactionManager>, store: Arc<BlockStore>) -> Result<Arc<Self>> {
        let databases_table =
            CatalogTable::build(&store, db::table_schema(), db::DATABASE_TABLE_OID, &db::ALL_COL_OIDS)?;
        let databases_oid_index =
            catalog_index(&databases_table, db::DATABASE_OID_INDEX_OID, &[db::DATOID_COL_OID], true);
        let databases_name_index =
            catalog_index(&databases_table, db::DATABASE_NAME_INDEX_OID, &[db::DATNAME_COL_OID], true);
        Ok(Arc::new(Catalog {
            txn_manager,
            store,
            databases_table,
            databases_oid_index,
            databases_name_index,
            databases: RwLock::new(IdMap::default()),
            next_db_oid: AtomicU32::new(crate::pg::START_OID),
        }))
    }

    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    pub fn block_store(&self) -> &Arc<BlockStore> {
        &self.store
    }

    /// Creates and bootstraps a database. The new catalog becomes
    /// reachable through [`Self::get_database`] only once `txn` commits;
    /// a second database of the same name is an oid conflict.
    pub fn create_database(self: &Arc<Self>, txn: &TransactionContext, name: &str) -> Result<DatabaseOid> {
        let oid = DatabaseOid(self.next_db_oid.fetch_add(1, Ordering::Relaxed));
        log::trace!("DATABASE CREATING: {name} ({oid})");

        let row = PgDatabaseRow {
            oid,
            name: name.to_string(),
        };
        let mut pr = self.databases_table.row();
        row.write_into(&mut pr, &self.databases_table.map);
        let slot = self.databases_table.table.insert(txn, &pr)?;

        let mut key = self.databases_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid.0);
        self.databases_oid_index.insert_unique(txn, &key, slot).map_err(|_| {
            txn.set_must_abort();
            CatalogError::OidConflict { name: name.to_string() }
        })?;
        let mut key = self.databases_name_index.key_initializer().initialize_row();
        key.set_varlen(0, name.as_bytes());
        self.databases_name_index.insert_unique(txn, &key, slot).map_err(|_| {
            txn.set_must_abort();
            CatalogError::OidConflict { name: name.to_string() }
        })?;

        let database = DatabaseCatalog::new(oid, self.store.clone())?;
        database.bootstrap(txn)?;

        let registry = self.clone();
        let publish = database.clone();
        txn.register_commit_action(move |_, _| {
            registry.databases.write().insert(oid, publish);
        });
        log::trace!("DATABASE CREATED: {name} ({oid})");
        Ok(oid)
    }

    /// Resolves a database name; the invalid oid if absent.
    pub fn get_database_oid(&self, txn: &TransactionContext, name: &str) -> DatabaseOid {
        let mut key = self.databases_name_index.key_initializer().initialize_row();
        key.set_varlen(0, name.as_bytes());
        let mut slots = Vec::new();
        self.databases_name_index.scan_key(txn, &key, &mut slots);
        let Some(&slot) = slots.first() else {
            return INVALID_DATABASE_OID;
        };
        match self.databases_table.read(txn, slot) {
            Some(pr) => PgDatabaseRow::read_from(&pr, &self.databases_table.map).oid,
            None => INVALID_DATABASE_OID,
        }
    }

    /// The bootstrapped catalog of a committed database.
    pub fn get_database(&self, oid: DatabaseOid) -> Result<Arc<DatabaseCatalog>> {
        self.databases
            .read()
            .get(&oid)
            .cloned()
            .ok_or(CatalogError::InvalidReference { oid: oid.0 })
    }

    /// Drops a database: deletes its `pg_database` entry and defers the
    /// teardown of its catalog to a safe epoch.
    pub fn delete_database(self: &Arc<Self>, txn: &TransactionContext, oid: DatabaseOid) -> Result<()> {
        let mut key = self.databases_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid.0);
        let mut slots = Vec::new();
        self.databases_oid_index.scan_key(txn, &key, &mut slots);
        let Some(&slot) = slots.first() else {
            return Err(CatalogError::InvalidReference { oid: oid.0 });
        };
        let row = self
            .databases_table
            .read(txn, slot)
            .map(|pr| PgDatabaseRow::read_from(&pr, &self.databases_table.map))
            .ok_or(CatalogError::InvalidReference { oid: oid.0 })?;

        log::trace!("DATABASE DROPPING: {} ({oid})", row.name);
        self.databases_table.table.delete(txn, slot)?;
        let mut key = self.databases_oid_index.key_initializer().initialize_row();
        key.set::<u32>(0, oid.0);
        self.databases_oid_index.delete(txn, &key, slot);
        let mut key = self.databases_name_index.key_initializer().initialize_row();
        key.set_varlen(0, row.name.as_bytes());
        self.databases_name_index.delete(txn, &key, slot);

        let registry = self.clone();
        txn.register_commit_action(move |deferred, _| {
            let evicted = registry.databases.write().remove(&oid);
            if let Some(database) = evicted {
                // The storage and heap die with the last reference, after
                // every transaction that could still reach them is gone.
                deferred.defer(move || drop(database));
            }
        });
        Ok(())
    }
}
