//! The catalog accessor: the transaction-scoped view every non-storage
//! component goes through.

use std::sync::Arc;

use quarry_primitives::{IndexOid, NamespaceOid, TableOid};
use quarry_storage::index::Index;
use quarry_storage::TransactionContext;

use crate::database_catalog::DatabaseCatalog;
use crate::error::Result;
use crate::pg::namespace::NAMESPACE_DEFAULT_NAMESPACE_OID;
use crate::schema::{IndexSchema, Schema};
use crate::sql_table::SqlTable;

/// A catalog view bound to one transaction and one database.
///
/// Everything here is a thin delegation; the accessor exists so callers
/// hold a single object instead of a `(catalog, database, txn)` triple,
/// and to supply the default namespace for unqualified names.
pub struct CatalogAccessor<'txn> {
    database: Arc<DatabaseCatalog>,
    txn: &'txn TransactionContext,
    default_namespace: NamespaceOid,
}

impl<'txn> CatalogAccessor<'txn> {
    pub fn new(database: Arc<DatabaseCatalog>, txn: &'txn TransactionContext) -> Self {
        CatalogAccessor {
            database,
            txn,
            default_namespace: NAMESPACE_DEFAULT_NAMESPACE_OID,
        }
    }

    pub fn database(&self) -> &Arc<DatabaseCatalog> {
        &self.database
    }

    pub fn txn(&self) -> &'txn TransactionContext {
        self.txn
    }

    /// The namespace unqualified names resolve against; `public` unless
    /// overridden.
    pub fn default_namespace(&self) -> NamespaceOid {
        self.default_namespace
    }

    pub fn set_default_namespace(&mut self, ns: NamespaceOid) {
        self.default_namespace = ns;
    }

    pub fn create_namespace(&self, name: &str) -> Result<NamespaceOid> {
        self.database.create_namespace(self.txn, name)
    }

    pub fn get_namespace_oid(&self, name: &str) -> NamespaceOid {
        self.database.get_namespace_oid(self.txn, name)
    }

    pub fn drop_namespace(&self, ns: NamespaceOid) -> Result<()> {
        self.database.delete_namespace(self.txn, ns)
    }

    pub fn create_table(&self, ns: NamespaceOid, name: &str, schema: Schema) -> Result<TableOid> {
        self.database.create_table(self.txn, ns, name, schema)
    }

    pub fn set_table_pointer(&self, table: TableOid, ptr: Arc<SqlTable>) -> Result<()> {
        self.database.set_table_pointer(self.txn, table, ptr)
    }

    pub fn get_table(&self, table: TableOid) -> Result<Arc<SqlTable>> {
        self.database.get_table(self.txn, table)
    }

    pub fn get_schema(&self, table: TableOid) -> Result<Arc<Schema>> {
        self.database.get_schema(self.txn, table)
    }

    pub fn drop_table(&self, table: TableOid) -> Result<()> {
        self.database.delete_table(self.txn, table)
    }

    pub fn create_index(&self, ns: NamespaceOid, table: TableOid, name: &str, schema: IndexSchema) -> Result<IndexOid> {
        self.database.create_index(self.txn, ns, table, name, schema)
    }

    pub fn set_index_pointer(&self, index: IndexOid, ptr: Arc<Index>) -> Result<()> {
        self.database.set_index_pointer(self.txn, index, ptr)
    }

    pub fn get_index(&self, index: IndexOid) -> Result<Arc<Index>> {
        self.database.get_index(self.txn, index)
    }

    pub fn get_index_schema(&self, index: IndexOid) -> Result<Arc<IndexSchema>> {
        self.database.get_index_schema(self.txn, index)
    }

    pub fn drop_index(&self, index: IndexOid) -> Result<()> {
        self.database.delete_index(self.txn, index)
    }

    pub fn get_indexes(&self, table: TableOid) -> Vec<IndexOid> {
        self.database.get_indexes(self.txn, table)
    }

    pub fn get_table_oid(&self, ns: NamespaceOid, name: &str) -> TableOid {
        self.database.get_table_oid(self.txn, ns, name)
    }

    pub fn get_index_oid(&self, ns: NamespaceOid, name: &str) -> IndexOid {
        self.database.get_index_oid(self.txn, ns, name)
    }

    /// Resolves an unqualified table name against the default namespace.
    pub fn table_oid(&self, name: &str) -> TableOid {
        self.get_table_oid(self.default_namespace, name)
    }

    /// Resolves an unqualified index name against the default namespace.
    pub fn index_oid(&self, name: &str) -> IndexOid {
        self.get_index_oid(self.default_namespace, name)
    }
}
