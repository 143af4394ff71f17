//! `pg_namespace`: namespaces within one database.

use quarry_primitives::{ColOid, IndexOid, NamespaceOid, TableOid, TypeId};
use quarry_storage::ProjectedRow;

use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const NAMESPACE_TABLE_OID: TableOid = TableOid(11);
pub const NAMESPACE_OID_INDEX_OID: IndexOid = IndexOid(12);
pub const NAMESPACE_NAME_INDEX_OID: IndexOid = IndexOid(13);

/// The reserved `pg_catalog` namespace.
pub const NAMESPACE_CATALOG_NAMESPACE_OID: NamespaceOid = NamespaceOid(14);
/// The reserved `public` namespace.
pub const NAMESPACE_DEFAULT_NAMESPACE_OID: NamespaceOid = NamespaceOid(15);

pub const NSPOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const NSPNAME_COL_OID: ColOid = ColOid(2); // VARCHAR

pub const ALL_COL_OIDS: [ColOid; 2] = [NSPOID_COL_OID, NSPNAME_COL_OID];

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("nspoid", TypeId::Integer, false, NSPOID_COL_OID.0),
        Column::with_oid("nspname", TypeId::Varchar, false, NSPNAME_COL_OID.0),
    ])
}

/// One `pg_namespace` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgNamespaceRow {
    pub oid: NamespaceOid,
    pub name: String,
}

impl PgNamespaceRow {
    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(NSPOID_COL_OID), self.oid.0);
        row.set_varlen(map.idx(NSPNAME_COL_OID), self.name.as_bytes());
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        PgNamespaceRow {
            oid: NamespaceOid(row.get::<u32>(map.idx(NSPOID_COL_OID))),
            name: String::from_utf8_lossy(row.varlen(map.idx(NSPNAME_COL_OID)).unwrap_or_default()).into_owned(),
        }
    }
}
