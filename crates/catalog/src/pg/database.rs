//! `pg_database`: the cluster-level table of databases.

use quarry_primitives::{ColOid, DatabaseOid, IndexOid, TableOid, TypeId};
use quarry_storage::ProjectedRow;

use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const DATABASE_TABLE_OID: TableOid = TableOid(1);
pub const DATABASE_OID_INDEX_OID: IndexOid = IndexOid(2);
pub const DATABASE_NAME_INDEX_OID: IndexOid = IndexOid(3);

pub const DATOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const DATNAME_COL_OID: ColOid = ColOid(2); // VARCHAR

pub const ALL_COL_OIDS: [ColOid; 2] = [DATOID_COL_OID, DATNAME_COL_OID];

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("datoid", TypeId::Integer, false, DATOID_COL_OID.0),
        Column::with_oid("datname", TypeId::Varchar, false, DATNAME_COL_OID.0),
    ])
}

/// One `pg_database` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgDatabaseRow {
    pub oid: DatabaseOid,
    pub name: String,
}

impl PgDatabaseRow {
    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(DATOID_COL_OID), self.oid.0);
        row.set_varlen(map.idx(DATNAME_COL_OID), self.name.as_bytes());
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        PgDatabaseRow {
            oid: DatabaseOid(row.get::<u32>(map.idx(DATOID_COL_OID))),
            name: String::from_utf8_lossy(row.varlen(map.idx(DATNAME_COL_OID)).unwrap_or_default()).into_owned(),
        }
    }
}
