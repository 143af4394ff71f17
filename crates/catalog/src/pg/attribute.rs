//! `pg_attribute`: the columns of every class.

use quarry_primitives::{ColOid, IndexOid, TableOid, TypeId, TypeOid};
use quarry_storage::ProjectedRow;

use crate::heap::ObjectHandle;
use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const COLUMN_TABLE_OID: TableOid = TableOid(41);
/// Unique on `(attrelid, attnum)`.
pub const COLUMN_OID_INDEX_OID: IndexOid = IndexOid(42);
/// Unique on `(attrelid, attname)`.
pub const COLUMN_NAME_INDEX_OID: IndexOid = IndexOid(43);
/// Non-unique on `attrelid`.
pub const COLUMN_CLASS_INDEX_OID: IndexOid = IndexOid(44);

pub const ATTNUM_COL_OID: ColOid = ColOid(1); // INTEGER
pub const ATTRELID_COL_OID: ColOid = ColOid(2); // INTEGER (fkey: pg_class)
pub const ATTNAME_COL_OID: ColOid = ColOid(3); // VARCHAR
pub const ATTTYPID_COL_OID: ColOid = ColOid(4); // INTEGER (fkey: pg_type)
pub const ATTLEN_COL_OID: ColOid = ColOid(5); // SMALLINT
pub const ATTNOTNULL_COL_OID: ColOid = ColOid(6); // BOOLEAN
pub const ADBIN_COL_OID: ColOid = ColOid(7); // BIGINT (object heap handle)
pub const ADSRC_COL_OID: ColOid = ColOid(8); // VARCHAR (default as JSON)

pub const ALL_COL_OIDS: [ColOid; 8] = [
    ATTNUM_COL_OID,
    ATTRELID_COL_OID,
    ATTNAME_COL_OID,
    ATTTYPID_COL_OID,
    ATTLEN_COL_OID,
    ATTNOTNULL_COL_OID,
    ADBIN_COL_OID,
    ADSRC_COL_OID,
];

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("attnum", TypeId::Integer, false, ATTNUM_COL_OID.0),
        Column::with_oid("attrelid", TypeId::Integer, false, ATTRELID_COL_OID.0),
        Column::with_oid("attname", TypeId::Varchar, false, ATTNAME_COL_OID.0),
        Column::with_oid("atttypid", TypeId::Integer, false, ATTTYPID_COL_OID.0),
        Column::with_oid("attlen", TypeId::SmallInt, false, ATTLEN_COL_OID.0),
        Column::with_oid("attnotnull", TypeId::Boolean, false, ATTNOTNULL_COL_OID.0),
        Column::with_oid("adbin", TypeId::BigInt, true, ADBIN_COL_OID.0),
        Column::with_oid("adsrc", TypeId::Varchar, true, ADSRC_COL_OID.0),
    ])
}

/// One `pg_attribute` row. `attrelid` is the owning class's raw oid;
/// attribute rows exist for indexes' key columns too.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgAttributeRow {
    pub attnum: ColOid,
    pub attrelid: u32,
    pub attname: String,
    pub atttypid: TypeOid,
    pub attlen: u16,
    pub attnotnull: bool,
    pub adbin: ObjectHandle,
    pub adsrc: Option<String>,
}

impl PgAttributeRow {
    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(ATTNUM_COL_OID), self.attnum.0);
        row.set::<u32>(map.idx(ATTRELID_COL_OID), self.attrelid);
        row.set_varlen(map.idx(ATTNAME_COL_OID), self.attname.as_bytes());
        row.set::<u32>(map.idx(ATTTYPID_COL_OID), self.atttypid.0);
        row.set::<u16>(map.idx(ATTLEN_COL_OID), self.attlen);
        row.set::<u8>(map.idx(ATTNOTNULL_COL_OID), self.attnotnull as u8);
        row.set::<u64>(map.idx(ADBIN_COL_OID), self.adbin.0);
        match &self.adsrc {
            Some(src) => row.set_varlen(map.idx(ADSRC_COL_OID), src.as_bytes()),
            None => row.set_null(map.idx(ADSRC_COL_OID)),
        }
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        PgAttributeRow {
            attnum: ColOid(row.get::<u32>(map.idx(ATTNUM_COL_OID))),
            attrelid: row.get::<u32>(map.idx(ATTRELID_COL_OID)),
            attname: String::from_utf8_lossy(row.varlen(map.idx(ATTNAME_COL_OID)).unwrap_or_default()).into_owned(),
            atttypid: TypeOid(row.get::<u32>(map.idx(ATTTYPID_COL_OID))),
            attlen: row.get::<u16>(map.idx(ATTLEN_COL_OID)),
            attnotnull: row.get::<u8>(map.idx(ATTNOTNULL_COL_OID)) != 0,
            adbin: ObjectHandle(row.get::<u64>(map.idx(ADBIN_COL_OID))),
            adsrc: row
                .varlen(map.idx(ADSRC_COL_OID))
                .map(|b| String::from_utf8_lossy(b).into_owned()),
        }
    }
}
