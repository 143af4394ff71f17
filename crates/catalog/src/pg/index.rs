//! `pg_index`: index-specific metadata for `pg_class` entries of kind
//! `INDEX`.

use quarry_primitives::{ColOid, IndexOid, TableOid, TypeId};
use quarry_storage::ProjectedRow;

use crate::schema::{Column, IndexSchema, Schema};
use crate::sql_table::ProjectionMap;

pub const INDEX_TABLE_OID: TableOid = TableOid(31);
pub const INDEX_OID_INDEX_OID: IndexOid = IndexOid(32);
/// Non-unique on `indrelid`.
pub const INDEX_TABLE_INDEX_OID: IndexOid = IndexOid(33);

pub const INDOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const INDRELID_COL_OID: ColOid = ColOid(2); // INTEGER (fkey: pg_class)
pub const INDISUNIQUE_COL_OID: ColOid = ColOid(3); // BOOLEAN
pub const INDISPRIMARY_COL_OID: ColOid = ColOid(4); // BOOLEAN
pub const INDISEXCLUSION_COL_OID: ColOid = ColOid(5); // BOOLEAN
pub const INDIMMEDIATE_COL_OID: ColOid = ColOid(6); // BOOLEAN
pub const INDISVALID_COL_OID: ColOid = ColOid(7); // BOOLEAN
pub const INDISREADY_COL_OID: ColOid = ColOid(8); // BOOLEAN
pub const INDISLIVE_COL_OID: ColOid = ColOid(9); // BOOLEAN

pub const ALL_COL_OIDS: [ColOid; 9] = [
    INDOID_COL_OID,
    INDRELID_COL_OID,
    INDISUNIQUE_COL_OID,
    INDISPRIMARY_COL_OID,
    INDISEXCLUSION_COL_OID,
    INDIMMEDIATE_COL_OID,
    INDISVALID_COL_OID,
    INDISREADY_COL_OID,
    INDISLIVE_COL_OID,
];

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("indoid", TypeId::Integer, false, INDOID_COL_OID.0),
        Column::with_oid("indrelid", TypeId::Integer, false, INDRELID_COL_OID.0),
        Column::with_oid("indisunique", TypeId::Boolean, false, INDISUNIQUE_COL_OID.0),
        Column::with_oid("indisprimary", TypeId::Boolean, false, INDISPRIMARY_COL_OID.0),
        Column::with_oid("indisexclusion", TypeId::Boolean, false, INDISEXCLUSION_COL_OID.0),
        Column::with_oid("indimmediate", TypeId::Boolean, false, INDIMMEDIATE_COL_OID.0),
        Column::with_oid("indisvalid", TypeId::Boolean, false, INDISVALID_COL_OID.0),
        Column::with_oid("indisready", TypeId::Boolean, false, INDISREADY_COL_OID.0),
        Column::with_oid("indislive", TypeId::Boolean, false, INDISLIVE_COL_OID.0),
    ])
}

/// One `pg_index` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgIndexRow {
    pub indoid: IndexOid,
    pub indrelid: TableOid,
    pub is_unique: bool,
    pub is_primary: bool,
    pub is_exclusion: bool,
    pub is_immediate: bool,
    pub is_valid: bool,
    pub is_ready: bool,
    pub is_live: bool,
}

impl PgIndexRow {
    /// The flag columns of `schema`, as stored for index `indoid` over
    /// table `indrelid`.
    pub fn from_schema(indoid: IndexOid, indrelid: TableOid, schema: &IndexSchema) -> Self {
        PgIndexRow {
            indoid,
            indrelid,
            is_unique: schema.is_unique(),
            is_primary: schema.is_primary(),
            is_exclusion: schema.is_exclusion(),
            is_immediate: schema.is_immediate(),
            is_valid: schema.is_valid(),
            is_ready: schema.is_ready(),
            is_live: schema.is_live(),
        }
    }

    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(INDOID_COL_OID), self.indoid.0);
        row.set::<u32>(map.idx(INDRELID_COL_OID), self.indrelid.0);
        row.set::<u8>(map.idx(INDISUNIQUE_COL_OID), self.is_unique as u8);
        row.set::<u8>(map.idx(INDISPRIMARY_COL_OID), self.is_primary as u8);
        row.set::<u8>(map.idx(INDISEXCLUSION_COL_OID), self.is_exclusion as u8);
        row.set::<u8>(map.idx(INDIMMEDIATE_COL_OID), self.is_immediate as u8);
        row.set::<u8>(map.idx(INDISVALID_COL_OID), self.is_valid as u8);
        row.set::<u8>(map.idx(INDISREADY_COL_OID), self.is_ready as u8);
        row.set::<u8>(map.idx(INDISLIVE_COL_OID), self.is_live as u8);
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        let flag = |oid: ColOid| row.get::<u8>(map.idx(oid)) != 0;
        PgIndexRow {
            indoid: IndexOid(row.get::<u32>(map.idx(INDOID_COL_OID))),
            indrelid: TableOid(row.get::<u32>(map.idx(INDRELID_COL_OID))),
            is_unique: flag(INDISUNIQUE_COL_OID),
            is_primary: flag(INDISPRIMARY_COL_OID),
            is_exclusion: flag(INDISEXCLUSION_COL_OID),
            is_immediate: flag(INDIMMEDIATE_COL_OID),
            is_valid: flag(INDISVALID_COL_OID),
            is_ready: flag(INDISREADY_COL_OID),
            is_live: flag(INDISLIVE_COL_OID),
        }
    }
}
