//! `pg_constraint`: constraint metadata, PostgreSQL-shaped.
//!
//! Only the schema and indexes are defined at this layer; no DDL creates
//! constraint rows yet, but `delete_table` checks the table index here
//! and refuses to drop a table that still has constraints.

use quarry_primitives::{ColOid, ConstraintOid, IndexOid, NamespaceOid, TableOid, TypeId};
use quarry_storage::ProjectedRow;

use crate::heap::ObjectHandle;
use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const CONSTRAINT_TABLE_OID: TableOid = TableOid(61);
pub const CONSTRAINT_OID_INDEX_OID: IndexOid = IndexOid(62);
pub const CONSTRAINT_NAME_INDEX_OID: IndexOid = IndexOid(63);
/// Non-unique on `connamespace`.
pub const CONSTRAINT_NAMESPACE_INDEX_OID: IndexOid = IndexOid(64);
/// Non-unique on `conrelid`.
pub const CONSTRAINT_TABLE_INDEX_OID: IndexOid = IndexOid(65);
/// Non-unique on `conindid`.
pub const CONSTRAINT_INDEX_INDEX_OID: IndexOid = IndexOid(66);
/// Non-unique on `confrelid`.
pub const CONSTRAINT_FOREIGNTABLE_INDEX_OID: IndexOid = IndexOid(67);

pub const CONOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const CONNAME_COL_OID: ColOid = ColOid(2); // VARCHAR
pub const CONNAMESPACE_COL_OID: ColOid = ColOid(3); // INTEGER (fkey: pg_namespace)
pub const CONTYPE_COL_OID: ColOid = ColOid(4); // CHAR
pub const CONDEFERRABLE_COL_OID: ColOid = ColOid(5); // BOOLEAN
pub const CONDEFERRED_COL_OID: ColOid = ColOid(6); // BOOLEAN
pub const CONVALIDATED_COL_OID: ColOid = ColOid(7); // BOOLEAN
pub const CONRELID_COL_OID: ColOid = ColOid(8); // INTEGER (fkey: pg_class)
pub const CONINDID_COL_OID: ColOid = ColOid(9); // INTEGER (fkey: pg_class)
pub const CONFRELID_COL_OID: ColOid = ColOid(10); // INTEGER (fkey: pg_class)
pub const CONBIN_COL_OID: ColOid = ColOid(11); // BIGINT (object heap handle)
pub const CONSRC_COL_OID: ColOid = ColOid(12); // VARCHAR

pub const ALL_COL_OIDS: [ColOid; 12] = [
    CONOID_COL_OID,
    CONNAME_COL_OID,
    CONNAMESPACE_COL_OID,
    CONTYPE_COL_OID,
    CONDEFERRABLE_COL_OID,
    CONDEFERRED_COL_OID,
    CONVALIDATED_COL_OID,
    CONRELID_COL_OID,
    CONINDID_COL_OID,
    CONFRELID_COL_OID,
    CONBIN_COL_OID,
    CONSRC_COL_OID,
];

/// The `contype` discriminator, as PostgreSQL spells it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ConstraintKind {
    Check = b'c',
    ForeignKey = b'f',
    PrimaryKey = b'p',
    Unique = b'u',
    Trigger = b't',
    Exclusion = b'x',
}

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("conoid", TypeId::Integer, false, CONOID_COL_OID.0),
        Column::with_oid("conname", TypeId::Varchar, false, CONNAME_COL_OID.0),
        Column::with_oid("connamespace", TypeId::Integer, false, CONNAMESPACE_COL_OID.0),
        Column::with_oid("contype", TypeId::TinyInt, false, CONTYPE_COL_OID.0),
        Column::with_oid("condeferrable", TypeId::Boolean, false, CONDEFERRABLE_COL_OID.0),
        Column::with_oid("condeferred", TypeId::Boolean, false, CONDEFERRED_COL_OID.0),
        Column::with_oid("convalidated", TypeId::Boolean, false, CONVALIDATED_COL_OID.0),
        Column::with_oid("conrelid", TypeId::Integer, false, CONRELID_COL_OID.0),
        Column::with_oid("conindid", TypeId::Integer, true, CONINDID_COL_OID.0),
        Column::with_oid("confrelid", TypeId::Integer, true, CONFRELID_COL_OID.0),
        Column::with_oid("conbin", TypeId::BigInt, true, CONBIN_COL_OID.0),
        Column::with_oid("consrc", TypeId::Varchar, true, CONSRC_COL_OID.0),
    ])
}

/// One `pg_constraint` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgConstraintRow {
    pub oid: ConstraintOid,
    pub name: String,
    pub namespace: NamespaceOid,
    pub kind: ConstraintKind,
    pub deferrable: bool,
    pub deferred: bool,
    pub validated: bool,
    pub relid: TableOid,
    pub indid: IndexOid,
    pub frelid: TableOid,
    pub bin: ObjectHandle,
    pub src: Option<String>,
}

impl PgConstraintRow {
    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(CONOID_COL_OID), self.oid.0);
        row.set_varlen(map.idx(CONNAME_COL_OID), self.name.as_bytes());
        row.set::<u32>(map.idx(CONNAMESPACE_COL_OID), self.namespace.0);
        row.set::<u8>(map.idx(CONTYPE_COL_OID), self.kind as u8);
        row.set::<u8>(map.idx(CONDEFERRABLE_COL_OID), self.deferrable as u8);
        row.set::<u8>(map.idx(CONDEFERRED_COL_OID), self.deferred as u8);
        row.set::<u8>(map.idx(CONVALIDATED_COL_OID), self.validated as u8);
        row.set::<u32>(map.idx(CONRELID_COL_OID), self.relid.0);
        row.set::<u32>(map.idx(CONINDID_COL_OID), self.indid.0);
        row.set::<u32>(map.idx(CONFRELID_COL_OID), self.frelid.0);
        row.set::<u64>(map.idx(CONBIN_COL_OID), self.bin.0);
        match &self.src {
            Some(src) => row.set_varlen(map.idx(CONSRC_COL_OID), src.as_bytes()),
            None => row.set_null(map.idx(CONSRC_COL_OID)),
        }
    }
}
