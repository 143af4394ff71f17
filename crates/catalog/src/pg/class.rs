//! `pg_class`: every table and index in the database, itself included.

use quarry_primitives::{ColOid, IndexOid, NamespaceOid, TableOid, TypeId};
use quarry_storage::ProjectedRow;

use crate::heap::ObjectHandle;
use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const CLASS_TABLE_OID: TableOid = TableOid(21);
pub const CLASS_OID_INDEX_OID: IndexOid = IndexOid(22);
pub const CLASS_NAME_INDEX_OID: IndexOid = IndexOid(23);
pub const CLASS_NAMESPACE_INDEX_OID: IndexOid = IndexOid(24);

pub const RELOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const RELNAME_COL_OID: ColOid = ColOid(2); // VARCHAR
pub const RELNAMESPACE_COL_OID: ColOid = ColOid(3); // INTEGER (fkey: pg_namespace)
pub const RELKIND_COL_OID: ColOid = ColOid(4); // CHAR
pub const REL_SCHEMA_COL_OID: ColOid = ColOid(5); // BIGINT (object heap handle)
pub const REL_PTR_COL_OID: ColOid = ColOid(6); // BIGINT (object heap handle)
pub const REL_NEXTCOLOID_COL_OID: ColOid = ColOid(7); // INTEGER

pub const ALL_COL_OIDS: [ColOid; 7] = [
    RELOID_COL_OID,
    RELNAME_COL_OID,
    RELNAMESPACE_COL_OID,
    RELKIND_COL_OID,
    REL_SCHEMA_COL_OID,
    REL_PTR_COL_OID,
    REL_NEXTCOLOID_COL_OID,
];

/// What a `pg_class` entry describes.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ClassKind {
    RegularTable = b'r',
    Index = b'i',
}

impl ClassKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'r' => Some(ClassKind::RegularTable),
            b'i' => Some(ClassKind::Index),
            _ => None,
        }
    }
}

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("reloid", TypeId::Integer, false, RELOID_COL_OID.0),
        Column::with_oid("relname", TypeId::Varchar, false, RELNAME_COL_OID.0),
        Column::with_oid("relnamespace", TypeId::Integer, false, RELNAMESPACE_COL_OID.0),
        Column::with_oid("relkind", TypeId::TinyInt, false, RELKIND_COL_OID.0),
        Column::with_oid("rel_schema", TypeId::BigInt, true, REL_SCHEMA_COL_OID.0),
        Column::with_oid("rel_ptr", TypeId::BigInt, true, REL_PTR_COL_OID.0),
        Column::with_oid("rel_nextcoloid", TypeId::Integer, true, REL_NEXTCOLOID_COL_OID.0),
    ])
}

/// One `pg_class` row. The oid column holds either a table or an index
/// oid depending on `kind`; it is kept raw here and wrapped by the
/// accessors.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgClassRow {
    pub oid: u32,
    pub name: String,
    pub namespace: NamespaceOid,
    pub kind: ClassKind,
    pub schema: ObjectHandle,
    pub ptr: ObjectHandle,
    pub next_col_oid: u32,
}

impl PgClassRow {
    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(RELOID_COL_OID), self.oid);
        row.set_varlen(map.idx(RELNAME_COL_OID), self.name.as_bytes());
        row.set::<u32>(map.idx(RELNAMESPACE_COL_OID), self.namespace.0);
        row.set::<u8>(map.idx(RELKIND_COL_OID), self.kind as u8);
        row.set::<u64>(map.idx(REL_SCHEMA_COL_OID), self.schema.0);
        row.set::<u64>(map.idx(REL_PTR_COL_OID), self.ptr.0);
        row.set::<u32>(map.idx(REL_NEXTCOLOID_COL_OID), self.next_col_oid);
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        let kind = ClassKind::from_u8(row.get::<u8>(map.idx(RELKIND_COL_OID))).expect("valid relkind");
        PgClassRow {
            oid: row.get::<u32>(map.idx(RELOID_COL_OID)),
            name: String::from_utf8_lossy(row.varlen(map.idx(RELNAME_COL_OID)).unwrap_or_default()).into_owned(),
            namespace: NamespaceOid(row.get::<u32>(map.idx(RELNAMESPACE_COL_OID))),
            kind,
            schema: ObjectHandle(row.get::<u64>(map.idx(REL_SCHEMA_COL_OID))),
            ptr: ObjectHandle(row.get::<u64>(map.idx(REL_PTR_COL_OID))),
            next_col_oid: row.get::<u32>(map.idx(REL_NEXTCOLOID_COL_OID)),
        }
    }

    /// The entry's oid as a table oid; meaningful when `kind` says so.
    pub fn table_oid(&self) -> TableOid {
        TableOid(self.oid)
    }

    /// The entry's oid as an index oid; meaningful when `kind` says so.
    pub fn index_oid(&self) -> IndexOid {
        IndexOid(self.oid)
    }
}
