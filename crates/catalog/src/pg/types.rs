//! `pg_type`: the type tags the catalog knows about. Populated with the
//! built-in tags at bootstrap.

use quarry_primitives::{ColOid, IndexOid, NamespaceOid, TableOid, TypeId, TypeOid};
use quarry_storage::ProjectedRow;

use crate::schema::{Column, Schema};
use crate::sql_table::ProjectionMap;

pub const TYPE_TABLE_OID: TableOid = TableOid(51);
pub const TYPE_OID_INDEX_OID: IndexOid = IndexOid(52);
pub const TYPE_NAME_INDEX_OID: IndexOid = IndexOid(53);
/// Non-unique on `typnamespace`.
pub const TYPE_NAMESPACE_INDEX_OID: IndexOid = IndexOid(54);

pub const TYPOID_COL_OID: ColOid = ColOid(1); // INTEGER (pkey)
pub const TYPNAME_COL_OID: ColOid = ColOid(2); // VARCHAR
pub const TYPNAMESPACE_COL_OID: ColOid = ColOid(3); // INTEGER (fkey: pg_namespace)
pub const TYPLEN_COL_OID: ColOid = ColOid(4); // SMALLINT
pub const TYPBYVAL_COL_OID: ColOid = ColOid(5); // BOOLEAN
pub const TYPTYPE_COL_OID: ColOid = ColOid(6); // CHAR

pub const ALL_COL_OIDS: [ColOid; 6] = [
    TYPOID_COL_OID,
    TYPNAME_COL_OID,
    TYPNAMESPACE_COL_OID,
    TYPLEN_COL_OID,
    TYPBYVAL_COL_OID,
    TYPTYPE_COL_OID,
];

/// The `typtype` discriminator, as PostgreSQL spells it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum TypeKind {
    Base = b'b',
    Composite = b'c',
    Enum = b'e',
    Pseudo = b'p',
}

impl TypeKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'b' => Some(TypeKind::Base),
            b'c' => Some(TypeKind::Composite),
            b'e' => Some(TypeKind::Enum),
            b'p' => Some(TypeKind::Pseudo),
            _ => None,
        }
    }
}

pub(crate) fn table_schema() -> Schema {
    Schema::new(vec![
        Column::with_oid("typoid", TypeId::Integer, false, TYPOID_COL_OID.0),
        Column::with_oid("typname", TypeId::Varchar, false, TYPNAME_COL_OID.0),
        Column::with_oid("typnamespace", TypeId::Integer, false, TYPNAMESPACE_COL_OID.0),
        Column::with_oid("typlen", TypeId::SmallInt, false, TYPLEN_COL_OID.0),
        Column::with_oid("typbyval", TypeId::Boolean, false, TYPBYVAL_COL_OID.0),
        Column::with_oid("typtype", TypeId::TinyInt, false, TYPTYPE_COL_OID.0),
    ])
}

/// One `pg_type` row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PgTypeRow {
    pub oid: TypeOid,
    pub name: String,
    pub namespace: NamespaceOid,
    pub len: u16,
    pub by_val: bool,
    pub kind: TypeKind,
}

impl PgTypeRow {
    /// The bootstrap row for a built-in tag.
    pub fn builtin(tag: TypeId, namespace: NamespaceOid) -> Self {
        PgTypeRow {
            oid: tag.oid(),
            name: tag.name().to_string(),
            namespace,
            len: tag.size(),
            by_val: tag.is_by_val(),
            kind: if tag == TypeId::Invalid { TypeKind::Pseudo } else { TypeKind::Base },
        }
    }

    pub fn write_into(&self, row: &mut ProjectedRow, map: &ProjectionMap) {
        row.set::<u32>(map.idx(TYPOID_COL_OID), self.oid.0);
        row.set_varlen(map.idx(TYPNAME_COL_OID), self.name.as_bytes());
        row.set::<u32>(map.idx(TYPNAMESPACE_COL_OID), self.namespace.0);
        row.set::<u16>(map.idx(TYPLEN_COL_OID), self.len);
        row.set::<u8>(map.idx(TYPBYVAL_COL_OID), self.by_val as u8);
        row.set::<u8>(map.idx(TYPTYPE_COL_OID), self.kind as u8);
    }

    pub fn read_from(row: &ProjectedRow, map: &ProjectionMap) -> Self {
        PgTypeRow {
            oid: TypeOid(row.get::<u32>(map.idx(TYPOID_COL_OID))),
            name: String::from_utf8_lossy(row.varlen(map.idx(TYPNAME_COL_OID)).unwrap_or_default()).into_owned(),
            namespace: NamespaceOid(row.get::<u32>(map.idx(TYPNAMESPACE_COL_OID))),
            len: row.get::<u16>(map.idx(TYPLEN_COL_OID)),
            by_val: row.get::<u8>(map.idx(TYPBYVAL_COL_OID)) != 0,
            kind: TypeKind::from_u8(row.get::<u8>(map.idx(TYPTYPE_COL_OID))).expect("valid typtype"),
        }
    }
}
