//! Built-in SQL type tags.

use crate::TypeOid;

/// The width of an attribute in a block layout. Variable-length types
/// report [`VARLEN_ENTRY_SIZE`] and store a varlen entry instead of the
/// value itself.
pub const VARLEN_ENTRY_SIZE: u16 = 16;

/// The built-in type tags the catalog ships with. `pg_type` is populated
/// with one row per tag at bootstrap.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum TypeId {
    Invalid = 0,
    Boolean = 1,
    TinyInt = 2,
    SmallInt = 3,
    Integer = 4,
    BigInt = 5,
    Decimal = 6,
    Timestamp = 7,
    Date = 8,
    Varchar = 9,
    Varbinary = 10,
}

impl TypeId {
    /// All tags, in oid order.
    pub const ALL: [TypeId; 11] = [
        TypeId::Invalid,
        TypeId::Boolean,
        TypeId::TinyInt,
        TypeId::SmallInt,
        TypeId::Integer,
        TypeId::BigInt,
        TypeId::Decimal,
        TypeId::Timestamp,
        TypeId::Date,
        TypeId::Varchar,
        TypeId::Varbinary,
    ];

    /// The storage width of a value of this type, in bytes. Varlens report
    /// the width of their fixed-size entry.
    pub fn size(self) -> u16 {
        match self {
            TypeId::Invalid | TypeId::Boolean | TypeId::TinyInt => 1,
            TypeId::SmallInt => 2,
            TypeId::Integer | TypeId::Date => 4,
            TypeId::BigInt | TypeId::Decimal | TypeId::Timestamp => 8,
            TypeId::Varchar | TypeId::Varbinary => VARLEN_ENTRY_SIZE,
        }
    }

    /// Whether values of this type are stored by value rather than by
    /// reference.
    pub fn is_by_val(self) -> bool {
        !self.is_varlen() && self != TypeId::Invalid
    }

    /// Whether values of this type are variable-length.
    pub fn is_varlen(self) -> bool {
        matches!(self, TypeId::Varchar | TypeId::Varbinary)
    }

    /// Whether this tag is one of the integral types an index compact-ints
    /// key can pack.
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            TypeId::TinyInt | TypeId::SmallInt | TypeId::Integer | TypeId::BigInt
        )
    }

    /// The name of this type as it appears in `pg_type`.
    pub fn name(self) -> &'static str {
        match self {
            TypeId::Invalid => "invalid",
            TypeId::Boolean => "boolean",
            TypeId::TinyInt => "tinyint",
            TypeId::SmallInt => "smallint",
            TypeId::Integer => "integer",
            TypeId::BigInt => "bigint",
            TypeId::Decimal => "decimal",
            TypeId::Timestamp => "timestamp",
            TypeId::Date => "date",
            TypeId::Varchar => "varchar",
            TypeId::Varbinary => "varbinary",
        }
    }

    /// The reserved `pg_type` oid of this tag. Built-in type oids are the
    /// tag values themselves, all well below the user oid range.
    pub fn oid(self) -> TypeOid {
        TypeOid(self as u32)
    }

    /// Recovers a tag from its `pg_type` oid.
    pub fn from_oid(oid: TypeOid) -> Option<TypeId> {
        Self::ALL.get(oid.0 as usize).copied()
    }
}
