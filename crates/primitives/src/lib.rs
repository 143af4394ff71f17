//! Identifier newtypes shared by the storage and catalog layers.
//!
//! Catalog objects are named by *OIDs*: stable numeric identifiers handed
//! out by the catalog and never reused. Physical storage speaks a second,
//! unrelated identifier space: the *col-id* a block layout assigns to each
//! attribute after reordering for alignment. Keeping the two in separate
//! newtypes means a mixup is a type error rather than a data corruption.

mod timestamp;
mod type_id;

pub use timestamp::Timestamp;
pub use type_id::TypeId;

use std::fmt;

/// Defines a `u32` oid newtype with the conversions every oid supports.
macro_rules! oid_newtype {
    ($(#[$attr:meta])* $name:ident, $invalid:ident) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
        pub struct $name(pub u32);

        /// The reserved "no such object" value.
        pub const $invalid: $name = $name(0);

        impl $name {
            /// Returns whether this oid is the invalid sentinel.
            #[inline]
            pub fn is_valid(self) -> bool {
                self.0 != 0
            }
        }

        impl From<u32> for $name {
            fn from(value: u32) -> Self {
                Self(value)
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl nohash_hasher::IsEnabled for $name {}
    };
}

oid_newtype!(
    /// The identifier of a database in the cluster-level registry.
    DatabaseOid,
    INVALID_DATABASE_OID
);
oid_newtype!(
    /// The identifier of a namespace (`pg_namespace` entry).
    NamespaceOid,
    INVALID_NAMESPACE_OID
);
oid_newtype!(
    /// The identifier of a table (`pg_class` entry of kind `REGULAR_TABLE`).
    TableOid,
    INVALID_TABLE_OID
);
oid_newtype!(
    /// The identifier of an index (`pg_class` entry of kind `INDEX`).
    IndexOid,
    INVALID_INDEX_OID
);
oid_newtype!(
    /// The identifier of a type (`pg_type` entry).
    TypeOid,
    INVALID_TYPE_OID
);
oid_newtype!(
    /// The identifier of a constraint (`pg_constraint` entry).
    ConstraintOid,
    INVALID_CONSTRAINT_OID
);
oid_newtype!(
    /// The *logical* identifier of a column, assigned by the catalog.
    ///
    /// Column oids are scoped to their table and handed out from 1 upward;
    /// they are stable across block-layout reordering.
    ColOid,
    INVALID_COL_OID
);

/// The *physical* identifier of a column within a block layout.
///
/// Assigned by [the layout] when attributes are reordered for alignment;
/// may differ from the column's [`ColOid`]. Only the SQL-table wrapper
/// translates between the two.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ColId(pub u16);

impl ColId {
    /// This col-id as a `usize` index.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for ColId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<ColId> for u16 {
    fn from(value: ColId) -> Self {
        value.0
    }
}

impl fmt::Display for ColId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl nohash_hasher::IsEnabled for ColId {}

/// A `HashMap` keyed by an id newtype, hashed with the identity function.
pub type IdMap<K, V> = std::collections::HashMap<K, V, nohash_hasher::BuildNoHashHasher<K>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_oids_are_zero_and_invalid() {
        assert_eq!(INVALID_TABLE_OID, TableOid(0));
        assert!(!INVALID_TABLE_OID.is_valid());
        assert!(TableOid(1001).is_valid());
        assert_eq!(u32::from(TableOid::from(42)), 42);
    }

    #[test]
    fn col_id_roundtrip() {
        let c = ColId::from(7u16);
        assert_eq!(c.idx(), 7);
        assert_eq!(c.to_string(), "7");
    }
}
