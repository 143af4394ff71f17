//! Table and index schemas as the catalog stores them.

use quarry_primitives::{ColOid, TypeId, INVALID_COL_OID};
use serde::{Deserialize, Serialize};

/// A column's default value. Stored twice in `pg_attribute`: as a typed
/// object behind an `adbin` handle and serialized to JSON in `adsrc`.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum DefaultValue {
    Boolean(bool),
    Integer(i64),
    Decimal(f64),
    Varchar(String),
    Varbinary(Vec<u8>),
}

impl DefaultValue {
    /// Serializes this default to the JSON form kept in `adsrc`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("default values always serialize")
    }

    /// Parses the `adsrc` JSON form back into a default.
    pub fn from_json(src: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(src)
    }
}

/// One column of a table schema.
#[derive(Clone, Debug)]
pub struct Column {
    name: String,
    type_id: TypeId,
    nullable: bool,
    oid: ColOid,
    default: Option<DefaultValue>,
}

impl Column {
    /// A column without an oid; the catalog assigns oids when the table
    /// is created.
    pub fn new(name: impl Into<String>, type_id: TypeId, nullable: bool) -> Self {
        Column {
            name: name.into(),
            type_id,
            nullable,
            oid: INVALID_COL_OID,
            default: None,
        }
    }

    /// A column with a preassigned oid; reserved for the catalog's own
    /// bootstrap schemas.
    pub(crate) fn with_oid(name: &str, type_id: TypeId, nullable: bool, oid: u32) -> Self {
        Column {
            name: name.into(),
            type_id,
            nullable,
            oid: ColOid(oid),
            default: None,
        }
    }

    pub fn with_default(mut self, default: DefaultValue) -> Self {
        self.default = Some(default);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn nullable(&self) -> bool {
        self.nullable
    }

    pub fn oid(&self) -> ColOid {
        self.oid
    }

    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub(crate) fn set_oid(&mut self, oid: ColOid) {
        self.oid = oid;
    }
}

/// The columns of a table, in declaration order.
#[derive(Clone, Debug)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        debug_assert!(!columns.is_empty());
        Schema { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, i: usize) -> &Column {
        &self.columns[i]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_by_oid(&self, oid: ColOid) -> Option<&Column> {
        self.columns.iter().find(|c| c.oid == oid)
    }

    /// Assigns column oids monotonically from 1, in declaration order.
    /// The largest assigned oid is the table's `rel_nextcoloid` seed.
    pub(crate) fn assign_col_oids(&mut self) -> u32 {
        let mut next = 1u32;
        for column in &mut self.columns {
            column.set_oid(ColOid(next));
            next += 1;
        }
        next
    }
}

/// How an index stores its entries.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IndexBacking {
    /// B-tree; supports ordered scans.
    Ordered,
    /// Hash; equality lookups only.
    Hash,
}

/// One key column of an index: the table column it indexes and its type.
#[derive(Clone, Debug)]
pub struct IndexColumn {
    name: String,
    type_id: TypeId,
    col_oid: ColOid,
}

impl IndexColumn {
    pub fn new(name: impl Into<String>, type_id: TypeId, col_oid: ColOid) -> Self {
        IndexColumn {
            name: name.into(),
            type_id,
            col_oid,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The oid of the table column this key column indexes.
    pub fn col_oid(&self) -> ColOid {
        self.col_oid
    }
}

/// The schema of an index: its key columns, in key order, plus the
/// `pg_index` flag set.
#[derive(Clone, Debug)]
pub struct IndexSchema {
    columns: Vec<IndexColumn>,
    backing: IndexBacking,
    is_unique: bool,
    is_primary: bool,
    is_exclusion: bool,
    is_immediate: bool,
    is_valid: bool,
    is_ready: bool,
    is_live: bool,
}

impl IndexSchema {
    pub fn new(columns: Vec<IndexColumn>, backing: IndexBacking, is_unique: bool, is_primary: bool) -> Self {
        debug_assert!(!columns.is_empty());
        IndexSchema {
            columns,
            backing,
            is_unique,
            is_primary,
            is_exclusion: false,
            is_immediate: is_unique,
            is_valid: true,
            is_ready: true,
            is_live: true,
        }
    }

    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    pub fn backing(&self) -> IndexBacking {
        self.backing
    }

    pub fn is_unique(&self) -> bool {
        self.is_unique
    }

    pub fn is_primary(&self) -> bool {
        self.is_primary
    }

    pub fn is_exclusion(&self) -> bool {
        self.is_exclusion
    }

    pub fn is_immediate(&self) -> bool {
        self.is_immediate
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values_roundtrip_through_json() {
        let cases = vec![
            DefaultValue::Boolean(true),
            DefaultValue::Integer(-42),
            DefaultValue::Decimal(2.5),
            DefaultValue::Varchar("n/a".into()),
            DefaultValue::Varbinary(vec![0, 1, 2]),
        ];
        for case in cases {
            let json = case.to_json();
            assert_eq!(DefaultValue::from_json(&json).unwrap(), case);
        }
    }

    #[test]
    fn col_oids_are_assigned_from_one() {
        let mut schema = Schema::new(vec![
            Column::new("id", TypeId::Integer, false),
            Column::new("v", TypeId::Varchar, true),
        ]);
        let next = schema.assign_col_oids();
        assert_eq!(schema.column(0).oid(), ColOid(1));
        assert_eq!(schema.column(1).oid(), ColOid(2));
        assert_eq!(next, 3);
    }
}
