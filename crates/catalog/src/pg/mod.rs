//! PostgreSQL-style catalog table definitions: reserved oids, schemas
//! and row bridges.
//!
//! Every bootstrap object has a stable numeric oid so that recovery from
//! persisted state can rebuild the catalog without re-running bootstrap:
//!
//! | oid | object |
//! |-----|--------|
//! | 1   | `pg_database` |
//! | 2   | `pg_database_oid_index` |
//! | 3   | `pg_database_name_index` |
//! | 11  | `pg_namespace` |
//! | 12  | `pg_namespace_oid_index` |
//! | 13  | `pg_namespace_name_index` |
//! | 14  | namespace `pg_catalog` |
//! | 15  | namespace `public` |
//! | 21  | `pg_class` |
//! | 22  | `pg_class_oid_index` |
//! | 23  | `pg_class_name_index` |
//! | 24  | `pg_class_namespace_index` |
//! | 31  | `pg_index` |
//! | 32  | `pg_index_oid_index` |
//! | 33  | `pg_index_table_index` |
//! | 41  | `pg_attribute` |
//! | 42  | `pg_attribute_oid_index` |
//! | 43  | `pg_attribute_name_index` |
//! | 44  | `pg_attribute_class_index` |
//! | 51  | `pg_type` |
//! | 52  | `pg_type_oid_index` |
//! | 53  | `pg_type_name_index` |
//! | 54  | `pg_type_namespace_index` |
//! | 61  | `pg_constraint` |
//! | 62  | `pg_constraint_oid_index` |
//! | 63  | `pg_constraint_name_index` |
//! | 64  | `pg_constraint_namespace_index` |
//! | 65  | `pg_constraint_table_index` |
//! | 66  | `pg_constraint_index_index` |
//! | 67  | `pg_constraint_foreigntable_index` |
//!
//! Built-in type oids are the [`TypeId`](quarry_primitives::TypeId) tag
//! values, all far below [`START_OID`]. User objects draw oids from a
//! single per-database counter starting at `START_OID`; on recovery the
//! counter is restored by scanning for the maximum observed oid.

pub mod attribute;
pub mod class;
pub mod constraint;
pub mod database;
pub mod index;
pub mod namespace;
pub mod types;

/// The first oid handed out to user-created objects.
pub const START_OID: u32 = 1001;
