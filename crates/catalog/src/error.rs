use quarry_primitives::TableOid;
use quarry_storage::{IndexError, StorageError};
use thiserror::Error;

/// Errors surfaced by catalog operations.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Index(#[from] IndexError),
    /// A name or oid already exists in the relevant catalog index.
    #[error("a catalog entry named `{name}` already exists")]
    OidConflict { name: String },
    /// The oid is absent, refers to the wrong kind of object, or the
    /// referenced pointer has not been published yet.
    #[error("oid {oid} is absent or does not name the expected kind of object")]
    InvalidReference { oid: u32 },
    /// An older transaction attempted DDL after a newer DDL commit; the
    /// transaction must abort.
    #[error("ddl lock rejected: a newer schema change has already committed")]
    DdlLockRejection,
    /// `delete_table` found constraints still referencing the table.
    #[error("table {table} still has constraints and cannot be dropped")]
    ConstraintsRemain { table: TableOid },
    /// The namespace still contains classes, or is one of the reserved
    /// namespaces.
    #[error("namespace cannot be dropped: {reason}")]
    NamespaceInUse { reason: &'static str },
    /// A failed invariant during catalog bootstrap. Fatal: it means the
    /// catalog code itself is wrong.
    #[error("catalog bootstrap failed: {0}")]
    Bootstrap(String),
}

pub type Result<T, E = CatalogError> = std::result::Result<T, E>;
