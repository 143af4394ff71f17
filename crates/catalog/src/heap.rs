//! The object heap: strongly-typed handles standing in for the raw
//! object pointers the catalog's rows conceptually store.
//!
//! Catalog columns like `rel_ptr` and `rel_schema` hold a numeric handle
//! into this per-database heap. Publishing an object is a heap insert
//! plus a catalog-row update; destroying one is a deferred handle
//! removal, after which the last `Arc` holder frees the object.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use quarry_storage::index::Index;

use crate::schema::{DefaultValue, IndexSchema, Schema};
use crate::sql_table::SqlTable;

/// A heap slot number. Zero is never handed out and stands for "not set"
/// in catalog rows.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug)]
pub struct ObjectHandle(pub u64);

impl ObjectHandle {
    pub const INVALID: ObjectHandle = ObjectHandle(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl nohash_hasher::IsEnabled for ObjectHandle {}

/// The kinds of objects catalog rows can point at.
#[derive(Clone)]
pub enum CatalogObject {
    Table(Arc<SqlTable>),
    Index(Arc<Index>),
    TableSchema(Arc<Schema>),
    IndexSchema(Arc<IndexSchema>),
    Default(Arc<DefaultValue>),
}

type ObjectMap = std::collections::HashMap<u64, CatalogObject, nohash_hasher::BuildNoHashHasher<u64>>;

/// The per-database heap of published catalog objects.
pub struct ObjectHeap {
    next: AtomicU64,
    objects: RwLock<ObjectMap>,
}

impl ObjectHeap {
    pub fn new() -> Self {
        ObjectHeap {
            next: AtomicU64::new(1),
            objects: RwLock::new(ObjectMap::default()),
        }
    }

    /// Publishes `object` and returns its handle.
    pub fn insert(&self, object: CatalogObject) -> ObjectHandle {
        let handle = ObjectHandle(self.next.fetch_add(1, Ordering::Relaxed));
        self.objects.write().insert(handle.0, object);
        handle
    }

    /// The object behind `handle`, if still published.
    pub fn get(&self, handle: ObjectHandle) -> Option<CatalogObject> {
        self.objects.read().get(&handle.0).cloned()
    }

    /// Removes `handle`; the object is freed once its last holder drops.
    pub fn remove(&self, handle: ObjectHandle) -> Option<CatalogObject> {
        self.objects.write().remove(&handle.0)
    }

    /// The number of published objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn table(&self, handle: ObjectHandle) -> Option<Arc<SqlTable>> {
        match self.get(handle)? {
            CatalogObject::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn index(&self, handle: ObjectHandle) -> Option<Arc<Index>> {
        match self.get(handle)? {
            CatalogObject::Index(i) => Some(i),
            _ => None,
        }
    }

    pub fn table_schema(&self, handle: ObjectHandle) -> Option<Arc<Schema>> {
        match self.get(handle)? {
            CatalogObject::TableSchema(s) => Some(s),
            _ => None,
        }
    }

    pub fn index_schema(&self, handle: ObjectHandle) -> Option<Arc<IndexSchema>> {
        match self.get(handle)? {
            CatalogObject::IndexSchema(s) => Some(s),
            _ => None,
        }
    }

    pub fn default_value(&self, handle: ObjectHandle) -> Option<Arc<DefaultValue>> {
        match self.get(handle)? {
            CatalogObject::Default(d) => Some(d),
            _ => None,
        }
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}
