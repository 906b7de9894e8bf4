//! Kind cache
//!
//! Maps task types to [`KindId`]s, and ids back to their descriptors, under a
//! single lock. Id lookups only take the read side.

use std::any::{type_name, TypeId};
use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::debug;

use super::{KindId, MetadataError, TaskKind};
use crate::task::Task;

/// Initial descriptor capacity of a new cache
pub const DEFAULT_KIND_CAPACITY: usize = 16;

struct CacheInner {
    by_type: HashMap<TypeId, KindId>,
    by_id: Vec<TaskKind>,
}

impl CacheInner {
    fn lookup(&self, type_id: TypeId) -> Option<TaskKind> {
        self.by_type
            .get(&type_id)
            .map(|id| self.by_id[id.index()])
    }
}

/// Lazily populated descriptor cache
pub struct KindCache {
    inner: RwLock<CacheInner>,
}

impl Default for KindCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KindCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_KIND_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(CacheInner {
                by_type: HashMap::with_capacity(capacity),
                by_id: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Descriptor for task type `T`, creating it on first use.
    ///
    /// Types that fail classification are reported every time and never cached.
    pub fn resolve<T: Task>(&self) -> Result<TaskKind, MetadataError> {
        let type_id = TypeId::of::<T>();
        if let Some(kind) = self.inner.read().lookup(type_id) {
            return Ok(kind);
        }

        let mut inner = self.inner.write();
        // Another thread may have registered it between the two locks
        if let Some(kind) = inner.lookup(type_id) {
            return Ok(kind);
        }

        let id = KindId(inner.by_id.len() as u32);
        let kind = TaskKind::of::<T>(id)?;

        if inner.by_id.len() == inner.by_id.capacity() {
            let capacity = (inner.by_id.capacity() * 2).max(1);
            let additional = capacity - inner.by_id.len();
            inner.by_id.reserve_exact(additional);
            debug!("Grew kind cache to {} descriptors", capacity);
        }
        inner.by_id.push(kind);
        inner.by_type.insert(type_id, id);

        debug!(
            "Registered task kind {} for `{}` ({} bytes, {} references)",
            id,
            type_name::<T>(),
            kind.size(),
            kind.references()
        );
        Ok(kind)
    }

    /// Descriptor for an id handed out by this cache
    pub fn get(&self, id: KindId) -> Result<TaskKind, MetadataError> {
        self.inner
            .read()
            .by_id
            .get(id.index())
            .copied()
            .ok_or(MetadataError::UnknownKind(id))
    }

    /// Number of registered kinds
    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Descriptor slots reserved before the next growth
    pub fn capacity(&self) -> usize {
        self.inner.read().by_id.capacity()
    }
}
