//! Type-to-catalog-record-id cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use ember_common::error::{EmberError, EmberResult};
use ember_common::sync::InitGuard;
use ember_common::types::{ObjectId, ObjectType};

use crate::catalog::CatalogScan;

/// Statistics for type cache operations.
#[derive(Debug, Default)]
pub struct TypeCacheStats {
    /// Total lookups.
    accesses: AtomicU64,
    /// Lookups that found the type.
    hits: AtomicU64,
    /// Lookups that did not.
    misses: AtomicU64,
    /// Full catalog scans performed.
    builds: AtomicU64,
    /// Invalidations.
    clears: AtomicU64,
}

impl TypeCacheStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup.
    #[inline]
    pub fn record_access(&self, hit: bool) {
        self.accesses.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a catalog scan.
    #[inline]
    pub fn record_build(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an invalidation.
    #[inline]
    pub fn record_clear(&self) {
        self.clears.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns total lookups.
    pub fn accesses(&self) -> u64 {
        self.accesses.load(Ordering::Relaxed)
    }

    /// Returns hits.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns misses.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Returns catalog scans performed.
    pub fn builds(&self) -> u64 {
        self.builds.load(Ordering::Relaxed)
    }

    /// Returns invalidations.
    pub fn clears(&self) -> u64 {
        self.clears.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let accesses = self.accesses();
        if accesses == 0 {
            0.0
        } else {
            self.hits() as f64 / accesses as f64
        }
    }
}

/// Cache mapping a runtime type to its catalog record id.
///
/// The map is built lazily from a full catalog scan, exactly once per cache
/// generation even under concurrent first access: readers hold the gate
/// shared while the one-time guard runs the scan and while they look up.
/// [`clear`](Self::clear) takes the gate exclusively and resets the guard so
/// the next reader rebuilds.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use ember_catalog::{Catalog, TypeIdCache};
/// use ember_common::types::ObjectType;
///
/// let catalog = Arc::new(Catalog::new());
/// let id = catalog.create_table("users", ObjectType::new(1), &["name"]).unwrap();
///
/// let cache = TypeIdCache::new(catalog);
/// assert_eq!(cache.get_record_id(ObjectType::new(1)).unwrap(), id);
/// assert!(cache.get_record_id(ObjectType::new(2)).unwrap_err().is_fatal());
/// ```
pub struct TypeIdCache {
    source: Arc<dyn CatalogScan>,
    gate: RwLock<()>,
    init: InitGuard,
    map: RwLock<HashMap<ObjectType, ObjectId>>,
    built_generation: AtomicU64,
    stats: TypeCacheStats,
}

impl TypeIdCache {
    /// Creates an empty cache over `source`.
    pub fn new(source: Arc<dyn CatalogScan>) -> Self {
        Self {
            source,
            gate: RwLock::new(()),
            init: InitGuard::new(),
            map: RwLock::new(HashMap::new()),
            built_generation: AtomicU64::new(0),
            stats: TypeCacheStats::new(),
        }
    }

    fn build(&self) -> EmberResult<()> {
        let pairs = self.source.scan_types()?;
        let generation = self.source.generation();
        let mut map = self.map.write();
        map.clear();
        map.extend(pairs);
        self.built_generation.store(generation, Ordering::Release);
        self.stats.record_build();
        debug!(types = map.len(), generation, "type cache built");
        Ok(())
    }

    fn lookup(&self, object_type: ObjectType) -> EmberResult<Option<ObjectId>> {
        let _gate = self.gate.read();
        self.init.call_once(|| self.build())?;
        let found = self.map.read().get(&object_type).copied();
        self.stats.record_access(found.is_some());
        Ok(found)
    }

    /// Returns the catalog record id for `object_type`.
    ///
    /// A type reaching this call is expected to be catalog-validated, so a
    /// miss is a fatal invariant violation.
    pub fn get_record_id(&self, object_type: ObjectType) -> EmberResult<ObjectId> {
        match self.lookup(object_type)? {
            Some(id) => Ok(id),
            None => {
                let err = EmberError::invariant_violation(
                    format!("type {object_type} has no catalog entry"),
                    "type_map.contains_key(object_type)",
                    file!(),
                    line!(),
                    module_path!(),
                );
                tracing::error!(%err, "fatal invariant violation");
                Err(err)
            }
        }
    }

    /// Returns the catalog record id for `object_type`, or a recoverable
    /// `TypeNotFound` error.
    pub fn find_record_id(&self, object_type: ObjectType) -> EmberResult<ObjectId> {
        self.lookup(object_type)?
            .ok_or(EmberError::TypeNotFound { object_type })
    }

    /// Invalidates the whole map; the next lookup rebuilds it.
    ///
    /// Blocks until in-flight lookups finish.
    pub fn clear(&self) {
        let _gate = self.gate.write();
        self.map.write().clear();
        self.init.reset();
        self.stats.record_clear();
        debug!("type cache cleared");
    }

    /// Returns true if the map is built.
    pub fn is_built(&self) -> bool {
        self.init.is_ready()
    }

    /// Returns true if the catalog changed since the map was built.
    pub fn is_stale(&self) -> bool {
        self.is_built()
            && self.built_generation.load(Ordering::Acquire) != self.source.generation()
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> &TypeCacheStats {
        &self.stats
    }
}

impl std::fmt::Debug for TypeIdCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeIdCache")
            .field("built", &self.is_built())
            .field("types", &self.map.read().len())
            .field("builds", &self.stats.builds())
            .finish()
    }
}
