//! Memory manager statistics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Statistics for memory manager operations.
#[derive(Debug, Default)]
pub struct MemoryStats {
    /// Locators allocated.
    allocations: AtomicU64,
    /// Locators released.
    releases: AtomicU64,
    /// Storage moves of live locators.
    reallocations: AtomicU64,
    /// Failed allocation attempts.
    failures: AtomicU64,
    /// Bytes currently held by live locators (aligned sizes).
    bytes_in_use: AtomicU64,
}

impl MemoryStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an allocation of `bytes`.
    #[inline]
    pub fn record_allocation(&self, bytes: u64) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_in_use.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Records a release of `bytes`.
    #[inline]
    pub fn record_release(&self, bytes: u64) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.bytes_in_use.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Records a storage move from `old_bytes` to `new_bytes`.
    #[inline]
    pub fn record_reallocation(&self, old_bytes: u64, new_bytes: u64) {
        self.reallocations.fetch_add(1, Ordering::Relaxed);
        self.bytes_in_use.fetch_add(new_bytes, Ordering::Relaxed);
        self.bytes_in_use.fetch_sub(old_bytes, Ordering::Relaxed);
    }

    /// Records a failed allocation.
    #[inline]
    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns allocations.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Returns releases.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Returns reallocations.
    pub fn reallocations(&self) -> u64 {
        self.reallocations.load(Ordering::Relaxed)
    }

    /// Returns failed allocations.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns bytes held by live locators.
    pub fn bytes_in_use(&self) -> u64 {
        self.bytes_in_use.load(Ordering::Relaxed)
    }

    /// Returns the number of live locators.
    pub fn live_locators(&self) -> u64 {
        self.allocations().saturating_sub(self.releases())
    }

    /// Resets all statistics.
    pub fn reset(&self) {
        self.allocations.store(0, Ordering::Relaxed);
        self.releases.store(0, Ordering::Relaxed);
        self.reallocations.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.bytes_in_use.store(0, Ordering::Relaxed);
    }
}

impl Clone for MemoryStats {
    fn clone(&self) -> Self {
        Self {
            allocations: AtomicU64::new(self.allocations()),
            releases: AtomicU64::new(self.releases()),
            reallocations: AtomicU64::new(self.reallocations()),
            failures: AtomicU64::new(self.failures()),
            bytes_in_use: AtomicU64::new(self.bytes_in_use()),
        }
    }
}

impl std::fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MemoryStats {{ live: {}, allocations: {}, releases: {}, reallocations: {}, failures: {}, bytes_in_use: {} }}",
            self.live_locators(),
            self.allocations(),
            self.releases(),
            self.reallocations(),
            self.failures(),
            self.bytes_in_use()
        )
    }
}
