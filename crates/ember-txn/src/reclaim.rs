//! Timestamp freezing and version reclamation.
//!
//! A reclamation pass:
//! 1. Reads the watermark, the oldest begin timestamp still active.
//! 2. Freezes committed timestamps behind it; frozen timestamps no longer
//!    take part in visibility decisions.
//! 3. Drops conflict history no active transaction can conflict with.
//! 4. Releases the locators of versions superseded behind the watermark.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use ember_common::config::TxnConfig;
use ember_common::types::TxnTimestamp;
use ember_common::EmberResult;
use tracing::{debug, info};

use crate::store::ObjectStore;

/// Statistics for reclamation.
#[derive(Debug, Default)]
pub struct ReclaimStats {
    /// Total reclamation passes.
    pub runs: AtomicU64,
    /// Total timestamps frozen.
    pub timestamps_frozen: AtomicU64,
    /// Total version locators released.
    pub versions_released: AtomicU64,
    /// Total deleted objects removed.
    pub objects_removed: AtomicU64,
}

impl ReclaimStats {
    /// Creates new stats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a pass.
    pub fn record_run(&self, result: &ReclaimResult) {
        self.runs.fetch_add(1, AtomicOrdering::Relaxed);
        self.timestamps_frozen
            .fetch_add(result.timestamps_frozen as u64, AtomicOrdering::Relaxed);
        self.versions_released
            .fetch_add(result.versions_released as u64, AtomicOrdering::Relaxed);
        self.objects_removed
            .fetch_add(result.objects_removed as u64, AtomicOrdering::Relaxed);
    }

    /// Returns the total number of passes.
    pub fn total_runs(&self) -> u64 {
        self.runs.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total timestamps frozen.
    pub fn total_timestamps_frozen(&self) -> u64 {
        self.timestamps_frozen.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total version locators released.
    pub fn total_versions_released(&self) -> u64 {
        self.versions_released.load(AtomicOrdering::Relaxed)
    }

    /// Returns the total deleted objects removed.
    pub fn total_objects_removed(&self) -> u64 {
        self.objects_removed.load(AtomicOrdering::Relaxed)
    }
}

/// Result of a reclamation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReclaimResult {
    /// Watermark the pass worked against.
    pub watermark: TxnTimestamp,
    /// Committed transactions frozen.
    pub timestamps_frozen: usize,
    /// Conflict history entries dropped.
    pub history_pruned: usize,
    /// Version locators released.
    pub versions_released: usize,
    /// Deleted objects removed.
    pub objects_removed: usize,
}

impl ReclaimResult {
    /// Returns true if any work was done.
    pub fn did_work(&self) -> bool {
        self.timestamps_frozen > 0
            || self.history_pruned > 0
            || self.versions_released > 0
            || self.objects_removed > 0
    }
}

/// Runs reclamation passes over an object store.
pub struct Reclaimer {
    store: Arc<ObjectStore>,
    config: TxnConfig,
    stats: ReclaimStats,
}

impl Reclaimer {
    /// Creates a reclaimer.
    pub fn new(store: Arc<ObjectStore>, config: TxnConfig) -> Self {
        Self {
            store,
            config,
            stats: ReclaimStats::new(),
        }
    }

    /// Runs one pass.
    ///
    /// Freezing always happens; version release is skipped when garbage
    /// collection is disabled.
    pub fn reclaim(&self) -> EmberResult<ReclaimResult> {
        let txn_manager = self.store.txn_manager();
        let watermark = txn_manager.watermark();
        let batch = self.config.reclaim_batch_size;

        let mut result = ReclaimResult {
            watermark,
            timestamps_frozen: txn_manager.freeze_below(watermark, batch),
            history_pruned: txn_manager.prune_history(watermark),
            ..ReclaimResult::default()
        };

        if self.config.gc_enabled {
            let collected = self.store.collect_garbage(watermark, batch)?;
            result.versions_released = collected.versions_released;
            result.objects_removed = collected.objects_removed;
        }

        self.stats.record_run(&result);
        if result.did_work() {
            info!(
                %watermark,
                frozen = result.timestamps_frozen,
                pruned = result.history_pruned,
                released = result.versions_released,
                removed = result.objects_removed,
                "reclamation pass"
            );
        } else {
            debug!(%watermark, "reclamation pass found nothing to do");
        }
        Ok(result)
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &ReclaimStats {
        &self.stats
    }

    /// Returns the configuration.
    pub fn config(&self) -> &TxnConfig {
        &self.config
    }
}

impl fmt::Debug for Reclaimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reclaimer")
            .field("gc_enabled", &self.config.gc_enabled)
            .field("runs", &self.stats.total_runs())
            .field("versions_released", &self.stats.total_versions_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::store::tests::{create_store, WIDGET};

    fn churn(session: &mut Session, updates: usize) -> ember_common::types::ObjectId {
        session.begin_transaction().unwrap();
        let id = session.insert(WIDGET, b"v0").unwrap();
        session.commit_transaction().unwrap();
        for i in 0..updates {
            session.begin_transaction().unwrap();
            session.update(id, format!("v{}", i + 1).as_bytes(), &[]).unwrap();
            session.commit_transaction().unwrap();
        }
        id
    }

    #[test]
    fn test_reclaim_freezes_and_releases() {
        let store = create_store();
        let reclaimer = Reclaimer::new(store.clone(), TxnConfig::default());
        let mut session = Session::new(store.clone());
        let id = churn(&mut session, 3);

        let result = reclaimer.reclaim().unwrap();
        assert!(result.did_work());
        assert_eq!(result.timestamps_frozen, 4);
        assert_eq!(result.history_pruned, 4);
        assert_eq!(result.versions_released, 3);
        assert_eq!(store.version_count(), 1);

        session.begin_transaction().unwrap();
        assert_eq!(session.get(id).unwrap().unwrap().as_ref(), b"v3");
        session.rollback_transaction().unwrap();

        // Nothing new since the last pass.
        let again = reclaimer.reclaim().unwrap();
        assert!(!again.did_work());
        assert_eq!(reclaimer.stats().total_runs(), 2);
        assert_eq!(reclaimer.stats().total_versions_released(), 3);
    }

    #[test]
    fn test_reclaim_with_gc_disabled() {
        let store = create_store();
        let config = TxnConfig {
            gc_enabled: false,
            ..TxnConfig::default()
        };
        let reclaimer = Reclaimer::new(store.clone(), config);
        let mut session = Session::new(store.clone());
        churn(&mut session, 2);

        let result = reclaimer.reclaim().unwrap();
        assert_eq!(result.timestamps_frozen, 3);
        assert_eq!(result.versions_released, 0);
        assert_eq!(store.version_count(), 3);
    }

    #[test]
    fn test_active_transaction_holds_watermark() {
        let store = create_store();
        let reclaimer = Reclaimer::new(store.clone(), TxnConfig::default());
        let mut writer = Session::new(store.clone());
        let id = churn(&mut writer, 0);

        let mut reader = Session::new(store.clone());
        let reader_ts = reader.begin_transaction().unwrap();
        writer.begin_transaction().unwrap();
        writer.update(id, b"newer", &[]).unwrap();
        writer.commit_transaction().unwrap();

        let result = reclaimer.reclaim().unwrap();
        assert_eq!(result.watermark, reader_ts);
        assert_eq!(result.versions_released, 0);
        assert_eq!(reader.get(id).unwrap().unwrap().as_ref(), b"v0");
        assert!(!store.txn_manager().is_frozen(reader_ts));
        reader.rollback_transaction().unwrap();

        let result = reclaimer.reclaim().unwrap();
        assert_eq!(result.versions_released, 1);
    }
}
