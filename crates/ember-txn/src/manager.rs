//! Server-side transaction manager.
//!
//! The manager owns the authoritative timestamp sequence. Begin and commit
//! timestamps come from the same counter, so commit timestamps are totally
//! ordered with respect to every begin.
//!
//! # Transaction States
//!
//! ```text
//! ┌────────┐  begin()  ┌────────┐  commit()  ┌────────────┐        ┌───────────┐
//! │ Start  │──────────▶│ Active │───────────▶│ Validating │───────▶│ Committed │
//! └────────┘           └────────┘            └────────────┘        └───────────┘
//!                          │                       │ conflict            │ reclaim
//!                      rollback()                  ▼                     ▼
//!                          │                 ┌──────────┐         ┌────────────┐
//!                          └────────────────▶│ Aborted  │         │ Terminated │
//!                                            └──────────┘         └────────────┘
//! ```
//!
//! Conflicts are resolved first-committer-wins: a transaction fails to commit
//! if any object it wrote was also written by a transaction that committed
//! after it began.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use ember_common::constants::FIRST_TIMESTAMP;
use ember_common::types::{ObjectId, TxnTimestamp};
use ember_common::{EmberError, EmberResult};
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use crate::metadata::{TxnMetadata, TxnStatus};

/// Settled metadata entries tolerated below the freeze cursor before the
/// arena is compacted.
const DISCARD_THRESHOLD: u64 = 256;

/// Statistics for the transaction manager.
#[derive(Debug, Default)]
pub struct TransactionStats {
    /// Total transactions started.
    pub started: AtomicU64,
    /// Total transactions committed.
    pub committed: AtomicU64,
    /// Total transactions rolled back on request.
    pub rolled_back: AtomicU64,
    /// Total commits rejected by conflict validation.
    pub conflicts: AtomicU64,
    /// Total timestamps frozen by reclamation.
    pub frozen: AtomicU64,
}

impl TransactionStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total transactions started.
    pub fn started(&self) -> u64 {
        self.started.load(AtomicOrdering::Relaxed)
    }

    /// Total transactions committed.
    pub fn committed(&self) -> u64 {
        self.committed.load(AtomicOrdering::Relaxed)
    }

    /// Total transactions rolled back on request.
    pub fn rolled_back(&self) -> u64 {
        self.rolled_back.load(AtomicOrdering::Relaxed)
    }

    /// Total commits rejected by conflict validation.
    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(AtomicOrdering::Relaxed)
    }

    /// Total timestamps frozen by reclamation.
    pub fn frozen(&self) -> u64 {
        self.frozen.load(AtomicOrdering::Relaxed)
    }
}

impl fmt::Display for TransactionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "started={} committed={} rolled_back={} conflicts={} frozen={}",
            self.started(),
            self.committed(),
            self.rolled_back(),
            self.conflicts(),
            self.frozen()
        )
    }
}

/// State guarded by the commit lock.
struct CommitState {
    metadata: TxnMetadata,
    /// Begin timestamps of transactions not yet ended.
    active: BTreeSet<u64>,
    /// Write sets of committed transactions, keyed by commit timestamp value.
    history: BTreeMap<u64, Vec<ObjectId>>,
    /// Position the next freeze pass resumes from.
    freeze_cursor: u64,
}

/// Issues timestamps and tracks the lifecycle of every transaction.
pub struct TransactionManager {
    next_ts: AtomicU64,
    state: Mutex<CommitState>,
    /// Frozen watermark published by the last reclamation pass.
    frozen_watermark: RwLock<TxnTimestamp>,
    stats: TransactionStats,
}

impl TransactionManager {
    /// Creates a new transaction manager.
    pub fn new() -> Self {
        Self {
            next_ts: AtomicU64::new(FIRST_TIMESTAMP),
            state: Mutex::new(CommitState {
                metadata: TxnMetadata::new(),
                active: BTreeSet::new(),
                history: BTreeMap::new(),
                freeze_cursor: FIRST_TIMESTAMP,
            }),
            frozen_watermark: RwLock::new(TxnTimestamp::INVALID),
            stats: TransactionStats::new(),
        }
    }

    fn allocate_ts(&self) -> TxnTimestamp {
        TxnTimestamp::new(self.next_ts.fetch_add(1, AtomicOrdering::SeqCst))
    }

    /// Begins a new transaction and returns its begin timestamp.
    ///
    /// Begin waits for any commit in progress so that a new snapshot always
    /// includes every version installed with an earlier commit timestamp.
    pub fn begin(&self) -> EmberResult<TxnTimestamp> {
        let mut state = self.state.lock();
        let begin_ts = self.allocate_ts();
        if begin_ts.value() > TxnTimestamp::MAX_VALUE {
            return Err(EmberError::internal("transaction timestamps exhausted"));
        }
        state.metadata.register_begin(begin_ts);
        state.active.insert(begin_ts.value());
        self.stats.started.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(txn = %begin_ts, "begin");
        Ok(begin_ts)
    }

    /// Validates and commits a transaction.
    ///
    /// `install` runs after validation succeeds and after the commit
    /// timestamp is assigned, while commits are still serialized. If it
    /// fails, the transaction is aborted.
    pub fn commit<F>(
        &self,
        begin_ts: TxnTimestamp,
        write_set: &[ObjectId],
        install: F,
    ) -> EmberResult<TxnTimestamp>
    where
        F: FnOnce(TxnTimestamp) -> EmberResult<()>,
    {
        let mut state = self.state.lock();
        Self::check_active(&state.metadata, begin_ts)?;
        state
            .metadata
            .set_status(begin_ts, TxnStatus::Validating);

        if let Some((committed_by, object)) =
            Self::find_conflict(&state.history, begin_ts, write_set)
        {
            state.metadata.set_status(begin_ts, TxnStatus::Aborted);
            state.active.remove(&begin_ts.value());
            self.stats.conflicts.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(txn = %begin_ts, %committed_by, %object, "commit conflict");
            return Err(EmberError::TransactionConflict {
                txn: begin_ts,
                committed_by,
                object,
            });
        }

        let commit_ts = self.allocate_ts();
        if let Err(e) = install(commit_ts) {
            state.metadata.set_status(begin_ts, TxnStatus::Aborted);
            state.active.remove(&begin_ts.value());
            return Err(e);
        }

        state.metadata.register_commit(begin_ts, commit_ts);
        if !write_set.is_empty() {
            state.history.insert(commit_ts.value(), write_set.to_vec());
        }
        state.active.remove(&begin_ts.value());
        self.stats.committed.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(txn = %begin_ts, commit = %commit_ts, writes = write_set.len(), "commit");
        Ok(commit_ts)
    }

    /// Runs `f` while holding the commit lock, so no commit installs writes
    /// concurrently.
    pub fn with_commit_lock<T>(&self, f: impl FnOnce() -> T) -> T {
        let _state = self.state.lock();
        f()
    }

    fn find_conflict(
        history: &BTreeMap<u64, Vec<ObjectId>>,
        begin_ts: TxnTimestamp,
        write_set: &[ObjectId],
    ) -> Option<(TxnTimestamp, ObjectId)> {
        if write_set.is_empty() {
            return None;
        }
        let ours: HashSet<ObjectId> = write_set.iter().copied().collect();
        history
            .range(begin_ts.value() + 1..)
            .find_map(|(commit, theirs)| {
                theirs
                    .iter()
                    .find(|id| ours.contains(id))
                    .map(|id| (TxnTimestamp::new(*commit), *id))
            })
    }

    fn check_active(metadata: &TxnMetadata, begin_ts: TxnTimestamp) -> EmberResult<()> {
        match metadata.status(begin_ts) {
            Some(status) if status.is_active() => Ok(()),
            Some(status) => Err(EmberError::TransactionNotActive {
                txn: begin_ts,
                state: status.to_string(),
            }),
            None => Err(EmberError::TransactionNotFound { txn: begin_ts }),
        }
    }

    /// Rolls back an active transaction.
    pub fn rollback(&self, begin_ts: TxnTimestamp) -> EmberResult<()> {
        let mut state = self.state.lock();
        Self::check_active(&state.metadata, begin_ts)?;
        state.metadata.set_status(begin_ts, TxnStatus::Aborted);
        state.active.remove(&begin_ts.value());
        self.stats.rolled_back.fetch_add(1, AtomicOrdering::Relaxed);
        debug!(txn = %begin_ts, "rollback");
        Ok(())
    }

    /// Returns true if the transaction is active.
    pub fn is_active(&self, begin_ts: TxnTimestamp) -> bool {
        self.status(begin_ts).map_or(false, |s| s.is_active())
    }

    /// Returns the status of a transaction.
    pub fn status(&self, begin_ts: TxnTimestamp) -> Option<TxnStatus> {
        self.state.lock().metadata.status(begin_ts)
    }

    /// Returns the commit timestamp of a committed transaction, or `None`
    /// once its metadata has been discarded.
    pub fn commit_ts(&self, begin_ts: TxnTimestamp) -> Option<TxnTimestamp> {
        let state = self.state.lock();
        state
            .metadata
            .commit_ts(begin_ts)
            .map(|ts| state.metadata.resolve(ts))
    }

    /// Returns true if `ts` has been frozen.
    pub fn is_frozen(&self, ts: TxnTimestamp) -> bool {
        self.state.lock().metadata.is_frozen(ts)
    }

    /// Returns the oldest begin timestamp among active transactions, or the
    /// next timestamp to be issued when none is active.
    ///
    /// Every commit timestamp below the watermark is visible to every
    /// current and future snapshot.
    pub fn watermark(&self) -> TxnTimestamp {
        let state = self.state.lock();
        match state.active.first() {
            Some(oldest) => TxnTimestamp::new(*oldest),
            None => TxnTimestamp::new(self.next_ts.load(AtomicOrdering::SeqCst)),
        }
    }

    /// Returns the watermark published by the last freeze pass.
    pub fn frozen_watermark(&self) -> TxnTimestamp {
        *self.frozen_watermark.read()
    }

    /// Freezes up to `limit` committed transactions whose commit timestamp
    /// precedes `watermark`. Returns the number frozen.
    pub fn freeze_below(&self, watermark: TxnTimestamp, limit: usize) -> usize {
        let mut state = self.state.lock();
        let from = state.freeze_cursor;
        let (frozen, resume) = state.metadata.freeze_committed(from, watermark, limit);
        state.freeze_cursor = resume;
        if resume.saturating_sub(state.metadata.base()) >= DISCARD_THRESHOLD {
            let discarded = state.metadata.discard_below(resume);
            debug!(discarded, base = state.metadata.base(), "metadata compacted");
        }
        drop(state);

        let mut published = self.frozen_watermark.write();
        if watermark.value() > published.value() {
            *published = watermark;
        }
        self.stats
            .frozen
            .fetch_add(frozen.len() as u64, AtomicOrdering::Relaxed);
        frozen.len()
    }

    /// Drops conflict history that no active or future transaction can
    /// conflict with. Returns the number of entries removed.
    pub fn prune_history(&self, watermark: TxnTimestamp) -> usize {
        let mut state = self.state.lock();
        let keep = state.history.split_off(&watermark.value());
        let removed = std::mem::replace(&mut state.history, keep);
        removed.len()
    }

    /// Returns the number of active transactions.
    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Returns the number of retained timestamp metadata entries.
    pub fn metadata_len(&self) -> usize {
        self.state.lock().metadata.len()
    }

    /// Returns the number of retained conflict history entries.
    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Returns the last timestamp issued.
    pub fn last_timestamp(&self) -> TxnTimestamp {
        TxnTimestamp::new(self.next_ts.load(AtomicOrdering::SeqCst) - 1)
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &TransactionStats {
        &self.stats
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionManager")
            .field("last_timestamp", &self.last_timestamp())
            .field("active_count", &self.active_count())
            .field("stats", &format_args!("{}", self.stats))
            .finish()
    }
}
