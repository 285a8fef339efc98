//! Versioned object store.
//!
//! Objects are kept as version chains keyed by [`ObjectId`]. Every version
//! is backed by its own locator, so installing a new version never disturbs
//! storage that an older snapshot may still read. Writes are staged per
//! transaction and installed on commit; a rollback releases every locator the
//! transaction allocated.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use ember_catalog::TypeIdCache;
use ember_common::types::{EventType, FieldPosition, Locator, ObjectId, ObjectType, TxnTimestamp};
use ember_common::{invariant, EmberError, EmberResult};
use ember_memory::{AddressOffset, MemoryErrorCode, MemoryManager, TxnAllocations};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::manager::TransactionManager;
use crate::trigger::{CommitTrigger, CommittedTxn, RowEvent};

// =============================================================================
// Versions
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Version {
    commit_ts: TxnTimestamp,
    /// `Locator::INVALID` marks a deletion.
    locator: Locator,
}

impl Version {
    fn is_tombstone(&self) -> bool {
        !self.locator.is_valid()
    }

    fn visible_to(&self, snapshot: TxnTimestamp) -> bool {
        self.commit_ts.is_frozen() || self.commit_ts.value() < snapshot.value()
    }
}

#[derive(Debug)]
struct VersionChain {
    object_type: ObjectType,
    /// Oldest first.
    versions: Vec<Version>,
}

impl VersionChain {
    fn visible(&self, snapshot: TxnTimestamp) -> Option<&Version> {
        self.versions.iter().rev().find(|v| v.visible_to(snapshot))
    }

    fn latest(&self) -> Option<&Version> {
        self.versions.last()
    }
}

// =============================================================================
// Pending writes
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct Staged {
    object_type: ObjectType,
    /// `None` once deleted by the transaction.
    locator: Option<Locator>,
    /// Inserted by the transaction.
    created: bool,
}

#[derive(Debug)]
struct TxnWrites {
    fire_triggers: bool,
    log: Vec<RowEvent>,
    staged: HashMap<ObjectId, Staged>,
    allocations: TxnAllocations,
    /// Locators superseded within the transaction, freed on commit.
    orphans: Vec<Locator>,
}

impl TxnWrites {
    fn new(fire_triggers: bool) -> Self {
        Self {
            fire_triggers,
            log: Vec::new(),
            staged: HashMap::new(),
            allocations: TxnAllocations::new(),
            orphans: Vec::new(),
        }
    }
}

/// Result of a garbage collection pass over version chains.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CollectResult {
    /// Chains examined.
    pub chains_examined: usize,
    /// Version locators released.
    pub versions_released: usize,
    /// Deleted objects whose chain was removed.
    pub objects_removed: usize,
}

// =============================================================================
// Object Store
// =============================================================================

/// Transactional store of typed objects.
pub struct ObjectStore {
    txn_manager: Arc<TransactionManager>,
    memory: MemoryManager,
    type_cache: Arc<TypeIdCache>,
    objects: RwLock<HashMap<ObjectId, VersionChain>>,
    pending: Mutex<HashMap<TxnTimestamp, TxnWrites>>,
    /// Objects that gained a version, with the commit timestamp.
    garbage: Mutex<VecDeque<(TxnTimestamp, ObjectId)>>,
    next_id: AtomicU64,
    trigger: RwLock<Option<Arc<dyn CommitTrigger>>>,
}

impl ObjectStore {
    /// Creates a store allocating through `memory`.
    pub fn new(
        txn_manager: Arc<TransactionManager>,
        memory: MemoryManager,
        type_cache: Arc<TypeIdCache>,
    ) -> Self {
        Self {
            txn_manager,
            memory,
            type_cache,
            objects: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            garbage: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            trigger: RwLock::new(None),
        }
    }

    /// Installs the commit trigger, replacing any previous one.
    pub fn set_trigger(&self, trigger: Arc<dyn CommitTrigger>) {
        *self.trigger.write() = Some(trigger);
    }

    /// Removes the commit trigger.
    pub fn clear_trigger(&self) {
        *self.trigger.write() = None;
    }

    fn current_trigger(&self) -> Option<Arc<dyn CommitTrigger>> {
        self.trigger.read().clone()
    }

    /// Returns the transaction manager.
    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        &self.txn_manager
    }

    /// Returns the memory manager backing object payloads.
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    // -------------------------------------------------------------------------
    // Transaction lifecycle
    // -------------------------------------------------------------------------

    /// Begins a transaction.
    ///
    /// When `fire_triggers` is false, none of the transaction's lifecycle
    /// events reach the commit trigger. If the trigger fails on begin, the
    /// transaction is rolled back and the trigger's error returned.
    pub fn begin(&self, fire_triggers: bool) -> EmberResult<TxnTimestamp> {
        let txn = self.txn_manager.begin()?;
        self.pending.lock().insert(txn, TxnWrites::new(fire_triggers));
        if fire_triggers {
            if let Some(trigger) = self.current_trigger() {
                if let Err(e) = trigger.on_begin(txn) {
                    self.pending.lock().remove(&txn);
                    self.txn_manager.rollback(txn)?;
                    debug!(%txn, error = %e, "begin undone by trigger");
                    return Err(e);
                }
            }
        }
        Ok(txn)
    }

    /// Commits a transaction, installing its writes.
    ///
    /// On a conflict, or when a staged write's type no longer exists, the
    /// transaction is rolled back and the error returned. An error from the
    /// commit trigger is returned after the commit has been applied.
    pub fn commit(&self, txn: TxnTimestamp) -> EmberResult<TxnTimestamp> {
        self.commit_inner(txn, true)
    }

    /// Commits a transaction without notifying the commit trigger.
    pub fn commit_without_triggers(&self, txn: TxnTimestamp) -> EmberResult<TxnTimestamp> {
        self.commit_inner(txn, false)
    }

    fn commit_inner(&self, txn: TxnTimestamp, allow_triggers: bool) -> EmberResult<TxnTimestamp> {
        let writes = self
            .pending
            .lock()
            .remove(&txn)
            .ok_or_else(|| self.not_pending(txn))?;
        let TxnWrites {
            fire_triggers,
            log,
            staged,
            mut allocations,
            orphans,
        } = writes;
        let fire = fire_triggers && allow_triggers;

        let mut write_set: Vec<ObjectId> = staged.keys().copied().collect();
        write_set.sort_unstable();

        let result = self
            .txn_manager
            .commit(txn, &write_set, |commit_ts| self.install(commit_ts, &staged));

        let commit_ts = match result {
            Ok(ts) => ts,
            Err(e) => {
                if e.is_fatal() {
                    return Err(e);
                }
                allocations.rollback(&self.memory)?;
                if fire {
                    if let Some(trigger) = self.current_trigger() {
                        if let Err(fatal) = trigger.on_rollback(txn) {
                            if fatal.is_fatal() {
                                return Err(fatal);
                            }
                        }
                    }
                }
                return Err(e);
            }
        };

        for locator in orphans {
            self.memory.release(locator)?;
        }
        allocations.drain();

        if fire {
            if let Some(trigger) = self.current_trigger() {
                trigger.on_commit(CommittedTxn {
                    begin_ts: txn,
                    commit_ts,
                    events: log,
                })?;
            }
        }
        Ok(commit_ts)
    }

    fn install(
        &self,
        commit_ts: TxnTimestamp,
        staged: &HashMap<ObjectId, Staged>,
    ) -> EmberResult<()> {
        for write in staged.values().filter(|w| w.locator.is_some()) {
            self.type_cache.find_record_id(write.object_type)?;
        }
        let mut objects = self.objects.write();
        let mut garbage = self.garbage.lock();
        for (id, write) in staged {
            let locator = write.locator.unwrap_or(Locator::INVALID);
            if write.created {
                if locator.is_valid() {
                    objects.insert(
                        *id,
                        VersionChain {
                            object_type: write.object_type,
                            versions: vec![Version { commit_ts, locator }],
                        },
                    );
                }
                continue;
            }
            let chain = objects.get_mut(id);
            invariant!(chain.is_some(), "updated object {id} has no version chain");
            if let Some(chain) = chain {
                chain.versions.push(Version { commit_ts, locator });
                garbage.push_back((commit_ts, *id));
            }
        }
        Ok(())
    }

    /// Rolls back a transaction, releasing every locator it allocated.
    pub fn rollback(&self, txn: TxnTimestamp) -> EmberResult<()> {
        let mut writes = self
            .pending
            .lock()
            .remove(&txn)
            .ok_or_else(|| self.not_pending(txn))?;
        self.txn_manager.rollback(txn)?;
        let released = writes.allocations.rollback(&self.memory)?;
        debug!(%txn, released, "rolled back writes");

        if writes.fire_triggers {
            if let Some(trigger) = self.current_trigger() {
                trigger.on_rollback(txn)?;
            }
        }
        Ok(())
    }

    /// Returns true if any pending transaction holds a live staged write of
    /// `object_type`.
    pub fn has_pending_type(&self, object_type: ObjectType) -> bool {
        self.pending.lock().values().any(|writes| {
            writes
                .staged
                .values()
                .any(|w| w.object_type == object_type && w.locator.is_some())
        })
    }

    fn not_pending(&self, txn: TxnTimestamp) -> EmberError {
        match self.txn_manager.status(txn) {
            Some(status) => EmberError::TransactionNotActive {
                txn,
                state: status.to_string(),
            },
            None => EmberError::TransactionNotFound { txn },
        }
    }

    // -------------------------------------------------------------------------
    // Object operations
    // -------------------------------------------------------------------------

    /// Inserts a new object of `object_type` and returns its id.
    ///
    /// Fails with `TypeNotFound` if the type has no catalog entry.
    pub fn insert(
        &self,
        txn: TxnTimestamp,
        object_type: ObjectType,
        payload: &[u8],
    ) -> EmberResult<ObjectId> {
        self.type_cache.find_record_id(object_type)?;

        let mut pending = self.pending.lock();
        let writes = pending.get_mut(&txn).ok_or_else(|| self.not_pending(txn))?;
        let locator = self.store_payload(writes, payload)?;
        let id = ObjectId::new(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));

        writes.staged.insert(
            id,
            Staged {
                object_type,
                locator: Some(locator),
                created: true,
            },
        );
        writes.log.push(RowEvent {
            event_type: EventType::RowInsert,
            object_type,
            id,
            changed_fields: Vec::new(),
        });
        Ok(id)
    }

    /// Replaces the payload of an object, recording the changed fields.
    pub fn update(
        &self,
        txn: TxnTimestamp,
        id: ObjectId,
        payload: &[u8],
        changed_fields: &[FieldPosition],
    ) -> EmberResult<()> {
        let mut pending = self.pending.lock();
        let writes = pending.get_mut(&txn).ok_or_else(|| self.not_pending(txn))?;

        let object_type = match writes.staged.get(&id).copied() {
            Some(Staged {
                locator: Some(locator),
                object_type,
                ..
            }) => {
                self.rewrite_payload(writes, locator, payload)?;
                object_type
            }
            Some(Staged { locator: None, .. }) => {
                return Err(EmberError::ObjectNotFound { id });
            }
            None => {
                let object_type = self.visible_type(txn, id)?;
                self.type_cache.get_record_id(object_type)?;
                let locator = self.store_payload(writes, payload)?;
                writes.staged.insert(
                    id,
                    Staged {
                        object_type,
                        locator: Some(locator),
                        created: false,
                    },
                );
                object_type
            }
        };

        let fields: BTreeSet<FieldPosition> = changed_fields.iter().copied().collect();
        writes.log.push(RowEvent {
            event_type: EventType::RowUpdate,
            object_type,
            id,
            changed_fields: fields.into_iter().collect(),
        });
        Ok(())
    }

    /// Deletes an object.
    pub fn delete(&self, txn: TxnTimestamp, id: ObjectId) -> EmberResult<()> {
        let mut pending = self.pending.lock();
        let writes = pending.get_mut(&txn).ok_or_else(|| self.not_pending(txn))?;

        let object_type = match writes.staged.get_mut(&id) {
            Some(staged) => {
                let locator = staged.locator.take().ok_or(EmberError::ObjectNotFound { id })?;
                writes.orphans.push(locator);
                staged.object_type
            }
            None => {
                let object_type = self.visible_type(txn, id)?;
                self.type_cache.get_record_id(object_type)?;
                writes.staged.insert(
                    id,
                    Staged {
                        object_type,
                        locator: None,
                        created: false,
                    },
                );
                object_type
            }
        };

        writes.log.push(RowEvent {
            event_type: EventType::RowDelete,
            object_type,
            id,
            changed_fields: Vec::new(),
        });
        Ok(())
    }

    /// Reads an object as seen by `txn`: its own writes first, then the
    /// newest version committed before it began.
    pub fn get(&self, txn: TxnTimestamp, id: ObjectId) -> EmberResult<Option<Bytes>> {
        {
            let pending = self.pending.lock();
            let writes = pending.get(&txn).ok_or_else(|| self.not_pending(txn))?;
            if let Some(staged) = writes.staged.get(&id) {
                return match staged.locator {
                    Some(locator) => Ok(Some(self.read_payload(locator)?)),
                    None => Ok(None),
                };
            }
        }

        let objects = self.objects.read();
        match objects.get(&id).and_then(|chain| chain.visible(txn)) {
            Some(version) if !version.is_tombstone() => {
                Ok(Some(self.read_payload(version.locator)?))
            }
            _ => Ok(None),
        }
    }

    /// Returns the type of an object visible to `txn`.
    pub fn object_type(&self, txn: TxnTimestamp, id: ObjectId) -> EmberResult<Option<ObjectType>> {
        {
            let pending = self.pending.lock();
            let writes = pending.get(&txn).ok_or_else(|| self.not_pending(txn))?;
            if let Some(staged) = writes.staged.get(&id) {
                return Ok(staged.locator.map(|_| staged.object_type));
            }
        }
        match self.visible_type(txn, id) {
            Ok(object_type) => Ok(Some(object_type)),
            Err(EmberError::ObjectNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Lists every object of `object_type` visible to `txn`, ordered by id.
    pub fn list(
        &self,
        txn: TxnTimestamp,
        object_type: ObjectType,
    ) -> EmberResult<Vec<(ObjectId, Bytes)>> {
        let pending = self.pending.lock();
        let writes = pending.get(&txn).ok_or_else(|| self.not_pending(txn))?;
        let objects = self.objects.read();

        let mut found: HashMap<ObjectId, Locator> = objects
            .iter()
            .filter(|(_, chain)| chain.object_type == object_type)
            .filter_map(|(id, chain)| {
                chain
                    .visible(txn)
                    .filter(|v| !v.is_tombstone())
                    .map(|v| (*id, v.locator))
            })
            .collect();
        for (id, staged) in writes
            .staged
            .iter()
            .filter(|(_, s)| s.object_type == object_type)
        {
            match staged.locator {
                Some(locator) => found.insert(*id, locator),
                None => found.remove(id),
            };
        }

        let mut rows = found
            .into_iter()
            .map(|(id, locator)| Ok((id, self.read_payload(locator)?)))
            .collect::<EmberResult<Vec<_>>>()?;
        rows.sort_by_key(|(id, _)| *id);
        Ok(rows)
    }

    fn visible_type(&self, txn: TxnTimestamp, id: ObjectId) -> EmberResult<ObjectType> {
        let objects = self.objects.read();
        objects
            .get(&id)
            .and_then(|chain| {
                chain
                    .visible(txn)
                    .filter(|v| !v.is_tombstone())
                    .map(|_| chain.object_type)
            })
            .ok_or(EmberError::ObjectNotFound { id })
    }

    fn store_payload(&self, writes: &mut TxnWrites, payload: &[u8]) -> EmberResult<Locator> {
        let keep = writes.allocations.len();
        let (locator, offset) = self.memory.allocate_object(payload_size(payload))?;
        writes
            .allocations
            .record(locator, AddressOffset::INVALID, offset);
        if let Err(code) = self.memory.write_object(locator, payload) {
            writes.allocations.rollback_to(keep, &self.memory)?;
            return Err(code.into());
        }
        Ok(locator)
    }

    fn rewrite_payload(
        &self,
        writes: &mut TxnWrites,
        locator: Locator,
        payload: &[u8],
    ) -> EmberResult<()> {
        match self.memory.write_object(locator, payload) {
            Ok(()) => Ok(()),
            Err(MemoryErrorCode::MemorySizeTooLarge) => {
                let (old, new) = self.memory.reallocate(locator, payload_size(payload))?;
                writes.allocations.record(locator, old, new);
                self.memory.write_object(locator, payload)?;
                Ok(())
            }
            Err(code) => Err(code.into()),
        }
    }

    fn read_payload(&self, locator: Locator) -> EmberResult<Bytes> {
        Ok(Bytes::from(self.memory.read_object(locator)?))
    }

    // -------------------------------------------------------------------------
    // Reclamation
    // -------------------------------------------------------------------------

    /// Releases versions that no snapshot at or after `watermark` can read.
    ///
    /// For each object updated by a commit older than the watermark, every
    /// version older than the newest one visible at the watermark is
    /// released, and that version is frozen. A frozen deletion with nothing
    /// before it removes the object entirely. At most `batch` chains are
    /// examined.
    pub fn collect_garbage(
        &self,
        watermark: TxnTimestamp,
        batch: usize,
    ) -> EmberResult<CollectResult> {
        let mut candidates = Vec::new();
        {
            let mut garbage = self.garbage.lock();
            while candidates.len() < batch {
                match garbage.front() {
                    Some((commit_ts, _)) if commit_ts.value() < watermark.value() => {
                        if let Some((_, id)) = garbage.pop_front() {
                            candidates.push(id);
                        }
                    }
                    _ => break,
                }
            }
        }
        candidates.sort_unstable();
        candidates.dedup();

        let mut result = CollectResult::default();
        let mut objects = self.objects.write();
        for id in candidates {
            let Some(chain) = objects.get_mut(&id) else {
                continue;
            };
            result.chains_examined += 1;
            let Some(newest) = chain.versions.iter().rposition(|v| v.visible_to(watermark)) else {
                continue;
            };
            for version in chain.versions.drain(..newest) {
                if !version.is_tombstone() {
                    self.memory.release(version.locator)?;
                    result.versions_released += 1;
                }
            }
            let lone = chain.versions.len() == 1;
            let base = &mut chain.versions[0];
            base.commit_ts = base.commit_ts.set_frozen();
            if lone && base.is_tombstone() {
                objects.remove(&id);
                result.objects_removed += 1;
            }
        }

        if result.versions_released > 0 || result.objects_removed > 0 {
            debug!(
                %watermark,
                released = result.versions_released,
                removed = result.objects_removed,
                "collected versions"
            );
        }
        Ok(result)
    }

    /// Returns the number of objects of `object_type` whose latest committed
    /// version is live.
    pub fn count_type(&self, object_type: ObjectType) -> usize {
        self.objects
            .read()
            .values()
            .filter(|chain| chain.object_type == object_type)
            .filter(|chain| chain.latest().map_or(false, |v| !v.is_tombstone()))
            .count()
    }

    /// Returns the number of version chains.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns the number of versions across all chains.
    pub fn version_count(&self) -> usize {
        self.objects.read().values().map(|c| c.versions.len()).sum()
    }

    /// Returns the number of transactions with staged writes.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

fn payload_size(payload: &[u8]) -> u64 {
    (payload.len() as u64).max(1)
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        let pending = self.pending.get_mut();
        if !pending.is_empty() {
            warn!(count = pending.len(), "object store dropped with active transactions");
        }
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("objects", &self.object_count())
            .field("versions", &self.version_count())
            .field("pending", &self.pending_count())
            .finish()
    }
}
