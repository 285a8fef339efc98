//! The locator table and backing region.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ember_common::config::MemoryConfig;
use ember_common::constants::RESERVED_REGION_PREFIX;
use ember_common::error::EmberResult;
use ember_common::invariant;
use ember_common::types::Locator;

use crate::error::{CodeDisplay, MemoryErrorCode, MemoryResult};
use crate::offset::{align_up, validate_region_size, validate_size, AddressOffset};
use crate::stats::MemoryStats;

/// Role of a manager instance.
///
/// Exactly one master exists per backing region; every other handle is a
/// subordinate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerRole {
    /// May perform region-wide operations.
    Master,
    /// May allocate, release and access objects only.
    Subordinate,
}

/// Entry of the locator table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    /// Index 0, never handed out.
    Reserved,
    /// Allocated, with `capacity` aligned bytes at `offset` of which `len`
    /// hold the object.
    Live {
        offset: AddressOffset,
        capacity: u64,
        len: u64,
    },
    /// Released; the locator is never handed out again.
    Released,
}

/// Locator table plus region bytes, present once initialized.
#[derive(Debug)]
struct Arena {
    bytes: Vec<u8>,
    /// Indexed by locator value.
    slots: Vec<Slot>,
    /// Bump pointer for never-used storage.
    next_offset: u64,
    /// Released blocks by aligned size.
    free_blocks: HashMap<u64, Vec<AddressOffset>>,
}

impl Arena {
    fn new(region_size: u64) -> Self {
        Self {
            bytes: vec![0; region_size as usize],
            slots: vec![Slot::Reserved],
            next_offset: RESERVED_REGION_PREFIX,
            free_blocks: HashMap::new(),
        }
    }

    fn region_size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Highest locator ever allocated, or `INVALID` if none.
    fn last_allocated(&self) -> Locator {
        Locator::new((self.slots.len() - 1) as u64)
    }

    fn slot(&self, locator: Locator) -> Option<Slot> {
        self.slots.get(locator.as_index()).copied()
    }

    fn take_block(&mut self, capacity: u64) -> MemoryResult<AddressOffset> {
        if let Some(offset) = self.free_blocks.get_mut(&capacity).and_then(Vec::pop) {
            return Ok(offset);
        }
        let end = self
            .next_offset
            .checked_add(capacity)
            .ok_or(MemoryErrorCode::InsufficientMemorySize)?;
        if end > self.region_size() {
            return Err(MemoryErrorCode::InsufficientMemorySize);
        }
        let offset = AddressOffset::new(self.next_offset);
        self.next_offset = end;
        Ok(offset)
    }

    fn give_block(&mut self, offset: AddressOffset, capacity: u64) {
        self.free_blocks.entry(capacity).or_default().push(offset);
    }

    fn live(&self, locator: Locator) -> MemoryResult<(AddressOffset, u64, u64)> {
        match self.slot(locator) {
            Some(Slot::Live {
                offset,
                capacity,
                len,
            }) => Ok((offset, capacity, len)),
            Some(Slot::Released) => Err(MemoryErrorCode::InvalidMemoryOffset),
            _ => Err(MemoryErrorCode::InvalidArgumentValue),
        }
    }
}

/// State shared by the master and its subordinates.
#[derive(Debug)]
struct Shared {
    /// Region size and locator capacity.
    config: Mutex<MemoryConfig>,
    /// `None` until [`MemoryManager::initialize`].
    arena: RwLock<Option<Arena>>,
    stats: MemoryStats,
}

/// Locator-based memory manager.
///
/// Allocation is monotonic: every successful allocation returns a locator
/// greater than all previous ones, and locators are never reused. Storage of
/// released locators is reused by exact aligned size.
///
/// The manager is explicitly constructed and owned. [`MemoryManager::master`]
/// creates the single master instance; [`MemoryManager::subordinate`] hands
/// out views that share the table but fail master-only operations with
/// `OperationAvailableOnlyToMasterManager`.
#[derive(Debug)]
pub struct MemoryManager {
    role: ManagerRole,
    shared: Arc<Shared>,
}

impl MemoryManager {
    /// Creates the master manager for a region described by `config`.
    ///
    /// The region is not materialized until [`initialize`](Self::initialize).
    pub fn master(config: MemoryConfig) -> MemoryResult<Self> {
        validate_region_size(config.region_size)?;
        if config.max_locators == 0 {
            return Err(MemoryErrorCode::InvalidArgumentValue);
        }
        Ok(Self {
            role: ManagerRole::Master,
            shared: Arc::new(Shared {
                config: Mutex::new(config),
                arena: RwLock::new(None),
                stats: MemoryStats::new(),
            }),
        })
    }

    /// Returns a subordinate view over the same table and region.
    #[must_use]
    pub fn subordinate(&self) -> Self {
        Self {
            role: ManagerRole::Subordinate,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Returns this handle's role.
    pub fn role(&self) -> ManagerRole {
        self.role
    }

    /// Returns true for the master handle.
    pub fn is_master(&self) -> bool {
        self.role == ManagerRole::Master
    }

    fn require_master(&self) -> MemoryResult<()> {
        if self.is_master() {
            Ok(())
        } else {
            Err(MemoryErrorCode::OperationAvailableOnlyToMasterManager)
        }
    }

    /// Materializes the region. Master only.
    pub fn initialize(&self) -> MemoryResult<()> {
        self.require_master()?;
        let mut arena = self.shared.arena.write();
        if arena.is_some() {
            return Err(MemoryErrorCode::AlreadyInitialized);
        }
        let region_size = self.shared.config.lock().region_size;
        *arena = Some(Arena::new(region_size));
        info!(region_size, "memory region initialized");
        Ok(())
    }

    /// Returns true once the region is materialized.
    pub fn is_initialized(&self) -> bool {
        self.shared.arena.read().is_some()
    }

    /// Drops every locator's storage and resets the allocation counters.
    /// Master only.
    ///
    /// Every outstanding locator becomes released. The locator sequence is
    /// not rewound, so locators handed out after a reset are still greater
    /// than all earlier ones.
    pub fn reset(&self) -> MemoryResult<()> {
        self.require_master()?;
        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;
        for slot in arena.slots.iter_mut().skip(1) {
            *slot = Slot::Released;
        }
        arena.bytes.fill(0);
        arena.next_offset = RESERVED_REGION_PREFIX;
        arena.free_blocks.clear();
        self.shared.stats.reset();
        info!(last_allocated = %arena.last_allocated(), "memory region reset");
        Ok(())
    }

    /// Changes the region size. Master only.
    ///
    /// Shrinking below storage that was ever handed out fails with
    /// `InsufficientMemorySize`.
    pub fn set_region_size(&self, region_size: u64) -> MemoryResult<()> {
        self.require_master()?;
        validate_region_size(region_size)?;
        let mut guard = self.shared.arena.write();
        if let Some(arena) = guard.as_mut() {
            if region_size < arena.next_offset {
                return Err(MemoryErrorCode::InsufficientMemorySize);
            }
            arena.bytes.resize(region_size as usize, 0);
        }
        self.shared.config.lock().region_size = region_size;
        debug!(region_size, "memory region resized");
        Ok(())
    }

    /// Returns the configured region size.
    pub fn region_size(&self) -> u64 {
        self.shared.config.lock().region_size
    }

    /// Allocates a fresh locator backed by `size` bytes of storage.
    ///
    /// Fails with `InsufficientMemorySize` when the region is exhausted and
    /// `AllocationCountTooLarge` when the locator table is full.
    pub fn allocate_object(&self, size: u64) -> MemoryResult<(Locator, AddressOffset)> {
        let result = self.try_allocate(size);
        if let Err(code) = result {
            self.shared.stats.record_failure();
            debug!(size, code = %CodeDisplay(code), "allocation failed");
        }
        result
    }

    fn try_allocate(&self, size: u64) -> MemoryResult<(Locator, AddressOffset)> {
        let max_locators = self.shared.config.lock().max_locators;
        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;

        validate_size(size, arena.region_size())?;
        let capacity = align_up(size)?;
        if arena.last_allocated().as_u64() >= max_locators {
            return Err(MemoryErrorCode::AllocationCountTooLarge);
        }
        let offset = arena.take_block(capacity)?;
        arena.bytes[offset.range(capacity)].fill(0);

        arena.slots.push(Slot::Live {
            offset,
            capacity,
            len: size,
        });
        let locator = arena.last_allocated();
        self.shared.stats.record_allocation(capacity);
        Ok((locator, offset))
    }

    /// Moves a live locator to fresh storage of `size` bytes.
    ///
    /// The object's bytes are copied, truncated to the new size. Returns the
    /// old and new offsets; the old block is freed.
    pub fn reallocate(
        &self,
        locator: Locator,
        size: u64,
    ) -> MemoryResult<(AddressOffset, AddressOffset)> {
        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;

        let (old_offset, old_capacity, old_len) = arena.live(locator)?;
        validate_size(size, arena.region_size())?;
        let capacity = align_up(size)?;
        let new_offset = match arena.take_block(capacity) {
            Ok(offset) => offset,
            Err(code) => {
                self.shared.stats.record_failure();
                return Err(code);
            }
        };

        let keep = old_len.min(size);
        let src = old_offset.range(keep);
        arena
            .bytes
            .copy_within(src, new_offset.as_u64() as usize);
        arena.bytes[new_offset.range(capacity)][keep as usize..].fill(0);
        arena.give_block(old_offset, old_capacity);

        arena.slots[locator.as_index()] = Slot::Live {
            offset: new_offset,
            capacity,
            len: keep,
        };
        self.shared
            .stats
            .record_reallocation(old_capacity, capacity);
        Ok((old_offset, new_offset))
    }

    /// Releases a locator and frees its storage.
    ///
    /// Releasing the invalid locator, a locator above the highest ever
    /// allocated, or a locator that is not live is a fatal invariant
    /// violation.
    pub fn release(&self, locator: Locator) -> EmberResult<()> {
        invariant!(locator.is_valid(), "cannot release the invalid locator");

        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;
        let last = arena.last_allocated();
        invariant!(
            locator <= last,
            "released locator {} exceeds the highest allocated locator {}",
            locator,
            last
        );

        let slot = arena.slot(locator);
        invariant!(
            matches!(slot, Some(Slot::Live { .. })),
            "locator {} is not live (slot: {:?})",
            locator,
            slot
        );

        if let Some(Slot::Live {
            offset, capacity, ..
        }) = slot
        {
            arena.give_block(offset, capacity);
            arena.slots[locator.as_index()] = Slot::Released;
            self.shared.stats.record_release(capacity);
        }
        Ok(())
    }

    /// Returns the storage offset of a live locator.
    pub fn offset_of(&self, locator: Locator) -> MemoryResult<AddressOffset> {
        let guard = self.shared.arena.read();
        let arena = guard.as_ref().ok_or(MemoryErrorCode::NotInitialized)?;
        arena.live(locator).map(|(offset, _, _)| offset)
    }

    /// Returns the highest locator ever allocated.
    pub fn last_allocated(&self) -> Locator {
        self.shared
            .arena
            .read()
            .as_ref()
            .map_or(Locator::INVALID, Arena::last_allocated)
    }

    /// Copies `data` to the region at `offset`.
    pub fn write(&self, offset: AddressOffset, data: &[u8]) -> MemoryResult<()> {
        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;
        offset.validate_span(data.len() as u64, arena.region_size())?;
        arena.bytes[offset.range(data.len() as u64)].copy_from_slice(data);
        Ok(())
    }

    /// Reads `len` bytes from the region at `offset`.
    pub fn read(&self, offset: AddressOffset, len: u64) -> MemoryResult<Vec<u8>> {
        let guard = self.shared.arena.read();
        let arena = guard.as_ref().ok_or(MemoryErrorCode::NotInitialized)?;
        offset.validate_span(len, arena.region_size())?;
        Ok(arena.bytes[offset.range(len)].to_vec())
    }

    /// Replaces the bytes of a live locator's object.
    ///
    /// Fails with `MemorySizeTooLarge` if `data` exceeds the locator's
    /// capacity; use [`reallocate`](Self::reallocate) to grow it first.
    pub fn write_object(&self, locator: Locator, data: &[u8]) -> MemoryResult<()> {
        let mut guard = self.shared.arena.write();
        let arena = guard.as_mut().ok_or(MemoryErrorCode::NotInitialized)?;
        let (offset, capacity, _) = arena.live(locator)?;
        let len = data.len() as u64;
        if len > capacity {
            warn!(%locator, len, capacity, "object write exceeds capacity");
            return Err(MemoryErrorCode::MemorySizeTooLarge);
        }
        arena.bytes[offset.range(len)].copy_from_slice(data);
        arena.slots[locator.as_index()] = Slot::Live {
            offset,
            capacity,
            len,
        };
        Ok(())
    }

    /// Returns a copy of a live locator's object bytes.
    pub fn read_object(&self, locator: Locator) -> MemoryResult<Vec<u8>> {
        let guard = self.shared.arena.read();
        let arena = guard.as_ref().ok_or(MemoryErrorCode::NotInitialized)?;
        let (offset, _, len) = arena.live(locator)?;
        Ok(arena.bytes[offset.range(len)].to_vec())
    }

    /// Returns the statistics shared by every handle on this region.
    pub fn stats(&self) -> &MemoryStats {
        &self.shared.stats
    }
}
