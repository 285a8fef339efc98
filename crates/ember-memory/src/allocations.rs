//! Per-transaction allocation stack.

use ember_common::error::EmberResult;
use ember_common::types::Locator;

use crate::error::{MemoryErrorCode, MemoryResult};
use crate::manager::MemoryManager;
use crate::offset::AddressOffset;

/// One storage change made by a transaction.
///
/// `old_offset` is [`AddressOffset::INVALID`] when the locator itself was
/// allocated by the transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationRecord {
    /// The locator whose storage changed.
    pub locator: Locator,
    /// Storage before the change.
    pub old_offset: AddressOffset,
    /// Storage after the change.
    pub new_offset: AddressOffset,
}

impl AllocationRecord {
    /// Returns true if the record allocated a fresh locator.
    #[inline]
    #[must_use]
    pub const fn is_fresh(&self) -> bool {
        !self.old_offset.is_valid()
    }
}

/// Ordered stack of the allocations made by one transaction.
///
/// On rollback the stack is drained and every locator the transaction
/// allocated is released.
#[derive(Debug, Default)]
pub struct TxnAllocations {
    records: Vec<AllocationRecord>,
}

impl TxnAllocations {
    /// Creates an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes a record.
    pub fn record(&mut self, locator: Locator, old_offset: AddressOffset, new_offset: AddressOffset) {
        self.records.push(AllocationRecord {
            locator,
            old_offset,
            new_offset,
        });
    }

    /// Returns the number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over the records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &AllocationRecord> {
        self.records.iter()
    }

    /// Keeps the first `keep` records and returns the rest, newest first.
    ///
    /// Fails with `AllocationCountTooLarge` when `keep` exceeds the number of
    /// records.
    pub fn truncate(&mut self, keep: usize) -> MemoryResult<Vec<AllocationRecord>> {
        if keep > self.records.len() {
            return Err(MemoryErrorCode::AllocationCountTooLarge);
        }
        let mut removed = self.records.split_off(keep);
        removed.reverse();
        Ok(removed)
    }

    /// Removes and returns every record, newest first.
    pub fn drain(&mut self) -> Vec<AllocationRecord> {
        let mut removed = std::mem::take(&mut self.records);
        removed.reverse();
        removed
    }

    /// Truncates to `keep` records and releases every locator allocated by
    /// the removed records.
    pub fn rollback_to(&mut self, keep: usize, manager: &MemoryManager) -> EmberResult<usize> {
        let removed = self.truncate(keep)?;
        release_fresh(&removed, manager)
    }

    /// Drains the stack and releases every locator it allocated.
    pub fn rollback(&mut self, manager: &MemoryManager) -> EmberResult<usize> {
        let removed = self.drain();
        release_fresh(&removed, manager)
    }
}

fn release_fresh(records: &[AllocationRecord], manager: &MemoryManager) -> EmberResult<usize> {
    let mut released = 0;
    for record in records.iter().filter(|r| r.is_fresh()) {
        manager.release(record.locator)?;
        released += 1;
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::config::MemoryConfig;

    fn manager() -> MemoryManager {
        let manager = MemoryManager::master(MemoryConfig {
            region_size: 64 * 1024,
            max_locators: 128,
        })
        .unwrap();
        manager.initialize().unwrap();
        manager
    }

    #[test]
    fn test_truncate() {
        let mut stack = TxnAllocations::new();
        for i in 1..=3 {
            stack.record(Locator::new(i), AddressOffset::INVALID, AddressOffset::new(i * 8));
        }

        assert_eq!(stack.truncate(4), Err(MemoryErrorCode::AllocationCountTooLarge));
        assert_eq!(stack.len(), 3);

        let removed = stack.truncate(1).unwrap();
        assert_eq!(stack.len(), 1);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].locator, Locator::new(3));

        assert!(stack.truncate(1).unwrap().is_empty());
    }

    #[test]
    fn test_rollback_releases_fresh_locators() {
        let manager = manager();
        let mut stack = TxnAllocations::new();

        let (a, a_offset) = manager.allocate_object(16).unwrap();
        stack.record(a, AddressOffset::INVALID, a_offset);
        let (old, new) = manager.reallocate(a, 32).unwrap();
        stack.record(a, old, new);
        let (b, b_offset) = manager.allocate_object(8).unwrap();
        stack.record(b, AddressOffset::INVALID, b_offset);

        assert_eq!(stack.rollback(&manager).unwrap(), 2);
        assert!(stack.is_empty());
        assert_eq!(manager.stats().live_locators(), 0);
    }

    #[test]
    fn test_rollback_to_keeps_prefix() {
        let manager = manager();
        let mut stack = TxnAllocations::new();

        let (a, a_offset) = manager.allocate_object(16).unwrap();
        stack.record(a, AddressOffset::INVALID, a_offset);
        let (b, b_offset) = manager.allocate_object(16).unwrap();
        stack.record(b, AddressOffset::INVALID, b_offset);

        assert_eq!(stack.rollback_to(1, &manager).unwrap(), 1);
        assert!(manager.offset_of(a).is_ok());
        assert!(manager.offset_of(b).is_err());
    }
}
