//! System-wide constants for Ember.
//!
//! This module defines constants used across the engine.

// =============================================================================
// Memory Constants
// =============================================================================

/// Granularity, in bytes, of every offset and allocation in the backing region.
///
/// Offsets handed out by the memory manager are multiples of this value.
pub const MEMORY_ALIGNMENT: u64 = 8;

/// Default size of the backing object region (64 MB).
pub const DEFAULT_REGION_SIZE: u64 = 64 * 1024 * 1024;

/// Minimum size of the backing object region (4 KB).
pub const MIN_REGION_SIZE: u64 = 4 * 1024;

/// Default capacity of the locator table.
pub const DEFAULT_MAX_LOCATORS: u64 = 1 << 20;

/// Offset 0 is reserved so that a zero offset always means "no storage".
pub const RESERVED_REGION_PREFIX: u64 = MEMORY_ALIGNMENT;

// =============================================================================
// Transaction Constants
// =============================================================================

/// Bit position of the frozen marker inside a transaction timestamp.
pub const FROZEN_BIT_SHIFT: u32 = 63;

/// Mask selecting the frozen marker bit.
pub const FROZEN_BIT_MASK: u64 = 1 << FROZEN_BIT_SHIFT;

/// Mask selecting the 63-bit chronological timestamp value.
pub const TIMESTAMP_VALUE_MASK: u64 = !FROZEN_BIT_MASK;

/// First timestamp handed out by the transaction manager.
pub const FIRST_TIMESTAMP: u64 = 1;

// =============================================================================
// Rules Constants
// =============================================================================

/// Default number of background rule-dispatch workers when background
/// dispatch is requested without an explicit count.
pub const DEFAULT_RULE_WORKERS: usize = 2;

/// Name of the system table holding the engine's event log.
pub const EVENT_LOG_TABLE_NAME: &str = "ember_event_log";

/// Object type of event log rows.
pub const EVENT_LOG_OBJECT_TYPE: u64 = 0x7fff_ffff_0000_0001;
