//! # ember-memory
//!
//! Locator-based memory manager for Ember.
//!
//! Objects are addressed through *locators*: logical handles, assigned in
//! strictly increasing order and never reused, that map to the offset of the
//! object's bytes inside a single backing region. The indirection lets the
//! transaction layer move an object's storage (copy-on-write versions) and
//! reclaim storage by timestamp range without exposing addresses.
//!
//! ## Components
//!
//! - [`MemoryManager`]: locator table plus backing region, with an explicit
//!   master/subordinate role for region-wide operations
//! - [`AddressOffset`]: validated region offsets and the address arithmetic
//!   helpers
//! - [`TxnAllocations`]: per-transaction stack of allocation records
//! - [`MemoryErrorCode`]: the closed error-code surface returned by hot-path
//!   operations
//!
//! ## Example
//!
//! ```rust
//! use ember_common::config::MemoryConfig;
//! use ember_memory::MemoryManager;
//!
//! let manager = MemoryManager::master(MemoryConfig::default()).unwrap();
//! manager.initialize().unwrap();
//!
//! let (first, _) = manager.allocate_object(16).unwrap();
//! let (second, _) = manager.allocate_object(16).unwrap();
//! assert!(second > first);
//!
//! manager.write_object(first, b"hello").unwrap();
//! assert_eq!(manager.read_object(first).unwrap(), b"hello");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod allocations;
mod error;
mod manager;
mod offset;
mod stats;

pub use allocations::{AllocationRecord, TxnAllocations};
pub use error::{MemoryErrorCode, MemoryResult};
pub use manager::{ManagerRole, MemoryManager};
pub use offset::{align_up, validate_size, AddressOffset};
pub use stats::MemoryStats;
