//! # ember-common
//!
//! Common types, errors, and utilities for Ember.
//!
//! This crate provides the foundational types and abstractions used across
//! all Ember components. It includes:
//!
//! - **Types**: Object/type identifiers, locators, field positions,
//!   transaction timestamps with the frozen marker bit, and event kinds
//! - **Errors**: Unified error handling with `EmberError`, including the
//!   distinct fatal invariant-violation variant
//! - **Config**: Engine configuration structures
//! - **Sync**: Blocking FIFO queue and resettable one-time initialization
//! - **Constants**: System-wide constants and limits
//!
//! ## Example
//!
//! ```rust
//! use ember_common::types::{ObjectId, TxnTimestamp};
//! use ember_common::error::EmberResult;
//!
//! fn example() -> EmberResult<()> {
//!     let id = ObjectId::new(42);
//!     let ts = TxnTimestamp::new(7).set_frozen();
//!     assert!(ts.is_frozen());
//!     assert_eq!(ts.clear_frozen().value(), 7);
//!     assert!(id.is_valid());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod sync;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{EmberError, EmberResult, ErrorCode};
pub use types::{
    EventMask, EventType, FieldPosition, Locator, ObjectId, ObjectType, TxnTimestamp,
};

#[doc(hidden)]
pub use tracing as __tracing;
