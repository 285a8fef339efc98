//! Error handling for Ember.
//!
//! This module provides a unified error type and result alias used
//! across all Ember components, plus the fatal invariant-violation helpers.

mod ember;
mod invariant;

pub use ember::{EmberError, ErrorCode};
pub use invariant::assert_invariant;

/// Result type alias for Ember operations.
pub type EmberResult<T> = std::result::Result<T, EmberError>;
