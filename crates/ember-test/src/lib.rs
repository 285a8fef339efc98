//! # ember-test
//!
//! Integration tests for Ember.
//!
//! This crate contains:
//! - Checks of the engine's testable properties across crate boundaries
//! - Multi-threaded transaction and dispatch tests
//! - End-to-end tests through the `Database` facade

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;
