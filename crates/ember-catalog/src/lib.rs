//! # ember-catalog
//!
//! In-memory catalog of tables and fields, the type-to-record-id cache built
//! from it, and the validation applied to rule subscriptions.
//!
//! The [`TypeIdCache`] is built lazily, exactly once per generation, from a
//! full [`CatalogScan`]. It is invalidated wholesale with
//! [`TypeIdCache::clear`] after a structural catalog change, never patched
//! incrementally.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod catalog;
mod subscription;
mod type_cache;

pub use catalog::{Catalog, CatalogScan, FieldRecord, TableRecord};
pub use subscription::SubscriptionChecker;
pub use type_cache::{TypeCacheStats, TypeIdCache};
