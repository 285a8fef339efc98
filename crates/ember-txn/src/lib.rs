//! # ember-txn
//!
//! Transactions and the versioned object store for Ember.
//!
//! - [`TransactionManager`]: authoritative timestamp sequence, first-committer-wins
//!   validation, watermark tracking
//! - [`ObjectStore`]: version chains, per-transaction write logs, snapshot reads
//! - [`Session`] / [`AutoTransaction`]: client-side transaction state
//! - [`CommitTrigger`]: seam through which committed row events leave the store
//! - [`Reclaimer`]: freezes old timestamps and releases superseded versions
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use ember_catalog::{Catalog, TypeIdCache};
//! use ember_common::config::MemoryConfig;
//! use ember_common::types::ObjectType;
//! use ember_memory::MemoryManager;
//! use ember_txn::{ObjectStore, Session, TransactionManager};
//!
//! let catalog = Arc::new(Catalog::new());
//! let widget = ObjectType::new(1);
//! catalog.create_table("widget", widget, &["name"]).unwrap();
//!
//! let memory = MemoryManager::master(MemoryConfig {
//!     region_size: 1024 * 1024,
//!     max_locators: 1024,
//! })
//! .unwrap();
//! memory.initialize().unwrap();
//! let store = Arc::new(ObjectStore::new(
//!     Arc::new(TransactionManager::new()),
//!     memory.subordinate(),
//!     Arc::new(TypeIdCache::new(catalog)),
//! ));
//!
//! let mut session = Session::new(store);
//! session.begin_transaction().unwrap();
//! let id = session.insert(widget, b"sprocket").unwrap();
//! session.commit_transaction().unwrap();
//!
//! session.begin_transaction().unwrap();
//! assert_eq!(session.get(id).unwrap().unwrap().as_ref(), b"sprocket");
//! session.rollback_transaction().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod metadata;
pub mod reclaim;
pub mod session;
pub mod store;
pub mod trigger;

pub use manager::{TransactionManager, TransactionStats};
pub use metadata::{TxnMetadata, TxnStatus};
pub use reclaim::{ReclaimResult, ReclaimStats, Reclaimer};
pub use session::{AutoTransaction, Session};
pub use store::{CollectResult, ObjectStore};
pub use trigger::{CommitTrigger, CommittedTxn, RowEvent};
