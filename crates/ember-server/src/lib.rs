//! # ember-server
//!
//! Database facade and server process for Ember.
//!
//! This crate provides:
//!
//! - **Database**: wires the memory manager, catalog, type cache,
//!   transaction manager, object store, rule engine, and reclaimer into one
//!   owned value. This is the main entry point for embedding Ember.
//!
//! - **Configuration**: TOML-backed server configuration wrapping the engine
//!   configuration.
//!
//! - **emberd**: the server process.
//!
//! # Quick Start
//!
//! ```
//! use ember_common::ObjectType;
//! use ember_server::database::Database;
//!
//! let db = Database::open_in_memory().unwrap();
//! let widget = ObjectType::new(100);
//! db.create_table("widget", widget, &["name"]).unwrap();
//!
//! let mut session = db.session();
//! session.begin_transaction().unwrap();
//! let id = session.insert(widget, b"bolt").unwrap();
//! session.commit_transaction().unwrap();
//!
//! session.begin_transaction().unwrap();
//! assert_eq!(session.get(id).unwrap().unwrap().as_ref(), b"bolt");
//! session.rollback_transaction().unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Server configuration.
pub mod config;

/// Database facade.
pub mod database;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use database::{Database, DatabaseStats};
