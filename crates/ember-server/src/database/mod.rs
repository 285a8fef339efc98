//! Database facade.
//!
//! [`Database`] owns one instance of every engine component and wires them
//! together: the master memory manager, the catalog and its type cache, the
//! transaction manager, the object store, the rule engine, and the reclaimer.

mod engine;

pub use engine::{Database, DatabaseStats};
