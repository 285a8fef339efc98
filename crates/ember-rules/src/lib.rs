//! # ember-rules
//!
//! Reactive rules for Ember. Handlers are bound to `(type, event)` pairs and
//! invoked with a [`RuleContext`] for every matching committed event.
//!
//! ```
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! use ember_common::types::EventType;
//! use ember_rules::RuleBinding;
//!
//! let fired = Arc::new(AtomicUsize::new(0));
//! let counter = Arc::clone(&fired);
//! let binding = RuleBinding::new("inventory", "on_restock", move |ctx| {
//!     assert_eq!(ctx.event_type(), EventType::RowInsert);
//!     counter.fetch_add(1, Ordering::SeqCst);
//!     Ok(())
//! });
//! assert_eq!(binding.to_string(), "inventory::on_restock");
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod binding;
pub mod engine;
pub mod event_log;
mod registry;
pub mod scope;
pub mod stats;

pub use binding::{LastOperation, RuleBinding, RuleContext, RuleFn};
pub use engine::{RuleEngine, RuleFailure};
pub use event_log::{EventLogEntry, EVENT_LOG_FIELDS, EVENT_LOG_TYPE};
pub use registry::{SubscribedRule, SubscriptionFilter};
pub use scope::TxnScope;
pub use stats::RuleStats;
