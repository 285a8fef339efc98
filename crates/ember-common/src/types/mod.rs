//! Type definitions for Ember.
//!
//! This module contains the core identifiers, timestamps and event kinds
//! shared by every Ember component.

mod events;
mod ids;
mod timestamps;

pub use events::{EventMask, EventType};
pub use ids::{FieldPosition, Locator, ObjectId, ObjectType};
pub use timestamps::TxnTimestamp;
