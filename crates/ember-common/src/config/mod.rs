//! Configuration for Ember.
//!
//! This module provides configuration structures for the engine components.

mod engine;

pub use engine::{EngineConfig, MemoryConfig, RuleDispatchMode, RulesConfig, TxnConfig};
