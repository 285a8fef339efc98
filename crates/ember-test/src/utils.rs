//! Shared fixtures for the integration tests.

use std::sync::Arc;

use ember_common::config::EngineConfig;
use ember_common::{EventType, ObjectId, ObjectType};
use ember_rules::{RuleBinding, RuleContext};
use ember_server::database::Database;
use parking_lot::Mutex;

/// Row type of the `widget` table.
pub const WIDGET: ObjectType = ObjectType::new(100);

/// Row type of the `gadget` table.
pub const GADGET: ObjectType = ObjectType::new(200);

/// Opens an in-memory database with `widget(name, weight)` and
/// `gadget(label)` tables.
pub fn open_database(config: EngineConfig) -> Database {
    let db = Database::open(config).expect("open database");
    db.create_table("widget", WIDGET, &["name", "weight"])
        .expect("create widget");
    db.create_table("gadget", GADGET, &["label"])
        .expect("create gadget");
    db
}

/// One observed rule invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fired {
    /// Rule that ran.
    pub rule: String,
    /// Event that fired it.
    pub event_type: EventType,
    /// Row it fired for; invalid for transaction events.
    pub record_id: ObjectId,
}

/// Collects rule invocations in the order they happen.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    fired: Arc<Mutex<Vec<Fired>>>,
}

impl Recorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a binding that records every invocation under `rule`.
    pub fn binding(&self, ruleset: &str, rule: &str) -> RuleBinding {
        let fired = Arc::clone(&self.fired);
        let name = rule.to_string();
        RuleBinding::new(ruleset, rule, move |ctx: &RuleContext| {
            fired.lock().push(Fired {
                rule: name.clone(),
                event_type: ctx.event_type(),
                record_id: ctx.record_id(),
            });
            Ok(())
        })
    }

    /// Returns the invocations so far.
    pub fn fired(&self) -> Vec<Fired> {
        self.fired.lock().clone()
    }

    /// Returns how many invocations were recorded.
    pub fn count(&self) -> usize {
        self.fired.lock().len()
    }

    /// Forgets every recorded invocation.
    pub fn clear(&self) {
        self.fired.lock().clear();
    }
}
