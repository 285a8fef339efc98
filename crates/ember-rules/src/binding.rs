//! Rule bindings and per-invocation rule context.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use ember_common::types::{EventType, FieldPosition, ObjectId, ObjectType, TxnTimestamp};
use ember_common::{EmberError, EmberResult};
use ember_txn::{ObjectStore, Session};

use crate::scope::TxnScope;

/// Signature of a rule handler.
pub type RuleFn = dyn Fn(&RuleContext) -> EmberResult<()> + Send + Sync;

/// A named rule handler.
///
/// Equality and hashing use the `(ruleset, rule)` name pair only, so the same
/// logical rule cannot be subscribed twice under different handlers.
#[derive(Clone)]
pub struct RuleBinding {
    ruleset: Arc<str>,
    rule: Arc<str>,
    handler: Arc<RuleFn>,
    line_number: u32,
}

impl RuleBinding {
    /// Creates a binding.
    pub fn new<F>(ruleset: &str, rule: &str, handler: F) -> Self
    where
        F: Fn(&RuleContext) -> EmberResult<()> + Send + Sync + 'static,
    {
        Self {
            ruleset: Arc::from(ruleset),
            rule: Arc::from(rule),
            handler: Arc::new(handler),
            line_number: 0,
        }
    }

    /// Records the source line the rule was declared on.
    #[must_use]
    pub fn with_line_number(mut self, line_number: u32) -> Self {
        self.line_number = line_number;
        self
    }

    /// Returns the ruleset name.
    pub fn ruleset(&self) -> &str {
        &self.ruleset
    }

    /// Returns the rule name.
    pub fn rule(&self) -> &str {
        &self.rule
    }

    /// Returns the declaring source line, 0 if unknown.
    pub fn line_number(&self) -> u32 {
        self.line_number
    }

    /// Returns true if both bindings share the same handler.
    pub fn same_handler(&self, other: &RuleBinding) -> bool {
        Arc::ptr_eq(&self.handler, &other.handler)
    }

    /// Returns true if the binding is named `ruleset::rule`.
    pub fn is_named(&self, ruleset: &str, rule: &str) -> bool {
        &*self.ruleset == ruleset && &*self.rule == rule
    }

    pub(crate) fn validate(&self) -> EmberResult<()> {
        if self.ruleset.is_empty() || self.rule.is_empty() {
            return Err(EmberError::InvalidRuleBinding {
                message: "ruleset and rule names cannot be empty".into(),
            });
        }
        Ok(())
    }

    pub(crate) fn call(&self, context: &RuleContext) -> EmberResult<()> {
        (self.handler)(context)
    }
}

impl PartialEq for RuleBinding {
    fn eq(&self, other: &Self) -> bool {
        self.ruleset == other.ruleset && self.rule == other.rule
    }
}

impl Eq for RuleBinding {}

impl Hash for RuleBinding {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ruleset.hash(state);
        self.rule.hash(state);
    }
}

impl fmt::Debug for RuleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleBinding")
            .field("ruleset", &self.ruleset)
            .field("rule", &self.rule)
            .field("line_number", &self.line_number)
            .finish()
    }
}

impl fmt::Display for RuleBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.ruleset, self.rule)
    }
}

/// The logical operation a row event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastOperation {
    /// No row operation on the queried type.
    None,
    /// A row was updated.
    RowUpdate,
    /// A row was inserted.
    RowInsert,
    /// A row was deleted.
    RowDelete,
}

/// Data passed to a rule handler for one firing event.
#[derive(Clone)]
pub struct RuleContext {
    event_type: EventType,
    object_type: ObjectType,
    record: ObjectId,
    changed_fields: Vec<FieldPosition>,
    begin_ts: TxnTimestamp,
    commit_ts: TxnTimestamp,
    store: Weak<ObjectStore>,
}

impl RuleContext {
    /// Context for a row event.
    pub(crate) fn row(
        event_type: EventType,
        object_type: ObjectType,
        record: ObjectId,
        changed_fields: Vec<FieldPosition>,
        begin_ts: TxnTimestamp,
        commit_ts: TxnTimestamp,
        store: Weak<ObjectStore>,
    ) -> Self {
        Self {
            event_type,
            object_type,
            record,
            changed_fields,
            begin_ts,
            commit_ts,
            store,
        }
    }

    /// Context for a transaction event.
    pub(crate) fn transaction(
        event_type: EventType,
        begin_ts: TxnTimestamp,
        commit_ts: TxnTimestamp,
        store: Weak<ObjectStore>,
    ) -> Self {
        Self::row(
            event_type,
            ObjectType::INVALID,
            ObjectId::INVALID,
            Vec::new(),
            begin_ts,
            commit_ts,
            store,
        )
    }

    /// Returns the firing event.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Returns the type of the written object, invalid for transaction events.
    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    /// Returns the id of the written object, invalid for transaction events.
    pub fn record_id(&self) -> ObjectId {
        self.record
    }

    /// Returns the fields changed by an update.
    pub fn changed_fields(&self) -> &[FieldPosition] {
        &self.changed_fields
    }

    /// Returns the begin timestamp of the transaction that fired the event.
    pub fn begin_ts(&self) -> TxnTimestamp {
        self.begin_ts
    }

    /// Returns the commit timestamp, invalid for begin and rollback events.
    pub fn commit_ts(&self) -> TxnTimestamp {
        self.commit_ts
    }

    /// Reports the operation that fired this rule, as seen from rules
    /// generated for `object_type`.
    ///
    /// Returns [`LastOperation::None`] when `object_type` is not the firing
    /// type or the event is not a row event.
    pub fn last_operation(&self, object_type: ObjectType) -> LastOperation {
        if object_type != self.object_type {
            return LastOperation::None;
        }
        match self.event_type {
            EventType::RowUpdate => LastOperation::RowUpdate,
            EventType::RowInsert => LastOperation::RowInsert,
            EventType::RowDelete => LastOperation::RowDelete,
            EventType::Begin | EventType::Commit | EventType::Rollback => LastOperation::None,
        }
    }

    /// Opens a new session on the store that fired the event.
    pub fn session(&self) -> EmberResult<Session> {
        self.store
            .upgrade()
            .map(Session::new)
            .ok_or(EmberError::RuleEngineShutdown)
    }

    /// Runs `f` inside a transaction of its own on a new session, committing
    /// if `f` succeeds.
    pub fn with_transaction<T, F>(&self, f: F) -> EmberResult<T>
    where
        F: FnOnce(&mut Session) -> EmberResult<T>,
    {
        let mut session = self.session()?;
        session.begin_transaction()?;
        match f(&mut session) {
            Ok(value) => {
                session.commit_transaction()?;
                Ok(value)
            }
            Err(e) => {
                session.rollback_transaction()?;
                Err(e)
            }
        }
    }

    /// Like [`with_transaction`](Self::with_transaction) on a caller-owned
    /// session, reusing its transaction if one is active.
    ///
    /// A transaction begun here never fires rules. Writes made inside a
    /// transaction the caller already began fire rules when that
    /// transaction commits.
    pub fn within<T, F>(&self, session: &mut Session, f: F) -> EmberResult<T>
    where
        F: FnOnce(&Session) -> EmberResult<T>,
    {
        let scope = TxnScope::begin(session)?;
        let value = f(&*scope)?;
        scope.commit()?;
        Ok(value)
    }
}

impl fmt::Debug for RuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleContext")
            .field("event_type", &self.event_type)
            .field("object_type", &self.object_type)
            .field("record", &self.record)
            .field("changed_fields", &self.changed_fields)
            .field("commit_ts", &self.commit_ts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::RuleEngine;
    use crate::tests::{create_env, GADGET};
    use ember_common::config::RulesConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context(event_type: EventType, object_type: ObjectType) -> RuleContext {
        RuleContext::row(
            event_type,
            object_type,
            ObjectId::new(5),
            Vec::new(),
            TxnTimestamp::new(1),
            TxnTimestamp::new(2),
            Weak::new(),
        )
    }

    #[test]
    fn test_binding_identity_by_name() {
        let a = RuleBinding::new("inventory", "restock", |_| Ok(()));
        let b = RuleBinding::new("inventory", "restock", |_| Ok(()));
        let c = RuleBinding::new("inventory", "audit", |_| Ok(()));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.same_handler(&b));
        assert!(a.same_handler(&a.clone()));
        assert_eq!(a.to_string(), "inventory::restock");
    }

    #[test]
    fn test_binding_validation() {
        assert!(RuleBinding::new("", "r", |_| Ok(())).validate().is_err());
        assert!(RuleBinding::new("s", "", |_| Ok(())).validate().is_err());
        assert!(RuleBinding::new("s", "r", |_| Ok(()))
            .with_line_number(12)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_last_operation_matches_firing_type() {
        let widget = ObjectType::new(1);
        let gadget = ObjectType::new(2);

        let ctx = context(EventType::RowInsert, widget);
        assert_eq!(ctx.last_operation(widget), LastOperation::RowInsert);
        assert_eq!(ctx.last_operation(gadget), LastOperation::None);

        assert_eq!(
            context(EventType::RowUpdate, widget).last_operation(widget),
            LastOperation::RowUpdate
        );
        assert_eq!(
            context(EventType::RowDelete, widget).last_operation(widget),
            LastOperation::RowDelete
        );
    }

    #[test]
    fn test_last_operation_none_for_transaction_events() {
        for event in [EventType::Begin, EventType::Commit, EventType::Rollback] {
            let ctx = RuleContext::transaction(
                event,
                TxnTimestamp::new(1),
                TxnTimestamp::INVALID,
                Weak::new(),
            );
            assert_eq!(ctx.last_operation(ctx.object_type()), LastOperation::None);
            assert_eq!(ctx.last_operation(ObjectType::new(1)), LastOperation::None);
        }
    }

    #[test]
    fn test_within_fires_rules_only_for_caller_transaction() {
        let (catalog, store) = create_env();
        let config = RulesConfig {
            log_events: false,
            ..RulesConfig::default()
        };
        let engine = RuleEngine::start(&store, catalog, config).unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let binding = {
            let fired = Arc::clone(&fired);
            RuleBinding::new("test", "count", move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        };
        engine
            .subscribe_table_rule(GADGET, EventType::RowInsert.into(), &binding)
            .unwrap();

        let ctx = RuleContext::transaction(
            EventType::Commit,
            TxnTimestamp::new(1),
            TxnTimestamp::new(2),
            Arc::downgrade(&store),
        );
        let mut session = ctx.session().unwrap();

        ctx.within(&mut session, |s| s.insert(GADGET, b"own")).unwrap();
        assert!(!session.is_transaction_active());
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        session.begin_transaction().unwrap();
        ctx.within(&mut session, |s| s.insert(GADGET, b"shared")).unwrap();
        assert!(session.is_transaction_active());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        session.commit_transaction().unwrap();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_session_after_store_dropped() {
        let ctx = context(EventType::RowInsert, ObjectType::new(1));
        assert!(matches!(ctx.session(), Err(EmberError::RuleEngineShutdown)));
    }
}
