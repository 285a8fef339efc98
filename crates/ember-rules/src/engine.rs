//! Rule engine.
//!
//! The engine is installed on the object store as its commit trigger. For
//! every committed transaction it walks the row events in write-log order,
//! looks up the rules subscribed to each `(type, event)` pair and invokes
//! them in subscription order, then fires `commit` transaction rules.
//!
//! # Dispatch modes
//!
//! - `Immediate`: rules run synchronously on the committing thread and a
//!   failure is reported to the committer as [`EmberError::RuleFailed`].
//! - `Background`: the committed transaction is handed to worker threads
//!   through a [`BlockingQueue`]; failures are only recorded.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use ember_catalog::{Catalog, SubscriptionChecker};
use ember_common::config::{RuleDispatchMode, RulesConfig};
use ember_common::sync::BlockingQueue;
use ember_common::types::{EventMask, EventType, FieldPosition, ObjectId, ObjectType, TxnTimestamp};
use ember_common::{EmberError, EmberResult};
use ember_txn::{CommitTrigger, CommittedTxn, ObjectStore, Session};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::binding::{RuleBinding, RuleContext};
use crate::event_log::{self, EventLogEntry};
use crate::registry::{Registry, SubscribedRule, SubscriptionFilter};
use crate::stats::RuleStats;

/// Details of a failed rule invocation, passed to the exception handler.
#[derive(Debug, Clone)]
pub struct RuleFailure {
    /// Ruleset name.
    pub ruleset: String,
    /// Rule name.
    pub rule: String,
    /// Firing event.
    pub event_type: EventType,
    /// Firing type; invalid for transaction events.
    pub object_type: ObjectType,
    /// Firing record; invalid for transaction events.
    pub record_id: ObjectId,
    /// Error or panic message.
    pub message: String,
    /// Whether the handler panicked.
    pub panicked: bool,
}

type ExceptionHandler = dyn Fn(&RuleFailure) + Send + Sync;

struct Invocation {
    binding: RuleBinding,
    context: RuleContext,
}

#[derive(Default)]
struct Job {
    invocations: Vec<Invocation>,
    log: Vec<EventLogEntry>,
}

impl Job {
    fn is_empty(&self) -> bool {
        self.invocations.is_empty() && self.log.is_empty()
    }
}

struct EngineInner {
    store: Weak<ObjectStore>,
    checker: SubscriptionChecker,
    config: RulesConfig,
    registry: RwLock<Registry>,
    stats: RuleStats,
    exception_handler: RwLock<Option<Arc<ExceptionHandler>>>,
    running: AtomicBool,
    /// Present in background mode.
    queue: Option<BlockingQueue<Job>>,
    in_flight: Mutex<usize>,
    idle: Condvar,
}

impl EngineInner {
    fn build_commit_job(&self, committed: &CommittedTxn) -> Job {
        let registry = self.registry.read();
        let mut job = Job::default();

        for event in &committed.events {
            let bindings =
                registry.matching(event.object_type, event.event_type, &event.changed_fields);
            job.log.push(EventLogEntry {
                event_type: event.event_type,
                object_type: event.object_type,
                record_id: event.id,
                begin_ts: committed.begin_ts,
                commit_ts: committed.commit_ts,
                rules_invoked: !bindings.is_empty(),
            });
            for binding in bindings {
                job.invocations.push(Invocation {
                    binding,
                    context: RuleContext::row(
                        event.event_type,
                        event.object_type,
                        event.id,
                        event.changed_fields.clone(),
                        committed.begin_ts,
                        committed.commit_ts,
                        self.store.clone(),
                    ),
                });
            }
        }

        let bindings = registry.matching(ObjectType::INVALID, EventType::Commit, &[]);
        if !bindings.is_empty() {
            job.log.push(EventLogEntry {
                event_type: EventType::Commit,
                object_type: ObjectType::INVALID,
                record_id: ObjectId::INVALID,
                begin_ts: committed.begin_ts,
                commit_ts: committed.commit_ts,
                rules_invoked: true,
            });
        }
        for binding in bindings {
            job.invocations.push(Invocation {
                binding,
                context: RuleContext::transaction(
                    EventType::Commit,
                    committed.begin_ts,
                    committed.commit_ts,
                    self.store.clone(),
                ),
            });
        }
        job
    }

    fn build_transaction_job(&self, event: EventType, txn: TxnTimestamp) -> Job {
        let invocations = self
            .registry
            .read()
            .matching(ObjectType::INVALID, event, &[])
            .into_iter()
            .map(|binding| Invocation {
                binding,
                context: RuleContext::transaction(
                    event,
                    txn,
                    TxnTimestamp::INVALID,
                    self.store.clone(),
                ),
            })
            .collect();
        Job {
            invocations,
            log: Vec::new(),
        }
    }

    fn dispatch(&self, job: Job) -> EmberResult<()> {
        if job.is_empty() {
            return Ok(());
        }
        match &self.queue {
            Some(queue) => {
                *self.in_flight.lock() += 1;
                if queue.push(job).is_err() {
                    self.finish_job();
                    return Err(EmberError::RuleEngineShutdown);
                }
                Ok(())
            }
            None => self.run(job),
        }
    }

    fn run(&self, job: Job) -> EmberResult<()> {
        let mut first_failure = None;
        for invocation in &job.invocations {
            if let Err(e) = self.invoke(invocation) {
                if e.is_fatal() {
                    return Err(e);
                }
                first_failure.get_or_insert(e);
            }
        }
        self.write_log(&job.log);
        first_failure.map_or(Ok(()), Err)
    }

    fn invoke(&self, invocation: &Invocation) -> EmberResult<()> {
        let Invocation { binding, context } = invocation;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| binding.call(context)));

        let (message, panicked) = match outcome {
            Ok(Ok(())) => {
                self.stats.record_success();
                return Ok(());
            }
            Ok(Err(e)) if e.is_fatal() => {
                self.stats.record_failure();
                return Err(e);
            }
            Ok(Err(e)) => (e.to_string(), false),
            Err(payload) => (panic_message(payload.as_ref()), true),
        };

        if panicked {
            self.stats.record_panic();
        } else {
            self.stats.record_failure();
        }
        warn!(
            rule = %binding,
            event = %context.event_type(),
            record = %context.record_id(),
            panicked,
            %message,
            "rule failed"
        );

        let handler = self.exception_handler.read().clone();
        if let Some(handler) = handler {
            handler(&RuleFailure {
                ruleset: binding.ruleset().to_string(),
                rule: binding.rule().to_string(),
                event_type: context.event_type(),
                object_type: context.object_type(),
                record_id: context.record_id(),
                message: message.clone(),
                panicked,
            });
        }

        Err(EmberError::RuleFailed {
            ruleset: binding.ruleset().to_string(),
            rule: binding.rule().to_string(),
            message,
        })
    }

    fn write_log(&self, entries: &[EventLogEntry]) {
        if !self.config.log_events || entries.is_empty() {
            return;
        }
        let Some(store) = self.store.upgrade() else {
            return;
        };
        let mut session = Session::new(store);
        match event_log::append(&mut session, entries) {
            Ok(written) => self.stats.record_logged(written),
            Err(e) => warn!(error = %e, "failed to write event log"),
        }
    }

    fn finish_job(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.idle.notify_all();
        }
    }

    fn worker_loop(&self) {
        let Some(queue) = &self.queue else {
            return;
        };
        while let Some(job) = queue.pop() {
            if let Err(e) = self.run(job) {
                debug!(error = %e, "background dispatch reported a failure");
            }
            self.finish_job();
        }
    }
}

impl EngineInner {
    /// Fires `begin` or `rollback` rules. Only fatal errors are returned;
    /// ordinary rule failures are already recorded by `invoke`.
    fn transaction_event(&self, event: EventType, txn: TxnTimestamp) -> EmberResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.stats.record_events(1);
        match self.dispatch(self.build_transaction_job(event, txn)) {
            Err(e) if e.is_fatal() => {
                error!(%txn, ?event, error = %e, "fatal error in transaction rule");
                Err(e)
            }
            Err(e) => {
                debug!(%txn, ?event, error = %e, "transaction rule failed");
                Ok(())
            }
            Ok(()) => Ok(()),
        }
    }
}

impl CommitTrigger for EngineInner {
    fn on_begin(&self, txn: TxnTimestamp) -> EmberResult<()> {
        self.transaction_event(EventType::Begin, txn)
    }

    fn on_commit(&self, committed: CommittedTxn) -> EmberResult<()> {
        if !self.running.load(Ordering::Acquire) {
            return Ok(());
        }
        self.stats.record_events(committed.events.len() + 1);
        let job = self.build_commit_job(&committed);
        self.dispatch(job)
    }

    fn on_rollback(&self, txn: TxnTimestamp) -> EmberResult<()> {
        self.transaction_event(EventType::Rollback, txn)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "rule panicked".to_string()
    }
}

// =============================================================================
// Rule Engine
// =============================================================================

/// Binds rules to events and dispatches committed transactions to them.
pub struct RuleEngine {
    inner: Arc<EngineInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl RuleEngine {
    /// Starts an engine and installs it as the store's commit trigger.
    pub fn start(
        store: &Arc<ObjectStore>,
        catalog: Arc<Catalog>,
        config: RulesConfig,
    ) -> EmberResult<Self> {
        config.validate().map_err(EmberError::invalid_config)?;

        let workers = match config.dispatch {
            RuleDispatchMode::Immediate => 0,
            RuleDispatchMode::Background { workers } => workers,
        };
        let inner = Arc::new(EngineInner {
            store: Arc::downgrade(store),
            checker: SubscriptionChecker::new(catalog),
            config,
            registry: RwLock::new(Registry::default()),
            stats: RuleStats::new(),
            exception_handler: RwLock::new(None),
            running: AtomicBool::new(true),
            queue: (workers > 0).then(BlockingQueue::new),
            in_flight: Mutex::new(0),
            idle: Condvar::new(),
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let worker = Arc::clone(&inner);
            let handle = thread::Builder::new()
                .name(format!("ember-rules-{index}"))
                .spawn(move || worker.worker_loop())
                .map_err(|e| EmberError::InitializationFailed {
                    message: format!("failed to spawn rule worker: {e}"),
                })?;
            handles.push(handle);
        }

        store.set_trigger(inner.clone());
        info!(workers, log_events = inner.config.log_events, "rule engine started");
        Ok(Self {
            inner,
            workers: Mutex::new(handles),
        })
    }

    fn ensure_running(&self) -> EmberResult<()> {
        if self.inner.running.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(EmberError::RuleEngineShutdown)
        }
    }

    /// Subscribes `binding` to row events on `object_type`.
    ///
    /// The mask may combine any row events but no transaction events.
    pub fn subscribe_table_rule(
        &self,
        object_type: ObjectType,
        events: EventMask,
        binding: &RuleBinding,
    ) -> EmberResult<()> {
        if events.is_empty() || !events.is_row_only() {
            return Err(EmberError::invalid_subscription(
                "table rules take a non-empty mask of row events",
            ));
        }
        self.inner.checker.check(object_type, &[])?;
        self.add(object_type, events, binding, &[])
    }

    /// Subscribes `binding` to updates on `object_type` that change any of
    /// `fields`.
    ///
    /// Field lists only apply to `row_update`; any other event in the mask
    /// is rejected.
    pub fn subscribe_field_rule(
        &self,
        object_type: ObjectType,
        events: EventMask,
        fields: &[FieldPosition],
        binding: &RuleBinding,
    ) -> EmberResult<()> {
        if events != EventMask::from(EventType::RowUpdate) {
            return Err(EmberError::invalid_subscription(
                "field lists can only be given for row_update",
            ));
        }
        if fields.is_empty() {
            return Err(EmberError::invalid_subscription(
                "field rules need at least one field",
            ));
        }
        self.inner.checker.check(object_type, fields)?;
        self.add(object_type, events, binding, fields)
    }

    /// Subscribes `binding` to transaction events.
    pub fn subscribe_transaction_rule(
        &self,
        events: EventMask,
        binding: &RuleBinding,
    ) -> EmberResult<()> {
        if events.is_empty() || !events.is_transaction_only() {
            return Err(EmberError::invalid_subscription(
                "transaction rules take a non-empty mask of transaction events",
            ));
        }
        self.add(ObjectType::INVALID, events, binding, &[])
    }

    fn add(
        &self,
        object_type: ObjectType,
        events: EventMask,
        binding: &RuleBinding,
        fields: &[FieldPosition],
    ) -> EmberResult<()> {
        self.ensure_running()?;
        binding.validate()?;

        let mut registry = self.inner.registry.write();
        if registry.conflicting(binding).is_some() {
            return Err(EmberError::DuplicateRule {
                ruleset: binding.ruleset().to_string(),
                rule: binding.rule().to_string(),
            });
        }
        for event in events.iter() {
            if registry.add(object_type, event, binding, fields) {
                debug!(rule = %binding, %object_type, %event, "subscribed rule");
            }
        }
        Ok(())
    }

    /// Unsubscribes a rule from the events in `events`. Transaction events
    /// ignore `object_type`.
    ///
    /// Returns true if any subscription was removed.
    pub fn unsubscribe_rule(
        &self,
        object_type: ObjectType,
        events: EventMask,
        binding: &RuleBinding,
    ) -> bool {
        let mut registry = self.inner.registry.write();
        let mut removed = false;
        for event in events.iter() {
            let key_type = if event.is_transaction_event() {
                ObjectType::INVALID
            } else {
                object_type
            };
            removed |= registry.remove(key_type, event, binding.ruleset(), binding.rule());
        }
        if removed {
            debug!(rule = %binding, "unsubscribed rule");
        }
        removed
    }

    /// Removes every subscription and returns how many were removed.
    pub fn unsubscribe_rules(&self) -> usize {
        let removed = self.inner.registry.write().clear();
        debug!(removed, "unsubscribed all rules");
        removed
    }

    /// Lists subscriptions matching `filter`, ordered by type and event.
    pub fn list_subscribed_rules(&self, filter: &SubscriptionFilter) -> Vec<SubscribedRule> {
        self.inner.registry.read().list(filter)
    }

    /// Returns the number of subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.registry.read().len()
    }

    /// Installs a callback invoked for every failed rule.
    pub fn set_exception_handler<F>(&self, handler: F)
    where
        F: Fn(&RuleFailure) + Send + Sync + 'static,
    {
        *self.inner.exception_handler.write() = Some(Arc::new(handler));
    }

    /// Removes the exception handler.
    pub fn clear_exception_handler(&self) {
        *self.inner.exception_handler.write() = None;
    }

    /// Blocks until every queued job has been processed. Returns at once in
    /// immediate mode.
    pub fn wait_for_idle(&self) {
        let mut in_flight = self.inner.in_flight.lock();
        while *in_flight > 0 {
            self.inner.idle.wait(&mut in_flight);
        }
    }

    /// Stops dispatch, drains queued jobs, and joins the workers.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.inner.store.upgrade() {
            store.clear_trigger();
        }
        if let Some(queue) = &self.inner.queue {
            queue.close();
        }
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                warn!("rule worker exited by panic");
            }
        }
        info!(stats = %self.inner.stats, "rule engine stopped");
    }

    /// Returns true until `shutdown` is called.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &RuleStats {
        &self.inner.stats
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RulesConfig {
        &self.inner.config
    }
}

impl Drop for RuleEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for RuleEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleEngine")
            .field("running", &self.is_running())
            .field("dispatch", &self.inner.config.dispatch)
            .field("subscriptions", &self.subscription_count())
            .field("stats", &format_args!("{}", self.inner.stats))
            .finish()
    }
}
