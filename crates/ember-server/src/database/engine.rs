//! Main database engine.
//!
//! The `Database` struct is the top-level entry point for Ember.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ember_catalog::{Catalog, TableRecord, TypeIdCache};
use ember_common::config::EngineConfig;
use ember_common::{
    EmberError, EmberResult, FieldPosition, ObjectId, ObjectType, EVENT_LOG_TABLE_NAME,
};
use ember_memory::MemoryManager;
use ember_rules::{RuleEngine, EVENT_LOG_FIELDS, EVENT_LOG_TYPE};
use ember_txn::{ObjectStore, ReclaimResult, Reclaimer, Session, TransactionManager};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Database statistics.
#[derive(Debug, Clone, Default)]
pub struct DatabaseStats {
    /// Number of user and system tables.
    pub tables: usize,
    /// Number of version chains in the store.
    pub objects: usize,
    /// Number of versions across all chains.
    pub versions: usize,
    /// Transactions currently active.
    pub active_transactions: usize,
    /// Transactions committed since open.
    pub committed_transactions: u64,
    /// Sessions handed out since open.
    pub sessions_opened: u64,
    /// Rule subscriptions currently registered.
    pub rule_subscriptions: usize,
    /// Locators currently live.
    pub live_locators: u64,
    /// Bytes of the backing region in use.
    pub bytes_in_use: u64,
    /// Time since open.
    pub uptime: Duration,
}

impl fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tables={} objects={} versions={} active_txns={} committed={} sessions={} rules={} locators={} bytes={} uptime={:?}",
            self.tables,
            self.objects,
            self.versions,
            self.active_transactions,
            self.committed_transactions,
            self.sessions_opened,
            self.rule_subscriptions,
            self.live_locators,
            self.bytes_in_use,
            self.uptime,
        )
    }
}

/// The main database instance.
///
/// Dropping the database stops the rule engine before the store goes away.
pub struct Database {
    config: EngineConfig,
    rules: RuleEngine,
    reclaimer: Reclaimer,
    store: Arc<ObjectStore>,
    catalog: Arc<Catalog>,
    type_cache: Arc<TypeIdCache>,
    memory: MemoryManager,
    /// Serializes catalog changes with the cache invalidation that follows.
    ddl: Mutex<()>,
    sessions_opened: AtomicU64,
    started_at: Instant,
}

impl Database {
    /// Opens a database with the given configuration.
    pub fn open(config: EngineConfig) -> EmberResult<Self> {
        config.validate().map_err(EmberError::invalid_config)?;

        let memory = MemoryManager::master(config.memory.clone())?;
        memory.initialize()?;

        let catalog = Arc::new(Catalog::new());
        catalog.create_system_table(EVENT_LOG_TABLE_NAME, EVENT_LOG_TYPE, EVENT_LOG_FIELDS)?;
        let type_cache = Arc::new(TypeIdCache::new(catalog.clone()));

        let store = Arc::new(ObjectStore::new(
            Arc::new(TransactionManager::new()),
            memory.subordinate(),
            type_cache.clone(),
        ));
        let rules = RuleEngine::start(&store, catalog.clone(), config.rules.clone())?;
        let reclaimer = Reclaimer::new(store.clone(), config.txn.clone());

        info!(
            region_size = config.memory.region_size,
            max_locators = config.memory.max_locators,
            dispatch = ?config.rules.dispatch,
            "database opened"
        );

        Ok(Self {
            config,
            rules,
            reclaimer,
            store,
            catalog,
            type_cache,
            memory,
            ddl: Mutex::new(()),
            sessions_opened: AtomicU64::new(0),
            started_at: Instant::now(),
        })
    }

    /// Opens a small database suitable for tests and embedding.
    pub fn open_in_memory() -> EmberResult<Self> {
        Self::open(EngineConfig::for_testing())
    }

    /// Returns the configuration the database was opened with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Creates a new session.
    pub fn session(&self) -> Session {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        Session::new(self.store.clone())
    }

    // =========================================================================
    // Schema
    // =========================================================================

    /// Creates a table whose rows have type `object_type`.
    pub fn create_table(
        &self,
        name: &str,
        object_type: ObjectType,
        fields: &[&str],
    ) -> EmberResult<ObjectId> {
        let _ddl = self.ddl.lock();
        let id = self.catalog.create_table(name, object_type, fields)?;
        self.type_cache.clear();
        Ok(id)
    }

    /// Appends a field to an existing table.
    pub fn add_field(&self, table: &str, field: &str) -> EmberResult<FieldPosition> {
        let _ddl = self.ddl.lock();
        let position = self.catalog.add_field(table, field)?;
        self.type_cache.clear();
        Ok(position)
    }

    /// Drops an empty user table.
    ///
    /// System tables, tables that still hold committed rows, and tables with
    /// rows staged by a pending transaction are refused.
    pub fn drop_table(&self, name: &str) -> EmberResult<TableRecord> {
        let _ddl = self.ddl.lock();
        let table = self
            .catalog
            .table(name)
            .ok_or_else(|| EmberError::TableNotFound {
                table: name.to_string(),
            })?;
        if table.is_system {
            return Err(EmberError::invalid_argument(format!(
                "cannot drop system table {name}"
            )));
        }
        if self.store.has_pending_type(table.object_type) {
            return Err(EmberError::invalid_argument(format!(
                "table {name} has rows staged by a pending transaction"
            )));
        }

        let record = self.store.txn_manager().with_commit_lock(|| {
            let rows = self.store.count_type(table.object_type);
            if rows > 0 {
                return Err(EmberError::invalid_argument(format!(
                    "table {name} still holds {rows} rows"
                )));
            }
            let record = self.catalog.drop_table(name)?;
            self.type_cache.clear();
            Ok(record)
        })?;
        debug!(table = name, "table dropped through database");
        Ok(record)
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Returns the catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Returns the type cache.
    pub fn type_cache(&self) -> &Arc<TypeIdCache> {
        &self.type_cache
    }

    /// Returns the rule engine.
    pub fn rules(&self) -> &RuleEngine {
        &self.rules
    }

    /// Returns the object store.
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }

    /// Returns the transaction manager.
    pub fn txn_manager(&self) -> &Arc<TransactionManager> {
        self.store.txn_manager()
    }

    /// Returns the master memory manager.
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    /// Returns the reclaimer.
    pub fn reclaimer(&self) -> &Reclaimer {
        &self.reclaimer
    }

    /// Runs one reclamation pass.
    pub fn reclaim(&self) -> EmberResult<ReclaimResult> {
        self.reclaimer.reclaim()
    }

    /// Returns a statistics snapshot.
    pub fn stats(&self) -> DatabaseStats {
        let txn_manager = self.store.txn_manager();
        let memory = self.memory.stats();
        DatabaseStats {
            tables: self.catalog.table_count(),
            objects: self.store.object_count(),
            versions: self.store.version_count(),
            active_transactions: txn_manager.active_count(),
            committed_transactions: txn_manager.stats().committed(),
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            rule_subscriptions: self.rules.subscription_count(),
            live_locators: memory.live_locators(),
            bytes_in_use: memory.bytes_in_use(),
            uptime: self.started_at.elapsed(),
        }
    }

    /// Stops rule dispatch. Sessions keep working without triggers.
    pub fn shutdown(&self) {
        self.rules.shutdown();
        info!(stats = %self.stats(), "database shut down");
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("tables", &self.catalog.table_count())
            .field("rules", &self.rules)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_common::{EventMask, EventType};
    use ember_rules::{event_log, RuleBinding};
    use ember_txn::AutoTransaction;

    const WIDGET: ObjectType = ObjectType::new(100);

    fn open() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_table("widget", WIDGET, &["name", "weight"]).unwrap();
        db
    }

    #[test]
    fn test_open_bootstraps_event_log() {
        let db = Database::open_in_memory().unwrap();
        let table = db.catalog().table(EVENT_LOG_TABLE_NAME).unwrap();
        assert!(table.is_system);
        assert_eq!(table.object_type, EVENT_LOG_TYPE);
        assert!(db.memory().is_master());
        assert!(db.rules().is_running());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let mut config = EngineConfig::for_testing();
        config.memory.region_size = 3;
        let err = Database::open(config).unwrap_err();
        assert!(matches!(err, EmberError::InvalidConfig { .. }));
    }

    #[test]
    fn test_session_roundtrip() {
        let db = open();
        let mut session = db.session();
        session.begin_transaction().unwrap();
        let id = session.insert(WIDGET, b"bolt").unwrap();
        session.commit_transaction().unwrap();

        session.begin_transaction().unwrap();
        assert_eq!(session.get(id).unwrap().unwrap().as_ref(), b"bolt");
        session.rollback_transaction().unwrap();

        let stats = db.stats();
        assert_eq!(stats.sessions_opened, 1);
        assert_eq!(stats.objects, 1);
        assert!(stats.committed_transactions >= 1);
    }

    #[test]
    fn test_create_table_clears_type_cache() {
        let db = open();
        let mut session = db.session();
        session.begin_transaction().unwrap();
        session.insert(WIDGET, b"a").unwrap();
        session.commit_transaction().unwrap();
        assert!(db.type_cache().is_built());

        let gadget = ObjectType::new(200);
        db.create_table("gadget", gadget, &["label"]).unwrap();
        assert!(!db.type_cache().is_built());

        session.begin_transaction().unwrap();
        session.insert(gadget, b"g").unwrap();
        session.commit_transaction().unwrap();
    }

    #[test]
    fn test_add_field_visible_to_subscriptions() {
        let db = open();
        let position = db.add_field("widget", "colour").unwrap();
        assert_eq!(position, FieldPosition::new(2));

        let binding = RuleBinding::new("paint", "on_colour", |_ctx| Ok(()));
        db.rules()
            .subscribe_field_rule(
                WIDGET,
                EventMask::from(EventType::RowUpdate),
                &[position],
                &binding,
            )
            .unwrap();
        assert_eq!(db.rules().subscription_count(), 1);
    }

    #[test]
    fn test_drop_table_rules() {
        let db = open();
        assert!(matches!(
            db.drop_table(EVENT_LOG_TABLE_NAME),
            Err(EmberError::InvalidArgument { .. })
        ));
        assert!(matches!(
            db.drop_table("missing"),
            Err(EmberError::TableNotFound { .. })
        ));

        let mut session = db.session();
        session.begin_transaction().unwrap();
        let id = session.insert(WIDGET, b"a").unwrap();
        session.commit_transaction().unwrap();
        assert!(matches!(
            db.drop_table("widget"),
            Err(EmberError::InvalidArgument { .. })
        ));

        session.begin_transaction().unwrap();
        session.delete(id).unwrap();
        session.commit_transaction().unwrap();
        let record = db.drop_table("widget").unwrap();
        assert_eq!(record.object_type, WIDGET);
        assert!(db.catalog().table("widget").is_none());
    }

    #[test]
    fn test_drop_table_refused_while_rows_pending() {
        let db = open();
        db.create_table("doomed", ObjectType::new(777), &["note"]).unwrap();
        let doomed = ObjectType::new(777);

        let mut session = db.session();
        session.begin_transaction().unwrap();
        let id = session.insert(doomed, b"staged").unwrap();
        assert!(matches!(
            db.drop_table("doomed"),
            Err(EmberError::InvalidArgument { .. })
        ));
        assert!(db.catalog().table("doomed").is_some());
        session.commit_transaction().unwrap();

        session.begin_transaction().unwrap();
        session.update(id, b"edited", &[]).unwrap();
        session.commit_transaction().unwrap();
        session.begin_transaction().unwrap();
        session.delete(id).unwrap();
        session.commit_transaction().unwrap();
        db.drop_table("doomed").unwrap();
    }

    #[test]
    fn test_commit_writes_event_log() {
        let mut config = EngineConfig::for_testing();
        config.rules.log_events = true;
        let db = Database::open(config).unwrap();
        db.create_table("widget", WIDGET, &["name", "weight"]).unwrap();
        let mut session = db.session();
        {
            let mut txn = AutoTransaction::new(&mut session, false).unwrap();
            txn.insert(WIDGET, b"a").unwrap();
            txn.commit().unwrap();
        }

        session.begin_transaction().unwrap();
        let entries = event_log::read(&session).unwrap();
        session.rollback_transaction().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, EventType::RowInsert);
        assert_eq!(entries[0].object_type, WIDGET);
    }

    #[test]
    fn test_reclaim_after_updates() {
        let db = open();
        let mut session = db.session();
        session.begin_transaction().unwrap();
        let id = session.insert(WIDGET, b"v0").unwrap();
        session.commit_transaction().unwrap();
        for i in 1..4u8 {
            session.begin_transaction().unwrap();
            session.update(id, &[b'v', b'0' + i], &[]).unwrap();
            session.commit_transaction().unwrap();
        }

        let result = db.reclaim().unwrap();
        assert!(result.did_work());
        assert!(result.versions_released >= 3);
        assert_eq!(db.reclaimer().stats().total_runs(), 1);
    }

    #[test]
    fn test_shutdown_stops_rules() {
        let db = open();
        db.shutdown();
        assert!(!db.rules().is_running());

        let mut session = db.session();
        session.begin_transaction().unwrap();
        session.insert(WIDGET, b"a").unwrap();
        session.commit_transaction().unwrap();
    }
}
