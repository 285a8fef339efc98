//! Client-side transaction state.
//!
//! A [`Session`] tracks only its own outstanding transaction. Whether *any*
//! transaction is active is a question for the [`TransactionManager`]; a
//! session answers only for itself.
//!
//! [`TransactionManager`]: crate::TransactionManager

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::Bytes;
use ember_common::types::{FieldPosition, ObjectId, ObjectType, TxnTimestamp};
use ember_common::{EmberError, EmberResult};
use tracing::warn;

use crate::store::ObjectStore;

/// A connection to the object store owning at most one transaction.
pub struct Session {
    store: Arc<ObjectStore>,
    current: Option<TxnTimestamp>,
}

impl Session {
    /// Creates a session with no active transaction.
    pub fn new(store: Arc<ObjectStore>) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Begins a transaction.
    ///
    /// Fails with `TransactionInProgress` if this session already has one.
    pub fn begin_transaction(&mut self) -> EmberResult<TxnTimestamp> {
        self.begin(true)
    }

    /// Begins a transaction whose lifecycle events never reach the commit
    /// trigger.
    pub fn begin_without_triggers(&mut self) -> EmberResult<TxnTimestamp> {
        self.begin(false)
    }

    fn begin(&mut self, fire_triggers: bool) -> EmberResult<TxnTimestamp> {
        if let Some(txn) = self.current {
            return Err(EmberError::TransactionInProgress { txn });
        }
        let txn = self.store.begin(fire_triggers)?;
        self.current = Some(txn);
        Ok(txn)
    }

    /// Commits the active transaction and returns its commit timestamp.
    ///
    /// The session has no active transaction afterwards, whether or not the
    /// commit succeeded.
    pub fn commit_transaction(&mut self) -> EmberResult<TxnTimestamp> {
        let txn = self.take()?;
        self.store.commit(txn)
    }

    /// Commits the active transaction without notifying the commit trigger.
    pub fn commit_without_triggers(&mut self) -> EmberResult<TxnTimestamp> {
        let txn = self.take()?;
        self.store.commit_without_triggers(txn)
    }

    /// Rolls back the active transaction.
    pub fn rollback_transaction(&mut self) -> EmberResult<()> {
        let txn = self.take()?;
        self.store.rollback(txn)
    }

    /// Returns true if this session has an active transaction.
    pub fn is_transaction_active(&self) -> bool {
        self.current.is_some()
    }

    /// Returns the active transaction's begin timestamp.
    pub fn current_txn(&self) -> Option<TxnTimestamp> {
        self.current
    }

    fn take(&mut self) -> EmberResult<TxnTimestamp> {
        self.current.take().ok_or(EmberError::NoActiveTransaction)
    }

    fn active(&self) -> EmberResult<TxnTimestamp> {
        self.current.ok_or(EmberError::NoActiveTransaction)
    }

    /// Inserts an object in the active transaction.
    pub fn insert(&self, object_type: ObjectType, payload: &[u8]) -> EmberResult<ObjectId> {
        self.store.insert(self.active()?, object_type, payload)
    }

    /// Updates an object in the active transaction.
    pub fn update(
        &self,
        id: ObjectId,
        payload: &[u8],
        changed_fields: &[FieldPosition],
    ) -> EmberResult<()> {
        self.store.update(self.active()?, id, payload, changed_fields)
    }

    /// Deletes an object in the active transaction.
    pub fn delete(&self, id: ObjectId) -> EmberResult<()> {
        self.store.delete(self.active()?, id)
    }

    /// Reads an object in the active transaction.
    pub fn get(&self, id: ObjectId) -> EmberResult<Option<Bytes>> {
        self.store.get(self.active()?, id)
    }

    /// Lists objects of a type in the active transaction.
    pub fn list(&self, object_type: ObjectType) -> EmberResult<Vec<(ObjectId, Bytes)>> {
        self.store.list(self.active()?, object_type)
    }

    /// Returns the store this session operates on.
    pub fn store(&self) -> &Arc<ObjectStore> {
        &self.store
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(txn) = self.current.take() {
            if let Err(e) = self.store.rollback(txn) {
                warn!(%txn, error = %e, "failed to roll back abandoned transaction");
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("current", &self.current)
            .finish()
    }
}

// =============================================================================
// Scoped transactions
// =============================================================================

/// Begins a transaction on construction and rolls it back on drop unless it
/// was committed.
///
/// A transaction the caller already ended through the session is left alone
/// on drop.
pub struct AutoTransaction<'a> {
    session: &'a mut Session,
    auto_restart: bool,
}

impl<'a> AutoTransaction<'a> {
    /// Begins a transaction on `session`.
    ///
    /// With `auto_restart`, every successful `commit` begins the next
    /// transaction.
    pub fn new(session: &'a mut Session, auto_restart: bool) -> EmberResult<Self> {
        session.begin_transaction()?;
        Ok(Self {
            session,
            auto_restart,
        })
    }

    /// Commits the current transaction.
    pub fn commit(&mut self) -> EmberResult<TxnTimestamp> {
        let commit_ts = self.session.commit_transaction()?;
        if self.auto_restart {
            self.session.begin_transaction()?;
        }
        Ok(commit_ts)
    }
}

impl Deref for AutoTransaction<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for AutoTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for AutoTransaction<'_> {
    fn drop(&mut self) {
        if self.session.is_transaction_active() {
            if let Err(e) = self.session.rollback_transaction() {
                warn!(error = %e, "scoped transaction rollback failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::{create_store, WIDGET};

    #[test]
    fn test_session_lifecycle() {
        let mut session = Session::new(create_store());
        assert!(!session.is_transaction_active());
        let txn = session.begin_transaction().unwrap();
        assert_eq!(session.current_txn(), Some(txn));
        let id = session.insert(WIDGET, b"w").unwrap();
        session.commit_transaction().unwrap();
        assert!(!session.is_transaction_active());

        session.begin_transaction().unwrap();
        assert!(session.get(id).unwrap().is_some());
        session.rollback_transaction().unwrap();
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut session = Session::new(create_store());
        let txn = session.begin_transaction().unwrap();
        let err = session.begin_transaction().unwrap_err();
        assert!(matches!(err, EmberError::TransactionInProgress { txn: t } if t == txn));
        session.rollback_transaction().unwrap();
    }

    #[test]
    fn test_no_active_transaction() {
        let mut session = Session::new(create_store());
        assert!(matches!(
            session.commit_transaction(),
            Err(EmberError::NoActiveTransaction)
        ));
        assert!(matches!(
            session.rollback_transaction(),
            Err(EmberError::NoActiveTransaction)
        ));
        assert!(matches!(
            session.insert(WIDGET, b"x"),
            Err(EmberError::NoActiveTransaction)
        ));
    }

    #[test]
    fn test_sessions_track_own_transaction_only() {
        let store = create_store();
        let mut first = Session::new(store.clone());
        let second = Session::new(store.clone());
        first.begin_transaction().unwrap();
        assert!(first.is_transaction_active());
        assert!(!second.is_transaction_active());
        assert_eq!(store.txn_manager().active_count(), 1);
        first.rollback_transaction().unwrap();
    }

    #[test]
    fn test_dropped_session_rolls_back() {
        let store = create_store();
        {
            let mut session = Session::new(store.clone());
            session.begin_transaction().unwrap();
            session.insert(WIDGET, b"lost").unwrap();
        }
        assert_eq!(store.txn_manager().active_count(), 0);
        assert_eq!(store.pending_count(), 0);
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_auto_transaction_rolls_back_on_drop() {
        let store = create_store();
        let mut session = Session::new(store.clone());
        {
            let txn = AutoTransaction::new(&mut session, false).unwrap();
            txn.insert(WIDGET, b"discarded").unwrap();
        }
        assert!(!session.is_transaction_active());
        assert_eq!(store.txn_manager().stats().rolled_back(), 1);
        assert_eq!(store.object_count(), 0);
    }

    #[test]
    fn test_auto_transaction_commit() {
        let store = create_store();
        let mut session = Session::new(store.clone());
        {
            let mut txn = AutoTransaction::new(&mut session, false).unwrap();
            txn.insert(WIDGET, b"kept").unwrap();
            txn.commit().unwrap();
        }
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.txn_manager().stats().rolled_back(), 0);
    }

    #[test]
    fn test_auto_transaction_auto_restart() {
        let store = create_store();
        let mut session = Session::new(store.clone());
        {
            let mut txn = AutoTransaction::new(&mut session, true).unwrap();
            txn.insert(WIDGET, b"one").unwrap();
            txn.commit().unwrap();
            assert!(txn.is_transaction_active());
            txn.insert(WIDGET, b"two").unwrap();
        }
        // The restarted transaction was rolled back on drop.
        assert_eq!(store.object_count(), 1);
        assert_eq!(store.txn_manager().stats().committed(), 1);
        assert_eq!(store.txn_manager().stats().rolled_back(), 1);
    }

    #[test]
    fn test_auto_transaction_explicit_rollback_no_double_rollback() {
        let store = create_store();
        let mut session = Session::new(store.clone());
        {
            let mut txn = AutoTransaction::new(&mut session, false).unwrap();
            txn.rollback_transaction().unwrap();
        }
        assert_eq!(store.txn_manager().stats().rolled_back(), 1);
    }
}
