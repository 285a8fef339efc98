//! Commit trigger seam.
//!
//! The store reports transaction lifecycle events through a [`CommitTrigger`]
//! installed at runtime. The rule engine is the production implementation.

use ember_common::types::{EventType, FieldPosition, ObjectId, ObjectType, TxnTimestamp};
use ember_common::EmberResult;

/// A row-level event produced by a committed write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowEvent {
    /// One of the row event kinds.
    pub event_type: EventType,
    /// Type of the written object.
    pub object_type: ObjectType,
    /// Identifier of the written object.
    pub id: ObjectId,
    /// Changed fields; empty unless the event is an update.
    pub changed_fields: Vec<FieldPosition>,
}

/// The row events of one committed transaction, in write-log order.
#[derive(Debug, Clone)]
pub struct CommittedTxn {
    /// Begin timestamp.
    pub begin_ts: TxnTimestamp,
    /// Commit timestamp.
    pub commit_ts: TxnTimestamp,
    /// Row events in the order the writes were made.
    pub events: Vec<RowEvent>,
}

/// Receives transaction lifecycle notifications from the object store.
///
/// Implementations run on the thread that triggered the event, after the
/// store has released its locks. An error returned from `on_commit` or
/// `on_rollback` is reported to the caller; the commit or rollback itself
/// stands. An error from `on_begin` undoes the begin.
pub trait CommitTrigger: Send + Sync {
    /// A transaction began.
    fn on_begin(&self, _txn: TxnTimestamp) -> EmberResult<()> {
        Ok(())
    }

    /// A transaction committed.
    fn on_commit(&self, committed: CommittedTxn) -> EmberResult<()>;

    /// A transaction rolled back.
    fn on_rollback(&self, _txn: TxnTimestamp) -> EmberResult<()> {
        Ok(())
    }
}
