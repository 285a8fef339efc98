//! Event log bookkeeping.
//!
//! After a commit is dispatched, the engine appends one row per event to the
//! system event log table, recording whether any rule was subscribed to it.
//! Rows are JSON-encoded payloads of type [`EVENT_LOG_TYPE`].

use ember_common::constants::EVENT_LOG_OBJECT_TYPE;
use ember_common::types::{EventType, ObjectId, ObjectType, TxnTimestamp};
use ember_common::{EmberError, EmberResult};
use ember_txn::Session;
use serde::{Deserialize, Serialize};

use crate::scope::TxnScope;

/// Object type of event log rows.
pub const EVENT_LOG_TYPE: ObjectType = ObjectType::new(EVENT_LOG_OBJECT_TYPE);

/// Field names of the event log table.
pub const EVENT_LOG_FIELDS: &[&str] = &[
    "event_type",
    "object_type",
    "record_id",
    "begin_ts",
    "commit_ts",
    "rules_invoked",
];

/// One logged event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    /// Event kind.
    pub event_type: EventType,
    /// Type of the written object; invalid for transaction events.
    pub object_type: ObjectType,
    /// Written object; invalid for transaction events.
    pub record_id: ObjectId,
    /// Begin timestamp of the firing transaction.
    pub begin_ts: TxnTimestamp,
    /// Commit timestamp of the firing transaction.
    pub commit_ts: TxnTimestamp,
    /// Whether at least one rule was subscribed to the event.
    pub rules_invoked: bool,
}

/// Appends `entries` to the event log through a private transaction scope.
///
/// Returns the number of rows written.
pub fn append(session: &mut Session, entries: &[EventLogEntry]) -> EmberResult<usize> {
    let scope = TxnScope::begin(session)?;
    for entry in entries {
        let payload = serde_json::to_vec(entry)
            .map_err(|e| EmberError::internal(format!("failed to encode event log row: {e}")))?;
        scope.insert(EVENT_LOG_TYPE, &payload)?;
    }
    scope.commit()?;
    Ok(entries.len())
}

/// Reads every event log row visible to the session's transaction, oldest
/// first.
pub fn read(session: &Session) -> EmberResult<Vec<EventLogEntry>> {
    session
        .list(EVENT_LOG_TYPE)?
        .into_iter()
        .map(|(_, payload)| {
            serde_json::from_slice(&payload).map_err(|e| {
                EmberError::internal(format!("failed to decode event log row: {e}"))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::create_store;

    fn entry(record: u64) -> EventLogEntry {
        EventLogEntry {
            event_type: EventType::RowInsert,
            object_type: ObjectType::new(1),
            record_id: ObjectId::new(record),
            begin_ts: TxnTimestamp::new(1),
            commit_ts: TxnTimestamp::new(2),
            rules_invoked: true,
        }
    }

    #[test]
    fn test_append_and_read() {
        let mut session = Session::new(create_store());
        assert_eq!(append(&mut session, &[entry(1), entry(2)]).unwrap(), 2);
        assert!(!session.is_transaction_active());

        session.begin_transaction().unwrap();
        let rows = read(&session).unwrap();
        assert_eq!(rows, vec![entry(1), entry(2)]);
        session.rollback_transaction().unwrap();
    }

    #[test]
    fn test_append_inside_caller_transaction() {
        let mut session = Session::new(create_store());
        session.begin_transaction().unwrap();
        append(&mut session, &[entry(9)]).unwrap();
        assert!(session.is_transaction_active());
        assert_eq!(read(&session).unwrap().len(), 1);
        session.rollback_transaction().unwrap();

        session.begin_transaction().unwrap();
        assert!(read(&session).unwrap().is_empty());
        session.rollback_transaction().unwrap();
    }
}
