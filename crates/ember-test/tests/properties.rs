//! Engine-wide properties checked across crate boundaries.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ember_common::config::{EngineConfig, MemoryConfig};
use ember_common::error::assert_invariant;
use ember_common::sync::BlockingQueue;
use ember_common::{EmberError, EventMask, EventType, Locator, TxnTimestamp};
use ember_memory::MemoryManager;
use ember_rules::{LastOperation, RuleBinding};
use ember_test::utils::{open_database, Recorder, GADGET, WIDGET};
use parking_lot::Mutex;

#[test]
fn test_frozen_bit_roundtrip() {
    for raw in [1u64, 2, 17, 1 << 40, (1 << 63) - 1] {
        let ts = TxnTimestamp::new(raw);
        assert!(!ts.is_frozen());
        let frozen = ts.set_frozen();
        assert!(frozen.is_frozen());
        assert_eq!(frozen.clear_frozen(), ts);
        assert_eq!(frozen.value(), raw);
    }
}

#[test]
fn test_reclaimed_commit_timestamps_are_frozen() {
    let db = open_database(EngineConfig::for_testing());
    let mut session = db.session();
    session.begin_transaction().unwrap();
    let begin = session.current_txn().unwrap();
    session.insert(WIDGET, b"a").unwrap();
    session.commit_transaction().unwrap();

    let tm = db.txn_manager().clone();
    let commit = tm.commit_ts(begin).unwrap();
    assert!(!commit.is_frozen());

    db.reclaim().unwrap();
    let commit = tm.commit_ts(begin).unwrap();
    assert!(commit.is_frozen());
    assert!(tm.is_frozen(commit.clear_frozen()));
}

#[test]
fn test_reclaim_bounds_timestamp_metadata() {
    let db = open_database(EngineConfig::for_testing());
    let mut session = db.session();
    for i in 0..400u32 {
        session.begin_transaction().unwrap();
        session.insert(WIDGET, &i.to_le_bytes()).unwrap();
        if i % 4 == 0 {
            session.rollback_transaction().unwrap();
        } else {
            session.commit_transaction().unwrap();
        }
    }
    let tm = db.txn_manager().clone();
    assert!(tm.metadata_len() >= 400);

    db.reclaim().unwrap();
    assert!(tm.metadata_len() < 8);

    session.begin_transaction().unwrap();
    let id = session.insert(WIDGET, b"after").unwrap();
    session.commit_transaction().unwrap();
    session.begin_transaction().unwrap();
    assert!(session.get(id).unwrap().is_some());
    assert_eq!(session.list(WIDGET).unwrap().len(), 301);
    session.rollback_transaction().unwrap();
}

#[test]
fn test_locators_strictly_increase() {
    let memory = MemoryManager::master(MemoryConfig {
        region_size: 64 * 1024,
        max_locators: 256,
    })
    .unwrap();
    memory.initialize().unwrap();

    let mut last = Locator::INVALID;
    for size in [8u64, 24, 8, 100, 1, 64] {
        let (locator, _) = memory.allocate_object(size).unwrap();
        assert!(locator > last);
        last = locator;
    }

    memory.release(Locator::new(2)).unwrap();
    let (after_release, _) = memory.allocate_object(8).unwrap();
    assert!(after_release > last);
}

#[test]
fn test_bad_releases_are_fatal() {
    let memory = MemoryManager::master(MemoryConfig {
        region_size: 64 * 1024,
        max_locators: 256,
    })
    .unwrap();
    memory.initialize().unwrap();
    let (locator, _) = memory.allocate_object(16).unwrap();

    let err = memory.release(Locator::INVALID).unwrap_err();
    assert!(err.is_fatal());

    let err = memory.release(locator.next()).unwrap_err();
    assert!(err.is_fatal());

    memory.release(locator).unwrap();
    let err = memory.release(locator).unwrap_err();
    assert!(err.is_fatal());
}

#[test]
fn test_type_cache_lookup() {
    let db = open_database(EngineConfig::for_testing());
    let cache = db.type_cache();

    let widget = db.catalog().table("widget").unwrap();
    let gadget = db.catalog().table("gadget").unwrap();
    assert_eq!(cache.get_record_id(WIDGET).unwrap(), widget.id);
    assert_eq!(cache.get_record_id(GADGET).unwrap(), gadget.id);
    assert_eq!(cache.stats().builds(), 1);

    let absent = ember_common::ObjectType::new(999);
    let err = cache.get_record_id(absent).unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        cache.find_record_id(absent),
        Err(EmberError::TypeNotFound { .. })
    ));
}

#[test]
fn test_last_operation_per_event() {
    let db = open_database(EngineConfig::for_testing());
    let seen: Arc<Mutex<Vec<(EventType, LastOperation, LastOperation)>>> = Arc::default();

    let sink = Arc::clone(&seen);
    let binding = RuleBinding::new("audit", "observe", move |ctx| {
        sink.lock().push((
            ctx.event_type(),
            ctx.last_operation(WIDGET),
            ctx.last_operation(GADGET),
        ));
        Ok(())
    });
    db.rules()
        .subscribe_table_rule(WIDGET, EventMask::ROW_EVENTS, &binding)
        .unwrap();
    db.rules()
        .subscribe_transaction_rule(EventMask::TRANSACTION_EVENTS, &binding)
        .unwrap();

    let mut session = db.session();
    session.begin_transaction().unwrap();
    let id = session.insert(WIDGET, b"a").unwrap();
    session.commit_transaction().unwrap();
    session.begin_transaction().unwrap();
    session.update(id, b"b", &[]).unwrap();
    session.commit_transaction().unwrap();
    session.begin_transaction().unwrap();
    session.delete(id).unwrap();
    session.commit_transaction().unwrap();
    session.begin_transaction().unwrap();
    session.rollback_transaction().unwrap();

    let seen = seen.lock();
    let row_ops: Vec<_> = seen
        .iter()
        .filter(|(event, _, _)| event.is_row_event())
        .map(|(_, widget, gadget)| (*widget, *gadget))
        .collect();
    assert_eq!(
        row_ops,
        vec![
            (LastOperation::RowInsert, LastOperation::None),
            (LastOperation::RowUpdate, LastOperation::None),
            (LastOperation::RowDelete, LastOperation::None),
        ]
    );

    let txn_events: Vec<_> = seen
        .iter()
        .filter(|(event, _, _)| !event.is_row_event())
        .collect();
    assert!(txn_events.iter().any(|(e, _, _)| *e == EventType::Begin));
    assert!(txn_events.iter().any(|(e, _, _)| *e == EventType::Commit));
    assert!(txn_events.iter().any(|(e, _, _)| *e == EventType::Rollback));
    for (_, widget, gadget) in txn_events {
        assert_eq!(*widget, LastOperation::None);
        assert_eq!(*gadget, LastOperation::None);
    }
}

#[test]
fn test_blocking_queue_fifo_and_blocking() {
    let queue = BlockingQueue::new();
    queue.push(1).unwrap();
    queue.push(2).unwrap();
    assert_eq!(queue.pop(), Some(1));
    queue.push(3).unwrap();
    assert_eq!(queue.pop(), Some(2));
    assert_eq!(queue.pop(), Some(3));
    assert_eq!(queue.pop_timeout(Duration::from_millis(50)), None);
}

#[test]
fn test_blocking_queue_wakes_consumer() {
    let queue = Arc::new(BlockingQueue::new());
    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || (queue.pop(), queue.pop()))
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!consumer.is_finished());
    queue.push("first").unwrap();
    queue.push("second").unwrap();

    let (a, b) = consumer.join().unwrap();
    assert_eq!(a, Some("first"));
    assert_eq!(b, Some("second"));
}

#[test]
fn test_assert_invariant_message() {
    assert!(assert_invariant(true, "never reported").is_ok());

    let line = line!() + 1;
    let err = assert_invariant(false, "locator table corrupted").unwrap_err();
    assert!(err.is_fatal());
    let message = err.to_string();
    assert!(message.contains("locator table corrupted"));
    assert!(message.contains(file!()));
    assert!(message.contains(&line.to_string()));
}

#[test]
fn test_duplicate_subscription_fires_once() {
    let db = open_database(EngineConfig::for_testing());
    let recorder = Recorder::new();
    let binding = recorder.binding("inventory", "on_insert");

    let insert = EventMask::from(EventType::RowInsert);
    db.rules().subscribe_table_rule(WIDGET, insert, &binding).unwrap();
    db.rules().subscribe_table_rule(WIDGET, insert, &binding).unwrap();

    let mut session = db.session();
    session.begin_transaction().unwrap();
    session.insert(WIDGET, b"a").unwrap();
    session.commit_transaction().unwrap();

    assert_eq!(recorder.count(), 1);
}
