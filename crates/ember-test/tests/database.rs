//! End-to-end tests through the `Database` facade.

use std::sync::Arc;

use ember_common::config::EngineConfig;
use ember_common::{EmberError, EventMask, EventType, FieldPosition};
use ember_rules::{event_log, RuleBinding, RuleFailure, SubscriptionFilter};
use ember_test::utils::{open_database, Recorder, GADGET, WIDGET};
use ember_txn::AutoTransaction;
use parking_lot::Mutex;

fn logging_config() -> EngineConfig {
    let mut config = EngineConfig::for_testing();
    config.rules.log_events = true;
    config
}

#[test]
fn test_rule_writes_derived_row() {
    let db = open_database(EngineConfig::for_testing());
    let binding = RuleBinding::new("inventory", "tag_widget", |ctx| {
        let source = ctx.record_id();
        ctx.with_transaction(|session| {
            session.insert(GADGET, format!("tag:{source}").as_bytes())?;
            Ok(())
        })
    });
    db.rules()
        .subscribe_table_rule(WIDGET, EventMask::from(EventType::RowInsert), &binding)
        .unwrap();

    let mut session = db.session();
    session.begin_transaction().unwrap();
    let id = session.insert(WIDGET, b"bolt").unwrap();
    session.commit_transaction().unwrap();

    session.begin_transaction().unwrap();
    let gadgets = session.list(GADGET).unwrap();
    session.rollback_transaction().unwrap();
    assert_eq!(gadgets.len(), 1);
    assert_eq!(gadgets[0].1.as_ref(), format!("tag:{id}").as_bytes());
}

#[test]
fn test_rule_failure_reported_after_commit() {
    let db = open_database(EngineConfig::for_testing());
    let failures: Arc<Mutex<Vec<RuleFailure>>> = Arc::default();
    let sink = Arc::clone(&failures);
    db.rules()
        .set_exception_handler(move |failure| sink.lock().push(failure.clone()));

    let binding = RuleBinding::new("inventory", "reject", |_ctx| {
        Err(EmberError::invalid_argument("widgets are sold out"))
    });
    db.rules()
        .subscribe_table_rule(WIDGET, EventMask::from(EventType::RowInsert), &binding)
        .unwrap();

    let mut session = db.session();
    session.begin_transaction().unwrap();
    let id = session.insert(WIDGET, b"bolt").unwrap();
    let err = session.commit_transaction().unwrap_err();
    assert!(matches!(err, EmberError::RuleFailed { ref rule, .. } if rule == "reject"));
    assert!(!session.is_transaction_active());

    session.begin_transaction().unwrap();
    assert!(session.get(id).unwrap().is_some());
    session.rollback_transaction().unwrap();

    let failures = failures.lock();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].record_id, id);
    assert!(failures[0].message.contains("sold out"));
    assert!(!failures[0].panicked);
    assert_eq!(db.rules().stats().failed(), 1);
}

#[test]
fn test_field_rule_filters_updates() {
    let db = open_database(EngineConfig::for_testing());
    let recorder = Recorder::new();
    let widget = db.catalog().table("widget").unwrap();
    let weight = widget.field_by_name("weight").unwrap().position;
    db.rules()
        .subscribe_field_rule(
            WIDGET,
            EventMask::from(EventType::RowUpdate),
            &[weight],
            &recorder.binding("pricing", "reweigh"),
        )
        .unwrap();

    let mut session = db.session();
    session.begin_transaction().unwrap();
    let id = session.insert(WIDGET, b"bolt").unwrap();
    session.commit_transaction().unwrap();

    session.begin_transaction().unwrap();
    session.update(id, b"renamed", &[FieldPosition::new(0)]).unwrap();
    session.commit_transaction().unwrap();
    assert_eq!(recorder.count(), 0);

    session.begin_transaction().unwrap();
    session.update(id, b"heavier", &[FieldPosition::new(0), weight]).unwrap();
    session.commit_transaction().unwrap();
    assert_eq!(recorder.count(), 1);
}

#[test]
fn test_subscription_listing_and_removal() {
    let db = open_database(EngineConfig::for_testing());
    let recorder = Recorder::new();
    let rows = recorder.binding("audit", "rows");
    let commits = recorder.binding("audit", "commits");

    db.rules()
        .subscribe_table_rule(WIDGET, EventMask::ROW_EVENTS, &rows)
        .unwrap();
    db.rules()
        .subscribe_transaction_rule(EventMask::from(EventType::Commit), &commits)
        .unwrap();

    let listed = db.rules().list_subscribed_rules(&SubscriptionFilter::all());
    assert_eq!(listed.len(), 4);
    let commit_only = db
        .rules()
        .list_subscribed_rules(&SubscriptionFilter::all().event_type(EventType::Commit));
    assert_eq!(commit_only.len(), 1);
    assert_eq!(commit_only[0].rule, "commits");

    assert!(db
        .rules()
        .unsubscribe_rule(WIDGET, EventMask::from(EventType::RowDelete), &rows));
    assert_eq!(db.rules().subscription_count(), 3);
    assert_eq!(db.rules().unsubscribe_rules(), 3);

    let mut session = db.session();
    session.begin_transaction().unwrap();
    session.insert(WIDGET, b"a").unwrap();
    session.commit_transaction().unwrap();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn test_event_log_records_rule_writes() {
    let db = open_database(logging_config());
    let binding = RuleBinding::new("inventory", "tag_widget", |ctx| {
        ctx.with_transaction(|session| session.insert(GADGET, b"tag").map(|_| ()))
    });
    db.rules()
        .subscribe_table_rule(WIDGET, EventMask::from(EventType::RowInsert), &binding)
        .unwrap();

    let mut session = db.session();
    {
        let mut txn = AutoTransaction::new(&mut session, false).unwrap();
        txn.insert(WIDGET, b"bolt").unwrap();
        txn.commit().unwrap();
    }

    session.begin_transaction().unwrap();
    let entries = event_log::read(&session).unwrap();
    session.rollback_transaction().unwrap();

    assert_eq!(entries.len(), 2);
    let widget = entries.iter().find(|e| e.object_type == WIDGET).unwrap();
    assert_eq!(widget.event_type, EventType::RowInsert);
    assert!(widget.rules_invoked);
    let gadget = entries.iter().find(|e| e.object_type == GADGET).unwrap();
    assert!(!gadget.rules_invoked);
    assert!(gadget.commit_ts > widget.commit_ts);
}

#[test]
fn test_auto_transaction_rolls_back_on_drop() {
    let db = open_database(EngineConfig::for_testing());
    let mut session = db.session();
    let id = {
        let txn = AutoTransaction::new(&mut session, false).unwrap();
        txn.insert(WIDGET, b"draft").unwrap()
    };
    assert!(!session.is_transaction_active());

    session.begin_transaction().unwrap();
    assert!(session.get(id).unwrap().is_none());
    session.rollback_transaction().unwrap();
    assert_eq!(db.memory().stats().live_locators(), 0);
}

#[test]
fn test_churn_then_reclaim_releases_storage() {
    let db = open_database(EngineConfig::for_testing());
    let mut session = db.session();

    let mut ids = Vec::new();
    session.begin_transaction().unwrap();
    for i in 0..10u8 {
        ids.push(session.insert(WIDGET, &[i; 16]).unwrap());
    }
    session.commit_transaction().unwrap();

    for round in 0..5u8 {
        session.begin_transaction().unwrap();
        for id in &ids {
            session.update(*id, &[round; 16], &[]).unwrap();
        }
        session.commit_transaction().unwrap();
    }
    session.begin_transaction().unwrap();
    for id in &ids[..5] {
        session.delete(*id).unwrap();
    }
    session.commit_transaction().unwrap();

    let before = db.stats();
    assert_eq!(before.versions, 10 * 7 - 5);

    let result = db.reclaim().unwrap();
    assert!(result.did_work());
    assert_eq!(result.objects_removed, 5);

    let after = db.stats();
    assert_eq!(after.objects, 5);
    assert_eq!(after.versions, 5);
    assert_eq!(after.live_locators, 5);
    assert_eq!(db.store().count_type(WIDGET), 5);
}
