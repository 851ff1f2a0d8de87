//! Integration tests for the query façade over the in-memory host.

use idbkit_core::{create_database, CoreError, CursorAction, UpsertOutcome};
use idbkit_host::{DiagnosticLevel, IndexSpec, Key, Record, RequestKind};
use idbkit_testkit::prelude::*;
use proptest::prelude::*;
use std::rc::Rc;
use tokio::task::LocalSet;

#[tokio::test]
async fn upsert_then_get_returns_the_record() {
    init_tracing();
    let env = TestHost::new();
    let db = env.create("users", "profiles").await;

    let record = Record::new().with("name", "MyName").with("age", 30);
    let outcome = db.upsert(record.clone()).await.unwrap();
    let stored = db.get(outcome.key().clone()).await.unwrap();

    assert_eq!(stored, Some(record.with_id(outcome.key().clone())));
}

#[tokio::test]
async fn upsert_on_existing_key_updates_without_failure() {
    let env = TestHost::new();
    let db = env.create("users", "profiles").await;
    db.upsert(Record::new().with_id("myData1").with("v", 1)).await.unwrap();

    let outcome = db
        .upsert(Record::new().with_id("myData1").with("v", 2))
        .await
        .unwrap();

    assert_eq!(outcome, UpsertOutcome::Updated(Key::from("myData1")));
    assert!(env.sink.messages(DiagnosticLevel::Warn).is_empty());
    assert!(!env.log_contents().contains("failed transaction"));
}

#[tokio::test]
async fn upsert_fails_only_when_fallback_fails() {
    let env = TestHost::new();
    let db = env.create("users", "profiles").await;
    db.upsert(Record::new().with_id(7)).await.unwrap();
    env.host.reject(RequestKind::Put);

    let err = db.upsert(Record::new().with_id(7)).await.unwrap_err();

    assert!(matches!(err, CoreError::TransactionFailed { ref name, .. } if name == "users"));
    assert!(env.log_contents().contains("failed transaction in users"));
    assert_eq!(env.sink.messages(DiagnosticLevel::Warn).len(), 1);

    env.host.accept(RequestKind::Put);
    assert_eq!(
        db.upsert(Record::new().with_id(7)).await.unwrap(),
        UpsertOutcome::Updated(Key::Int(7))
    );
}

#[tokio::test]
async fn count_after_n_inserts() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;
    for n in 0..5 {
        db.upsert(Record::new().with("n", n)).await.unwrap();
    }
    assert_eq!(db.count().await.unwrap(), 5);
}

#[tokio::test]
async fn count_waits_for_the_host() {
    let local = LocalSet::new();
    local
        .run_until(async {
            let env = TestHost::deferred();
            let db = env
                .run_deferred(create_database(env.services(), "db", "items", |_| Ok(())))
                .await
                .map(Rc::new)
                .unwrap();
            for n in 0..3 {
                let db = Rc::clone(&db);
                env.run_deferred(async move { db.upsert(Record::new().with("n", n)).await })
                    .await
                    .unwrap();
            }

            let counting = tokio::task::spawn_local({
                let db = Rc::clone(&db);
                async move { db.count().await }
            });
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert!(!counting.is_finished());
            assert!(env.host.pending_tasks() > 0);

            while !counting.is_finished() {
                env.host.dispatch();
                tokio::task::yield_now().await;
            }
            assert_eq!(counting.await.unwrap().unwrap(), 3);
        })
        .await;
}

#[tokio::test]
async fn delete_of_missing_key_reports_success() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;

    let result = db.delete_by_key("nonexistent").await;

    assert!(result.is_ok());
    assert!(env.sink.contains("element nonexistent has been deleted"));
}

#[tokio::test]
async fn not_found_logs_the_literal_key() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;

    assert_eq!(db.get("myData1").await.unwrap(), None);
    assert_eq!(db.get(42).await.unwrap(), None);

    let log = env.log_contents();
    assert!(log.contains("item myData1 not exist"));
    assert!(log.contains("item 42 not exist"));
}

#[tokio::test]
async fn index_not_found_logs_the_literal_value() {
    let env = TestHost::new();
    let db = create_database(env.services(), "db", "items", |builder| {
        builder.create_index(&IndexSpec::new("email", "email").unique())
    })
    .await
    .unwrap();
    db.upsert(Record::new().with("email", "a@example.com")).await.unwrap();

    let hit = db.get_by_index("email", "a@example.com").await.unwrap();
    assert!(hit.is_some());
    let miss = db.get_by_index("email", "b@example.com").await.unwrap();
    assert!(miss.is_none());
    assert!(env.log_contents().contains("item b@example.com not exist"));
}

#[tokio::test]
async fn unique_index_violation_fails_the_upsert() {
    let env = TestHost::new();
    let db = create_database(env.services(), "db", "items", |builder| {
        builder.create_index(&IndexSpec::new("email", "email").unique())
    })
    .await
    .unwrap();
    db.upsert(Record::new().with("email", "a@example.com")).await.unwrap();

    let err = db
        .upsert(Record::new().with("email", "a@example.com"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::TransactionFailed { .. }));
}

#[tokio::test]
async fn iterate_visits_in_key_order_and_can_edit() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;
    for n in [3, 1, 2] {
        db.upsert(Record::new().with_id(n).with("n", n)).await.unwrap();
    }

    let seen = Rc::new(std::cell::RefCell::new(Vec::new()));
    let visited = db
        .iterate_all({
            let seen = Rc::clone(&seen);
            move |record| {
                seen.borrow_mut().push(record.id().cloned());
                match record.id() {
                    Some(Key::Int(2)) => CursorAction::Delete,
                    _ => CursorAction::Update(record.clone().with("seen", true)),
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(visited, 3);
    assert_eq!(
        *seen.borrow(),
        vec![Some(Key::Int(1)), Some(Key::Int(2)), Some(Key::Int(3))]
    );
    assert_eq!(db.count().await.unwrap(), 2);
    let first = db.get(1).await.unwrap().unwrap();
    assert_eq!(first.get("seen"), Some(serde_json::json!(true)));
}

#[tokio::test]
async fn failed_iteration_rolls_back_its_edits() {
    let env = TestHost::new();
    let db = create_database(env.services(), "db", "items", |builder| {
        builder.create_index(&IndexSpec::new("email", "email").unique())
    })
    .await
    .unwrap();
    for (n, email) in [(1, "a"), (2, "b"), (3, "c")] {
        db.upsert(Record::new().with_id(n).with("email", email).with("v", 0))
            .await
            .unwrap();
    }

    let err = db
        .iterate_all(|record| {
            let edited = record.clone().with("v", 1);
            match record.id() {
                Some(Key::Int(3)) => CursorAction::Update(edited.with("email", "a")),
                _ => CursorAction::Update(edited),
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::TransactionFailed { .. }));
    for n in 1..=3 {
        let record = db.get(n).await.unwrap().unwrap();
        assert_eq!(record.get("v"), Some(serde_json::json!(0)));
    }
    assert!(env.log_contents().contains("failed transaction in db"));
}

#[tokio::test]
async fn failed_writes_are_logged_and_warned() {
    let env = TestHost::new();
    let db = env.create("users", "profiles").await;
    env.host.reject(RequestKind::Clear);
    env.host.reject(RequestKind::Delete);

    assert!(db.clear().await.is_err());
    assert!(db.delete_by_key(1).await.is_err());

    assert_eq!(env.sink.messages(DiagnosticLevel::Warn).len(), 2);
    assert_eq!(
        env.log_contents().matches("failed transaction in users").count(),
        2
    );
}

#[tokio::test]
async fn clear_empties_the_collection() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;
    db.upsert(Record::new()).await.unwrap();
    db.clear().await.unwrap();
    db.clear().await.unwrap();
    assert_eq!(db.count().await.unwrap(), 0);
}

#[tokio::test]
async fn open_failure_is_logged_and_warned() {
    let env = TestHost::new();
    let db = env.create("db", "items").await;
    env.host.deny_open("db");

    let err = db.upsert(Record::new()).await.unwrap_err();

    assert!(matches!(err, CoreError::OpenFailed { .. }));
    assert!(env.log_contents().contains("cannot open database db"));
    assert_eq!(
        env.sink.messages(DiagnosticLevel::Warn),
        vec!["cannot open database db".to_string()]
    );
}

#[tokio::test]
async fn diagnostics_trace_the_lifecycle() {
    let env = TestHost::new();
    let db = env.create("shop", "items").await;
    db.upsert(Record::new()).await.unwrap();

    let log_lines = env.sink.messages(DiagnosticLevel::Log);
    assert_eq!(log_lines[0], "database shop created");
    assert!(log_lines.contains(&"database shop available".to_string()));
    assert!(log_lines.contains(&"element in shop created".to_string()));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn any_record_round_trips(
        name in name_strategy(),
        collection in name_strategy(),
        record in record_strategy(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let (outcome, stored) = runtime.block_on(async {
            let env = TestHost::new();
            let db = create_database(env.services(), &name, &collection, |_| Ok(()))
                .await
                .unwrap();
            let outcome = db.upsert(record.clone()).await.unwrap();
            let stored = db.get(outcome.key().clone()).await.unwrap();
            (outcome, stored)
        });
        prop_assert!(matches!(outcome, UpsertOutcome::Created(_)));
        prop_assert_eq!(stored, Some(record.with_id(outcome.key().clone())));
    }

    #[test]
    fn explicit_keys_round_trip(key in key_strategy(), record in record_strategy()) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let record = record.with_id(key.clone());
        let stored = runtime.block_on(async {
            let env = TestHost::new();
            let db = env.create("db", "items").await;
            db.upsert(record.clone()).await.unwrap();
            db.upsert(record.clone()).await.unwrap();
            db.get(key.clone()).await.unwrap()
        });
        prop_assert_eq!(stored, Some(record));
    }
}
