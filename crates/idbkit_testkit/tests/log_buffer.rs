//! Integration tests for the bounded log buffer.

use idbkit_core::{AppendOutcome, CoreError, LogConfig, LogRecords};
use idbkit_host::KeyValueStore;
use idbkit_testkit::prelude::*;
use proptest::prelude::*;

fn env(capacity: usize) -> TestHost {
    TestHost::with_log_config(LogConfig::new("records", "authorized", capacity))
}

#[test]
fn unauthorized_capacity_three_discards_and_restarts() {
    let env = env(3);

    env.log.append("one").unwrap();
    env.log.append("two").unwrap();
    let third = env.log.append("three");

    assert_eq!(third, Err(CoreError::Forbidden { discarded: 3 }));
    assert_eq!(env.log_contents(), "");
    assert_eq!(env.transport.calls(), 0);

    assert_eq!(env.log.append("four").unwrap(), AppendOutcome::Buffered { len: 1 });
    assert_eq!(env.log_contents(), "four-2021-06-01 12:30:00");
}

#[test]
fn authorized_flush_sends_once() {
    let env = env(3);
    env.authorize(true);

    for message in ["one", "two", "three"] {
        env.log.append(message).unwrap();
    }

    assert_eq!(env.log_contents(), "");
    assert_eq!(
        env.transport.payloads(),
        vec![
            "one-2021-06-01 12:30:00,two-2021-06-01 12:30:00,three-2021-06-01 12:30:00"
                .to_string()
        ]
    );
}

#[test]
fn authorization_written_as_text_is_honored() {
    let env = env(2);
    env.store.write("authorized", "T").unwrap();
    env.log.append("a").unwrap();
    assert_eq!(env.log.append("b").unwrap(), AppendOutcome::Flushed { sent: 2 });
}

#[test]
fn transport_failure_surfaces_and_loses_records() {
    let env = env(2);
    env.authorize(true);
    env.transport.fail_with("503");

    env.log.append("a").unwrap();
    let err = env.log.append("b").unwrap_err();

    assert_eq!(err, CoreError::transport_failed("503"));
    assert_eq!(env.transport.calls(), 1);
    assert_eq!(env.log_contents(), "");
}

#[test]
fn stray_separators_are_cleaned_on_rewrite() {
    let env = env(10);
    env.store.write("records", ",old-1,,").unwrap();

    env.log.append("new").unwrap();

    assert_eq!(env.log_contents(), "old-1,new-2021-06-01 12:30:00");
}

#[test]
fn comma_in_message_splits_the_record() {
    let env = env(10);
    env.log.append("left,right").unwrap();
    assert_eq!(env.log.len().unwrap(), 2);
}

#[test]
fn manual_flush_of_partial_buffer() {
    let env = env(10);
    env.authorize(true);
    env.log.append("a").unwrap();
    assert_eq!(env.log.flush(), Ok(1));
    assert_eq!(env.transport.calls(), 1);
}

proptest! {
    #[test]
    fn k_appends_flush_exactly_once(
        capacity in 1usize..12,
        authorized in any::<bool>(),
        prefix in message_strategy(),
    ) {
        let env = env(capacity);
        env.authorize(authorized);

        for i in 0..capacity {
            let _ = env.log.append(&format!("{prefix}{i}"));
        }

        prop_assert_eq!(env.log_contents(), "");
        prop_assert!(env.transport.calls() <= 1);
        prop_assert_eq!(env.transport.calls() == 1, authorized);
        if authorized {
            let sent = LogRecords::parse(&env.transport.payloads()[0]);
            prop_assert_eq!(sent.len(), capacity);
        }
    }

    #[test]
    fn buffered_records_never_reach_capacity(
        capacity in 1usize..6,
        messages in prop::collection::vec(message_strategy(), 0..30),
    ) {
        let env = env(capacity);
        for message in &messages {
            let _ = env.log.append(message);
            prop_assert!(env.log.len().unwrap() < capacity);
        }
    }
}
