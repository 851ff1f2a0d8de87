//! Test fixtures.
//!
//! [`TestHost`] wires an in-memory database, key/value store, recording
//! diagnostic sink and recording transport into [`HostServices`].

use crate::transport::RecordingTransport;
use chrono::{NaiveDate, NaiveDateTime};
use idbkit_core::{create_database, FixedClock, HostServices, IndexedDb, LogBuffer, LogConfig};
use idbkit_host::{KeyValueStore, MemoryHost, MemoryKeyValueStore, RecordingSink};
use std::future::Future;
use std::rc::Rc;

/// Rounds without host activity after which [`TestHost::run_deferred`]
/// gives up.
const STALL_LIMIT: usize = 1_000;

/// Instant every [`TestHost`] log record is stamped with.
pub fn fixed_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2021, 6, 1)
        .and_then(|day| day.and_hms_opt(12, 30, 0))
        .expect("valid fixed time")
}

/// An in-memory host environment.
pub struct TestHost {
    /// The structured database.
    pub host: MemoryHost,
    /// Backing store of the log buffer.
    pub store: Rc<MemoryKeyValueStore>,
    /// Every diagnostic written.
    pub sink: Rc<RecordingSink>,
    /// Every flushed payload.
    pub transport: Rc<RecordingTransport>,
    /// The log buffer.
    pub log: Rc<LogBuffer>,
}

impl TestHost {
    /// Creates an environment whose host completes work immediately.
    pub fn new() -> Self {
        Self::build(MemoryHost::new(), LogConfig::new("log", "log.auth", 50))
    }

    /// Creates an environment whose host queues work until dispatched.
    pub fn deferred() -> Self {
        Self::build(MemoryHost::deferred(), LogConfig::new("log", "log.auth", 50))
    }

    /// Creates an immediate environment with a custom log configuration.
    pub fn with_log_config(config: LogConfig) -> Self {
        Self::build(MemoryHost::new(), config)
    }

    fn build(host: MemoryHost, config: LogConfig) -> Self {
        let store = Rc::new(MemoryKeyValueStore::new());
        let transport = Rc::new(RecordingTransport::new());
        let log = LogBuffer::new(config, store.clone(), transport.clone())
            .expect("valid log configuration")
            .with_clock(Rc::new(FixedClock(fixed_time())));
        Self {
            host,
            store,
            sink: Rc::new(RecordingSink::new()),
            transport,
            log: Rc::new(log),
        }
    }

    /// Collaborators for a façade.
    pub fn services(&self) -> HostServices {
        HostServices::new(
            Rc::new(self.host.clone()),
            self.sink.clone(),
            Rc::clone(&self.log),
        )
    }

    /// Stores the log send authorization flag.
    pub fn authorize(&self, authorized: bool) {
        self.log
            .set_authorized(authorized)
            .expect("memory store accepts writes");
    }

    /// Raw stored log string, empty when absent.
    pub fn log_contents(&self) -> String {
        self.store
            .read(self.log.records_key())
            .expect("memory store accepts reads")
            .unwrap_or_default()
    }

    /// Creates a database with no secondary indexes. Immediate hosts only.
    pub async fn create(&self, name: &str, collection: &str) -> IndexedDb {
        create_database(self.services(), name, collection, |_| Ok(()))
            .await
            .expect("create database")
    }

    /// Runs `future` on the current `LocalSet`, dispatching host work
    /// until it completes.
    ///
    /// # Panics
    ///
    /// Panics if the future stops making progress or panics itself.
    pub async fn run_deferred<F>(&self, future: F) -> F::Output
    where
        F: Future + 'static,
        F::Output: 'static,
    {
        let task = tokio::task::spawn_local(future);
        let mut idle = 0;
        while !task.is_finished() {
            tokio::task::yield_now().await;
            if self.host.dispatch() == 0 {
                idle += 1;
                assert!(idle < STALL_LIMIT, "deferred task stalled");
            } else {
                idle = 0;
            }
        }
        task.await.expect("deferred task panicked")
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_contents_start_empty() {
        let env = TestHost::new();
        assert_eq!(env.log_contents(), "");
        env.log.append("x").unwrap();
        assert_eq!(env.log_contents(), "x-2021-06-01 12:30:00");
    }

    #[tokio::test]
    async fn create_opens_the_collection() {
        let env = TestHost::new();
        let db = env.create("db", "items").await;
        assert_eq!(db.count().await.unwrap(), 0);
        assert_eq!(env.host.version("db"), Some(1));
    }
}
