//! In-memory structured database.
//!
//! [`MemoryHost`] behaves like a browser database closely enough to test
//! the callback orchestration above it:
//! - every completion is a task on an event queue
//! - keys are generated per collection, starting at 1
//! - a failed request aborts its transaction
//! - unique indexes are enforced on writes
//! - an aborted transaction rolls back the writes it made
//!
//! In [`DispatchMode::Immediate`] the queue is drained as soon as work is
//! scheduled. In [`DispatchMode::Deferred`] tasks wait for
//! [`MemoryHost::dispatch`], which lets tests observe suspended operations.

use crate::database::{
    Callback, CollectionBuilder, CollectionSchema, Connection, Cursor, CursorStep,
    DatabaseFactory, IndexSpec, Request, RequestKind, Response, Transaction, TransactionMode,
    UpgradeCallback, UpgradeScope,
};
use crate::error::{HostError, HostResult};
use crate::record::{Key, Record};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::ops::Bound;
use std::rc::Rc;

/// When queued completions run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    /// Run tasks as soon as they are scheduled.
    #[default]
    Immediate,
    /// Run tasks only when [`MemoryHost::dispatch`] is called.
    Deferred,
}

type Task = Box<dyn FnOnce()>;

#[derive(Debug, Clone)]
struct StoredCollection {
    schema: CollectionSchema,
    indexes: Vec<IndexSpec>,
    records: BTreeMap<Key, Record>,
    next_id: i64,
}

impl StoredCollection {
    fn new(schema: CollectionSchema) -> Self {
        Self {
            schema,
            indexes: Vec::new(),
            records: BTreeMap::new(),
            next_id: 1,
        }
    }

    fn apply(&mut self, request: Request) -> HostResult<Response> {
        match request {
            Request::Count => Ok(Response::Count(self.records.len() as u64)),
            Request::Get(key) => Ok(Response::Record(self.records.get(&key).cloned())),
            Request::GetByIndex { index, value } => {
                let spec = self
                    .indexes
                    .iter()
                    .find(|spec| spec.name == index)
                    .ok_or_else(|| HostError::NotFound(format!("index {index}")))?;
                let found = self
                    .records
                    .values()
                    .find(|record| index_key(record, &spec.key_path).as_ref() == Some(&value))
                    .cloned();
                Ok(Response::Record(found))
            }
            Request::Add(mut record) => {
                let key = self.assign_key(&mut record)?;
                if self.records.contains_key(&key) {
                    return Err(HostError::Constraint(format!("key {key} already exists")));
                }
                self.check_unique(&record, &key)?;
                self.records.insert(key.clone(), record);
                Ok(Response::Key(key))
            }
            Request::Put(mut record) => {
                let key = self.assign_key(&mut record)?;
                self.check_unique(&record, &key)?;
                self.records.insert(key.clone(), record);
                Ok(Response::Key(key))
            }
            Request::Delete(key) => {
                self.records.remove(&key);
                Ok(Response::Done)
            }
            Request::Clear => {
                self.records.clear();
                Ok(Response::Done)
            }
        }
    }

    fn assign_key(&mut self, record: &mut Record) -> HostResult<Key> {
        let existing = match record.get(&self.schema.key_path) {
            None | Some(Value::Null) => None,
            Some(raw) => Some(Key::from_json(&raw).ok_or_else(|| {
                HostError::Data(format!("{raw} is not a valid key"))
            })?),
        };
        match existing {
            Some(key) => {
                if let Key::Int(n) = key {
                    if self.schema.auto_increment && n >= self.next_id {
                        self.next_id = n.saturating_add(1);
                    }
                }
                Ok(key)
            }
            None if self.schema.auto_increment => {
                let key = Key::Int(self.next_id);
                self.next_id = self.next_id.saturating_add(1);
                record.set(self.schema.key_path.clone(), key.to_json());
                Ok(key)
            }
            None => Err(HostError::Data(format!(
                "record has no {} and the collection has no key generator",
                self.schema.key_path
            ))),
        }
    }

    fn check_unique(&self, record: &Record, key: &Key) -> HostResult<()> {
        for spec in self.indexes.iter().filter(|spec| spec.unique) {
            let Some(value) = index_key(record, &spec.key_path) else {
                continue;
            };
            let clash = self.records.iter().any(|(other_key, other)| {
                other_key != key && index_key(other, &spec.key_path).as_ref() == Some(&value)
            });
            if clash {
                return Err(HostError::Constraint(format!(
                    "unique index {} already contains {value}",
                    spec.name
                )));
            }
        }
        Ok(())
    }
}

fn index_key(record: &Record, key_path: &str) -> Option<Key> {
    record.get(key_path).as_ref().and_then(Key::from_json)
}

#[derive(Debug, Clone, Default)]
struct StoredDatabase {
    version: u32,
    collections: BTreeMap<String, StoredCollection>,
}

#[derive(Default)]
struct HostState {
    databases: RefCell<HashMap<String, StoredDatabase>>,
    queue: RefCell<VecDeque<Task>>,
    mode: Cell<DispatchMode>,
    draining: Cell<bool>,
    denied: RefCell<HashSet<String>>,
    rejected: RefCell<HashSet<RequestKind>>,
}

impl HostState {
    fn schedule(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
        if self.mode.get() == DispatchMode::Immediate {
            self.drain();
        }
    }

    fn run_one(&self) -> bool {
        let task = self.queue.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    fn drain(&self) -> usize {
        if self.draining.replace(true) {
            return 0;
        }
        let mut ran = 0;
        while self.run_one() {
            ran += 1;
        }
        self.draining.set(false);
        ran
    }

    fn is_rejected(&self, kind: RequestKind) -> bool {
        self.rejected.borrow().contains(&kind)
    }

    fn with_collection<R>(
        &self,
        db: &str,
        collection: &str,
        f: impl FnOnce(&mut StoredCollection) -> HostResult<R>,
    ) -> HostResult<R> {
        let mut databases = self.databases.borrow_mut();
        let stored = databases
            .get_mut(db)
            .and_then(|database| database.collections.get_mut(collection))
            .ok_or_else(|| HostError::NotFound(format!("collection {collection} in {db}")))?;
        f(stored)
    }
}

/// An in-memory structured database host.
///
/// Cloning yields another handle to the same databases and event queue.
#[derive(Clone, Default)]
pub struct MemoryHost {
    state: Rc<HostState>,
}

impl MemoryHost {
    /// Creates a host that runs completions immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host that queues completions until dispatched.
    #[must_use]
    pub fn deferred() -> Self {
        let host = Self::default();
        host.state.mode.set(DispatchMode::Deferred);
        host
    }

    /// Returns the dispatch mode.
    pub fn dispatch_mode(&self) -> DispatchMode {
        self.state.mode.get()
    }

    /// Changes the dispatch mode. Switching to immediate drains the queue.
    pub fn set_dispatch_mode(&self, mode: DispatchMode) {
        self.state.mode.set(mode);
        if mode == DispatchMode::Immediate {
            self.state.drain();
        }
    }

    /// Runs queued tasks, including any they schedule, until the queue is
    /// empty. Returns the number of tasks run.
    pub fn dispatch(&self) -> usize {
        self.state.drain()
    }

    /// Runs a single queued task. Returns false if the queue was empty.
    pub fn dispatch_one(&self) -> bool {
        if self.state.draining.replace(true) {
            return false;
        }
        let ran = self.state.run_one();
        self.state.draining.set(false);
        ran
    }

    /// Number of queued tasks.
    pub fn pending_tasks(&self) -> usize {
        self.state.queue.borrow().len()
    }

    /// Makes every open of `name` fail.
    pub fn deny_open(&self, name: &str) {
        self.state.denied.borrow_mut().insert(name.to_string());
    }

    /// Lifts a [`deny_open`](Self::deny_open).
    pub fn allow_open(&self, name: &str) {
        self.state.denied.borrow_mut().remove(name);
    }

    /// Makes every request of `kind` fail.
    pub fn reject(&self, kind: RequestKind) {
        self.state.rejected.borrow_mut().insert(kind);
    }

    /// Lifts a [`reject`](Self::reject).
    pub fn accept(&self, kind: RequestKind) {
        self.state.rejected.borrow_mut().remove(&kind);
    }

    /// Stored schema version of a database.
    pub fn version(&self, db: &str) -> Option<u32> {
        self.state.databases.borrow().get(db).map(|d| d.version)
    }

    /// Indexes declared on a collection.
    pub fn indexes(&self, db: &str, collection: &str) -> Vec<IndexSpec> {
        self.state
            .with_collection(db, collection, |c| Ok(c.indexes.clone()))
            .unwrap_or_default()
    }

    /// Number of records in a collection.
    pub fn len(&self, db: &str, collection: &str) -> usize {
        self.state
            .with_collection(db, collection, |c| Ok(c.records.len()))
            .unwrap_or(0)
    }

    /// Records of a collection in key order.
    pub fn records(&self, db: &str, collection: &str) -> Vec<Record> {
        self.state
            .with_collection(db, collection, |c| Ok(c.records.values().cloned().collect()))
            .unwrap_or_default()
    }
}

impl DatabaseFactory for MemoryHost {
    fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: Callback<Rc<dyn Connection>>,
    ) {
        let state = Rc::clone(&self.state);
        let name = name.to_string();
        self.state.schedule(Box::new(move || {
            let result = open_database(&state, &name, version, on_upgrade);
            on_done(result);
        }));
    }
}

fn open_database(
    state: &Rc<HostState>,
    name: &str,
    version: u32,
    on_upgrade: UpgradeCallback,
) -> HostResult<Rc<dyn Connection>> {
    if state.denied.borrow().contains(name) {
        return Err(HostError::Denied(format!("opening {name} is not allowed")));
    }
    if version == 0 {
        return Err(HostError::Data("version must be at least 1".into()));
    }

    let previous = {
        let mut databases = state.databases.borrow_mut();
        let database = databases.entry(name.to_string()).or_default();
        if version < database.version {
            return Err(HostError::Version {
                requested: version,
                stored: database.version,
            });
        }
        (version > database.version).then(|| database.clone())
    };

    if let Some(previous) = previous {
        let scope = MemoryUpgrade {
            state: Rc::clone(state),
            db: name.to_string(),
            old_version: previous.version,
            new_version: version,
        };
        if let Err(err) = on_upgrade(&scope) {
            let mut databases = state.databases.borrow_mut();
            if previous.version == 0 {
                databases.remove(name);
            } else {
                databases.insert(name.to_string(), previous);
            }
            return Err(err);
        }
        if let Some(database) = state.databases.borrow_mut().get_mut(name) {
            database.version = version;
        }
        tracing::debug!(db = name, version, "upgraded in-memory database");
    }

    Ok(Rc::new(MemoryConnection {
        state: Rc::clone(state),
        name: name.to_string(),
        version,
        closed: Cell::new(false),
    }))
}

struct MemoryUpgrade {
    state: Rc<HostState>,
    db: String,
    old_version: u32,
    new_version: u32,
}

impl UpgradeScope for MemoryUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_collection(&self, name: &str) -> bool {
        self.state
            .databases
            .borrow()
            .get(&self.db)
            .is_some_and(|d| d.collections.contains_key(name))
    }

    fn delete_collection(&self, name: &str) -> HostResult<()> {
        let mut databases = self.state.databases.borrow_mut();
        databases
            .get_mut(&self.db)
            .and_then(|d| d.collections.remove(name))
            .map(|_| ())
            .ok_or_else(|| HostError::NotFound(format!("collection {name}")))
    }

    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> HostResult<Box<dyn CollectionBuilder>> {
        let mut databases = self.state.databases.borrow_mut();
        let database = databases.entry(self.db.clone()).or_default();
        if database.collections.contains_key(name) {
            return Err(HostError::Constraint(format!("collection {name} already exists")));
        }
        database
            .collections
            .insert(name.to_string(), StoredCollection::new(schema.clone()));
        Ok(Box::new(MemoryCollectionBuilder {
            state: Rc::clone(&self.state),
            db: self.db.clone(),
            name: name.to_string(),
        }))
    }
}

struct MemoryCollectionBuilder {
    state: Rc<HostState>,
    db: String,
    name: String,
}

impl CollectionBuilder for MemoryCollectionBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_index(&self, spec: &IndexSpec) -> HostResult<()> {
        self.state.with_collection(&self.db, &self.name, |c| {
            if c.indexes.iter().any(|existing| existing.name == spec.name) {
                return Err(HostError::Constraint(format!(
                    "index {} already exists",
                    spec.name
                )));
            }
            c.indexes.push(spec.clone());
            Ok(())
        })
    }
}

struct MemoryConnection {
    state: Rc<HostState>,
    name: String,
    version: u32,
    closed: Cell<bool>,
}

impl Connection for MemoryConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.version
    }

    fn collection_names(&self) -> Vec<String> {
        self.state
            .databases
            .borrow()
            .get(&self.name)
            .map(|d| d.collections.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> HostResult<Box<dyn Transaction>> {
        if self.closed.get() {
            return Err(HostError::Aborted(format!("connection to {} is closed", self.name)));
        }
        if !self.collection_names().iter().any(|c| c == collection) {
            return Err(HostError::NotFound(format!(
                "collection {collection} in {}",
                self.name
            )));
        }
        Ok(Box::new(MemoryTransaction {
            state: Rc::clone(&self.state),
            db: self.name.clone(),
            collection: collection.to_string(),
            mode,
            txn: Rc::new(TxnState::new(&self.name, collection)),
        }))
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

/// Completion bookkeeping of one transaction.
///
/// The collection is copied before the first write so an abort can put it
/// back. Overlapping read-write transactions are not serialized, so a
/// rollback restores the collection as this transaction first saw it.
struct TxnState {
    db: String,
    collection: String,
    pending: Cell<usize>,
    outcome: RefCell<Option<HostResult<()>>>,
    on_finish: RefCell<Option<Callback<()>>>,
    snapshot: RefCell<Option<StoredCollection>>,
}

impl TxnState {
    fn new(db: &str, collection: &str) -> Self {
        Self {
            db: db.to_string(),
            collection: collection.to_string(),
            pending: Cell::new(0),
            outcome: RefCell::new(None),
            on_finish: RefCell::new(None),
            snapshot: RefCell::new(None),
        }
    }

    fn is_finished(&self) -> bool {
        self.outcome.borrow().is_some()
    }

    fn begin(&self) {
        self.pending.set(self.pending.get() + 1);
    }

    /// Marks one request done and finishes the transaction when it was the
    /// last one or when it failed.
    fn end(&self, state: &HostState, result: HostResult<()>) {
        self.pending.set(self.pending.get().saturating_sub(1));
        if result.is_err() || self.pending.get() == 0 {
            self.finish(state, result);
        }
    }

    /// Copies the collection unless this transaction already wrote to it.
    fn before_write(&self, state: &HostState) {
        if self.snapshot.borrow().is_some() {
            return;
        }
        let copy = state
            .with_collection(&self.db, &self.collection, |c| Ok(c.clone()))
            .ok();
        *self.snapshot.borrow_mut() = copy;
    }

    fn roll_back(&self, state: &HostState) {
        let Some(snapshot) = self.snapshot.borrow_mut().take() else {
            return;
        };
        let restored = state.with_collection(&self.db, &self.collection, |c| {
            *c = snapshot;
            Ok(())
        });
        match restored {
            Ok(()) => {
                tracing::debug!(db = %self.db, collection = %self.collection, "transaction rolled back");
            }
            Err(err) => tracing::debug!(db = %self.db, error = %err, "rollback target is gone"),
        }
    }

    fn finish(&self, state: &HostState, result: HostResult<()>) {
        if self.is_finished() {
            return;
        }
        if result.is_err() {
            self.roll_back(state);
        } else {
            self.snapshot.borrow_mut().take();
        }
        *self.outcome.borrow_mut() = Some(result.clone());
        let callback = self.on_finish.borrow_mut().take();
        if let Some(callback) = callback {
            state.schedule(Box::new(move || callback(result)));
        }
    }
}

struct MemoryTransaction {
    state: Rc<HostState>,
    db: String,
    collection: String,
    mode: TransactionMode,
    txn: Rc<TxnState>,
}

impl Transaction for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn submit(&self, request: Request, on_done: Callback<Response>) {
        self.txn.begin();
        let state = Rc::clone(&self.state);
        let txn = Rc::clone(&self.txn);
        let db = self.db.clone();
        let collection = self.collection.clone();
        let mode = self.mode;
        self.state.schedule(Box::new(move || {
            let kind = request.kind();
            let result = if txn.is_finished() {
                Err(HostError::Aborted("transaction already finished".into()))
            } else if state.is_rejected(kind) {
                Err(HostError::Aborted(format!("{kind:?} rejected by host")))
            } else if kind.is_write() && mode == TransactionMode::ReadOnly {
                Err(HostError::ReadOnly)
            } else {
                if kind.is_write() {
                    txn.before_write(&state);
                }
                state.with_collection(&db, &collection, |c| c.apply(request))
            };
            match result {
                Ok(response) => {
                    on_done(Ok(response));
                    txn.end(&state, Ok(()));
                }
                Err(err) => {
                    on_done(Err(err.clone()));
                    txn.end(&state, Err(err));
                }
            }
        }));
    }

    fn open_cursor(&self, on_step: CursorStep) {
        self.txn.begin();
        let driver = Rc::new(CursorDriver {
            state: Rc::clone(&self.state),
            txn: Rc::clone(&self.txn),
            db: self.db.clone(),
            collection: self.collection.clone(),
            mode: self.mode,
            on_step: RefCell::new(on_step),
            failure: RefCell::new(None),
        });
        driver.step(None);
    }

    fn on_finish(&self, on_done: Callback<()>) {
        let outcome = self.txn.outcome.borrow().clone();
        match outcome {
            Some(result) => self.state.schedule(Box::new(move || on_done(result))),
            None => *self.txn.on_finish.borrow_mut() = Some(on_done),
        }
    }
}

struct CursorDriver {
    state: Rc<HostState>,
    txn: Rc<TxnState>,
    db: String,
    collection: String,
    mode: TransactionMode,
    on_step: RefCell<CursorStep>,
    failure: RefCell<Option<HostError>>,
}

impl CursorDriver {
    fn step(self: &Rc<Self>, after: Option<Key>) {
        let driver = Rc::clone(self);
        self.state.schedule(Box::new(move || driver.visit(after)));
    }

    fn call(&self, step: HostResult<Option<Box<dyn Cursor>>>) {
        let mut on_step = self.on_step.borrow_mut();
        (*on_step)(step);
    }

    fn fail(&self, err: HostError) {
        self.call(Err(err.clone()));
        self.txn.end(&self.state, Err(err));
    }

    fn visit(self: &Rc<Self>, after: Option<Key>) {
        if self.txn.is_finished() {
            return;
        }
        if self.state.is_rejected(RequestKind::OpenCursor) {
            self.fail(HostError::Aborted("OpenCursor rejected by host".into()));
            return;
        }

        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let next = self.state.with_collection(&self.db, &self.collection, |c| {
            Ok(c.records
                .range((lower, Bound::Unbounded))
                .next()
                .map(|(key, record)| (key.clone(), record.clone())))
        });

        match next {
            Err(err) => self.fail(err),
            Ok(None) => {
                self.call(Ok(None));
                self.txn.end(&self.state, Ok(()));
            }
            Ok(Some((key, record))) => {
                let advanced = Rc::new(Cell::new(false));
                let cursor = MemoryCursor {
                    driver: Rc::clone(self),
                    key,
                    record,
                    advanced: Rc::clone(&advanced),
                };
                self.call(Ok(Some(Box::new(cursor))));

                let failure = self.failure.borrow_mut().take();
                if let Some(err) = failure {
                    self.fail(err);
                } else if !advanced.get() {
                    self.txn.end(&self.state, Ok(()));
                }
            }
        }
    }

    fn write(&self, f: impl FnOnce(&mut StoredCollection) -> HostResult<()>) {
        let result = if self.mode == TransactionMode::ReadOnly {
            Err(HostError::ReadOnly)
        } else {
            self.txn.before_write(&self.state);
            self.state.with_collection(&self.db, &self.collection, f)
        };
        if let Err(err) = result {
            *self.failure.borrow_mut() = Some(err);
        }
    }
}

struct MemoryCursor {
    driver: Rc<CursorDriver>,
    key: Key,
    record: Record,
    advanced: Rc<Cell<bool>>,
}

impl Cursor for MemoryCursor {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn record(&self) -> Record {
        self.record.clone()
    }

    fn advance(&self) {
        if !self.advanced.replace(true) {
            self.driver.step(Some(self.key.clone()));
        }
    }

    fn update(&self, record: Record) {
        let key = self.key.clone();
        self.driver.write(move |c| {
            let mut record = record;
            record.set(c.schema.key_path.clone(), key.to_json());
            c.check_unique(&record, &key)?;
            c.records.insert(key, record);
            Ok(())
        });
    }

    fn delete(&self) {
        let key = self.key.clone();
        self.driver.write(move |c| {
            c.records.remove(&key);
            Ok(())
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    type Slot<T> = Rc<RefCell<Option<HostResult<T>>>>;

    fn slot<T>() -> Slot<T> {
        Rc::new(RefCell::new(None))
    }

    fn callback<T: 'static>(slot: &Slot<T>) -> Callback<T> {
        let slot = Rc::clone(slot);
        Box::new(move |result| *slot.borrow_mut() = Some(result))
    }

    fn take<T>(slot: &Slot<T>) -> HostResult<T> {
        slot.borrow_mut().take().expect("callback did not fire")
    }

    fn open_with(host: &MemoryHost, name: &str, indexes: Vec<IndexSpec>) -> Rc<dyn Connection> {
        let opened = slot();
        host.open(
            name,
            1,
            Box::new(move |scope| {
                let builder = scope.create_collection("items", &CollectionSchema::default())?;
                for spec in &indexes {
                    builder.create_index(spec)?;
                }
                Ok(())
            }),
            callback(&opened),
        );
        host.dispatch();
        take(&opened).unwrap()
    }

    fn run(conn: &Rc<dyn Connection>, mode: TransactionMode, request: Request) -> HostResult<Response> {
        let done = slot();
        let txn = conn.transaction("items", mode).unwrap();
        txn.submit(request, callback(&done));
        take(&done)
    }

    #[test]
    fn open_runs_upgrade_once() {
        let host = MemoryHost::new();
        let upgrades = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let counter = Rc::clone(&upgrades);
            let opened = slot();
            host.open(
                "db",
                1,
                Box::new(move |scope| {
                    counter.set(counter.get() + 1);
                    assert_eq!(scope.old_version(), 0);
                    assert_eq!(scope.new_version(), 1);
                    scope.create_collection("items", &CollectionSchema::default())?;
                    Ok(())
                }),
                callback(&opened),
            );
            assert!(take(&opened).is_ok());
        }

        assert_eq!(upgrades.get(), 1);
        assert_eq!(host.version("db"), Some(1));
    }

    #[test]
    fn older_version_is_rejected() {
        let host = MemoryHost::new();
        let opened = slot();
        host.open("db", 2, Box::new(|_| Ok(())), callback(&opened));
        assert!(take(&opened).is_ok());

        host.open("db", 1, Box::new(|_| Ok(())), callback(&opened));
        assert!(matches!(
            take(&opened),
            Err(HostError::Version { requested: 1, stored: 2 })
        ));
    }

    #[test]
    fn failed_upgrade_leaves_no_database() {
        let host = MemoryHost::new();
        let opened = slot();
        host.open(
            "db",
            1,
            Box::new(|_| Err(HostError::Aborted("no".into()))),
            callback(&opened),
        );
        assert!(take(&opened).is_err());
        assert_eq!(host.version("db"), None);
    }

    #[test]
    fn denied_open_fails() {
        let host = MemoryHost::new();
        host.deny_open("db");
        let opened = slot();
        host.open("db", 1, Box::new(|_| Ok(())), callback(&opened));
        assert!(matches!(take(&opened), Err(HostError::Denied(_))));
    }

    #[test]
    fn add_assigns_keys_and_rejects_duplicates() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);

        let first = run(&conn, TransactionMode::ReadWrite, Request::Add(Record::new().with("n", 1)));
        assert_eq!(first.unwrap(), Response::Key(Key::Int(1)));

        let explicit = run(
            &conn,
            TransactionMode::ReadWrite,
            Request::Add(Record::new().with_id(10).with("n", 2)),
        );
        assert_eq!(explicit.unwrap(), Response::Key(Key::Int(10)));

        let next = run(&conn, TransactionMode::ReadWrite, Request::Add(Record::new()));
        assert_eq!(next.unwrap(), Response::Key(Key::Int(11)));

        let duplicate = run(
            &conn,
            TransactionMode::ReadWrite,
            Request::Add(Record::new().with_id(10)),
        );
        assert!(matches!(duplicate, Err(HostError::Constraint(_))));

        let count = run(&conn, TransactionMode::ReadOnly, Request::Count).unwrap();
        assert_eq!(count, Response::Count(3));
    }

    #[test]
    fn invalid_key_is_a_data_error() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        let mut record = Record::new();
        record.set("id", json!({"nested": 1}));

        let added = run(&conn, TransactionMode::ReadWrite, Request::Add(record));
        assert!(matches!(added, Err(HostError::Data(_))));
        assert_eq!(host.len("db", "items"), 0);
    }

    #[test]
    fn put_replaces_and_delete_is_silent() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);

        run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id("a").with("v", 1))).unwrap();
        run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id("a").with("v", 2))).unwrap();

        let got = run(&conn, TransactionMode::ReadOnly, Request::Get(Key::from("a"))).unwrap();
        let Response::Record(Some(record)) = got else {
            panic!("expected a record");
        };
        assert_eq!(record.get("v"), Some(json!(2)));

        let deleted = run(&conn, TransactionMode::ReadWrite, Request::Delete(Key::from("missing")));
        assert_eq!(deleted.unwrap(), Response::Done);
    }

    #[test]
    fn writes_fail_in_read_only_transactions() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        let result = run(&conn, TransactionMode::ReadOnly, Request::Clear);
        assert_eq!(result, Err(HostError::ReadOnly));
    }

    #[test]
    fn index_lookup_and_uniqueness() {
        let host = MemoryHost::new();
        let conn = open_with(
            &host,
            "db",
            vec![IndexSpec::new("name", "name"), IndexSpec::new("email", "email").unique()],
        );
        assert_eq!(host.indexes("db", "items").len(), 2);

        run(&conn, TransactionMode::ReadWrite, Request::Add(Record::new().with("name", "x").with("email", "a@x"))).unwrap();
        run(&conn, TransactionMode::ReadWrite, Request::Add(Record::new().with("name", "x").with("email", "b@x"))).unwrap();

        let clash = run(
            &conn,
            TransactionMode::ReadWrite,
            Request::Add(Record::new().with("name", "y").with("email", "a@x")),
        );
        assert!(matches!(clash, Err(HostError::Constraint(_))));

        let found = run(
            &conn,
            TransactionMode::ReadOnly,
            Request::GetByIndex { index: "name".into(), value: Key::from("x") },
        )
        .unwrap();
        let Response::Record(Some(record)) = found else {
            panic!("expected a record");
        };
        assert_eq!(record.id(), Some(&Key::Int(1)));

        let missing_index = run(
            &conn,
            TransactionMode::ReadOnly,
            Request::GetByIndex { index: "nope".into(), value: Key::from("x") },
        );
        assert!(matches!(missing_index, Err(HostError::NotFound(_))));
    }

    #[test]
    fn deferred_mode_waits_for_dispatch() {
        let host = MemoryHost::deferred();
        let opened = slot();
        host.open(
            "db",
            1,
            Box::new(|scope| scope.create_collection("items", &CollectionSchema::default()).map(|_| ())),
            callback(&opened),
        );
        assert!(opened.borrow().is_none());
        assert_eq!(host.pending_tasks(), 1);

        assert!(host.dispatch_one());
        assert!(take(&opened).is_ok());
        assert!(!host.dispatch_one());
    }

    #[test]
    fn finish_fires_after_late_registration() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();

        let done = slot();
        txn.submit(Request::Add(Record::new()), callback(&done));
        assert!(take(&done).is_ok());

        let finished = slot();
        txn.on_finish(callback(&finished));
        assert!(take(&finished).is_ok());
    }

    #[test]
    fn failed_request_aborts_transaction() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        host.reject(RequestKind::Put);

        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        let finished = slot();
        txn.on_finish(callback(&finished));
        let done = slot();
        txn.submit(Request::Put(Record::new()), callback(&done));

        assert!(matches!(take(&done), Err(HostError::Aborted(_))));
        assert!(matches!(take(&finished), Err(HostError::Aborted(_))));

        host.accept(RequestKind::Put);
        assert!(run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new())).is_ok());
    }

    #[test]
    fn cursor_walks_in_key_order_and_can_stop() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        for n in [3, 1, 2] {
            run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id(n))).unwrap();
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let ended = Rc::new(Cell::new(false));
        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        {
            let seen = Rc::clone(&seen);
            let ended = Rc::clone(&ended);
            txn.open_cursor(Box::new(move |step| match step.unwrap() {
                Some(cursor) => {
                    seen.borrow_mut().push(cursor.key());
                    if cursor.key() != Key::Int(2) {
                        cursor.advance();
                    }
                }
                None => ended.set(true),
            }));
        }
        let finished = slot();
        txn.on_finish(callback(&finished));

        assert_eq!(*seen.borrow(), vec![Key::Int(1), Key::Int(2)]);
        assert!(!ended.get());
        assert!(take(&finished).is_ok());
    }

    #[test]
    fn cursor_updates_and_deletes() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        for n in 1..=3 {
            run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id(n).with("v", n))).unwrap();
        }

        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        txn.open_cursor(Box::new(|step| {
            if let Ok(Some(cursor)) = step {
                match cursor.key() {
                    Key::Int(1) => cursor.delete(),
                    _ => cursor.update(cursor.record().with("v", 0)),
                }
                cursor.advance();
            }
        }));

        let records = host.records("db", "items");
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.get("v") == Some(json!(0))));
    }

    #[test]
    fn cursor_write_in_read_only_transaction_fails() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new())).unwrap();

        let errors = Rc::new(Cell::new(0));
        let txn = conn.transaction("items", TransactionMode::ReadOnly).unwrap();
        {
            let errors = Rc::clone(&errors);
            txn.open_cursor(Box::new(move |step| match step {
                Ok(Some(cursor)) => cursor.delete(),
                Ok(None) => {}
                Err(_) => errors.set(errors.get() + 1),
            }));
        }
        assert_eq!(errors.get(), 1);
        assert_eq!(host.len("db", "items"), 1);
    }

    #[test]
    fn aborted_transaction_rolls_back_earlier_requests() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id(1).with("v", 0))).unwrap();

        host.set_dispatch_mode(DispatchMode::Deferred);
        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        let finished = slot();
        txn.on_finish(callback(&finished));
        let first = slot();
        txn.submit(Request::Put(Record::new().with_id(1).with("v", 1)), callback(&first));
        let second = slot();
        txn.submit(Request::Add(Record::new().with_id(2)), callback(&second));
        let third = slot();
        txn.submit(Request::Add(Record::new().with_id(1)), callback(&third));
        host.set_dispatch_mode(DispatchMode::Immediate);

        assert!(take(&first).is_ok());
        assert!(take(&second).is_ok());
        assert!(matches!(take(&third), Err(HostError::Constraint(_))));
        assert!(matches!(take(&finished), Err(HostError::Constraint(_))));

        let records = host.records("db", "items");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("v"), Some(json!(0)));
        let next = run(&conn, TransactionMode::ReadWrite, Request::Add(Record::new())).unwrap();
        assert_eq!(next, Response::Key(Key::Int(2)));
    }

    #[test]
    fn cursor_clash_rolls_back_earlier_updates() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![IndexSpec::new("email", "email").unique()]);
        for (n, email) in [(1, "a"), (2, "b"), (3, "c")] {
            let record = Record::new().with_id(n).with("email", email).with("v", 0);
            run(&conn, TransactionMode::ReadWrite, Request::Put(record)).unwrap();
        }

        let errors = Rc::new(Cell::new(0));
        let txn = conn.transaction("items", TransactionMode::ReadWrite).unwrap();
        {
            let errors = Rc::clone(&errors);
            txn.open_cursor(Box::new(move |step| match step {
                Ok(Some(cursor)) => {
                    let record = cursor.record().with("v", 1);
                    match cursor.key() {
                        Key::Int(3) => cursor.update(record.with("email", "a")),
                        _ => cursor.update(record),
                    }
                    cursor.advance();
                }
                Ok(None) => {}
                Err(_) => errors.set(errors.get() + 1),
            }));
        }
        let finished = slot();
        txn.on_finish(callback(&finished));

        assert_eq!(errors.get(), 1);
        assert!(matches!(take(&finished), Err(HostError::Constraint(_))));
        assert!(host
            .records("db", "items")
            .iter()
            .all(|record| record.get("v") == Some(json!(0))));
    }

    #[test]
    fn committed_writes_survive_a_later_abort() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        run(&conn, TransactionMode::ReadWrite, Request::Put(Record::new().with_id(1))).unwrap();

        host.reject(RequestKind::Clear);
        assert!(run(&conn, TransactionMode::ReadWrite, Request::Clear).is_err());
        assert_eq!(host.len("db", "items"), 1);
    }

    #[test]
    fn closed_connection_refuses_transactions() {
        let host = MemoryHost::new();
        let conn = open_with(&host, "db", vec![]);
        conn.close();
        assert!(conn.transaction("items", TransactionMode::ReadOnly).is_err());
    }
}
