//! IndexedDB host.
//!
//! Implements the idbkit database capability on `window.indexedDB`. Every
//! browser request is wrapped so its `success`/`error` events complete the
//! matching [`Callback`] exactly once.
//!
//! ## Event Wiring
//!
//! One-shot handlers use `Closure::once_into_js`, which frees the closure
//! after it runs. The success and error handlers of a request share the
//! pending callback through an `Rc<RefCell<Option<_>>>`, so whichever
//! fires first takes it. Cursor requests fire `success` once per position
//! and use a long-lived `FnMut` closure instead.

use super::convert::{describe, dom_error, js_error, key_from_js, key_to_js, record_from_js, record_to_js};
use crate::error::{WasmError, WasmResult};
use idbkit_host::{
    Callback, CollectionBuilder, CollectionSchema, Connection, Cursor, CursorStep,
    DatabaseFactory, HostError, HostResult, IndexSpec, Key, Record, Request, Response,
    Transaction, TransactionMode, UpgradeCallback, UpgradeScope,
};
use std::cell::RefCell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    IdbCursorWithValue, IdbDatabase, IdbFactory, IdbIndexParameters, IdbObjectStore,
    IdbObjectStoreParameters, IdbOpenDbRequest, IdbRequest, IdbTransaction, IdbTransactionMode,
    IdbVersionChangeEvent,
};

type Shared<T> = Rc<RefCell<Option<T>>>;

fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(Some(value)))
}

fn take<T>(slot: &Shared<T>) -> Option<T> {
    slot.borrow_mut().take()
}

/// Aborts `transaction`. An abort that throws (the transaction already
/// finished) is written to the console; the caller's error stands.
fn abort(transaction: &IdbTransaction) {
    if let Err(err) = transaction.abort() {
        web_sys::console::warn_1(&JsValue::from_str(&format!(
            "idbkit: transaction abort failed: {}",
            describe(&err)
        )));
    }
}

/// A [`DatabaseFactory`] backed by the browser's IndexedDB.
#[derive(Debug, Clone)]
pub struct IdbFactoryHost {
    factory: IdbFactory,
}

impl IdbFactoryHost {
    /// Uses the current window's `indexedDB`.
    pub fn from_window() -> WasmResult<Self> {
        let window =
            web_sys::window().ok_or_else(|| WasmError::NotSupported("no window".into()))?;
        let factory = window
            .indexed_db()?
            .ok_or_else(|| WasmError::NotSupported("IndexedDB not available".into()))?;
        Ok(Self { factory })
    }

    /// Checks whether IndexedDB can be reached from this context.
    pub fn is_available() -> bool {
        web_sys::window()
            .and_then(|window| window.indexed_db().ok().flatten())
            .is_some()
    }
}

impl DatabaseFactory for IdbFactoryHost {
    fn open(
        &self,
        name: &str,
        version: u32,
        on_upgrade: UpgradeCallback,
        on_done: Callback<Rc<dyn Connection>>,
    ) {
        let request = match self.factory.open_with_u32(name, version) {
            Ok(request) => request,
            Err(err) => return on_done(Err(js_error(err))),
        };
        let done = shared(on_done);
        let upgrade_failure: Shared<HostError> = Rc::new(RefCell::new(None));

        let on_upgrade_needed = {
            let request = request.clone();
            let failure = Rc::clone(&upgrade_failure);
            Closure::once_into_js(move |event: IdbVersionChangeEvent| {
                let outcome = upgrade(&request, &event, on_upgrade);
                if let Err(err) = outcome {
                    if let Some(transaction) = request.transaction() {
                        abort(&transaction);
                    }
                    *failure.borrow_mut() = Some(err);
                }
            })
        };

        let on_success = {
            let request = request.clone();
            let done = Rc::clone(&done);
            Closure::once_into_js(move || {
                let Some(on_done) = take(&done) else { return };
                let opened = request.result().map_err(js_error).map(|db| {
                    Rc::new(IdbConnection::new(db.unchecked_into())) as Rc<dyn Connection>
                });
                on_done(opened);
            })
        };

        let on_error = {
            let request = request.clone();
            Closure::once_into_js(move || {
                let Some(on_done) = take(&done) else { return };
                let err = take(&upgrade_failure).unwrap_or_else(|| {
                    dom_error(request.error().ok().flatten(), "open request failed")
                });
                on_done(Err(err));
            })
        };

        request.set_onupgradeneeded(Some(on_upgrade_needed.unchecked_ref()));
        request.set_onsuccess(Some(on_success.unchecked_ref()));
        request.set_onerror(Some(on_error.unchecked_ref()));
    }
}

fn upgrade(
    request: &IdbOpenDbRequest,
    event: &IdbVersionChangeEvent,
    on_upgrade: UpgradeCallback,
) -> HostResult<()> {
    let db: IdbDatabase = request.result().map_err(js_error)?.unchecked_into();
    let scope = IdbUpgrade {
        old_version: event.old_version() as u32,
        new_version: event.new_version().unwrap_or_default() as u32,
        db,
    };
    on_upgrade(&scope)
}

struct IdbUpgrade {
    db: IdbDatabase,
    old_version: u32,
    new_version: u32,
}

impl UpgradeScope for IdbUpgrade {
    fn old_version(&self) -> u32 {
        self.old_version
    }

    fn new_version(&self) -> u32 {
        self.new_version
    }

    fn has_collection(&self, name: &str) -> bool {
        self.db.object_store_names().contains(name)
    }

    fn delete_collection(&self, name: &str) -> HostResult<()> {
        self.db.delete_object_store(name).map_err(js_error)
    }

    fn create_collection(
        &self,
        name: &str,
        schema: &CollectionSchema,
    ) -> HostResult<Box<dyn CollectionBuilder>> {
        let params = IdbObjectStoreParameters::new();
        params.set_key_path(Some(&JsValue::from_str(&schema.key_path)));
        params.set_auto_increment(schema.auto_increment);
        let store = self
            .db
            .create_object_store_with_optional_parameters(name, &params)
            .map_err(js_error)?;
        Ok(Box::new(IdbCollectionBuilder {
            name: name.to_string(),
            store,
        }))
    }
}

struct IdbCollectionBuilder {
    name: String,
    store: IdbObjectStore,
}

impl CollectionBuilder for IdbCollectionBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_index(&self, spec: &IndexSpec) -> HostResult<()> {
        let params = IdbIndexParameters::new();
        params.set_unique(spec.unique);
        self.store
            .create_index_with_str_and_optional_parameters(&spec.name, &spec.key_path, &params)
            .map(|_| ())
            .map_err(js_error)
    }
}

struct IdbConnection {
    db: IdbDatabase,
    name: String,
}

impl IdbConnection {
    fn new(db: IdbDatabase) -> Self {
        let name = db.name();
        Self { db, name }
    }
}

impl Connection for IdbConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn collection_names(&self) -> Vec<String> {
        let names = self.db.object_store_names();
        (0..names.length()).filter_map(|i| names.item(i)).collect()
    }

    fn transaction(
        &self,
        collection: &str,
        mode: TransactionMode,
    ) -> HostResult<Box<dyn Transaction>> {
        let idb_mode = match mode {
            TransactionMode::ReadOnly => IdbTransactionMode::Readonly,
            TransactionMode::ReadWrite => IdbTransactionMode::Readwrite,
        };
        let transaction = self
            .db
            .transaction_with_str_and_mode(collection, idb_mode)
            .map_err(js_error)?;
        let store = transaction.object_store(collection).map_err(js_error)?;
        Ok(Box::new(IdbTxn {
            transaction,
            store,
            mode,
        }))
    }

    fn close(&self) {
        self.db.close();
    }
}

struct IdbTxn {
    transaction: IdbTransaction,
    store: IdbObjectStore,
    mode: TransactionMode,
}

impl IdbTxn {
    fn issue(&self, request: Request) -> HostResult<IdbRequest> {
        let store = &self.store;
        match request {
            Request::Count => store.count().map_err(js_error),
            Request::Get(key) => store.get(&key_to_js(&key)).map_err(js_error),
            Request::GetByIndex { index, value } => store
                .index(&index)
                .and_then(|index| index.get(&key_to_js(&value)))
                .map_err(js_error),
            Request::Add(record) => store.add(&record_to_js(&record)?).map_err(js_error),
            Request::Put(record) => store.put(&record_to_js(&record)?).map_err(js_error),
            Request::Delete(key) => store.delete(&key_to_js(&key)).map_err(js_error),
            Request::Clear => store.clear().map_err(js_error),
        }
    }
}

fn lookup_response(value: JsValue) -> HostResult<Response> {
    if value.is_undefined() || value.is_null() {
        Ok(Response::Record(None))
    } else {
        record_from_js(value).map(|record| Response::Record(Some(record)))
    }
}

fn count_response(value: JsValue) -> HostResult<Response> {
    value
        .as_f64()
        .map(|n| Response::Count(n as u64))
        .ok_or_else(|| HostError::Data("count returned a non-number".into()))
}

fn key_response(value: JsValue) -> HostResult<Response> {
    key_from_js(&value).map(Response::Key)
}

fn done_response(_: JsValue) -> HostResult<Response> {
    Ok(Response::Done)
}

impl Transaction for IdbTxn {
    fn mode(&self) -> TransactionMode {
        self.mode
    }

    fn submit(&self, request: Request, on_done: Callback<Response>) {
        let convert: fn(JsValue) -> HostResult<Response> = match &request {
            Request::Count => count_response,
            Request::Get(_) | Request::GetByIndex { .. } => lookup_response,
            Request::Add(_) | Request::Put(_) => key_response,
            Request::Delete(_) | Request::Clear => done_response,
        };
        match self.issue(request) {
            Ok(issued) => watch(&issued, convert, on_done),
            Err(err) => on_done(Err(err)),
        }
    }

    fn open_cursor(&self, on_step: CursorStep) {
        let request = match self.store.open_cursor() {
            Ok(request) => request,
            Err(err) => {
                let mut on_step = on_step;
                return on_step(Err(js_error(err)));
            }
        };
        let step = shared(on_step);
        let write_failure: Shared<HostError> = Rc::new(RefCell::new(None));

        let on_success = {
            let request = request.clone();
            let step = Rc::clone(&step);
            let transaction = self.transaction.clone();
            Closure::<dyn FnMut()>::new(move || {
                let Some(mut on_step) = take(&step) else { return };
                let position = match request.result() {
                    Ok(value) if value.is_null() || value.is_undefined() => {
                        return on_step(Ok(None));
                    }
                    Ok(value) => IdbCursor::read(value.unchecked_into(), Rc::clone(&write_failure)),
                    Err(err) => Err(js_error(err)),
                };
                match position {
                    Ok(cursor) => on_step(Ok(Some(Box::new(cursor)))),
                    Err(err) => return on_step(Err(err)),
                }

                let failure = take(&write_failure);
                if let Some(err) = failure {
                    on_step(Err(err));
                    abort(&transaction);
                    return;
                }
                *step.borrow_mut() = Some(on_step);
            })
            .into_js_value()
        };

        let on_error = {
            let request = request.clone();
            Closure::once_into_js(move || {
                let Some(mut on_step) = take(&step) else { return };
                on_step(Err(dom_error(
                    request.error().ok().flatten(),
                    "cursor request failed",
                )));
            })
        };

        request.set_onsuccess(Some(on_success.unchecked_ref()));
        request.set_onerror(Some(on_error.unchecked_ref()));
    }

    fn on_finish(&self, on_done: Callback<()>) {
        let done = shared(on_done);

        let on_complete = {
            let done = Rc::clone(&done);
            Closure::once_into_js(move || {
                if let Some(on_done) = take(&done) {
                    on_done(Ok(()));
                }
            })
        };

        let on_abort = {
            let transaction = self.transaction.clone();
            Closure::once_into_js(move || {
                if let Some(on_done) = take(&done) {
                    on_done(Err(dom_error(transaction.error(), "transaction aborted")));
                }
            })
        };

        self.transaction
            .set_oncomplete(Some(on_complete.unchecked_ref()));
        self.transaction.set_onabort(Some(on_abort.unchecked_ref()));
    }
}

/// Completes `on_done` from the request's `success` or `error` event.
fn watch(
    request: &IdbRequest,
    convert: fn(JsValue) -> HostResult<Response>,
    on_done: Callback<Response>,
) {
    let done = shared(on_done);

    let on_success = {
        let request = request.clone();
        let done = Rc::clone(&done);
        Closure::once_into_js(move || {
            if let Some(on_done) = take(&done) {
                on_done(request.result().map_err(js_error).and_then(convert));
            }
        })
    };

    let on_error = {
        let request = request.clone();
        Closure::once_into_js(move || {
            if let Some(on_done) = take(&done) {
                on_done(Err(dom_error(
                    request.error().ok().flatten(),
                    "request failed",
                )));
            }
        })
    };

    request.set_onsuccess(Some(on_success.unchecked_ref()));
    request.set_onerror(Some(on_error.unchecked_ref()));
}

/// One cursor position with its key and record read up front.
struct IdbCursor {
    cursor: IdbCursorWithValue,
    key: Key,
    record: Record,
    failure: Shared<HostError>,
}

impl IdbCursor {
    fn read(cursor: IdbCursorWithValue, failure: Shared<HostError>) -> HostResult<Self> {
        let key = key_from_js(&cursor.primary_key().map_err(js_error)?)?;
        let record = record_from_js(cursor.value().map_err(js_error)?)?;
        Ok(Self {
            cursor,
            key,
            record,
            failure,
        })
    }

    fn fail(&self, err: JsValue) {
        self.failure.borrow_mut().get_or_insert(js_error(err));
    }
}

impl Cursor for IdbCursor {
    fn key(&self) -> Key {
        self.key.clone()
    }

    fn record(&self) -> Record {
        self.record.clone()
    }

    fn advance(&self) {
        if self.failure.borrow().is_some() {
            return;
        }
        if let Err(err) = self.cursor.continue_() {
            self.fail(err);
        }
    }

    fn update(&self, record: Record) {
        let value = match record_to_js(&record) {
            Ok(value) => value,
            Err(err) => {
                self.failure.borrow_mut().get_or_insert(err);
                return;
            }
        };
        if let Err(err) = self.cursor.update(&value) {
            self.fail(err);
        }
    }

    fn delete(&self) {
        if let Err(err) = self.cursor.delete() {
            self.fail(err);
        }
    }
}
