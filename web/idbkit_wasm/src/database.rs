//! Database WASM bindings.
//!
//! This module provides the JavaScript-facing façade over one IndexedDB
//! collection. Every query returns a `Promise`.

use crate::backend::{
    key_from_js, key_to_js, record_from_js, record_to_js, ConsoleSink, IdbFactoryHost,
    LocalStorageStore,
};
use crate::error::{WasmError, WasmResult};
use crate::log::Log;
use idbkit_core::{
    create_database as create_core_database, CursorAction, DatabaseDescriptor, HostServices,
    IndexedDb, UpsertOutcome,
};
use idbkit_host::{load_object, store_object, CollectionBuilder, HostResult, IndexSpec, Record};
use js_sys::{Function, Promise};
use serde::{Deserialize, Serialize};
use std::rc::Rc;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::future_to_promise;

/// Index declaration accepted by [`create_database`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexDeclaration {
    name: String,
    key_path: String,
    #[serde(default)]
    unique: bool,
}

impl From<IndexDeclaration> for IndexSpec {
    fn from(declaration: IndexDeclaration) -> Self {
        let spec = IndexSpec::new(declaration.name, declaration.key_path);
        if declaration.unique {
            spec.unique()
        } else {
            spec
        }
    }
}

#[derive(Serialize)]
struct UpsertResult {
    key: serde_json::Value,
    created: bool,
}

fn services(log: &Log) -> WasmResult<HostServices> {
    Ok(HostServices::new(
        Rc::new(IdbFactoryHost::from_window()?),
        Rc::new(ConsoleSink),
        log.buffer(),
    ))
}

/// A handle on one collection of one IndexedDB database.
///
/// Each call opens the database, runs one transaction and closes it again.
///
/// ## Example
///
/// ```javascript
/// const db = await createDatabase("shop", "orders", [
///     { name: "by_ref", keyPath: "ref", unique: true },
/// ], log);
///
/// const { key } = await db.upsert({ ref: "A-1", total: 12 });
/// const order = await db.getByIndex("by_ref", "A-1");
/// console.log(await db.count());
/// ```
#[wasm_bindgen]
pub struct Database {
    inner: Rc<IndexedDb>,
}

#[wasm_bindgen]
impl Database {
    /// Database name.
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.inner.name().to_string()
    }

    /// Collection name.
    #[wasm_bindgen(getter)]
    pub fn collection(&self) -> String {
        self.inner.descriptor().collection().to_string()
    }

    /// Resolves to the number of records.
    pub fn count(&self) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let n = db.count().await.map_err(WasmError::from)?;
            Ok(JsValue::from_f64(n as f64))
        })
    }

    /// Resolves to the record stored under `key`, or `null`.
    pub fn get(&self, key: JsValue) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let key = key_from_js(&key).map_err(WasmError::from)?;
            let record = db.get(key).await.map_err(WasmError::from)?;
            Ok(optional_record(record.as_ref())?)
        })
    }

    /// Resolves to the first record whose `index` value equals `value`, or
    /// `null`.
    #[wasm_bindgen(js_name = getByIndex)]
    pub fn get_by_index(&self, index: String, value: JsValue) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let value = key_from_js(&value).map_err(WasmError::from)?;
            let record = db
                .get_by_index(&index, value)
                .await
                .map_err(WasmError::from)?;
            Ok(optional_record(record.as_ref())?)
        })
    }

    /// Calls `visitor(record)` for every record in key order and resolves
    /// to the number visited.
    ///
    /// The visitor's return value picks what happens next:
    /// - `false` stops the iteration
    /// - `"delete"` deletes the record
    /// - an object replaces the record
    /// - anything else moves on
    pub fn iterate(&self, visitor: Function) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let visited = db
                .iterate_all(move |record| visit(&visitor, record))
                .await
                .map_err(WasmError::from)?;
            Ok(JsValue::from_f64(visited as f64))
        })
    }

    /// Inserts `record`, or replaces the stored one with the same key.
    /// Resolves to `{ key, created }`.
    pub fn upsert(&self, record: JsValue) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let record = record_from_js(record).map_err(WasmError::from)?;
            let outcome = db.upsert(record).await.map_err(WasmError::from)?;
            let result = UpsertResult {
                key: outcome.key().to_json(),
                created: matches!(outcome, UpsertOutcome::Created(_)),
            };
            Ok(serde_wasm_bindgen::to_value(&result).map_err(WasmError::from)?)
        })
    }

    /// Deletes the record stored under `key`. Missing keys are not an
    /// error.
    pub fn delete(&self, key: JsValue) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            let key = key_from_js(&key).map_err(WasmError::from)?;
            db.delete_by_key(key).await.map_err(WasmError::from)?;
            Ok(JsValue::UNDEFINED)
        })
    }

    /// Removes every record.
    pub fn clear(&self) -> Promise {
        let db = Rc::clone(&self.inner);
        future_to_promise(async move {
            db.clear().await.map_err(WasmError::from)?;
            Ok(JsValue::UNDEFINED)
        })
    }
}

fn optional_record(record: Option<&Record>) -> WasmResult<JsValue> {
    match record {
        Some(record) => Ok(record_to_js(record)?),
        None => Ok(JsValue::NULL),
    }
}

fn visit(visitor: &Function, record: &Record) -> CursorAction {
    let value = match record_to_js(record) {
        Ok(value) => value,
        Err(_) => return CursorAction::Stop,
    };
    let returned = match visitor.call1(&JsValue::NULL, &value) {
        Ok(returned) => returned,
        Err(_) => return CursorAction::Stop,
    };
    if returned.as_bool() == Some(false) {
        CursorAction::Stop
    } else if returned.as_string().as_deref() == Some("delete") {
        CursorAction::Delete
    } else if returned.is_object() {
        match record_from_js(returned) {
            Ok(mut replacement) => {
                if let Some(key) = record.id() {
                    replacement.set_id(key.clone());
                }
                CursorAction::Update(replacement)
            }
            Err(_) => CursorAction::Stop,
        }
    } else {
        CursorAction::Continue
    }
}

/// Opens an existing database without declaring indexes.
///
/// The collection is created on first open.
#[wasm_bindgen(js_name = openDatabase)]
pub fn open_database(name: &str, collection: &str, log: &Log) -> Result<Database, JsValue> {
    let descriptor = DatabaseDescriptor::new(name, collection).map_err(WasmError::from)?;
    let db = IndexedDb::new(descriptor, services(log)?);
    Ok(Database { inner: Rc::new(db) })
}

/// Creates (or upgrades) a database and resolves to a [`Database`].
///
/// `indexes` is an array of `{ name, keyPath, unique }` declarations, or
/// `undefined` for none.
#[wasm_bindgen(js_name = createDatabase)]
pub fn create_database(name: String, collection: String, indexes: JsValue, log: &Log) -> Promise {
    let prepared = services(log).and_then(|services| {
        let declared: Vec<IndexDeclaration> = if indexes.is_undefined() || indexes.is_null() {
            Vec::new()
        } else {
            serde_wasm_bindgen::from_value(indexes)?
        };
        Ok((services, declared))
    });

    future_to_promise(async move {
        let (services, declared) = prepared?;
        let specs: Vec<IndexSpec> = declared.into_iter().map(IndexSpec::from).collect();
        let declare_indexes = move |builder: &dyn CollectionBuilder| declare(builder, &specs);
        let db = create_core_database(services, &name, &collection, declare_indexes)
            .await
            .map_err(WasmError::from)?;
        Ok(Database { inner: Rc::new(db) }.into())
    })
}

fn declare(builder: &dyn CollectionBuilder, specs: &[IndexSpec]) -> HostResult<()> {
    for spec in specs {
        builder.create_index(spec)?;
    }
    Ok(())
}

/// Serializes `value` as JSON into `localStorage` under `key`.
#[wasm_bindgen(js_name = storeObject)]
pub fn store_object_js(key: &str, value: JsValue) -> Result<(), JsValue> {
    let store = LocalStorageStore::from_window()?;
    let value: serde_json::Value = serde_wasm_bindgen::from_value(value).map_err(WasmError::from)?;
    store_object(&store, key, &value).map_err(|err| WasmError::from(err).into())
}

/// Reads the JSON stored under `key` in `localStorage`.
///
/// Throws when nothing is stored there.
#[wasm_bindgen(js_name = loadObject)]
pub fn load_object_js(key: &str) -> Result<JsValue, JsValue> {
    let store = LocalStorageStore::from_window()?;
    let value: serde_json::Value = load_object(&store, key).map_err(WasmError::from)?;
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|err| WasmError::from(err).into())
}

/// Converts a JavaScript key for use with [`Database::get`] and reports it
/// back unchanged, or throws if the key is not a string or an integer.
#[wasm_bindgen(js_name = normalizeKey)]
pub fn normalize_key(key: JsValue) -> Result<JsValue, JsValue> {
    let key = key_from_js(&key).map_err(WasmError::from)?;
    Ok(key_to_js(&key))
}
