//! Log buffer WASM bindings.

use crate::backend::{describe, LocalStorageStore};
use crate::error::WasmError;
use idbkit_core::{AppendOutcome, LogBuffer, LogConfig, LogTransport, TransportResult};
use js_sys::{Array, Function};
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// Sends flushed payloads through a JavaScript function.
///
/// The function receives the comma-joined records. A thrown exception or a
/// `false` return counts as a failed send.
pub struct FunctionTransport {
    send: Function,
}

impl FunctionTransport {
    /// Wraps `send`.
    pub fn new(send: Function) -> Self {
        Self { send }
    }
}

impl LogTransport for FunctionTransport {
    fn send(&self, payload: &str) -> TransportResult {
        let returned = self
            .send
            .call1(&JsValue::NULL, &JsValue::from_str(payload))
            .map_err(|err| describe(&err))?;
        if returned.as_bool() == Some(false) {
            return Err("transport returned false".to_string());
        }
        Ok(())
    }
}

/// A bounded log persisted in `localStorage`.
///
/// ## Example
///
/// ```javascript
/// const log = new Log("app.log", "app.log.allowed", 100, (payload) => {
///     navigator.sendBeacon("/logs", payload);
/// });
/// log.setAuthorized(true);
/// log.append("page loaded");
/// ```
#[wasm_bindgen]
pub struct Log {
    inner: Rc<LogBuffer>,
}

#[wasm_bindgen]
impl Log {
    /// Creates a log over the given storage keys.
    ///
    /// # Arguments
    ///
    /// * `records_key` - localStorage key of the records
    /// * `authorization_key` - localStorage key of the send flag
    /// * `capacity` - record count that triggers a flush
    /// * `send` - receives each flushed payload
    #[wasm_bindgen(constructor)]
    pub fn new(
        records_key: &str,
        authorization_key: &str,
        capacity: u32,
        send: Function,
    ) -> Result<Log, JsValue> {
        let config = LogConfig::new(records_key, authorization_key, capacity as usize);
        Self::build(config, send)
    }

    /// Creates a log from a config object such as
    /// `{ recordsKey, authorizationKey, capacity }`. Missing fields take
    /// their defaults.
    #[wasm_bindgen(js_name = fromConfig)]
    pub fn from_config(config: JsValue, send: Function) -> Result<Log, JsValue> {
        let config: LogConfig = if config.is_undefined() || config.is_null() {
            LogConfig::default()
        } else {
            serde_wasm_bindgen::from_value(config).map_err(WasmError::from)?
        };
        Self::build(config, send)
    }

    fn build(config: LogConfig, send: Function) -> Result<Log, JsValue> {
        let store = LocalStorageStore::from_window()?;
        let buffer = LogBuffer::new(
            config,
            Rc::new(store),
            Rc::new(FunctionTransport::new(send)),
        )
        .map_err(WasmError::from)?;
        Ok(Log {
            inner: Rc::new(buffer),
        })
    }

    /// Appends a timestamped record. Returns true if the append flushed
    /// the buffer.
    pub fn append(&self, message: &str) -> Result<bool, JsValue> {
        let outcome = self.inner.append(message).map_err(WasmError::from)?;
        Ok(matches!(outcome, AppendOutcome::Flushed { .. }))
    }

    /// Drains the buffer and sends it. Returns the number of records sent.
    pub fn flush(&self) -> Result<u32, JsValue> {
        let sent = self.inner.flush().map_err(WasmError::from)?;
        Ok(sent as u32)
    }

    /// localStorage key of the records.
    #[wasm_bindgen(getter, js_name = recordsKey)]
    pub fn records_key(&self) -> String {
        self.inner.records_key().to_string()
    }

    /// Record count that triggers a flush.
    #[wasm_bindgen(getter)]
    pub fn capacity(&self) -> u32 {
        self.inner.capacity() as u32
    }

    /// Stores the send authorization flag.
    #[wasm_bindgen(js_name = setAuthorized)]
    pub fn set_authorized(&self, authorized: bool) -> Result<(), JsValue> {
        self.inner
            .set_authorized(authorized)
            .map_err(|err| WasmError::from(err).into())
    }

    /// Buffered records, oldest first.
    pub fn records(&self) -> Result<Array, JsValue> {
        let records = self.inner.records().map_err(WasmError::from)?;
        Ok(records.iter().map(JsValue::from_str).collect())
    }
}

impl Log {
    /// Shared buffer used by database handles.
    pub(crate) fn buffer(&self) -> Rc<LogBuffer> {
        Rc::clone(&self.inner)
    }
}
