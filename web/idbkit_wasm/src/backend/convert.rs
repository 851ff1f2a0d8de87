//! Conversions between host values and JavaScript values.

use idbkit_host::{HostError, HostResult, Key, Record};
use serde::Serialize;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::DomException;

/// Largest integer a JavaScript number holds exactly.
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Renders a thrown JavaScript value as text.
pub fn describe(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{value:?}")
}

/// Converts a record into a plain JavaScript object.
pub fn record_to_js(record: &Record) -> HostResult<JsValue> {
    record
        .to_json()
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .map_err(|err| HostError::Data(err.to_string()))
}

/// Reads a record out of a JavaScript object.
pub fn record_from_js(value: JsValue) -> HostResult<Record> {
    let json: serde_json::Value =
        serde_wasm_bindgen::from_value(value).map_err(|err| HostError::Data(err.to_string()))?;
    Record::from_json(json)
}

/// Converts a key into a JavaScript number or string.
pub fn key_to_js(key: &Key) -> JsValue {
    match key {
        Key::Int(n) => JsValue::from_f64(*n as f64),
        Key::Text(s) => JsValue::from_str(s),
    }
}

/// Reads a key out of a JavaScript number or string.
pub fn key_from_js(value: &JsValue) -> HostResult<Key> {
    if let Some(text) = value.as_string() {
        return Ok(Key::Text(text));
    }
    match value.as_f64() {
        Some(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Ok(Key::Int(n as i64)),
        _ => Err(HostError::Data(format!(
            "unsupported key {}",
            describe(value)
        ))),
    }
}

pub(crate) fn js_error(value: JsValue) -> HostError {
    match value.dyn_ref::<DomException>() {
        Some(dom) => dom_error(Some(dom.clone()), ""),
        None => HostError::Js(describe(&value)),
    }
}

pub(crate) fn dom_error(error: Option<DomException>, fallback: &str) -> HostError {
    let Some(dom) = error else {
        return HostError::Aborted(fallback.to_string());
    };
    let message = dom.message();
    match dom.name().as_str() {
        "ConstraintError" => HostError::Constraint(message),
        "NotFoundError" => HostError::NotFound(message),
        "ReadOnlyError" => HostError::ReadOnly,
        "DataError" | "DataCloneError" => HostError::Data(message),
        "AbortError" | "TransactionInactiveError" => HostError::Aborted(message),
        "InvalidStateError" | "UnknownError" | "QuotaExceededError" => {
            HostError::Unavailable(message)
        }
        name => HostError::Js(format!("{name}: {message}")),
    }
}
