//! Error types for WASM bindings.

use idbkit_core::CoreError;
use idbkit_host::HostError;
use thiserror::Error;
use wasm_bindgen::prelude::*;

/// Errors that can occur in the WASM bindings.
#[derive(Debug, Error)]
pub enum WasmError {
    /// A database operation failed.
    #[error("{0}")]
    Database(#[from] CoreError),

    /// A host capability failed.
    #[error("{0}")]
    Host(#[from] HostError),

    /// Invalid input provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// JavaScript error occurred.
    #[error("JS error: {0}")]
    JsError(String),

    /// Feature not supported in current browser.
    #[error("not supported: {0}")]
    NotSupported(String),
}

impl From<WasmError> for JsValue {
    fn from(err: WasmError) -> Self {
        js_sys::Error::new(&err.to_string()).into()
    }
}

impl From<JsValue> for WasmError {
    fn from(val: JsValue) -> Self {
        WasmError::JsError(crate::backend::describe(&val))
    }
}

impl From<serde_wasm_bindgen::Error> for WasmError {
    fn from(err: serde_wasm_bindgen::Error) -> Self {
        WasmError::InvalidInput(err.to_string())
    }
}

/// Result type for WASM operations.
pub type WasmResult<T> = Result<T, WasmError>;
