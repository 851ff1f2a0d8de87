//! Diagnostic sink over the browser console.

use idbkit_host::{DiagnosticLevel, DiagnosticSink};
use wasm_bindgen::JsValue;

/// Writes diagnostics to `console.log`, `console.warn` and `console.error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleSink;

impl DiagnosticSink for ConsoleSink {
    fn write(&self, level: DiagnosticLevel, message: &str) {
        let message = JsValue::from_str(message);
        match level {
            DiagnosticLevel::Log => web_sys::console::log_1(&message),
            DiagnosticLevel::Warn => web_sys::console::warn_1(&message),
            DiagnosticLevel::Error => web_sys::console::error_1(&message),
        }
    }
}
