//! Diagnostic sinks.

use parking_lot::Mutex;
use std::fmt;

/// Severity of a diagnostic message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticLevel {
    /// Informational trace.
    Log,
    /// Something failed but the caller's flow continues.
    Warn,
    /// An error.
    Error,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticLevel::Log => "log",
            DiagnosticLevel::Warn => "warn",
            DiagnosticLevel::Error => "error",
        })
    }
}

/// One-way destination for diagnostic messages.
pub trait DiagnosticSink {
    /// Writes a message. Never fails.
    fn write(&self, level: DiagnosticLevel, message: &str);
}

/// Sink that forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn write(&self, level: DiagnosticLevel, message: &str) {
        match level {
            DiagnosticLevel::Log => tracing::info!(target: "idbkit", "{message}"),
            DiagnosticLevel::Warn => tracing::warn!(target: "idbkit", "{message}"),
            DiagnosticLevel::Error => tracing::error!(target: "idbkit", "{message}"),
        }
    }
}

/// Sink that keeps every message, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<(DiagnosticLevel, String)>>,
}

impl RecordingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every message written so far.
    pub fn entries(&self) -> Vec<(DiagnosticLevel, String)> {
        self.entries.lock().clone()
    }

    /// Returns the messages written at `level`.
    pub fn messages(&self, level: DiagnosticLevel) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Returns true if any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl DiagnosticSink for RecordingSink {
    fn write(&self, level: DiagnosticLevel, message: &str) {
        self.entries.lock().push((level, message.to_string()));
    }
}
