//! Recording log transport.

use idbkit_core::{LogTransport, TransportResult};
use parking_lot::Mutex;

/// A [`LogTransport`] that keeps every payload and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    payloads: Mutex<Vec<String>>,
    failure: Mutex<Option<String>>,
}

impl RecordingTransport {
    /// Creates a transport that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent sends fail with `reason`. Failed sends are still
    /// recorded.
    pub fn fail_with(&self, reason: impl Into<String>) {
        *self.failure.lock() = Some(reason.into());
    }

    /// Makes subsequent sends succeed.
    pub fn succeed(&self) {
        *self.failure.lock() = None;
    }

    /// Payloads received so far.
    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().clone()
    }

    /// Number of sends.
    pub fn calls(&self) -> usize {
        self.payloads.lock().len()
    }
}

impl LogTransport for RecordingTransport {
    fn send(&self, payload: &str) -> TransportResult {
        self.payloads.lock().push(payload.to_string());
        match self.failure.lock().clone() {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}
