//! Injected host collaborators.

use crate::log::LogBuffer;
use idbkit_host::{DatabaseFactory, DiagnosticLevel, DiagnosticSink};
use std::fmt;
use std::rc::Rc;

/// The collaborators a database façade runs on.
#[derive(Clone)]
pub struct HostServices {
    /// Opens databases.
    pub factory: Rc<dyn DatabaseFactory>,
    /// Receives the observable trace.
    pub diagnostics: Rc<dyn DiagnosticSink>,
    /// Records failures.
    pub log: Rc<LogBuffer>,
}

impl HostServices {
    /// Bundles the collaborators.
    pub fn new(
        factory: Rc<dyn DatabaseFactory>,
        diagnostics: Rc<dyn DiagnosticSink>,
        log: Rc<LogBuffer>,
    ) -> Self {
        Self {
            factory,
            diagnostics,
            log,
        }
    }

    /// Emits a diagnostic line.
    pub(crate) fn trace(&self, level: DiagnosticLevel, message: &str) {
        self.diagnostics.write(level, message);
    }

    /// Records a message into the log buffer. A failed append, including an
    /// unauthorized flush it triggers, is only traced.
    pub(crate) fn note(&self, message: &str) {
        if let Err(err) = self.log.append(message) {
            tracing::debug!(error = %err, message, "log append did not complete");
        }
    }

    /// Records a failure into the log buffer and warns about it.
    pub(crate) fn report(&self, message: &str) {
        self.note(message);
        self.trace(DiagnosticLevel::Warn, message);
    }
}

impl fmt::Debug for HostServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostServices")
            .field("log", &self.log.records_key())
            .finish_non_exhaustive()
    }
}
