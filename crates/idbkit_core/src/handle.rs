//! Open/upgrade lifecycle of a database connection.
//!
//! Every operation opens its own [`OpenHandle`]; nothing is cached between
//! calls. When the host reports a version change the handle (re)creates the
//! target collection and lets the caller declare secondary indexes on it.

use crate::completion::completion;
use crate::config::DbConfig;
use crate::descriptor::DatabaseDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::services::HostServices;
use idbkit_host::{
    CollectionBuilder, Connection, DiagnosticLevel, DiagnosticSink, HostResult, IndexSpec,
    UpgradeCallback, UpgradeScope,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Caller hook that declares secondary indexes on a freshly created
/// collection.
pub type IndexHook = Rc<dyn Fn(&dyn CollectionBuilder) -> HostResult<()>>;

/// Resolution state of an [`OpenHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// Open requested, no answer yet.
    Pending,
    /// The host is running the schema upgrade.
    Upgrading,
    /// A live connection was delivered.
    Opened,
    /// The host reported an error. Terminal.
    Failed,
}

/// One open-database operation.
pub struct OpenHandle {
    descriptor: DatabaseDescriptor,
    config: DbConfig,
    state: Rc<Cell<OpenState>>,
    declared: Rc<RefCell<Vec<IndexSpec>>>,
}

impl OpenHandle {
    /// Creates a handle for `descriptor`.
    pub fn new(descriptor: DatabaseDescriptor, config: DbConfig) -> Self {
        Self {
            descriptor,
            config,
            state: Rc::new(Cell::new(OpenState::Pending)),
            declared: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Target of the open.
    pub fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    /// Current resolution state.
    pub fn state(&self) -> OpenState {
        self.state.get()
    }

    /// Indexes declared during the upgrade phase, if one ran.
    pub fn declared_indexes(&self) -> Vec<IndexSpec> {
        self.declared.borrow().clone()
    }

    /// Opens the database.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::OpenFailed`] when the host refuses. The failure
    /// is also recorded in the log buffer and emitted as a warning.
    pub async fn open(
        &self,
        services: &HostServices,
        indexes: Option<IndexHook>,
    ) -> CoreResult<Rc<dyn Connection>> {
        let name = self.descriptor.name();
        let (resolver, pending) = completion();
        self.state.set(OpenState::Pending);
        tracing::debug!(db = name, version = self.config.schema_version, "opening database");

        services.factory.open(
            name,
            self.config.schema_version,
            self.upgrade_callback(Rc::clone(&services.diagnostics), indexes),
            resolver.into_callback(),
        );

        let result = match pending.await {
            Ok(result) => result,
            Err(dropped) => {
                self.state.set(OpenState::Failed);
                return Err(dropped);
            }
        };

        match result {
            Ok(connection) => {
                self.state.set(OpenState::Opened);
                services.trace(DiagnosticLevel::Log, &format!("database {name} available"));
                Ok(connection)
            }
            Err(err) => {
                self.state.set(OpenState::Failed);
                tracing::debug!(db = name, error = %err, "open failed");
                services.report(&format!("cannot open database {name}"));
                Err(CoreError::open_failed(name, err))
            }
        }
    }

    fn upgrade_callback(
        &self,
        diagnostics: Rc<dyn DiagnosticSink>,
        indexes: Option<IndexHook>,
    ) -> UpgradeCallback {
        let name = self.descriptor.name().to_string();
        let collection = self.descriptor.collection().to_string();
        let schema = self.config.schema();
        let state = Rc::clone(&self.state);
        let declared = Rc::clone(&self.declared);

        Box::new(move |scope: &dyn UpgradeScope| {
            state.set(OpenState::Upgrading);
            tracing::debug!(
                db = %name,
                from = scope.old_version(),
                to = scope.new_version(),
                "upgrading schema"
            );
            if scope.has_collection(&collection) {
                scope.delete_collection(&collection)?;
            }
            let builder = scope.create_collection(&collection, &schema)?;
            if let Some(hook) = indexes {
                let recorder = DeclaringBuilder {
                    inner: &*builder,
                    declared: &declared,
                };
                hook(&recorder)?;
            }
            diagnostics.write(DiagnosticLevel::Log, &format!("database {name} created"));
            Ok(())
        })
    }
}

/// Records every index the hook manages to declare.
struct DeclaringBuilder<'a> {
    inner: &'a dyn CollectionBuilder,
    declared: &'a RefCell<Vec<IndexSpec>>,
}

impl CollectionBuilder for DeclaringBuilder<'_> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn create_index(&self, spec: &IndexSpec) -> HostResult<()> {
        self.inner.create_index(spec)?;
        self.declared.borrow_mut().push(spec.clone());
        Ok(())
    }
}
