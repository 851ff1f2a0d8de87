//! Query façade.
//!
//! Each operation opens the database, runs one transaction against the
//! target collection and closes the connection again. Failures are recorded
//! in the log buffer before they are returned, so dropping a result loses
//! nothing but the value.

use crate::config::DbConfig;
use crate::descriptor::DatabaseDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::handle::{IndexHook, OpenHandle};
use crate::request::{CursorAction, Operation, TransactionRequest};
use crate::services::HostServices;
use idbkit_host::{
    CollectionBuilder, Connection, DiagnosticLevel, HostResult, IndexSpec, Key, Record, Response,
};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// How an [`upsert`](IndexedDb::upsert) stored its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// Inserted under a new key.
    Created(Key),
    /// Replaced the record under an existing key.
    Updated(Key),
}

impl UpsertOutcome {
    /// Key the record was stored under.
    pub fn key(&self) -> &Key {
        match self {
            UpsertOutcome::Created(key) | UpsertOutcome::Updated(key) => key,
        }
    }
}

/// Operations on one collection of one database.
pub struct IndexedDb {
    descriptor: DatabaseDescriptor,
    services: HostServices,
    config: DbConfig,
    indexes: Option<IndexHook>,
    declared: RefCell<Vec<IndexSpec>>,
}

impl IndexedDb {
    /// Creates a façade over `descriptor`.
    pub fn new(descriptor: DatabaseDescriptor, services: HostServices) -> Self {
        Self {
            descriptor,
            services,
            config: DbConfig::default(),
            indexes: None,
            declared: RefCell::new(Vec::new()),
        }
    }

    /// Replaces the open configuration.
    #[must_use]
    pub fn with_config(mut self, config: DbConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the hook that declares secondary indexes whenever the
    /// collection is (re)created.
    #[must_use]
    pub fn with_indexes(mut self, hook: IndexHook) -> Self {
        self.indexes = Some(hook);
        self
    }

    /// Target database and collection.
    pub fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    /// Database name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Open configuration.
    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Indexes declared the last time this façade ran an upgrade.
    pub fn declared_indexes(&self) -> Vec<IndexSpec> {
        self.declared.borrow().clone()
    }

    /// Number of records in the collection.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the host rejects the
    /// count.
    pub async fn count(&self) -> CoreResult<u64> {
        let response = self.run(Operation::Count).await.map_err(|err| self.failed(err))?;
        match response {
            Response::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }

    /// Fetches a record by primary key.
    ///
    /// A missing record is `Ok(None)` and leaves an `item <key> not exist`
    /// entry in the log buffer.
    ///
    /// # Errors
    ///
    /// A rejected lookup is [`CoreError::NotFound`], logged the same way.
    pub async fn get(&self, key: impl Into<Key>) -> CoreResult<Option<Record>> {
        let key = key.into();
        let result = self.run(Operation::Get(key.clone())).await;
        self.lookup(result, &key)
    }

    /// Fetches the first record whose `index` value equals `value`.
    ///
    /// Not-found handling matches [`get`](Self::get), with `value` in the
    /// log entry.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_by_index(
        &self,
        index: &str,
        value: impl Into<Key>,
    ) -> CoreResult<Option<Record>> {
        let value = value.into();
        let operation = Operation::GetByIndex {
            index: index.to_string(),
            value: value.clone(),
        };
        let result = self.run(operation).await;
        self.lookup(result, &value)
    }

    /// Visits every record in cursor order inside a read-write transaction.
    /// Returns the number of records visited.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the cursor, or a write it
    /// was asked to make, fails.
    pub async fn iterate_all<F>(&self, visit: F) -> CoreResult<usize>
    where
        F: FnMut(&Record) -> CursorAction + 'static,
    {
        let connection = self.connect().await?;
        let result = TransactionRequest::new(self.descriptor.clone(), Operation::OpenCursor)
            .iterate(connection.as_ref(), visit)
            .await;
        connection.close();
        result.map_err(|err| {
            tracing::debug!(db = %self.descriptor, error = %err, "iteration failed");
            self.failed(err)
        })
    }

    /// Inserts the record, or replaces it if the insert is rejected.
    ///
    /// The replacement runs in a fresh transaction once the insert has
    /// failed.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransactionFailed`] when the replacement fails too,
    /// after logging `failed transaction in <name>` and warning about it.
    pub async fn upsert(&self, record: Record) -> CoreResult<UpsertOutcome> {
        let connection = self.connect().await?;
        let outcome = self.upsert_with(connection.as_ref(), record).await;
        connection.close();
        outcome
    }

    async fn upsert_with(
        &self,
        connection: &dyn Connection,
        record: Record,
    ) -> CoreResult<UpsertOutcome> {
        let name = self.name();
        let added = TransactionRequest::new(self.descriptor.clone(), Operation::Add(record.clone()))
            .issue(connection)
            .await;

        match added {
            Ok(Response::Key(key)) => {
                self.services
                    .trace(DiagnosticLevel::Log, &format!("element in {name} created"));
                return Ok(UpsertOutcome::Created(key));
            }
            Ok(other) => return Err(unexpected("add", &other)),
            Err(CoreError::Host(rejected)) => {
                tracing::debug!(db = name, error = %rejected, "add rejected, replacing instead");
            }
            Err(err) => return Err(err),
        }

        let replaced = TransactionRequest::new(self.descriptor.clone(), Operation::Put(record))
            .issue(connection)
            .await;
        match replaced {
            Ok(Response::Key(key)) => {
                self.services
                    .trace(DiagnosticLevel::Log, &format!("element in {name} updated"));
                Ok(UpsertOutcome::Updated(key))
            }
            Ok(other) => Err(unexpected("put", &other)),
            Err(err) => {
                self.services.report(&format!("failed transaction in {name}"));
                Err(CoreError::transaction_failed(name, err))
            }
        }
    }

    /// Deletes by primary key. Deleting a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the host rejects the
    /// delete.
    pub async fn delete_by_key(&self, key: impl Into<Key>) -> CoreResult<()> {
        let key = key.into();
        self.run(Operation::Delete(key.clone()))
            .await
            .map_err(|err| self.failed(err))?;
        self.services
            .trace(DiagnosticLevel::Log, &format!("element {key} has been deleted"));
        Ok(())
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the host rejects the
    /// clear.
    pub async fn clear(&self) -> CoreResult<()> {
        self.run(Operation::Clear).await.map_err(|err| self.failed(err))?;
        Ok(())
    }

    async fn connect(&self) -> CoreResult<Rc<dyn Connection>> {
        let handle = OpenHandle::new(self.descriptor.clone(), self.config.clone());
        let connection = handle.open(&self.services, self.indexes.clone()).await?;
        let declared = handle.declared_indexes();
        if !declared.is_empty() {
            *self.declared.borrow_mut() = declared;
        }
        Ok(connection)
    }

    async fn run(&self, operation: Operation) -> CoreResult<Response> {
        let connection = self.connect().await?;
        let result = TransactionRequest::new(self.descriptor.clone(), operation)
            .issue(connection.as_ref())
            .await;
        connection.close();
        if let Err(err) = &result {
            tracing::debug!(db = %self.descriptor, error = %err, "request failed");
        }
        result
    }

    /// Records a failed transaction in the log buffer and warns about it.
    /// Host failures become [`CoreError::TransactionFailed`]. Open failures
    /// were already reported by the handle and pass through unchanged.
    fn failed(&self, err: CoreError) -> CoreError {
        if matches!(err, CoreError::OpenFailed { .. }) {
            return err;
        }
        let name = self.name();
        self.services.report(&format!("failed transaction in {name}"));
        match err {
            CoreError::Host(cause) => CoreError::transaction_failed(name, cause),
            other => other,
        }
    }

    fn lookup(&self, result: CoreResult<Response>, wanted: &Key) -> CoreResult<Option<Record>> {
        match result {
            Ok(Response::Record(Some(record))) => Ok(Some(record)),
            Ok(Response::Record(None)) => {
                self.services.note(&format!("item {wanted} not exist"));
                Ok(None)
            }
            Ok(other) => Err(unexpected("lookup", &other)),
            Err(CoreError::Host(_)) => {
                self.services.note(&format!("item {wanted} not exist"));
                Err(CoreError::not_found(wanted))
            }
            Err(err) => Err(err),
        }
    }
}

impl fmt::Debug for IndexedDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedDb")
            .field("descriptor", &self.descriptor)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn unexpected(operation: &str, response: &Response) -> CoreError {
    CoreError::invalid_operation(format!("unexpected {operation} response: {response:?}"))
}

/// Opens (creating or upgrading as needed) `name` with `collection`, and
/// returns a façade over it.
///
/// `declare_indexes` runs whenever the collection is created and may
/// declare secondary indexes on it.
///
/// # Errors
///
/// Fails for empty names and when the database cannot be opened.
pub async fn create_database<F>(
    services: HostServices,
    name: &str,
    collection: &str,
    declare_indexes: F,
) -> CoreResult<IndexedDb>
where
    F: Fn(&dyn CollectionBuilder) -> HostResult<()> + 'static,
{
    create_database_with(services, name, collection, DbConfig::default(), declare_indexes).await
}

/// [`create_database`] with an explicit configuration.
///
/// # Errors
///
/// Fails for an invalid configuration, empty names, and when the database
/// cannot be opened.
pub async fn create_database_with<F>(
    services: HostServices,
    name: &str,
    collection: &str,
    config: DbConfig,
    declare_indexes: F,
) -> CoreResult<IndexedDb>
where
    F: Fn(&dyn CollectionBuilder) -> HostResult<()> + 'static,
{
    config.validate()?;
    let descriptor = DatabaseDescriptor::new(name, collection)?;
    let db = IndexedDb::new(descriptor, services)
        .with_config(config)
        .with_indexes(Rc::new(declare_indexes));
    let connection = db.connect().await?;
    connection.close();
    Ok(db)
}
