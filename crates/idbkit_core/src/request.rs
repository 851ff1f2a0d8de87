//! Single operations bound to one collection and one transaction.

use crate::completion::completion;
use crate::descriptor::DatabaseDescriptor;
use crate::error::{CoreError, CoreResult};
use idbkit_host::{Connection, HostResult, Key, Record, Request, Response, TransactionMode};

/// The operation a [`TransactionRequest`] performs.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Count records.
    Count,
    /// Fetch by primary key.
    Get(Key),
    /// Fetch through a secondary index.
    GetByIndex {
        /// Index name.
        index: String,
        /// Looked-up value.
        value: Key,
    },
    /// Walk every record.
    OpenCursor,
    /// Insert, failing on an existing key.
    Add(Record),
    /// Insert or replace.
    Put(Record),
    /// Delete by primary key.
    Delete(Key),
    /// Remove every record.
    Clear,
}

impl Operation {
    /// Transaction mode the operation needs. Cursors are read-write so
    /// visitors may update or delete records.
    pub fn mode(&self) -> TransactionMode {
        match self {
            Operation::Count | Operation::Get(_) | Operation::GetByIndex { .. } => {
                TransactionMode::ReadOnly
            }
            Operation::OpenCursor
            | Operation::Add(_)
            | Operation::Put(_)
            | Operation::Delete(_)
            | Operation::Clear => TransactionMode::ReadWrite,
        }
    }

    fn into_request(self) -> Option<Request> {
        Some(match self {
            Operation::Count => Request::Count,
            Operation::Get(key) => Request::Get(key),
            Operation::GetByIndex { index, value } => Request::GetByIndex { index, value },
            Operation::Add(record) => Request::Add(record),
            Operation::Put(record) => Request::Put(record),
            Operation::Delete(key) => Request::Delete(key),
            Operation::Clear => Request::Clear,
            Operation::OpenCursor => return None,
        })
    }
}

/// What a cursor visitor wants done at the current position.
#[derive(Debug, Clone, PartialEq)]
pub enum CursorAction {
    /// Move on.
    Continue,
    /// Replace the current record, then move on.
    Update(Record),
    /// Delete the current record, then move on.
    Delete,
    /// End the iteration.
    Stop,
}

/// One operation against one collection, consumed by issuing it.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    descriptor: DatabaseDescriptor,
    mode: TransactionMode,
    operation: Operation,
}

impl TransactionRequest {
    /// Creates a request in the mode the operation needs.
    pub fn new(descriptor: DatabaseDescriptor, operation: Operation) -> Self {
        Self {
            descriptor,
            mode: operation.mode(),
            operation,
        }
    }

    /// Overrides the transaction mode.
    #[must_use]
    pub fn with_mode(mut self, mode: TransactionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Target of the request.
    pub fn descriptor(&self) -> &DatabaseDescriptor {
        &self.descriptor
    }

    /// Transaction mode.
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Operation to perform.
    pub fn operation(&self) -> &Operation {
        &self.operation
    }

    /// Runs the operation to completion. Read-write requests also wait for
    /// their transaction to commit.
    ///
    /// # Errors
    ///
    /// Host failures of the request or the commit come back as
    /// [`CoreError::Host`]. Cursor operations are rejected; use
    /// [`iterate`](Self::iterate).
    pub async fn issue(self, connection: &dyn Connection) -> CoreResult<Response> {
        let Some(request) = self.operation.into_request() else {
            return Err(CoreError::invalid_operation(
                "cursor requests are driven with iterate",
            ));
        };
        let kind = request.kind();
        let transaction = connection.transaction(self.descriptor.collection(), self.mode)?;

        let committed = (self.mode == TransactionMode::ReadWrite).then(|| {
            let (resolver, pending) = completion();
            transaction.on_finish(resolver.into_callback());
            pending
        });

        let (resolver, pending) = completion::<HostResult<Response>>();
        transaction.submit(request, resolver.into_callback());
        tracing::debug!(target_db = %self.descriptor, ?kind, mode = %self.mode, "request issued");

        let response = pending.await??;
        if let Some(committed) = committed {
            committed.await??;
        }
        Ok(response)
    }

    /// Walks the collection in cursor order, calling `visit` once per
    /// record until it returns [`CursorAction::Stop`] or the records run
    /// out. Returns the number of records visited.
    ///
    /// # Errors
    ///
    /// Rejects non-cursor operations. Host failures of the cursor, of a
    /// write the visitor asked for, or of the commit come back as
    /// [`CoreError::Host`].
    pub async fn iterate<F>(self, connection: &dyn Connection, mut visit: F) -> CoreResult<usize>
    where
        F: FnMut(&Record) -> CursorAction + 'static,
    {
        if self.operation != Operation::OpenCursor {
            return Err(CoreError::invalid_operation(format!(
                "{:?} cannot be iterated",
                self.operation
            )));
        }
        let transaction = connection.transaction(self.descriptor.collection(), self.mode)?;

        let (resolver, committed) = completion();
        transaction.on_finish(resolver.into_callback());

        let (resolver, pending) = completion::<HostResult<usize>>();
        let mut resolver = Some(resolver);
        let mut visited = 0usize;
        transaction.open_cursor(Box::new(move |step| {
            let cursor = match step {
                Ok(Some(cursor)) => cursor,
                Ok(None) => {
                    if let Some(resolver) = resolver.take() {
                        resolver.resolve(Ok(visited));
                    }
                    return;
                }
                Err(err) => {
                    if let Some(resolver) = resolver.take() {
                        resolver.resolve(Err(err));
                    }
                    return;
                }
            };

            visited += 1;
            match visit(&cursor.record()) {
                CursorAction::Continue => cursor.advance(),
                CursorAction::Update(record) => {
                    cursor.update(record);
                    cursor.advance();
                }
                CursorAction::Delete => {
                    cursor.delete();
                    cursor.advance();
                }
                CursorAction::Stop => {
                    if let Some(resolver) = resolver.take() {
                        resolver.resolve(Ok(visited));
                    }
                }
            }
        }));
        tracing::debug!(target_db = %self.descriptor, "cursor opened");

        let visited = pending.await??;
        committed.await??;
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idbkit_host::{
        CollectionSchema, DatabaseFactory, HostError, MemoryHost, RequestKind, UpgradeScope,
    };
    use std::rc::Rc;

    fn descriptor() -> DatabaseDescriptor {
        DatabaseDescriptor::new("db", "items").unwrap()
    }

    async fn connect(host: &MemoryHost) -> Rc<dyn Connection> {
        let (resolver, pending) = completion();
        host.open(
            "db",
            1,
            Box::new(|scope: &dyn UpgradeScope| {
                scope.create_collection("items", &CollectionSchema::default())?;
                Ok(())
            }),
            resolver.into_callback(),
        );
        pending.await.unwrap().unwrap()
    }

    async fn issue(conn: &Rc<dyn Connection>, operation: Operation) -> CoreResult<Response> {
        TransactionRequest::new(descriptor(), operation).issue(conn.as_ref()).await
    }

    #[test]
    fn modes_follow_operations() {
        assert_eq!(Operation::Count.mode(), TransactionMode::ReadOnly);
        assert_eq!(Operation::Get(Key::Int(1)).mode(), TransactionMode::ReadOnly);
        assert_eq!(Operation::OpenCursor.mode(), TransactionMode::ReadWrite);
        assert_eq!(Operation::Clear.mode(), TransactionMode::ReadWrite);
        let request = TransactionRequest::new(descriptor(), Operation::OpenCursor)
            .with_mode(TransactionMode::ReadOnly);
        assert_eq!(request.mode(), TransactionMode::ReadOnly);
    }

    #[tokio::test]
    async fn add_then_count() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;

        let added = issue(&conn, Operation::Add(Record::new().with("n", 1))).await.unwrap();
        assert_eq!(added, Response::Key(Key::Int(1)));
        assert_eq!(issue(&conn, Operation::Count).await.unwrap(), Response::Count(1));
    }

    #[tokio::test]
    async fn rejected_request_surfaces_host_error() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;
        host.reject(RequestKind::Clear);

        let err = issue(&conn, Operation::Clear).await.unwrap_err();
        assert!(matches!(err, CoreError::Host(HostError::Aborted(_))));
    }

    #[tokio::test]
    async fn forced_read_only_write_fails() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;
        let err = TransactionRequest::new(descriptor(), Operation::Clear)
            .with_mode(TransactionMode::ReadOnly)
            .issue(conn.as_ref())
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::Host(HostError::ReadOnly));
    }

    #[tokio::test]
    async fn cursor_is_not_issued() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;
        let err = issue(&conn, Operation::OpenCursor).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));

        let err = TransactionRequest::new(descriptor(), Operation::Count)
            .iterate(conn.as_ref(), |_| CursorAction::Continue)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidOperation { .. }));
    }

    #[tokio::test]
    async fn iterate_applies_actions() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;
        for n in 1..=4 {
            issue(&conn, Operation::Add(Record::new().with("n", n))).await.unwrap();
        }

        let visited = TransactionRequest::new(descriptor(), Operation::OpenCursor)
            .iterate(conn.as_ref(), |record| match record.id() {
                Some(Key::Int(1)) => CursorAction::Delete,
                Some(Key::Int(2)) => CursorAction::Update(record.clone().with("n", 20)),
                Some(Key::Int(3)) => CursorAction::Stop,
                _ => CursorAction::Continue,
            })
            .await
            .unwrap();

        assert_eq!(visited, 3);
        let remaining = host.records("db", "items");
        assert_eq!(remaining.len(), 3);
        assert_eq!(remaining[0].get("n"), Some(serde_json::json!(20)));
    }

    #[tokio::test]
    async fn iterate_empty_collection() {
        let host = MemoryHost::new();
        let conn = connect(&host).await;
        let visited = TransactionRequest::new(descriptor(), Operation::OpenCursor)
            .iterate(conn.as_ref(), |_| CursorAction::Continue)
            .await
            .unwrap();
        assert_eq!(visited, 0);
    }
}
