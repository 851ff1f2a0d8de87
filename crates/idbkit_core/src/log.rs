//! Bounded log buffer persisted in a key/value store.
//!
//! Records are `<message>-<YYYY-MM-DD HH:MM:SS>` strings kept, comma-joined,
//! under one storage key. When the buffered count reaches the capacity the
//! buffer flushes: the stored records are cleared first, then the
//! authorization flag is consulted, and only an authorized flush reaches the
//! transport. Records discarded by an unauthorized flush are gone.
//!
//! Two buffers sharing a storage key race on read-modify-write; nothing
//! here serializes them.

use crate::config::LogConfig;
use crate::error::{CoreError, CoreResult};
use chrono::{Local, NaiveDateTime};
use idbkit_host::KeyValueStore;
use std::fmt;
use std::rc::Rc;

/// Timestamp layout of a record.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const SEPARATOR: char = ',';

/// Result of handing a payload to a [`LogTransport`].
pub type TransportResult = Result<(), String>;

/// Receives flushed log payloads.
pub trait LogTransport {
    /// Sends the comma-joined records.
    fn send(&self, payload: &str) -> TransportResult;
}

impl<F> LogTransport for F
where
    F: Fn(&str) -> TransportResult,
{
    fn send(&self, payload: &str) -> TransportResult {
        self(payload)
    }
}

/// Source of record timestamps.
pub trait Clock {
    /// Current local time.
    fn now(&self) -> NaiveDateTime;
}

/// Wall clock in the local time zone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Buffered records in append order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRecords(Vec<String>);

impl LogRecords {
    /// Creates an empty sequence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the stored form, dropping empty entries.
    pub fn parse(raw: &str) -> Self {
        Self(
            raw.split(SEPARATOR)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Appends a record.
    pub fn push(&mut self, record: impl Into<String>) {
        self.0.push(record.into());
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no records.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the records in order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl fmt::Display for LogRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, record) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{SEPARATOR}")?;
            }
            f.write_str(record)?;
        }
        Ok(())
    }
}

impl IntoIterator for LogRecords {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What an [`append`](LogBuffer::append) did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was stored; `len` records are now buffered.
    Buffered {
        /// Buffered record count.
        len: usize,
    },
    /// The record filled the buffer and an authorized flush sent `sent`
    /// records.
    Flushed {
        /// Records handed to the transport.
        sent: usize,
    },
}

/// A bounded, append-only log that flushes to a transport when full.
pub struct LogBuffer {
    config: LogConfig,
    store: Rc<dyn KeyValueStore>,
    transport: Rc<dyn LogTransport>,
    clock: Rc<dyn Clock>,
}

impl LogBuffer {
    /// Creates a buffer.
    ///
    /// # Errors
    ///
    /// Fails if the configuration does not validate.
    pub fn new(
        config: LogConfig,
        store: Rc<dyn KeyValueStore>,
        transport: Rc<dyn LogTransport>,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            transport,
            clock: Rc::new(SystemClock),
        })
    }

    /// Replaces the timestamp source.
    #[must_use]
    pub fn with_clock(mut self, clock: Rc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Storage key of the records.
    pub fn records_key(&self) -> &str {
        &self.config.records_key
    }

    /// Storage key of the authorization flag.
    pub fn authorization_key(&self) -> &str {
        &self.config.authorization_key
    }

    /// Record count that triggers a flush.
    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Reads the buffered records.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn records(&self) -> CoreResult<LogRecords> {
        let raw = self.store.read(&self.config.records_key)?;
        Ok(raw.as_deref().map(LogRecords::parse).unwrap_or_default())
    }

    /// Number of buffered records.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn len(&self) -> CoreResult<usize> {
        Ok(self.records()?.len())
    }

    /// Returns true if nothing is buffered.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn is_empty(&self) -> CoreResult<bool> {
        Ok(self.records()?.is_empty())
    }

    /// Stores the send authorization flag.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn set_authorized(&self, authorized: bool) -> CoreResult<()> {
        let flag = if authorized { "true" } else { "false" };
        self.store.write(&self.config.authorization_key, flag)?;
        Ok(())
    }

    /// Reads the authorization flag. Absent or unparsable means no.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub fn is_authorized(&self) -> CoreResult<bool> {
        let raw = self.store.read(&self.config.authorization_key)?;
        Ok(raw.as_deref().and_then(parse_flag).unwrap_or(false))
    }

    /// Appends a timestamped record, flushing if the buffer is now full.
    ///
    /// # Errors
    ///
    /// Propagates store failures and any error of the triggered flush.
    pub fn append(&self, message: &str) -> CoreResult<AppendOutcome> {
        let mut records = self.records()?;
        records.push(format!(
            "{message}-{}",
            self.clock.now().format(TIMESTAMP_FORMAT)
        ));
        let len = records.len();
        self.store
            .write(&self.config.records_key, &records.to_string())?;
        tracing::debug!(key = %self.config.records_key, len, "log record appended");

        if len >= self.config.capacity {
            let sent = self.flush()?;
            return Ok(AppendOutcome::Flushed { sent });
        }
        Ok(AppendOutcome::Buffered { len })
    }

    /// Drains the buffer and sends it if authorized.
    ///
    /// The stored records are cleared before the authorization flag is
    /// read, so an unauthorized flush loses them.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Forbidden`] when the flag is absent or false
    /// - [`CoreError::TransportFailed`] when the transport rejects the payload
    pub fn flush(&self) -> CoreResult<usize> {
        let records = self.records()?;
        self.store.write(&self.config.records_key, "")?;

        if !self.is_authorized()? {
            tracing::debug!(discarded = records.len(), "log flush not authorized");
            return Err(CoreError::Forbidden {
                discarded: records.len(),
            });
        }
        if records.is_empty() {
            return Ok(0);
        }

        self.transport
            .send(&records.to_string())
            .map_err(CoreError::transport_failed)?;
        tracing::debug!(sent = records.len(), "log flushed");
        Ok(records.len())
    }
}

impl fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBuffer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Boolean parsing as accepted for the authorization flag.
fn parse_flag(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}
