//! Statement execution and reader management.
//!
//! The execution manager owns the connection. It runs each
//! [`ScriptBatch`] as one unit, captures statements in recording mode and
//! enforces that at most one [`DataReader`](crate::provider::DataReader)
//! is open at a time.

use std::cell::Cell;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::error::{CatalogError, Result};
use crate::preferences::ExecutionMode;
use crate::provider::{Connection, DataReader, Request, Row, ServerInfo};
use crate::state::Verb;
use crate::value::PropertyValue;

/// Ordered statements produced for one verb.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptBatch {
    statements: Vec<String>,
}

impl ScriptBatch {
    /// Creates an empty batch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            statements: Vec::new(),
        }
    }

    /// Appends a statement.
    pub fn push(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    /// Returns the number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Returns true if the batch holds no statement.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Returns the statements.
    #[must_use]
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Consumes the batch.
    #[must_use]
    pub fn into_statements(self) -> Vec<String> {
        self.statements
    }
}

/// Runs batches and metadata queries on a connection.
pub struct ExecutionManager {
    connection: Box<dyn Connection>,
    server: ServerInfo,
    mode: ExecutionMode,
    captured: Vec<String>,
    reader_active: Rc<Cell<bool>>,
}

impl ExecutionManager {
    /// Wraps a connection, reading its server information once.
    pub fn new(connection: Box<dyn Connection>) -> Result<Self> {
        let server = connection.server_info().map_err(CatalogError::Connection)?;
        debug!(server = %server, "Connected");
        Ok(Self {
            connection,
            server,
            mode: ExecutionMode::Execute,
            captured: Vec::new(),
            reader_active: Rc::new(Cell::new(false)),
        })
    }

    /// Returns the connected server.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    /// Returns the execution mode.
    #[must_use]
    pub const fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Changes the execution mode.
    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
    }

    /// Returns true if batches are captured without reaching the server.
    #[must_use]
    pub const fn is_recording(&self) -> bool {
        !self.mode.executes()
    }

    fn ensure_no_reader(&self) -> Result<()> {
        if self.reader_active.get() {
            return Err(CatalogError::Internal(
                "a data reader is still open on this connection".to_string(),
            ));
        }
        Ok(())
    }

    /// Executes a batch on behalf of `verb` targeting `object`.
    ///
    /// On failure nothing is rolled back; the error reports how many
    /// statements completed.
    pub fn execute(&mut self, batch: &ScriptBatch, verb: Verb, object: &str) -> Result<()> {
        self.ensure_no_reader()?;
        if self.mode.captures() {
            self.captured.extend(batch.statements().iter().cloned());
        }
        if !self.mode.executes() || batch.is_empty() {
            debug!(
                verb = %verb,
                object = %object,
                statements = batch.len(),
                "Recorded batch"
            );
            return Ok(());
        }
        for sql in batch.statements() {
            debug!(sql = %sql, "Executing SQL");
        }
        match self.connection.execute_non_query(batch.statements()) {
            Ok(()) => {
                info!(
                    verb = %verb,
                    object = %object,
                    statements = batch.len(),
                    "Executed batch"
                );
                Ok(())
            }
            Err(source) => {
                let executed = source.statement_index.unwrap_or(0);
                warn!(
                    verb = %verb,
                    object = %object,
                    executed,
                    error = %source,
                    "Batch failed"
                );
                Err(CatalogError::FailedOperation {
                    verb,
                    object: object.to_string(),
                    executed,
                    source,
                })
            }
        }
    }

    /// Executes a statement returning one value.
    pub fn execute_scalar(&mut self, statement: &str) -> Result<PropertyValue> {
        self.ensure_no_reader()?;
        debug!(sql = %statement, "Executing scalar");
        self.connection
            .execute_scalar(statement)
            .map_err(|source| CatalogError::Enumeration {
                urn: statement.to_string(),
                source,
            })
    }

    /// Opens a reader for a metadata request.
    ///
    /// Fails while another reader obtained from this manager is alive.
    pub fn open_reader(&mut self, request: &Request) -> Result<ReaderGuard> {
        self.ensure_no_reader()?;
        let urn = request.urn.to_string();
        debug!(urn = %urn, fields = ?request.fields, "Opening reader");
        let reader = self
            .connection
            .open_reader(request)
            .map_err(|source| CatalogError::Enumeration {
                urn: urn.clone(),
                source,
            })?;
        self.reader_active.set(true);
        Ok(ReaderGuard {
            reader,
            active: Rc::clone(&self.reader_active),
            urn,
        })
    }

    /// Returns the captured statements.
    #[must_use]
    pub fn captured_sql(&self) -> &[String] {
        &self.captured
    }

    /// Discards the captured statements.
    pub fn clear_captured(&mut self) {
        self.captured.clear();
    }

    /// Returns and clears the captured statements.
    pub fn take_captured(&mut self) -> Vec<String> {
        std::mem::take(&mut self.captured)
    }
}

/// An open reader. The connection accepts new work once it is dropped.
pub struct ReaderGuard {
    reader: Box<dyn DataReader>,
    active: Rc<Cell<bool>>,
    urn: String,
}

impl ReaderGuard {
    /// Returns the column names.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        self.reader.columns()
    }

    /// Reads the next row.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        self.reader
            .next_row()
            .map_err(|source| CatalogError::Enumeration {
                urn: self.urn.clone(),
                source,
            })
    }
}

impl Drop for ReaderGuard {
    fn drop(&mut self) {
        self.active.set(false);
    }
}
