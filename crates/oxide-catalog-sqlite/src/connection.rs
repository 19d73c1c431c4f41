//! Blocking [`Connection`] over an sqlx SQLite pool.
//!
//! The object model is single-threaded and synchronous, so every call
//! drives its future to completion on a private current-thread runtime.

use std::future::Future;

use oxide_catalog_core::prelude::*;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row as _, TypeInfo, ValueRef};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

use crate::enumerator::build_query;
use crate::error::{Result, SqliteCatalogError};

/// Server name reported when none is configured.
pub const DEFAULT_SERVER_NAME: &str = "sqlite";

/// SQLite compares identifiers case-insensitively for ASCII letters.
pub const IDENTIFIER_COLLATION: &str = "NOCASE";

/// A single SQLite database connection.
pub struct SqliteConnection {
    runtime: Runtime,
    pool: SqlitePool,
    info: ServerInfo,
}

impl SqliteConnection {
    /// Connects to `url` (`sqlite::memory:`, `sqlite:path.db?mode=rwc`, ...).
    pub fn connect(url: &str) -> Result<Self> {
        Self::connect_named(url, DEFAULT_SERVER_NAME)
    }

    /// Connects and reports the server as `server_name`.
    pub fn connect_named(url: &str, server_name: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        // One connection that never idles out, so in-memory databases and
        // attached schemas survive between calls.
        let pool = runtime.block_on(
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect(url),
        )?;
        let (version,): (String,) =
            runtime.block_on(sqlx::query_as("SELECT sqlite_version()").fetch_one(&pool))?;
        let info = ServerInfo {
            name: server_name.to_string(),
            version: ServerVersion::parse(&version).unwrap_or_default(),
            engine_type: EngineType::Standalone,
            engine_edition: EngineEdition::default(),
            collation: IDENTIFIER_COLLATION.to_string(),
            database_name: Some("main".to_string()),
        };
        info!(url = %url, version = %info.version, "Connected to SQLite");
        Ok(Self {
            runtime,
            pool,
            info,
        })
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }

    fn fetch_rows(&self, sql: &str) -> Result<Vec<SqliteRow>> {
        Ok(self.block_on(sqlx::query(sql).fetch_all(&self.pool))?)
    }
}

impl Connection for SqliteConnection {
    fn server_info(&self) -> std::result::Result<ServerInfo, ExecutionError> {
        Ok(self.info.clone())
    }

    fn execute_non_query(
        &mut self,
        statements: &[String],
    ) -> std::result::Result<(), ExecutionError> {
        for (index, statement) in statements.iter().enumerate() {
            if let Err(e) = self.block_on(sqlx::query(statement).execute(&self.pool)) {
                let error = ExecutionError::from(SqliteCatalogError::from(e));
                return Err(error.at_statement(index));
            }
        }
        Ok(())
    }

    fn execute_scalar(
        &mut self,
        statement: &str,
    ) -> std::result::Result<PropertyValue, ExecutionError> {
        let rows = self.fetch_rows(statement)?;
        match rows.first() {
            Some(row) if !row.columns().is_empty() => Ok(decode(row, 0)?),
            _ => Ok(PropertyValue::Null),
        }
    }

    fn open_reader(
        &mut self,
        request: &Request,
    ) -> std::result::Result<Box<dyn DataReader>, ExecutionError> {
        let query = build_query(request, &self.info.name)?;
        let rows = self.fetch_rows(&query.sql)?;
        let values = rows
            .iter()
            .map(|row| {
                (0..query.columns.len())
                    .map(|i| decode(row, i))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(urn = %request.urn, rows = values.len(), "Enumerated");
        Ok(Box::new(VecReader::new(query.columns, values)))
    }
}

/// Converts one column by its runtime storage class.
fn decode(row: &SqliteRow, index: usize) -> Result<PropertyValue> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(PropertyValue::Null);
    }
    let storage = raw.type_info().name().to_ascii_uppercase();
    let value = match storage.as_str() {
        "INTEGER" | "BOOLEAN" => PropertyValue::BigInt(row.try_get::<i64, _>(index)?),
        "REAL" => PropertyValue::Float(row.try_get::<f64, _>(index)?),
        "BLOB" => {
            let bytes = row.try_get::<Vec<u8>, _>(index)?;
            PropertyValue::Text(String::from_utf8_lossy(&bytes).into_owned())
        }
        _ => PropertyValue::Text(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}
