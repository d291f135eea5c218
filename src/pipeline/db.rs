//! Batch writer for the results databases
//!
//! One batch = one transaction. The batch is normalized, inserted with
//! multi-row parameterized statements, committed on success and rolled back
//! on any error. The pooled connection is released on every path.
//!
//! Statement shape:
//! ```sql
//! INSERT INTO "<table>" ("<id_column>", CalculationHorizonID, Input_PeriodicityID, Date,
//!     IndicatorRatioValue, BenchmarkSymbol, BenchmarkSymbol_RF)
//! VALUES (?, ?, ?, ?, ?, ?, ?), (?, ?, ?, ?, ?, ?, ?), ...
//! ```
//! Table and id column come from the reference mapping and the entity kind,
//! never from user input. Row values are always bound.

use super::pool::{ConnectionPool, PoolError};
use super::types::{InsertionRow, ROW_ARITY};
use async_trait::async_trait;
use rusqlite::{params_from_iter, Connection};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Rows per INSERT statement inside one batch transaction.
///
/// Keeps `rows * ROW_ARITY` under SQLite's bound-parameter ceiling (32766).
pub const STATEMENT_ROW_LIMIT: usize = 4_000;

/// Value columns after the id column, in bind order
pub const VALUE_COLUMNS: [&str; ROW_ARITY - 1] = [
    "CalculationHorizonID",
    "Input_PeriodicityID",
    "Date",
    "IndicatorRatioValue",
    "BenchmarkSymbol",
    "BenchmarkSymbol_RF",
];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum BatchError {
    #[error("connection acquisition failed: {0}")]
    Acquire(String),

    #[error("insert failed, batch rolled back: {0}")]
    Execution(String),

    #[error("refusing to interpolate identifier {0:?}")]
    InvalidIdentifier(String),

    #[error("writer task failed: {0}")]
    Worker(String),
}

impl From<PoolError> for BatchError {
    fn from(err: PoolError) -> Self {
        BatchError::Acquire(err.to_string())
    }
}

impl From<rusqlite::Error> for BatchError {
    fn from(err: rusqlite::Error) -> Self {
        BatchError::Execution(err.to_string())
    }
}

/// Result of writing a single batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    pub rows_attempted: usize,
    pub rows_committed: usize,
    pub error: Option<BatchError>,
}

impl WriteOutcome {
    pub fn committed(rows: usize) -> Self {
        Self {
            rows_attempted: rows,
            rows_committed: rows,
            error: None,
        }
    }

    pub fn failed(rows_attempted: usize, error: BatchError) -> Self {
        Self {
            rows_attempted,
            rows_committed: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Writes one batch into one destination table
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Insert `batch` into `table`, populating `id_column`.
    ///
    /// Never returns an error directly: failures are reported in the outcome
    /// and leave nothing committed for this batch.
    async fn write(&self, table: &str, id_column: &str, batch: Vec<InsertionRow>) -> WriteOutcome;

    /// Database this writer targets, for logging
    fn database(&self) -> &str;

    /// Get backend type for logging
    fn backend_type(&self) -> &'static str;
}

/// SQLite implementation of [`BatchWriter`] backed by a [`ConnectionPool`]
#[derive(Debug, Clone)]
pub struct SqliteBatchWriter {
    pool: Arc<ConnectionPool>,
}

impl SqliteBatchWriter {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Synchronous write; [`BatchWriter::write`] runs this on the blocking pool.
    pub fn write_blocking(&self, table: &str, id_column: &str, batch: Vec<InsertionRow>) -> WriteOutcome {
        write_batch(&self.pool, table, id_column, batch)
    }
}

#[async_trait]
impl BatchWriter for SqliteBatchWriter {
    async fn write(&self, table: &str, id_column: &str, batch: Vec<InsertionRow>) -> WriteOutcome {
        let attempted = batch.len();
        let pool = Arc::clone(&self.pool);
        let table = table.to_string();
        let id_column = id_column.to_string();

        match tokio::task::spawn_blocking(move || write_batch(&pool, &table, &id_column, batch)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("❌ Batch writer task failed: {}", e);
                WriteOutcome::failed(attempted, BatchError::Worker(e.to_string()))
            }
        }
    }

    fn database(&self) -> &str {
        self.pool.database()
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

fn write_batch(
    pool: &ConnectionPool,
    table: &str,
    id_column: &str,
    batch: Vec<InsertionRow>,
) -> WriteOutcome {
    let attempted = batch.len();
    if attempted == 0 {
        return WriteOutcome::committed(0);
    }

    if let Err(e) = validate_identifier(table).and_then(|_| validate_identifier(id_column)) {
        log::error!("❌ Batch for {} rejected: {}", table, e);
        return WriteOutcome::failed(attempted, e);
    }

    // Guard releases the connection on every return below.
    let mut conn = match pool.acquire() {
        Ok(conn) => conn,
        Err(e) => {
            log::error!("❌ Cannot acquire connection for {} ({} rows): {}", table, attempted, e);
            return WriteOutcome::failed(attempted, e.into());
        }
    };

    let rows: Vec<InsertionRow> = batch.into_iter().map(InsertionRow::normalized).collect();

    match insert_rows(&mut conn, table, id_column, &rows) {
        Ok(inserted) => {
            log::debug!("✅ Committed {} rows into {} ({})", inserted, table, pool.database());
            WriteOutcome::committed(attempted)
        }
        Err(e) => {
            log::error!(
                "❌ Batch of {} rows into {} ({}) rolled back: {}",
                attempted,
                table,
                pool.database(),
                e
            );
            WriteOutcome::failed(attempted, e)
        }
    }
}

/// Insert `rows` inside one transaction; commit or roll back as a whole.
fn insert_rows(
    conn: &mut Connection,
    table: &str,
    id_column: &str,
    rows: &[InsertionRow],
) -> Result<usize, BatchError> {
    let tx = conn.transaction()?;

    let result = rows
        .chunks(STATEMENT_ROW_LIMIT)
        .try_fold(0usize, |inserted, chunk| {
            let sql = build_insert_sql(table, id_column, chunk.len());
            let mut stmt = tx.prepare_cached(&sql)?;
            let params = params_from_iter(chunk.iter().flat_map(|row| row.fields().iter()));
            Ok::<usize, rusqlite::Error>(inserted + stmt.execute(params)?)
        });

    match result {
        Ok(inserted) => {
            tx.commit()?;
            Ok(inserted)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback() {
                log::warn!("⚠️  Rollback failed for {}: {}", table, rollback_err);
            }
            Err(e.into())
        }
    }
}

/// Build a multi-row INSERT for `row_count` rows.
///
/// Callers must pass identifiers that passed [`validate_identifier`].
pub fn build_insert_sql(table: &str, id_column: &str, row_count: usize) -> String {
    let placeholders = format!("({})", vec!["?"; ROW_ARITY].join(", "));
    let values = vec![placeholders.as_str(); row_count.max(1)].join(", ");

    format!(
        "INSERT INTO \"{}\" (\"{}\", {}) VALUES {}",
        table,
        id_column,
        VALUE_COLUMNS.join(", "),
        values
    )
}

/// Identifiers are interpolated, so only `[A-Za-z0-9_]+` is accepted.
pub fn validate_identifier(name: &str) -> Result<(), BatchError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(BatchError::InvalidIdentifier(name.to_string()))
    }
}

/// Create a results table with the standard column layout if missing.
///
/// Used by tests and local setups; production tables are managed elsewhere.
pub fn create_results_table(conn: &Connection, table: &str, id_column: &str) -> Result<(), BatchError> {
    validate_identifier(table)?;
    validate_identifier(id_column)?;

    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS "{table}" (
            "{id_column}"        TEXT,
            CalculationHorizonID INTEGER NOT NULL,
            Input_PeriodicityID  INTEGER NOT NULL,
            Date                 TEXT NOT NULL,
            IndicatorRatioValue  REAL,
            BenchmarkSymbol      TEXT,
            BenchmarkSymbol_RF   TEXT
        )
        "#
    ))?;

    Ok(())
}
