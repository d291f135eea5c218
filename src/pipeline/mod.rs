//! # Indicator Ingestion Pipeline
//!
//! Writes computed indicator values for fund groups and model portfolios into
//! their results databases.
//!
//! ## Architecture
//!
//! ```text
//! ReportingGrid + IndicatorSource → IndicatorRecord stream
//!     ↓
//! route (TableMapping: indicator code → table)
//!     ↓
//! BatchPlanner (payload-bounded slices per table/kind)
//!     ↓
//! BatchWriter (one transaction per batch, pooled connection)
//!     ↓
//! IngestionReport (committed vs attempted per table/kind)
//! ```
//!
//! Fund-group and model-portfolio rows go to separate databases even when the
//! indicator table name is the same. A failed batch is rolled back and
//! reported; it never affects another batch.
//!
//! ## Module Organization
//!
//! - `types` - Records, row tuples, field values, entity kinds
//! - `mapping` - Indicator code → table lookup and its reference-table loader
//! - `router` - Groups records per destination table and entity kind
//! - `planner` - Splits row groups into batches
//! - `pool` - Fixed-size SQLite connection pool
//! - `db` - Batch writer trait and SQLite implementation
//! - `ingestion` - Orchestrator and run report
//! - `indicators` - Indicator value source (placeholder generator)
//! - `grid` - Entity × date × periodicity × horizon expansion
//! - `config` - Environment configuration

pub mod config;
pub mod db;
pub mod grid;
pub mod indicators;
pub mod ingestion;
pub mod mapping;
pub mod planner;
pub mod pool;
pub mod router;
pub mod types;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use db::{BatchError, BatchWriter, SqliteBatchWriter, WriteOutcome};
pub use grid::{build_records, GridError, Horizon, Periodicity, ReportingGrid};
pub use indicators::{IndicatorSource, RandomIndicatorSource};
pub use ingestion::{
    run_ingestion, GroupOutcome, IngestionOrchestrator, IngestionReport, ShutdownSignal, WriterSet,
};
pub use mapping::{load_table_mapping, TableMapping};
pub use planner::BatchPlanner;
pub use pool::{ConnectionPool, DatabasePools, DatabaseTarget, PoolError, PooledConnection};
pub use router::{route, RoutedRows};
pub use types::{EntityKind, FieldValue, IndicatorRecord, InsertionRow, RouteKey};
