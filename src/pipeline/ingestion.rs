//! Ingestion orchestrator: route → plan → write
//!
//! One tokio task per (table, kind) group. Batches inside a group are written
//! in plan order; groups run independently. A failed batch is recorded and
//! the group moves on to its next batch.

use super::db::{BatchError, BatchWriter, SqliteBatchWriter, WriteOutcome};
use super::mapping::TableMapping;
use super::planner::BatchPlanner;
use super::pool::DatabasePools;
use super::router::route;
use super::types::{EntityKind, IndicatorRecord, InsertionRow, RouteKey};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Cooperative stop flag shared between the runtime and running groups
///
/// Groups check it before each batch; a batch already being written always
/// runs to commit or rollback.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Writers per entity kind (each kind has its own database)
#[derive(Clone)]
pub struct WriterSet {
    fund_groups: Arc<dyn BatchWriter>,
    model_portfolios: Arc<dyn BatchWriter>,
}

impl WriterSet {
    pub fn new(fund_groups: Arc<dyn BatchWriter>, model_portfolios: Arc<dyn BatchWriter>) -> Self {
        Self {
            fund_groups,
            model_portfolios,
        }
    }

    /// SQLite writers over the pools in `pools`
    pub fn sqlite(pools: &DatabasePools) -> Self {
        Self::new(
            Arc::new(SqliteBatchWriter::new(Arc::clone(&pools.fund_groups))),
            Arc::new(SqliteBatchWriter::new(Arc::clone(&pools.model_portfolios))),
        )
    }

    pub fn for_kind(&self, kind: EntityKind) -> &Arc<dyn BatchWriter> {
        match kind {
            EntityKind::FundGroup => &self.fund_groups,
            EntityKind::ModelPortfolio => &self.model_portfolios,
        }
    }

    fn log_backends(&self) {
        log::info!("🗄️  Writers:");
        for (i, kind) in EntityKind::ALL.iter().enumerate() {
            let writer = self.for_kind(*kind);
            let branch = if i + 1 == EntityKind::ALL.len() { "└─" } else { "├─" };
            log::info!(
                "   {} {}: {} ({})",
                branch,
                kind,
                writer.backend_type(),
                writer.database()
            );
        }
    }
}

/// A failed batch inside a group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub rows: usize,
    pub error: BatchError,
}

/// Outcome for one (table, kind) group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupOutcome {
    pub table: String,
    pub entity_kind: EntityKind,
    pub database: String,
    pub batches_planned: usize,
    pub batches_committed: usize,
    pub batches_failed: usize,
    pub batches_cancelled: usize,
    pub rows_attempted: usize,
    pub rows_committed: usize,
    pub rows_cancelled: usize,
    pub errors: Vec<BatchFailure>,
}

impl GroupOutcome {
    fn new(key: &RouteKey, database: &str, batches_planned: usize) -> Self {
        Self {
            table: key.table.clone(),
            entity_kind: key.entity_kind,
            database: database.to_string(),
            batches_planned,
            batches_committed: 0,
            batches_failed: 0,
            batches_cancelled: 0,
            rows_attempted: 0,
            rows_committed: 0,
            rows_cancelled: 0,
            errors: Vec::new(),
        }
    }

    fn record(&mut self, batch_index: usize, outcome: WriteOutcome) {
        self.rows_attempted += outcome.rows_attempted;
        self.rows_committed += outcome.rows_committed;
        match outcome.error {
            None => self.batches_committed += 1,
            Some(error) => {
                self.batches_failed += 1;
                self.errors.push(BatchFailure {
                    batch_index,
                    rows: outcome.rows_attempted,
                    error,
                });
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.batches_failed == 0 && self.batches_cancelled == 0
    }
}

/// Per-group outcomes plus routing statistics for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    /// Sorted by (table, kind)
    pub groups: Vec<GroupOutcome>,
    pub skipped_records: usize,
    pub skipped_codes: BTreeMap<String, usize>,
    pub elapsed_ms: u128,
}

impl IngestionReport {
    pub fn total_attempted(&self) -> usize {
        self.groups.iter().map(|g| g.rows_attempted).sum()
    }

    pub fn total_committed(&self) -> usize {
        self.groups.iter().map(|g| g.rows_committed).sum()
    }

    pub fn total_cancelled(&self) -> usize {
        self.groups.iter().map(|g| g.rows_cancelled).sum()
    }

    pub fn failed_batches(&self) -> usize {
        self.groups.iter().map(|g| g.batches_failed).sum()
    }

    pub fn group(&self, table: &str, kind: EntityKind) -> Option<&GroupOutcome> {
        self.groups
            .iter()
            .find(|g| g.table == table && g.entity_kind == kind)
    }

    pub fn is_complete(&self) -> bool {
        self.groups.iter().all(GroupOutcome::is_complete)
    }

    /// Log committed vs attempted per group and the run totals
    pub fn log_summary(&self) {
        log::info!("📊 Ingestion summary ({}ms):", self.elapsed_ms);
        for group in &self.groups {
            let marker = if group.is_complete() { "✅" } else { "⚠️ " };
            log::info!(
                "   ├─ {} {} [{}]: {}/{} rows committed, {}/{} batches ok{}",
                marker,
                group.table,
                group.entity_kind,
                group.rows_committed,
                group.rows_attempted,
                group.batches_committed,
                group.batches_planned,
                if group.rows_cancelled > 0 {
                    format!(", {} rows cancelled", group.rows_cancelled)
                } else {
                    String::new()
                }
            );
        }
        log::info!(
            "   └─ Total: {}/{} rows committed, {} failed batches, {} records skipped",
            self.total_committed(),
            self.total_attempted(),
            self.failed_batches(),
            self.skipped_records
        );
    }
}

/// Drives routed rows through the planner and the writers
pub struct IngestionOrchestrator {
    planner: BatchPlanner,
    writers: WriterSet,
    shutdown: ShutdownSignal,
}

impl IngestionOrchestrator {
    pub fn new(planner: BatchPlanner, writers: WriterSet) -> Self {
        Self {
            planner,
            writers,
            shutdown: ShutdownSignal::new(),
        }
    }

    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Route, plan and write `records`. Never fails as a whole; per-batch
    /// failures are reported in the returned [`IngestionReport`].
    pub async fn run<I>(&self, records: I, mapping: &TableMapping) -> IngestionReport
    where
        I: IntoIterator<Item = IndicatorRecord>,
    {
        let started = Instant::now();
        let routed = route(records, mapping);

        if !routed.skipped.is_empty() {
            log::warn!(
                "⚠️  {} records skipped, indicator codes without a destination table: {:?}",
                routed.total_skipped(),
                routed.skipped
            );
        }

        log::info!(
            "🚀 Writing {} rows across {} table groups (batch size {} rows)",
            routed.total_rows(),
            routed.groups.len(),
            self.planner.batch_rows()
        );

        self.writers.log_backends();

        let skipped_records = routed.total_skipped();
        let mut handles = Vec::with_capacity(routed.groups.len());
        for (key, rows) in routed.groups {
            let writer = Arc::clone(self.writers.for_kind(key.entity_kind));
            let planner = self.planner;
            let shutdown = self.shutdown.clone();
            let task_key = key.clone();
            let row_count = rows.len();
            // Progress lives outside the task so finished batches survive a panic.
            let progress = Arc::new(Mutex::new(GroupOutcome::new(
                &key,
                writer.database(),
                planner.batch_count(row_count),
            )));
            let task_progress = Arc::clone(&progress);
            let handle = tokio::spawn(async move {
                write_group(task_key, rows, planner, writer, shutdown, task_progress).await
            });
            handles.push((key, row_count, progress, handle));
        }

        let mut groups = Vec::with_capacity(handles.len());
        for (key, row_count, progress, handle) in handles {
            let joined = handle.await;
            let mut outcome = progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();

            if let Err(e) = joined {
                let unfinished = row_count - outcome.rows_attempted - outcome.rows_cancelled;
                log::error!(
                    "❌ Writer task for {} failed after {} committed rows, {} rows not written: {}",
                    key,
                    outcome.rows_committed,
                    unfinished,
                    e
                );
                let batch_index = outcome.batches_committed + outcome.batches_failed;
                outcome.record(
                    batch_index,
                    WriteOutcome::failed(unfinished, BatchError::Worker(e.to_string())),
                );
            }
            groups.push(outcome);
        }

        IngestionReport {
            groups,
            skipped_records,
            skipped_codes: routed.skipped,
            elapsed_ms: started.elapsed().as_millis(),
        }
    }
}

async fn write_group(
    key: RouteKey,
    rows: Vec<InsertionRow>,
    planner: BatchPlanner,
    writer: Arc<dyn BatchWriter>,
    shutdown: ShutdownSignal,
    progress: Arc<Mutex<GroupOutcome>>,
) {
    let id_column = key.entity_kind.id_column();
    let batches = planner.plan(&rows);
    let lock = || progress.lock().unwrap_or_else(PoisonError::into_inner);

    log::info!(
        "Inserting {} rows into {} for {} ({} batches)",
        rows.len(),
        key.table,
        key.entity_kind,
        batches.len()
    );

    for (index, batch) in batches.iter().enumerate() {
        if shutdown.is_requested() {
            let batches_cancelled = batches.len() - index;
            let rows_cancelled: usize = batches[index..].iter().map(|b| b.len()).sum();
            {
                let mut outcome = lock();
                outcome.batches_cancelled = batches_cancelled;
                outcome.rows_cancelled = rows_cancelled;
            }
            log::warn!(
                "⚠️  Stop requested, {} batches ({} rows) for {} not written",
                batches_cancelled,
                rows_cancelled,
                key
            );
            break;
        }

        let result = writer.write(&key.table, id_column, batch.to_vec()).await;
        log::debug!(
            "   ├─ {} batch {}/{}: {}/{} rows",
            key,
            index + 1,
            batches.len(),
            result.rows_committed,
            result.rows_attempted
        );
        lock().record(index, result);
    }
}

/// Run a full ingestion against SQLite pools with default writers.
pub async fn run_ingestion<I>(
    records: I,
    mapping: &TableMapping,
    pools: &DatabasePools,
    planner: BatchPlanner,
    shutdown: ShutdownSignal,
) -> IngestionReport
where
    I: IntoIterator<Item = IndicatorRecord>,
{
    IngestionOrchestrator::new(planner, WriterSet::sqlite(pools))
        .with_shutdown(shutdown)
        .run(records, mapping)
        .await
}
