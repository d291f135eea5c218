//! Ingest Runtime - indicator results loader
//!
//! This binary runs one full ingestion:
//! - Opens a connection pool per results database (fund groups, model portfolios)
//! - Loads the indicator code → table mapping from the reference database
//! - Builds the reporting grid and pulls indicator values for it
//! - Routes, batches and writes every value, then prints a per-table summary
//!
//! Usage:
//!   cargo run --release --bin ingest_runtime
//!
//! Environment variables:
//!   DB_DATA_DIR - Directory holding the SQLite databases (default: data)
//!   DB_ALLOWED_PACKET_SIZE - Max payload per batch in bytes (default: 16777216)
//!   DB_POOL_SIZE - Connections per database (default: 5)
//!   INGEST_REPORT_PATH - Write the JSON run report here (default: unset)

use anyhow::Context;
use dotenv::dotenv;
use indicator_ingest::pipeline::{
    build_records, load_table_mapping, run_ingestion, BatchPlanner, ConnectionPool,
    DatabasePools, EntityKind, PipelineConfig, RandomIndicatorSource, ReportingGrid,
    ShutdownSignal,
};
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Ingest Runtime");

    let config = PipelineConfig::from_env();
    config.validate().context("invalid pipeline configuration")?;

    info!("📊 Configuration:");
    info!("   ├─ Data dir: {}", config.data_dir.display());
    info!("   ├─ Fund groups DB: {}", config.fund_group_database);
    info!("   ├─ Model portfolios DB: {}", config.model_portfolio_database);
    info!("   ├─ Reference DB: {}", config.reference_database);
    info!("   ├─ Max packet: {} bytes", config.max_packet_bytes);
    info!("   ├─ Estimated row: {} bytes", config.estimated_row_bytes);
    info!("   └─ Pool size: {} connections per database", config.pool_size);

    // Pools live for the whole process and are closed on the way out.
    let mut opened = Vec::with_capacity(EntityKind::ALL.len());
    for kind in EntityKind::ALL {
        let target = config.results_target(kind);
        let pool = ConnectionPool::open(target, config.pool_size, config.acquire_timeout())
            .with_context(|| format!("cannot open pool for {}", kind))?;
        opened.push(Arc::new(pool));
    }
    let model_portfolios = opened.pop().context("model portfolio pool missing")?;
    let fund_groups = opened.pop().context("fund group pool missing")?;
    let pools = DatabasePools::new(fund_groups, model_portfolios);

    let mapping = {
        let reference = config.reference_target();
        let conn = reference
            .open()
            .with_context(|| format!("cannot open reference database {}", reference.name))?;
        load_table_mapping(&conn).context("cannot load indicator table mapping")?
    };
    if mapping.is_empty() {
        warn!("⚠️  Table mapping is empty, every record will be skipped");
    }

    let grid = ReportingGrid::default();
    let mut source = match config.indicator_seed {
        Some(seed) => RandomIndicatorSource::seeded(seed),
        None => RandomIndicatorSource::new(),
    };
    let records = build_records(&grid, &mut source).context("cannot build indicator records")?;

    let shutdown = ShutdownSignal::new();
    let ctrl_c_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("⚠️  Received CTRL+C, finishing in-flight batches...");
                ctrl_c_signal.request();
            }
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
    });

    let planner = BatchPlanner::new(config.max_packet_bytes, config.estimated_row_bytes);
    let report = run_ingestion(records, &mapping, &pools, planner, shutdown).await;
    report.log_summary();

    if let Some(path) = &config.report_path {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
        info!("📝 Report written to {}", path.display());
    }

    if !report.is_complete() {
        warn!(
            "⚠️  Run finished with {} failed batches and {} cancelled rows",
            report.failed_batches(),
            report.total_cancelled()
        );
    }

    pools.close_all();
    info!("✅ Ingest runtime stopped");
    Ok(())
}
