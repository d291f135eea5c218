//! End-to-end ingestion tests against real SQLite databases
//!
//! Covers the full path: records → router → planner → pooled writer →
//! per-kind results database, plus failure isolation and stop requests.

#[cfg(test)]
mod ingestion_pipeline_tests {
    use chrono::NaiveDate;
    use indicator_ingest::pipeline::db::create_results_table;
    use indicator_ingest::pipeline::grid::{month_end_dates, Horizon, Periodicity};
    use indicator_ingest::pipeline::{
        build_records, run_ingestion, BatchPlanner, ConnectionPool, DatabasePools,
        DatabaseTarget, EntityKind, IndicatorRecord, RandomIndicatorSource, ReportingGrid,
        ShutdownSignal, TableMapping,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Helper to open both results databases with the given tables
    fn create_test_pools(dir: &TempDir, tables: &[&str]) -> DatabasePools {
        let open = |name: &str, kind: EntityKind| {
            let target = DatabaseTarget::new(name, dir.path().join(format!("{}.db", name)));
            let pool = ConnectionPool::open(target, 2, Duration::from_millis(500)).unwrap();
            {
                let conn = pool.acquire().unwrap();
                for table in tables {
                    create_results_table(&conn, table, kind.id_column()).unwrap();
                }
            }
            Arc::new(pool)
        };

        DatabasePools::new(
            open("fundgroup_results", EntityKind::FundGroup),
            open("portfolio_results", EntityKind::ModelPortfolio),
        )
    }

    fn make_records(kind: EntityKind, code: &str, values: &[Option<f64>]) -> Vec<IndicatorRecord> {
        values
            .iter()
            .enumerate()
            .map(|(i, value)| IndicatorRecord {
                entity_kind: kind,
                entity_id: i as i64 + 1,
                date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
                periodicity: 3,
                horizon: 9,
                indicator_code: code.to_string(),
                value: *value,
            })
            .collect()
    }

    fn count(pools: &DatabasePools, kind: EntityKind, sql: &str) -> i64 {
        let conn = pools.for_kind(kind).acquire().unwrap();
        conn.query_row(sql, [], |row| row.get(0)).unwrap()
    }

    #[tokio::test]
    async fn test_twenty_three_rows_in_five_batches() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &["tbl_twr"]);
        let mapping = TableMapping::from_pairs([("TWR", "tbl_twr")]);
        let values: Vec<Option<f64>> = (0..23).map(|i| Some(i as f64 / 100.0)).collect();

        let report = run_ingestion(
            make_records(EntityKind::FundGroup, "twr", &values),
            &mapping,
            &pools,
            BatchPlanner::new(1000, 200),
            ShutdownSignal::new(),
        )
        .await;

        let group = report.group("tbl_twr", EntityKind::FundGroup).unwrap();
        assert_eq!(group.batches_planned, 5);
        assert_eq!(group.batches_committed, 5);
        assert_eq!(group.rows_attempted, 23);
        assert_eq!(group.rows_committed, 23);
        assert!(report.is_complete());

        assert_eq!(count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_twr"), 23);
        assert_eq!(
            count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_twr WHERE FundGroupName_ID IS NULL"),
            0
        );
        assert_eq!(
            count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_twr WHERE BenchmarkSymbol IS NOT NULL OR BenchmarkSymbol_RF IS NOT NULL"),
            0
        );
        assert_eq!(pools.fund_groups.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_failing_batch_is_isolated() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &[]);
        {
            let conn = pools.fund_groups.acquire().unwrap();
            conn.execute_batch(
                "CREATE TABLE tbl_strict (
                    FundGroupName_ID TEXT, CalculationHorizonID INTEGER, Input_PeriodicityID INTEGER,
                    Date TEXT, IndicatorRatioValue REAL NOT NULL,
                    BenchmarkSymbol TEXT, BenchmarkSymbol_RF TEXT
                )",
            )
            .unwrap();
        }
        let mapping = TableMapping::from_pairs([("mdd", "tbl_strict")]);

        // First batch carries a NaN, which becomes NULL and violates NOT NULL.
        let mut values: Vec<Option<f64>> = (0..10).map(|i| Some(-(i as f64) / 100.0)).collect();
        values[2] = Some(f64::NAN);

        let report = run_ingestion(
            make_records(EntityKind::FundGroup, "mdd", &values),
            &mapping,
            &pools,
            BatchPlanner::new(1000, 200),
            ShutdownSignal::new(),
        )
        .await;

        let group = report.group("tbl_strict", EntityKind::FundGroup).unwrap();
        assert_eq!(group.batches_failed, 1);
        assert_eq!(group.batches_committed, 1);
        assert_eq!(group.errors.len(), 1);
        assert_eq!(group.errors[0].batch_index, 0);
        assert_eq!(group.errors[0].rows, 5);
        assert_eq!(group.rows_attempted, 10);
        assert_eq!(group.rows_committed, 5);

        // Nothing from the failed batch, all of the second one.
        assert_eq!(count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_strict"), 5);
        assert_eq!(
            count(&pools, EntityKind::FundGroup, "SELECT MIN(CAST(FundGroupName_ID AS INTEGER)) FROM tbl_strict"),
            6
        );
        assert_eq!(pools.fund_groups.idle_count(), 2);
    }

    #[tokio::test]
    async fn test_entity_kinds_land_in_their_own_database() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &["tbl_twr"]);
        let mapping = TableMapping::from_pairs([("twr", "tbl_twr")]);

        let mut records = make_records(EntityKind::FundGroup, "twr", &[Some(0.1); 4]);
        records.extend(make_records(EntityKind::ModelPortfolio, "twr", &[Some(0.2); 3]));

        let report = run_ingestion(
            records,
            &mapping,
            &pools,
            BatchPlanner::new(16_777_216, 200),
            ShutdownSignal::new(),
        )
        .await;

        assert_eq!(report.groups.len(), 2);
        assert_eq!(count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_twr"), 4);
        assert_eq!(count(&pools, EntityKind::ModelPortfolio, "SELECT COUNT(*) FROM tbl_twr"), 3);
        assert_eq!(
            count(&pools, EntityKind::ModelPortfolio, "SELECT COUNT(*) FROM tbl_twr WHERE ModelPortfolio_ID IS NOT NULL"),
            3
        );
        assert_eq!(
            report.group("tbl_twr", EntityKind::ModelPortfolio).unwrap().database,
            "portfolio_results"
        );
    }

    #[tokio::test]
    async fn test_generated_grid_routes_every_known_record_once() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &["tbl_returns", "tbl_risk"]);
        // Only five of the nineteen codes have a destination.
        let mapping = TableMapping::from_pairs([
            ("twr", "tbl_returns"),
            ("MWR", "tbl_returns"),
            ("mdd", "tbl_risk"),
            ("psd", "tbl_risk"),
            ("dsd", "tbl_risk"),
        ]);

        let grid = ReportingGrid {
            fund_group_ids: vec![1, 2, 3],
            model_portfolio_ids: vec![1, 2],
            dates: month_end_dates(2024)[..3].to_vec(),
            periodicities: Periodicity::ALL.to_vec(),
            horizons: vec![Horizon::Mtd, Horizon::Ytd, Horizon::OneYear],
        };
        let records = build_records(&grid, &mut RandomIndicatorSource::seeded(2024)).unwrap();
        let points_per_fg = 3 * 3 * 2 * 3;
        let points_per_mp = 2 * 3 * 2 * 3;

        let report = run_ingestion(
            records,
            &mapping,
            &pools,
            BatchPlanner::new(4_000, 200),
            ShutdownSignal::new(),
        )
        .await;

        assert!(report.is_complete());
        assert_eq!(report.skipped_codes.len(), 14);
        assert_eq!(report.skipped_records, 14 * (points_per_fg + points_per_mp));
        assert_eq!(report.total_committed(), 5 * (points_per_fg + points_per_mp));

        let fg_returns = count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_returns");
        let fg_risk = count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_risk");
        let mp_risk = count(&pools, EntityKind::ModelPortfolio, "SELECT COUNT(*) FROM tbl_risk");
        assert_eq!(fg_returns, 2 * points_per_fg as i64);
        assert_eq!(fg_risk, 3 * points_per_fg as i64);
        assert_eq!(mp_risk, 3 * points_per_mp as i64);

        // One row per (entity, date, periodicity, horizon) for each code; values are
        // continuous draws, so distinct values identify distinct records.
        let distinct = count(
            &pools,
            EntityKind::FundGroup,
            "SELECT COUNT(*) FROM (SELECT DISTINCT FundGroupName_ID, Date, Input_PeriodicityID, \
             CalculationHorizonID, IndicatorRatioValue FROM tbl_risk)",
        );
        assert_eq!(distinct, fg_risk);
    }

    #[tokio::test]
    async fn test_stop_requested_before_run_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &["tbl_twr"]);
        let mapping = TableMapping::from_pairs([("twr", "tbl_twr")]);
        let shutdown = ShutdownSignal::new();
        shutdown.request();

        let report = run_ingestion(
            make_records(EntityKind::FundGroup, "twr", &[Some(1.0); 12]),
            &mapping,
            &pools,
            BatchPlanner::new(1000, 200),
            shutdown,
        )
        .await;

        let group = report.group("tbl_twr", EntityKind::FundGroup).unwrap();
        assert_eq!(group.rows_attempted, 0);
        assert_eq!(group.rows_cancelled, 12);
        assert_eq!(group.batches_cancelled, 3);
        assert!(!report.is_complete());
        assert_eq!(count(&pools, EntityKind::FundGroup, "SELECT COUNT(*) FROM tbl_twr"), 0);
    }

    #[tokio::test]
    async fn test_missing_destination_table_fails_only_that_group() {
        let dir = TempDir::new().unwrap();
        let pools = create_test_pools(&dir, &["tbl_twr"]);
        let mapping = TableMapping::from_pairs([("twr", "tbl_twr"), ("sor", "tbl_not_created")]);

        let mut records = make_records(EntityKind::FundGroup, "twr", &[Some(0.5); 6]);
        records.extend(make_records(EntityKind::FundGroup, "sor", &[Some(1.5); 6]));

        let report = run_ingestion(
            records,
            &mapping,
            &pools,
            BatchPlanner::new(1000, 200),
            ShutdownSignal::new(),
        )
        .await;

        let ok = report.group("tbl_twr", EntityKind::FundGroup).unwrap();
        let failed = report.group("tbl_not_created", EntityKind::FundGroup).unwrap();
        assert_eq!(ok.rows_committed, 6);
        assert_eq!(failed.rows_committed, 0);
        assert_eq!(failed.batches_failed, 2);
        assert_eq!(report.total_attempted(), 12);
        assert_eq!(report.total_committed(), 6);
    }
}
