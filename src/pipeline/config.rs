//! Pipeline configuration from environment variables
//!
//! Every numeric setting falls back to its default when unset or unparseable.

use super::pool::DatabaseTarget;
use super::types::EntityKind;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MAX_PACKET_BYTES: usize = 16_777_216;
pub const DEFAULT_ESTIMATED_ROW_BYTES: usize = 200;
pub const DEFAULT_POOL_SIZE: usize = 5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for the ingestion runtime
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum payload per batch in bytes (`DB_ALLOWED_PACKET_SIZE`)
    pub max_packet_bytes: usize,

    /// Estimated serialized size of one row (`DB_ESTIMATED_ROW_SIZE`)
    pub estimated_row_bytes: usize,

    /// Connections per database (`DB_POOL_SIZE`)
    pub pool_size: usize,

    /// How long a batch waits for a pooled connection
    pub acquire_timeout_ms: u64,

    /// SQLite busy timeout per connection
    pub busy_timeout_ms: u64,

    /// Directory holding the database files
    pub data_dir: PathBuf,

    pub fund_group_database: String,
    pub model_portfolio_database: String,
    pub reference_database: String,

    /// Where to write the JSON run report, if anywhere
    pub report_path: Option<PathBuf>,

    /// Seed for the placeholder indicator generator
    pub indicator_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_packet_bytes: DEFAULT_MAX_PACKET_BYTES,
            estimated_row_bytes: DEFAULT_ESTIMATED_ROW_BYTES,
            pool_size: DEFAULT_POOL_SIZE,
            acquire_timeout_ms: 30_000,
            busy_timeout_ms: 5_000,
            data_dir: PathBuf::from("data"),
            fund_group_database: "raduale_strader_fund_data_results_fundgroup".to_string(),
            model_portfolio_database: "raduale_strader_fund_data_results_portfliomodel".to_string(),
            reference_database: "raduale_fundiq_ultimate".to_string(),
            report_path: None,
            indicator_seed: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `DB_ALLOWED_PACKET_SIZE` (default: 16777216)
    /// - `DB_ESTIMATED_ROW_SIZE` (default: 200)
    /// - `DB_POOL_SIZE` (default: 5)
    /// - `DB_POOL_ACQUIRE_TIMEOUT_MS` (default: 30000)
    /// - `DB_BUSY_TIMEOUT_MS` (default: 5000)
    /// - `DB_DATA_DIR` (default: data)
    /// - `FUND_GROUP_DATABASE`, `MODEL_PORTFOLIO_DATABASE`, `REFERENCE_DATABASE`
    /// - `INGEST_REPORT_PATH` (default: unset)
    /// - `INDICATOR_SEED` (default: unset)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parsed = |key: &str, default| parse_or(lookup(key), default);

        Self {
            max_packet_bytes: parsed("DB_ALLOWED_PACKET_SIZE", defaults.max_packet_bytes),
            estimated_row_bytes: parsed("DB_ESTIMATED_ROW_SIZE", defaults.estimated_row_bytes),
            pool_size: parsed("DB_POOL_SIZE", defaults.pool_size),
            acquire_timeout_ms: parse_or(lookup("DB_POOL_ACQUIRE_TIMEOUT_MS"), defaults.acquire_timeout_ms),
            busy_timeout_ms: parse_or(lookup("DB_BUSY_TIMEOUT_MS"), defaults.busy_timeout_ms),
            data_dir: lookup("DB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            fund_group_database: lookup("FUND_GROUP_DATABASE")
                .unwrap_or(defaults.fund_group_database),
            model_portfolio_database: lookup("MODEL_PORTFOLIO_DATABASE")
                .unwrap_or(defaults.model_portfolio_database),
            reference_database: lookup("REFERENCE_DATABASE")
                .unwrap_or(defaults.reference_database),
            report_path: lookup("INGEST_REPORT_PATH")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from),
            indicator_seed: lookup("INDICATOR_SEED").and_then(|s| s.trim().parse().ok()),
        }
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_packet_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_ALLOWED_PACKET_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.estimated_row_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_ESTIMATED_ROW_SIZE must be greater than zero".to_string(),
            ));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue(
                "DB_POOL_SIZE must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Results database for an entity kind
    pub fn results_target(&self, kind: EntityKind) -> DatabaseTarget {
        let name = match kind {
            EntityKind::FundGroup => &self.fund_group_database,
            EntityKind::ModelPortfolio => &self.model_portfolio_database,
        };
        self.target(name)
    }

    pub fn reference_target(&self) -> DatabaseTarget {
        self.target(&self.reference_database)
    }

    fn target(&self, name: &str) -> DatabaseTarget {
        DatabaseTarget::new(name, self.data_dir.join(format!("{}.db", name)))
            .with_busy_timeout(Duration::from_millis(self.busy_timeout_ms))
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        // Test: Default configuration when no env vars set
        let config = PipelineConfig::from_lookup(lookup_from(&[]));

        assert_eq!(config.max_packet_bytes, 16_777_216);
        assert_eq!(config.estimated_row_bytes, 200);
        assert_eq!(config.pool_size, 5);
        assert_eq!(config.acquire_timeout_ms, 30_000);
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.report_path, None);
        assert_eq!(config.indicator_seed, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_custom_config() {
        // Test: Custom configuration from env vars
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DB_ALLOWED_PACKET_SIZE", "1000"),
            ("DB_POOL_SIZE", "2"),
            ("DB_DATA_DIR", "/tmp/ingest"),
            ("FUND_GROUP_DATABASE", "fg"),
            ("INGEST_REPORT_PATH", "/tmp/report.json"),
            ("INDICATOR_SEED", "42"),
        ]));

        assert_eq!(config.max_packet_bytes, 1000);
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.report_path, Some(PathBuf::from("/tmp/report.json")));
        assert_eq!(config.indicator_seed, Some(42));

        let target = config.results_target(EntityKind::FundGroup);
        assert_eq!(target.name, "fg");
        assert_eq!(target.path, PathBuf::from("/tmp/ingest/fg.db"));
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("DB_ALLOWED_PACKET_SIZE", "lots"),
            ("DB_ESTIMATED_ROW_SIZE", "-1"),
        ]));

        assert_eq!(config.max_packet_bytes, DEFAULT_MAX_PACKET_BYTES);
        assert_eq!(config.estimated_row_bytes, DEFAULT_ESTIMATED_ROW_BYTES);
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = PipelineConfig::from_lookup(lookup_from(&[("DB_POOL_SIZE", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));

        let config = PipelineConfig::from_lookup(lookup_from(&[("DB_ESTIMATED_ROW_SIZE", "0")]));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_each_kind_has_its_own_database() {
        let config = PipelineConfig::default();
        let fg = config.results_target(EntityKind::FundGroup);
        let mp = config.results_target(EntityKind::ModelPortfolio);

        assert_ne!(fg.path, mp.path);
        assert_eq!(config.reference_target().name, "raduale_fundiq_ultimate");
    }
}
