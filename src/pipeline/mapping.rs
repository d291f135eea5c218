//! Indicator code → destination table mapping
//!
//! Loaded once per run from the reference database and never mutated after.

use rusqlite::Connection;
use std::collections::HashMap;
use thiserror::Error;

/// Reference table listing every indicator code and its results table
pub const REFERENCE_TABLE: &str = "1d_1a_Results_IndicatorRatioType";

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to read {table}: {source}")]
    Query {
        table: &'static str,
        #[source]
        source: rusqlite::Error,
    },
}

/// Case-insensitive lookup from indicator code to table name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableMapping {
    tables: HashMap<String, String>,
}

impl TableMapping {
    /// Build a mapping from `(code, table)` pairs. Codes are lower-cased; a
    /// repeated code keeps the last table seen.
    pub fn from_pairs<I, C, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: AsRef<str>,
        T: Into<String>,
    {
        let mut tables = HashMap::new();
        for (code, table) in pairs {
            let code = code.as_ref().to_lowercase();
            let table = table.into();
            if let Some(previous) = tables.insert(code.clone(), table.clone()) {
                if previous != table {
                    log::warn!(
                        "⚠️  Indicator code '{}' mapped twice ({} / {}), keeping {}",
                        code,
                        previous,
                        table,
                        table
                    );
                }
            }
        }
        Self { tables }
    }

    /// Destination table for `code`, if the code is known
    pub fn table_for(&self, code: &str) -> Option<&str> {
        match self.tables.get(code) {
            Some(table) => Some(table.as_str()),
            None => self.tables.get(&code.to_lowercase()).map(String::as_str),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Distinct destination tables, sorted
    pub fn tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = self.tables.values().map(String::as_str).collect();
        tables.sort_unstable();
        tables.dedup();
        tables
    }
}

/// Read the mapping from the reference table
///
/// ```sql
/// SELECT IndicatorRatioCode, TableName FROM 1d_1a_Results_IndicatorRatioType
/// ```
pub fn load_table_mapping(conn: &Connection) -> Result<TableMapping, MappingError> {
    let query_err = |source| MappingError::Query {
        table: REFERENCE_TABLE,
        source,
    };

    let sql = format!(
        "SELECT IndicatorRatioCode, TableName FROM \"{}\"",
        REFERENCE_TABLE
    );
    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let pairs = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    let mapping = TableMapping::from_pairs(pairs);
    log::info!(
        "📋 Loaded {} indicator codes across {} tables",
        mapping.len(),
        mapping.tables().len()
    );

    Ok(mapping)
}
