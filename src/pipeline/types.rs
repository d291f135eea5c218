//! Core data types for indicator ingestion
//!
//! `IndicatorRecord` is what the grid builder produces, `InsertionRow` is what
//! the writer binds into an INSERT statement.

use chrono::NaiveDate;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use serde::Serialize;
use std::fmt;

/// Number of bound parameters per inserted row
pub const ROW_ARITY: usize = 7;

/// Literal marker some upstream sources use instead of a real NULL
pub const NULL_MARKER: &str = "NULL";

/// Reporting entity kind
///
/// Each kind lives in its own results database and uses its own id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    FundGroup,
    ModelPortfolio,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::FundGroup, EntityKind::ModelPortfolio];

    /// Id column populated for this kind in every results table
    pub fn id_column(&self) -> &'static str {
        match self {
            EntityKind::FundGroup => "FundGroupName_ID",
            EntityKind::ModelPortfolio => "ModelPortfolio_ID",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::FundGroup => "fund_groups",
            EntityKind::ModelPortfolio => "model_portfolios",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One indicator value for one (entity, date, periodicity, horizon) point
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorRecord {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub date: NaiveDate,
    pub periodicity: i32,
    pub horizon: i32,
    pub indicator_code: String,
    pub value: Option<f64>,
}

/// A single bound parameter value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
}

impl FieldValue {
    /// Collapse the null sentinels (`""`, `"NULL"`, NaN) into `Null`.
    pub fn normalize(self) -> FieldValue {
        match self {
            FieldValue::Text(ref s) if s.is_empty() || s == NULL_MARKER => FieldValue::Null,
            FieldValue::Real(v) if v.is_nan() => FieldValue::Null,
            other => other,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl From<Option<f64>> for FieldValue {
    fn from(value: Option<f64>) -> Self {
        match value {
            Some(v) => FieldValue::Real(v),
            None => FieldValue::Null,
        }
    }
}

impl ToSql for FieldValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            FieldValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Date(d) => {
                ToSqlOutput::Owned(Value::Text(d.format("%Y-%m-%d").to_string()))
            }
        })
    }
}

/// Row shape bound into the results tables
///
/// Column order:
/// `<id_column>, CalculationHorizonID, Input_PeriodicityID, Date,
///  IndicatorRatioValue, BenchmarkSymbol, BenchmarkSymbol_RF`
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionRow {
    fields: [FieldValue; ROW_ARITY],
}

impl InsertionRow {
    pub fn new(
        entity_id: Option<String>,
        horizon: i32,
        periodicity: i32,
        date: NaiveDate,
        value: FieldValue,
    ) -> Self {
        let entity = match entity_id {
            Some(id) => FieldValue::Text(id),
            None => FieldValue::Null,
        };

        Self {
            fields: [
                entity,
                FieldValue::Integer(horizon as i64),
                FieldValue::Integer(periodicity as i64),
                FieldValue::Date(date),
                value,
                FieldValue::Null,
                FieldValue::Null,
            ],
        }
    }

    /// Build a row from raw fields, e.g. values read back from another source.
    pub fn from_fields(fields: [FieldValue; ROW_ARITY]) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[FieldValue; ROW_ARITY] {
        &self.fields
    }

    pub fn entity_id(&self) -> &FieldValue {
        &self.fields[0]
    }

    pub fn value(&self) -> &FieldValue {
        &self.fields[4]
    }

    /// Normalize every field (see [`FieldValue::normalize`]).
    pub fn normalized(self) -> Self {
        Self {
            fields: self.fields.map(FieldValue::normalize),
        }
    }
}

/// Destination of a routed row group
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RouteKey {
    pub table: String,
    pub entity_kind: EntityKind,
}

impl RouteKey {
    pub fn new(table: impl Into<String>, entity_kind: EntityKind) -> Self {
        Self {
            table: table.into(),
            entity_kind,
        }
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.entity_kind)
    }
}
