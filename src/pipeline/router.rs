//! Row router: indicator records → per-(table, kind) insertion rows
//!
//! Unknown indicator codes are dropped without error. The drop is counted per
//! code in [`RoutedRows::skipped`] so the caller can report it.

use super::mapping::TableMapping;
use super::types::{EntityKind, FieldValue, IndicatorRecord, InsertionRow, RouteKey};
use std::collections::BTreeMap;

/// Router output
#[derive(Debug, Default)]
pub struct RoutedRows {
    /// Rows per destination, each list in input order
    pub groups: BTreeMap<RouteKey, Vec<InsertionRow>>,
    /// Dropped record count per unknown indicator code
    pub skipped: BTreeMap<String, usize>,
}

impl RoutedRows {
    pub fn total_rows(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.values().sum()
    }

    pub fn rows_for(&self, table: &str, kind: EntityKind) -> Option<&[InsertionRow]> {
        self.groups
            .get(&RouteKey::new(table, kind))
            .map(Vec::as_slice)
    }
}

/// Route `records` into destination groups using `mapping`.
pub fn route<I>(records: I, mapping: &TableMapping) -> RoutedRows
where
    I: IntoIterator<Item = IndicatorRecord>,
{
    let mut routed = RoutedRows::default();

    for record in records {
        let Some(table) = mapping.table_for(&record.indicator_code) else {
            *routed
                .skipped
                .entry(record.indicator_code.to_lowercase())
                .or_insert(0) += 1;
            continue;
        };

        let key = RouteKey::new(table, record.entity_kind);
        routed.groups.entry(key).or_default().push(to_row(record));
    }

    routed
}

fn to_row(record: IndicatorRecord) -> InsertionRow {
    let value = FieldValue::from(record.value).normalize();
    InsertionRow::new(
        Some(record.entity_id.to_string()),
        record.horizon,
        record.periodicity,
        record.date,
        value,
    )
}
