//! Reporting grid: entities × dates × periodicities × horizons
//!
//! Each grid point gets one value per indicator code, giving one
//! `IndicatorRecord` per (point, code).

use super::indicators::IndicatorSource;
use super::types::{EntityKind, IndicatorRecord};
use chrono::{Datelike, NaiveDate};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("indicator series {code} has {actual} values, grid has {expected} points")]
    SeriesLength {
        code: String,
        expected: usize,
        actual: usize,
    },
}

/// Reporting frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Periodicity {
    Monthly,
    Quarterly,
}

impl Periodicity {
    pub const ALL: [Periodicity; 2] = [Periodicity::Monthly, Periodicity::Quarterly];

    pub fn code(&self) -> i32 {
        match self {
            Periodicity::Monthly => 2,
            Periodicity::Quarterly => 3,
        }
    }
}

/// Lookback window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Horizon {
    Mtd,
    Qtd,
    Satd,
    Ytd,
    OneMonth,
    ThreeMonths,
    SixMonths,
    NineMonths,
    OneYear,
    TwoYears,
    ThreeYears,
    FiveYears,
    SevenYears,
    TenYears,
}

impl Horizon {
    pub const ALL: [Horizon; 14] = [
        Horizon::Mtd,
        Horizon::Qtd,
        Horizon::Satd,
        Horizon::Ytd,
        Horizon::OneMonth,
        Horizon::ThreeMonths,
        Horizon::SixMonths,
        Horizon::NineMonths,
        Horizon::OneYear,
        Horizon::TwoYears,
        Horizon::ThreeYears,
        Horizon::FiveYears,
        Horizon::SevenYears,
        Horizon::TenYears,
    ];

    /// `CalculationHorizonID` value
    pub fn code(&self) -> i32 {
        match self {
            Horizon::Mtd => 1,
            Horizon::Qtd => 2,
            Horizon::Satd => 3,
            Horizon::Ytd => 4,
            Horizon::OneMonth => 5,
            Horizon::ThreeMonths => 6,
            Horizon::SixMonths => 7,
            Horizon::NineMonths => 8,
            Horizon::OneYear => 9,
            Horizon::TwoYears => 10,
            Horizon::ThreeYears => 11,
            Horizon::FiveYears => 12,
            Horizon::SevenYears => 13,
            Horizon::TenYears => 14,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Horizon::Mtd => "mtd_horizon",
            Horizon::Qtd => "qtd_horizon",
            Horizon::Satd => "satd_horizon",
            Horizon::Ytd => "ytd_horizon",
            Horizon::OneMonth => "one_month_horizon",
            Horizon::ThreeMonths => "three_months_horizon",
            Horizon::SixMonths => "six_months_horizon",
            Horizon::NineMonths => "nine_months_horizon",
            Horizon::OneYear => "one_year_horizon",
            Horizon::TwoYears => "two_years_horizon",
            Horizon::ThreeYears => "three_years_horizon",
            Horizon::FiveYears => "five_years_horizon",
            Horizon::SevenYears => "seven_years_horizon",
            Horizon::TenYears => "ten_years_horizon",
        }
    }

    pub fn from_name(name: &str) -> Option<Horizon> {
        Horizon::ALL.into_iter().find(|h| h.name() == name)
    }
}

/// Last calendar day of every month in `year`
pub fn month_end_dates(year: i32) -> Vec<NaiveDate> {
    (1..=12)
        .filter_map(|month| {
            let first_of_next = if month == 12 {
                NaiveDate::from_ymd_opt(year + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(year, month + 1, 1)
            };
            first_of_next.and_then(|d| d.pred_opt())
        })
        .collect()
}

/// Which entities and dates to compute
#[derive(Debug, Clone, PartialEq)]
pub struct ReportingGrid {
    pub fund_group_ids: Vec<i64>,
    pub model_portfolio_ids: Vec<i64>,
    pub dates: Vec<NaiveDate>,
    pub periodicities: Vec<Periodicity>,
    pub horizons: Vec<Horizon>,
}

impl Default for ReportingGrid {
    fn default() -> Self {
        Self {
            fund_group_ids: (1..=10).collect(),
            model_portfolio_ids: (1..=7).collect(),
            dates: month_end_dates(2024),
            periodicities: Periodicity::ALL.to_vec(),
            horizons: Horizon::ALL.to_vec(),
        }
    }
}

/// One (entity, date, periodicity, horizon) combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPoint {
    pub entity_kind: EntityKind,
    pub entity_id: i64,
    pub date: NaiveDate,
    pub periodicity: Periodicity,
    pub horizon: Horizon,
}

impl ReportingGrid {
    /// Grid points: fund groups first, then model portfolios; each entity
    /// nests date → periodicity → horizon.
    pub fn points(&self) -> Vec<GridPoint> {
        let entities = self
            .fund_group_ids
            .iter()
            .map(|id| (EntityKind::FundGroup, *id))
            .chain(
                self.model_portfolio_ids
                    .iter()
                    .map(|id| (EntityKind::ModelPortfolio, *id)),
            );

        let mut points = Vec::with_capacity(self.point_count());
        for (entity_kind, entity_id) in entities {
            for &date in &self.dates {
                for &periodicity in &self.periodicities {
                    for &horizon in &self.horizons {
                        points.push(GridPoint {
                            entity_kind,
                            entity_id,
                            date,
                            periodicity,
                            horizon,
                        });
                    }
                }
            }
        }
        points
    }

    pub fn point_count(&self) -> usize {
        (self.fund_group_ids.len() + self.model_portfolio_ids.len())
            * self.dates.len()
            * self.periodicities.len()
            * self.horizons.len()
    }

    /// Latest year covered by the grid's dates
    pub fn year(&self) -> Option<i32> {
        self.dates.iter().map(|d| d.year()).max()
    }
}

/// Expand `grid` into indicator records using values pulled from `source`.
///
/// Every code the source lists must come back with exactly one value per
/// grid point; a missing or short series is an error, never a NULL value.
pub fn build_records<S>(grid: &ReportingGrid, source: &mut S) -> Result<Vec<IndicatorRecord>, GridError>
where
    S: IndicatorSource + ?Sized,
{
    let points = grid.points();
    let values = source.generate(points.len());
    let codes = source.codes();

    let mut series = Vec::with_capacity(codes.len());
    for code in &codes {
        let found = values.get(code).map(Vec::as_slice).unwrap_or_default();
        if found.len() != points.len() {
            log::error!(
                "❌ Indicator series {} has {} values, expected {}",
                code,
                found.len(),
                points.len()
            );
            return Err(GridError::SeriesLength {
                code: code.clone(),
                expected: points.len(),
                actual: found.len(),
            });
        }
        series.push((code, found));
    }

    let mut records = Vec::with_capacity(points.len() * codes.len());
    for (i, point) in points.iter().enumerate() {
        for (code, found) in &series {
            records.push(IndicatorRecord {
                entity_kind: point.entity_kind,
                entity_id: point.entity_id,
                date: point.date,
                periodicity: point.periodicity.code(),
                horizon: point.horizon.code(),
                indicator_code: (*code).clone(),
                value: Some(found[i]),
            });
        }
    }

    log::info!(
        "🧮 Built {} indicator records ({} grid points × {} codes)",
        records.len(),
        points.len(),
        codes.len()
    );

    Ok(records)
}
