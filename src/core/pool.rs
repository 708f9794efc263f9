//! Reference pool preparation.
//!
//! Turns raw historical placements into the priced pool the matching engine
//! searches: restriction by advertiser/date/subject, base price derivation,
//! inflation correction to a target year and per-group IQR outlier removal.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::core::coefficients::CoefficientLibrary;
use crate::core::engine::EngineError;
use crate::models::ReferenceConstruction;

/// Multiplier applied to the interquartile range for the outlier fences
const IQR_FENCE: f64 = 1.5;

fn default_remove_outliers() -> bool {
    true
}

/// Criteria narrowing the reference pool before a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolFilter {
    /// Advertisers whose placements form the panel universe
    #[serde(default)]
    pub advertisers: Option<Vec<String>>,
    #[serde(rename = "startDate", default)]
    pub start_date: Option<NaiveDate>,
    #[serde(rename = "endDate", default)]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "subjectCodes", default)]
    pub subject_codes: Option<Vec<String>>,
    #[serde(rename = "removeOutliers", default = "default_remove_outliers")]
    pub remove_outliers: bool,
    /// Abort preparation on an inflation lookup failure instead of dropping the row's price
    #[serde(rename = "strictInflation", default)]
    pub strict_inflation: bool,
}

impl Default for PoolFilter {
    fn default() -> Self {
        Self {
            advertisers: None,
            start_date: None,
            end_date: None,
            subject_codes: None,
            remove_outliers: default_remove_outliers(),
            strict_inflation: false,
        }
    }
}

impl PoolFilter {
    pub fn validate(&self) -> Result<(), EngineError> {
        match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start > end => Err(EngineError::InvalidPoolFilter { start, end }),
            _ => Ok(()),
        }
    }
}

fn non_empty(list: &Option<Vec<String>>) -> Option<&[String]> {
    list.as_deref().filter(|values| !values.is_empty())
}

/// Keep rows matching every criterion that is set
pub fn restrict(pool: Vec<ReferenceConstruction>, filter: &PoolFilter) -> Vec<ReferenceConstruction> {
    let advertisers = non_empty(&filter.advertisers);
    let subjects = non_empty(&filter.subject_codes);

    pool.into_iter()
        .filter(|row| advertisers.map_or(true, |list| list.contains(&row.advertiser)))
        .filter(|row| filter.start_date.map_or(true, |start| row.date_from >= start))
        .filter(|row| filter.end_date.map_or(true, |end| row.date_to <= end))
        .filter(|row| {
            subjects.map_or(true, |list| {
                row.subject_code.as_ref().map_or(false, |code| list.contains(code))
            })
        })
        .collect()
}

/// Fill missing base prices from the raw placement price
pub fn derive_base_prices(pool: &mut [ReferenceConstruction], library: &CoefficientLibrary) {
    let mut derived = 0usize;
    for row in pool.iter_mut().filter(|row| row.base_price.is_none()) {
        row.base_price = library.base_price(row);
        if row.base_price.is_some() {
            derived += 1;
        }
    }
    debug!("Derived {} base prices", derived);
}

/// Bring base prices to `target_year` money
///
/// A failed lookup clears that row's base price, or aborts when `strict`.
pub fn correct_for_inflation(
    pool: &mut [ReferenceConstruction],
    library: &CoefficientLibrary,
    target_year: i32,
    strict: bool,
) -> Result<(), EngineError> {
    for row in pool.iter_mut() {
        let Some(price) = row.base_price else { continue };
        let subject = row.subject_code.as_deref().unwrap_or_default();

        match library.inflation_coefficient(subject, &row.format, row.date_from.year(), target_year) {
            Ok(rate) => row.base_price = Some(price * rate),
            Err(e) if strict => return Err(e.into()),
            Err(e) => {
                warn!("Inflation correction failed for {} ({}): {}", row.advertiser, subject, e);
                row.base_price = None;
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupKey<'a> {
    advertiser: &'a str,
    operator: &'a str,
    format: &'a str,
    is_digital: bool,
    subject_code: &'a str,
}

impl<'a> GroupKey<'a> {
    /// Rows with a null grouping column never join a group
    fn of(row: &'a ReferenceConstruction) -> Option<Self> {
        Some(Self {
            advertiser: &row.advertiser,
            operator: row.operator.as_deref()?,
            format: &row.format,
            is_digital: row.is_digital(),
            subject_code: row.subject_code.as_deref()?,
        })
    }
}

/// Quantile picking the nearest rank of a sorted slice
fn nearest_quantile(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let index = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted.get(index.min(sorted.len() - 1)).copied()
}

/// Inclusive Tukey fences `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]`
fn fences(mut prices: Vec<f64>) -> Option<(f64, f64)> {
    prices.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let q1 = nearest_quantile(&prices, 0.25)?;
    let q3 = nearest_quantile(&prices, 0.75)?;
    let iqr = q3 - q1;
    Some((q1 - IQR_FENCE * iqr, q3 + IQR_FENCE * iqr))
}

/// Drop rows whose base price lies outside their group's IQR fences
///
/// Groups are (advertiser, operator, format, digital flag, subject). Fences
/// come from the group's positive prices; rows in groups without fences
/// are kept.
pub fn remove_outliers(pool: Vec<ReferenceConstruction>) -> Vec<ReferenceConstruction> {
    let mut groups: HashMap<GroupKey, Vec<f64>> = HashMap::new();
    for row in &pool {
        if let (Some(key), Some(price)) = (GroupKey::of(row), row.base_price) {
            if price > 0.0 {
                groups.entry(key).or_default().push(price);
            }
        }
    }

    let bounds: HashMap<GroupKey, (f64, f64)> = groups
        .into_iter()
        .filter_map(|(key, prices)| fences(prices).map(|f| (key, f)))
        .collect();

    let keep: Vec<bool> = pool
        .iter()
        .map(|row| match GroupKey::of(row).and_then(|key| bounds.get(&key)) {
            None => true,
            Some((lower, upper)) => row.base_price.map_or(false, |p| p >= *lower && p <= *upper),
        })
        .collect();

    let before = pool.len();
    let cleaned: Vec<ReferenceConstruction> = pool
        .into_iter()
        .zip(keep)
        .filter_map(|(row, keep)| keep.then_some(row))
        .collect();
    debug!("Outlier removal dropped {} of {} rows", before - cleaned.len(), before);
    cleaned
}

/// Full preparation: restrict, derive, inflation (when a target year is
/// given), outliers (when enabled)
pub fn prepare(
    pool: Vec<ReferenceConstruction>,
    filter: &PoolFilter,
    library: &CoefficientLibrary,
    target_year: Option<i32>,
) -> Result<Vec<ReferenceConstruction>, EngineError> {
    filter.validate()?;

    let total = pool.len();
    let mut pool = restrict(pool, filter);
    derive_base_prices(&mut pool, library);

    if let Some(year) = target_year {
        correct_for_inflation(&mut pool, library, year, filter.strict_inflation)?;
    }
    if filter.remove_outliers {
        pool = remove_outliers(pool);
    }

    info!("Prepared reference pool: {} of {} rows", pool.len(), total);
    Ok(pool)
}
