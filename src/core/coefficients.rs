//! Pricing coefficients.
//!
//! Every coefficient is a pure function of its arguments. Table-driven
//! coefficients read from an immutable [`CoefficientTables`] injected into the
//! [`CoefficientLibrary`]; the library memoizes the date and digital
//! computations in a bounded per-instance cache.

use chrono::{Datelike, NaiveDate};
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::models::{Placement, MF_FORMAT};

/// Year-over-year rates keyed by year ("2023" -> 1.25 means +25% into 2024)
pub type YearRates = HashMap<String, f64>;

/// Inflation rates keyed by subject code, then format
pub type InflationTable = HashMap<String, HashMap<String, YearRates>>;

/// Radius (km) at or below which every candidate weighs 1.0
const FLAT_WEIGHT_RADIUS_KM: f64 = 0.1;

const SECONDS_PER_DAY: f64 = 86400.0;
/// 15 s spot, 288 exits per day (300 s block)
const MF_DAILY_VOLUME: f64 = 15.0 * 288.0;
/// 5 s spot, 1728 exits per day (50 s block)
const DEFAULT_DAILY_VOLUME: f64 = 5.0 * 1728.0;

const DEFAULT_CACHE_CAPACITY: u64 = 10_000;

/// Errors raised by strict coefficient lookups
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoefficientError {
    #[error("No seasonal coefficient for month {0}")]
    MissingSeason(u32),

    #[error("No side coefficient for side {0:?}")]
    MissingSide(Option<String>),

    #[error("Rates not found for subject '{subject}', format '{format}'")]
    MissingRates { subject: String, format: String },

    #[error("Rate for year {year} not found in {source_name}")]
    MissingYear { year: i32, source_name: String },

    #[error("Rate for year {0} is zero")]
    ZeroRate(i32),
}

/// Errors loading the coefficient tables file
#[derive(Debug, Error)]
pub enum TablesError {
    #[error("Failed to read coefficient tables: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse coefficient tables: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Lookup tables behind the table-driven coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoefficientTables {
    /// Seasonal coefficient keyed by month number ("1".."12")
    #[serde(default)]
    pub season: HashMap<String, f64>,
    /// Side coefficient keyed by side name
    #[serde(default)]
    pub side: HashMap<String, f64>,
    #[serde(default)]
    pub inflation: InflationTable,
    /// Used when a subject/format pair has no rates of its own
    #[serde(default = "default_inflation_rates")]
    pub default_inflation: YearRates,
    /// Dominant operators per subject code
    #[serde(default)]
    pub top_operators: HashMap<String, Vec<String>>,
}

fn default_inflation_rates() -> YearRates {
    HashMap::from([("2023".to_string(), 1.25), ("2024".to_string(), 1.25)])
}

impl Default for CoefficientTables {
    /// Empty tables carrying only the default inflation rates
    fn default() -> Self {
        Self {
            season: HashMap::new(),
            side: HashMap::new(),
            inflation: InflationTable::new(),
            default_inflation: default_inflation_rates(),
            top_operators: HashMap::new(),
        }
    }
}

impl CoefficientTables {
    pub fn from_toml_str(raw: &str) -> Result<Self, TablesError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TablesError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Top operators configured for a subject, empty when none are
    pub fn top_operators(&self, subject_code: &str) -> &[String] {
        self.top_operators
            .get(subject_code)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[inline]
fn round_4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

fn days_in_month(year: i32, month: u32) -> i64 {
    let first = NaiveDate::from_ymd_opt(year, month, 1);
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    match (first, next) {
        (Some(first), Some(next)) => (next - first).num_days(),
        _ => 30,
    }
}

/// Distance-decay weight of a candidate relative to the search radius
///
/// Always within `[0, 1]`: 1.0 for radii up to 0.1 km, otherwise
/// `exp(-decay_rate * distance / radius)`; non-finite results become 0.
#[inline]
pub fn distance_coefficient(distance: f64, radius: f64, decay_rate: f64) -> f64 {
    if (0.0..=FLAT_WEIGHT_RADIUS_KM).contains(&radius) {
        return 1.0;
    }
    let weight = (-decay_rate * (distance / radius)).exp();
    if !weight.is_finite() {
        return 0.0;
    }
    weight.clamp(0.0, 1.0)
}

/// Rental duration coefficient: inclusive days over days in the start month
pub fn rental_coefficient(date_from: NaiveDate, date_to: NaiveDate) -> f64 {
    let days = (date_to - date_from).num_days() + 1;
    let month_days = days_in_month(date_from.year(), date_from.month());
    round_4(days as f64 / month_days as f64)
}

/// Digital loop coefficient relative to the standard daily volume of the format
pub fn digital_coefficient(format: &str, spot_duration: f64, spots_per_block: f64, block_duration: f64) -> f64 {
    let denominator = if format == MF_FORMAT { MF_DAILY_VOLUME } else { DEFAULT_DAILY_VOLUME };
    round_4((spot_duration * ((SECONDS_PER_DAY / block_duration) * spots_per_block)) / denominator)
}

/// Cumulative inflation between two years
///
/// Multiplies the yearly rates over `[year_from, year_to)` going forward and
/// divides by the rates over `[year_to, year_from)` going back.
pub fn inflation_coefficient(
    table: &InflationTable,
    subject_code: &str,
    format: &str,
    year_from: i32,
    year_to: i32,
    default_table: Option<&YearRates>,
) -> Result<f64, CoefficientError> {
    let specific = table.get(subject_code).and_then(|formats| formats.get(format));

    let (rates, source_name) = match (specific, default_table) {
        (Some(rates), _) => (rates, format!("subject '{}', format '{}'", subject_code, format)),
        (None, Some(rates)) => (rates, "default rates".to_string()),
        (None, None) => {
            return Err(CoefficientError::MissingRates {
                subject: subject_code.to_string(),
                format: format.to_string(),
            })
        }
    };

    if year_from == year_to {
        return Ok(1.0);
    }

    let rate_for = |year: i32| -> Result<f64, CoefficientError> {
        rates
            .get(&year.to_string())
            .copied()
            .ok_or_else(|| CoefficientError::MissingYear { year, source_name: source_name.clone() })
    };

    let mut cumulative = 1.0;
    if year_from < year_to {
        for year in year_from..year_to {
            cumulative *= rate_for(year)?;
        }
    } else {
        for year in year_to..year_from {
            let rate = rate_for(year)?;
            if rate == 0.0 {
                return Err(CoefficientError::ZeroRate(year));
            }
            cumulative /= rate;
        }
    }

    Ok(round_4(cumulative))
}

/// Coefficient calculator bound to one set of lookup tables
#[derive(Clone)]
pub struct CoefficientLibrary {
    tables: Arc<CoefficientTables>,
    rental_cache: Cache<(NaiveDate, NaiveDate), f64>,
    digital_cache: Cache<(bool, u64, u64, u64), f64>,
    inflation_cache: Cache<(String, String, i32, i32), f64>,
}

impl std::fmt::Debug for CoefficientLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoefficientLibrary")
            .field("tables", &self.tables)
            .field("rental_cache_entries", &self.rental_cache.entry_count())
            .finish()
    }
}

impl CoefficientLibrary {
    pub fn new(tables: Arc<CoefficientTables>) -> Self {
        Self::with_capacity(tables, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(tables: Arc<CoefficientTables>, capacity: u64) -> Self {
        Self {
            tables,
            rental_cache: Cache::new(capacity),
            digital_cache: Cache::new(capacity),
            inflation_cache: Cache::new(capacity),
        }
    }

    pub fn tables(&self) -> &CoefficientTables {
        &self.tables
    }

    pub fn distance_coefficient(&self, distance: f64, radius: f64, decay_rate: f64) -> f64 {
        distance_coefficient(distance, radius, decay_rate)
    }

    pub fn rental_coefficient(&self, date_from: NaiveDate, date_to: NaiveDate) -> f64 {
        let key = (date_from, date_to);
        if let Some(hit) = self.rental_cache.get(&key) {
            tracing::trace!("Rental coefficient cache hit: {:?}", key);
            return hit;
        }
        let value = rental_coefficient(date_from, date_to);
        self.rental_cache.insert(key, value);
        value
    }

    pub fn digital_coefficient(&self, format: &str, spot_duration: f64, spots_per_block: f64, block_duration: f64) -> f64 {
        // Only the MF/non-MF split affects the result
        let key = (
            format == MF_FORMAT,
            spot_duration.to_bits(),
            spots_per_block.to_bits(),
            block_duration.to_bits(),
        );
        if let Some(hit) = self.digital_cache.get(&key) {
            return hit;
        }
        let value = digital_coefficient(format, spot_duration, spots_per_block, block_duration);
        self.digital_cache.insert(key, value);
        value
    }

    /// Seasonal coefficient for a month; a miss is 1.0 unless `strict`
    pub fn seasonal_coefficient(&self, month: u32, strict: bool) -> Result<f64, CoefficientError> {
        match self.tables.season.get(&month.to_string()) {
            Some(value) => Ok(round_4(*value)),
            None if strict => Err(CoefficientError::MissingSeason(month)),
            None => {
                tracing::warn!("No seasonal coefficient for month {}, using 1.0", month);
                Ok(1.0)
            }
        }
    }

    /// Side coefficient; a miss is 1.0 unless `strict`
    pub fn side_coefficient(&self, side: Option<&str>, strict: bool) -> Result<f64, CoefficientError> {
        match side.and_then(|s| self.tables.side.get(s)) {
            Some(value) => Ok(round_4(*value)),
            None if strict => Err(CoefficientError::MissingSide(side.map(str::to_string))),
            None => {
                match side {
                    Some(name) => tracing::warn!("No side coefficient for side {:?}, using 1.0", name),
                    None => tracing::debug!("Side not set, using side coefficient 1.0"),
                }
                Ok(1.0)
            }
        }
    }

    /// Inflation coefficient from the injected tables, falling back to default rates
    pub fn inflation_coefficient(
        &self,
        subject_code: &str,
        format: &str,
        year_from: i32,
        year_to: i32,
    ) -> Result<f64, CoefficientError> {
        let key = (subject_code.to_string(), format.to_string(), year_from, year_to);
        if let Some(hit) = self.inflation_cache.get(&key) {
            return Ok(hit);
        }
        let value = inflation_coefficient(
            &self.tables.inflation,
            subject_code,
            format,
            year_from,
            year_to,
            Some(&self.tables.default_inflation),
        )?;
        self.inflation_cache.insert(key, value);
        Ok(value)
    }

    /// Normalize a raw placement price to its full-month, full-format equivalent
    ///
    /// Returns `None` when the placement has no price or the coefficient
    /// product is not a usable divisor.
    pub fn base_price(&self, placement: &Placement) -> Option<f64> {
        let price = placement.placement_price?;

        let digital_c = match placement.digital_params() {
            Some((spot, spots, block)) => self.digital_coefficient(&placement.format, spot, spots, block),
            None => 1.0,
        };
        let rental_c = self.rental_coefficient(placement.date_from, placement.date_to);
        // Non-strict lookups never fail
        let side_c = self.side_coefficient(placement.side.as_deref(), false).unwrap_or(1.0);
        let season_c = self.seasonal_coefficient(placement.month(), false).unwrap_or(1.0);

        let divisor = digital_c * rental_c * side_c * season_c;
        if divisor > 0.0 && divisor.is_finite() {
            Some(price / divisor)
        } else {
            tracing::warn!(
                "Unusable coefficient product {} for {} at ({}, {})",
                divisor,
                placement.advertiser,
                placement.latitude,
                placement.longitude
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn tables() -> CoefficientTables {
        CoefficientTables::from_toml_str(
            r#"
            [season]
            "1" = 0.8
            "7" = 1.1

            [side]
            A = 1.0
            B = 0.85

            [inflation.RU-MOW.BB]
            "2022" = 1.1
            "2023" = 1.2
            "2024" = 1.15

            [top_operators]
            RU-MOW = ["Russ", "Gallery"]
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_distance_coefficient_flat_radius() {
        assert_eq!(distance_coefficient(5.0, 0.0, 1.0), 1.0);
        assert_eq!(distance_coefficient(5.0, 0.1, 1.0), 1.0);
    }

    #[test]
    fn test_distance_coefficient_decay() {
        let near = distance_coefficient(0.1, 2.0, 1.0);
        let far = distance_coefficient(1.9, 2.0, 1.0);
        assert!(near > far);
        assert!((distance_coefficient(2.0, 2.0, 1.0) - (-1.0f64).exp()).abs() < 1e-12);
        for d in [0.0, 0.5, 1.0, 10.0, 1e6] {
            let w = distance_coefficient(d, 0.5, 1.0);
            assert!((0.0..=1.0).contains(&w));
        }
        assert_eq!(distance_coefficient(f64::NAN, 1.0, 1.0), 0.0);
    }

    #[test]
    fn test_rental_coefficient() {
        assert_eq!(rental_coefficient(date(2023, 1, 1), date(2023, 1, 31)), 1.0);
        assert_eq!(rental_coefficient(date(2023, 2, 1), date(2023, 2, 28)), 1.0);
        assert_eq!(rental_coefficient(date(2023, 2, 1), date(2023, 2, 14)), 0.5);
        assert_eq!(rental_coefficient(date(2024, 4, 1), date(2024, 4, 15)), 0.5);
        assert_eq!(rental_coefficient(date(2024, 12, 1), date(2024, 12, 31)), 1.0);
    }

    #[test]
    fn test_digital_coefficient() {
        assert_eq!(digital_coefficient("MF", 15.0, 1.0, 300.0), 1.0);
        assert_eq!(digital_coefficient("MF", 15.0, 2.0, 300.0), 2.0);
        assert_eq!(digital_coefficient("DBB", 5.0, 1.0, 50.0), 1.0);
        assert_eq!(digital_coefficient("DBB", 5.0, 0.5, 50.0), 0.5);
    }

    #[test]
    fn test_seasonal_and_side_lookup() {
        let lib = CoefficientLibrary::new(Arc::new(tables()));
        assert_eq!(lib.seasonal_coefficient(1, false), Ok(0.8));
        assert_eq!(lib.seasonal_coefficient(3, false), Ok(1.0));
        assert_eq!(lib.seasonal_coefficient(3, true), Err(CoefficientError::MissingSeason(3)));

        assert_eq!(lib.side_coefficient(Some("B"), true), Ok(0.85));
        assert_eq!(lib.side_coefficient(Some("C"), false), Ok(1.0));
        assert_eq!(lib.side_coefficient(None, false), Ok(1.0));
        assert!(lib.side_coefficient(Some("C"), true).is_err());
    }

    #[test]
    fn test_inflation_forward_and_back() {
        let t = tables();
        let forward = inflation_coefficient(&t.inflation, "RU-MOW", "BB", 2022, 2024, None).unwrap();
        assert!((forward - 1.32).abs() < 1e-9);

        let back = inflation_coefficient(&t.inflation, "RU-MOW", "BB", 2024, 2022, None).unwrap();
        assert!((forward * back - 1.0).abs() < 1e-3);

        assert_eq!(inflation_coefficient(&t.inflation, "RU-MOW", "BB", 2023, 2023, None), Ok(1.0));
    }

    #[test]
    fn test_inflation_fallback_and_errors() {
        let t = tables();
        let fallback = inflation_coefficient(&t.inflation, "RU-KDA", "BB", 2023, 2025, Some(&t.default_inflation)).unwrap();
        assert!((fallback - 1.5625).abs() < 1e-9);

        assert!(matches!(
            inflation_coefficient(&t.inflation, "RU-KDA", "BB", 2023, 2024, None),
            Err(CoefficientError::MissingRates { .. })
        ));
        assert!(matches!(
            inflation_coefficient(&t.inflation, "RU-MOW", "BB", 2020, 2024, None),
            Err(CoefficientError::MissingYear { year: 2020, .. })
        ));

        let zero: YearRates = HashMap::from([("2023".to_string(), 0.0)]);
        assert_eq!(
            inflation_coefficient(&InflationTable::new(), "X", "Y", 2024, 2023, Some(&zero)),
            Err(CoefficientError::ZeroRate(2023))
        );
    }

    #[test]
    fn test_library_cache_is_consistent() {
        let lib = CoefficientLibrary::new(Arc::new(tables()));
        let first = lib.rental_coefficient(date(2024, 4, 1), date(2024, 4, 15));
        let second = lib.rental_coefficient(date(2024, 4, 1), date(2024, 4, 15));
        assert_eq!(first, second);

        let a = lib.inflation_coefficient("RU-MOW", "BB", 2022, 2024).unwrap();
        let b = lib.inflation_coefficient("RU-MOW", "BB", 2022, 2024).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_base_price_divides_by_coefficients() {
        let lib = CoefficientLibrary::new(Arc::new(tables()));
        let placement = Placement {
            advertiser: "Acme".to_string(),
            operator: None,
            format: "BB".to_string(),
            size: Some("3x6".to_string()),
            side: Some("B".to_string()),
            latitude: 55.75,
            longitude: 37.61,
            subject_code: Some("RU-MOW".to_string()),
            date_from: date(2024, 1, 1),
            date_to: date(2024, 1, 31),
            hours_per_day: None,
            spot_duration: None,
            spots_per_block: None,
            block_duration: None,
            placement_price: Some(68_000.0),
            base_price: None,
        };

        // 68000 / (1.0 * 1.0 * 0.85 * 0.8)
        let base = lib.base_price(&placement).unwrap();
        assert!((base - 100_000.0).abs() < 1e-6);

        let unpriced = Placement { placement_price: None, ..placement };
        assert_eq!(lib.base_price(&unpriced), None);
    }

    #[test]
    fn test_top_operators() {
        let t = tables();
        assert_eq!(t.top_operators("RU-MOW"), ["Russ".to_string(), "Gallery".to_string()]);
        assert!(t.top_operators("RU-SPB").is_empty());
    }
}
