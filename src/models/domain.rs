use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Construction format that gets the dedicated single-pass search
pub const MF_FORMAT: &str = "MF";

/// One outdoor placement, either from the address program being priced or
/// from the historical reference database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub advertiser: String,
    #[serde(default)]
    pub operator: Option<String>,
    pub format: String,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "subjectCode", default)]
    pub subject_code: Option<String>,
    #[serde(rename = "dateFrom")]
    pub date_from: NaiveDate,
    #[serde(rename = "dateTo")]
    pub date_to: NaiveDate,
    #[serde(rename = "hoursPerDay", default)]
    pub hours_per_day: Option<f64>,
    #[serde(rename = "spotDuration", default)]
    pub spot_duration: Option<f64>,
    #[serde(rename = "spotsPerBlock", default)]
    pub spots_per_block: Option<f64>,
    #[serde(rename = "blockDuration", default)]
    pub block_duration: Option<f64>,
    #[serde(rename = "placementPrice", default)]
    pub placement_price: Option<f64>,
    #[serde(rename = "basePrice", default)]
    pub base_price: Option<f64>,
}

impl Placement {
    /// A construction is digital when it reports operating hours
    pub fn is_digital(&self) -> bool {
        matches!(self.hours_per_day, Some(hours) if hours != 0.0)
    }

    pub fn is_mf(&self) -> bool {
        self.format == MF_FORMAT
    }

    /// Month of the rental window start, used for the seasonal coefficient
    pub fn month(&self) -> u32 {
        self.date_from.month()
    }

    /// Digital loop parameters, present only when all three are known
    pub fn digital_params(&self) -> Option<(f64, f64, f64)> {
        match (self.spot_duration, self.spots_per_block, self.block_duration) {
            (Some(spot), Some(spots), Some(block)) => Some((spot, spots, block)),
            _ => None,
        }
    }
}

/// A row of the address program being priced
pub type LineItem = Placement;

/// A historical placement from the reference database
pub type ReferenceConstruction = Placement;

/// How the reference pool is segmented before the search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMethod {
    #[default]
    Default,
    OperatorPlus,
}

/// How a panel's base prices collapse into one benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMethod {
    #[default]
    Mean,
    WeightedMean,
    TrimmedMean,
    Median,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::WeightedMean => "weighted_mean",
            Self::TrimmedMean => "trimmed_mean",
            Self::Median => "median",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = crate::core::panel::PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mean" => Ok(Self::Mean),
            "weighted_mean" => Ok(Self::WeightedMean),
            "trimmed_mean" => Ok(Self::TrimmedMean),
            "median" => Ok(Self::Median),
            other => Err(crate::core::panel::PanelError::UnknownMethod(other.to_string())),
        }
    }
}

/// Attribute a panel can be broken down by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAttribute {
    Advertiser,
    Operator,
}

impl FromStr for PanelAttribute {
    type Err = crate::core::panel::PanelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "advertiser" => Ok(Self::Advertiser),
            "operator" => Ok(Self::Operator),
            other => Err(crate::core::panel::PanelError::UnknownAttribute(other.to_string())),
        }
    }
}

/// Per-run settings owned by the caller
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AnalysisOptions {
    #[serde(rename = "pricingMethod", default)]
    pub pricing_method: PricingMethod,
    #[serde(rename = "aggregationMethod", default)]
    pub aggregation_method: AggregationMethod,
    #[serde(rename = "inflationTargetYear", default)]
    pub inflation_target_year: Option<i32>,
}

/// A line item annotated with its panel statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub item: LineItem,
    pub panel_base_price: Option<f64>,
    pub advertisers: Option<String>,
    pub operators: Option<String>,
    pub constructions: Option<String>,
    pub advertiser_shares: Option<String>,
    pub operator_shares: Option<String>,
    pub subject_name: Option<String>,
}

impl AnalysisResult {
    /// Columns appended to the line item, in output order
    pub const OUTPUT_COLUMNS: [&'static str; 7] = [
        "panel_base_price",
        "advertisers",
        "operators",
        "constructions",
        "advertiser_shares",
        "operator_shares",
        "subject_name",
    ];

    /// Result row for a line item whose panel came back empty
    pub fn unmatched(item: LineItem) -> Self {
        Self {
            item,
            panel_base_price: None,
            advertisers: None,
            operators: None,
            constructions: None,
            advertiser_shares: None,
            operator_shares: None,
            subject_name: None,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.panel_base_price.is_some()
    }
}
