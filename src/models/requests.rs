use serde::{Deserialize, Serialize};
use validator::Validate;
use crate::core::pool::PoolFilter;
use crate::models::domain::{LineItem, PricingMethod, AggregationMethod, ReferenceConstruction};

/// Request to price an address program against a reference pool
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(max = 20000))]
    #[serde(alias = "line_items", rename = "lineItems")]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub references: Vec<ReferenceConstruction>,
    #[serde(alias = "pricing_method", rename = "pricingMethod")]
    pub pricing_method: Option<PricingMethod>,
    #[serde(alias = "aggregation_method", rename = "aggregationMethod")]
    pub aggregation_method: Option<AggregationMethod>,
    #[validate(range(min = 2000, max = 2100))]
    #[serde(alias = "inflation_target_year", rename = "inflationTargetYear")]
    pub inflation_target_year: Option<i32>,
    #[serde(alias = "pool_filter", rename = "poolFilter", default)]
    pub pool_filter: Option<PoolFilter>,
}
