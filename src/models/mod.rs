// Model exports
pub mod domain;
pub mod requests;
pub mod responses;

pub use domain::{Placement, LineItem, ReferenceConstruction, PricingMethod, AggregationMethod, PanelAttribute, AnalysisOptions, AnalysisResult, MF_FORMAT};
pub use requests::AnalyzeRequest;
pub use responses::{AnalyzeResponse, HealthResponse, ErrorResponse};
