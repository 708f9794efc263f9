use serde::{Deserialize, Serialize};
use crate::models::domain::AnalysisResult;

/// Response for the analyze endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    #[serde(rename = "runId")]
    pub run_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<AnalysisResult>,
    #[serde(rename = "matchedRows")]
    pub matched_rows: usize,
    #[serde(rename = "totalRows")]
    pub total_rows: usize,
    #[serde(rename = "elapsedMs")]
    pub elapsed_ms: u128,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}
