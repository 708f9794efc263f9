use actix_web::{web, HttpResponse, Responder};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;
use validator::Validate;

use crate::config::{MatchingSettings, RegionsSettings};
use crate::core::{assign_subjects, pool, CoefficientLibrary, EngineError, MatchingEngine, RegionAtlas};
use crate::models::{AnalysisOptions, AnalysisResult, AnalyzeRequest, AnalyzeResponse, ErrorResponse, HealthResponse};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub library: CoefficientLibrary,
    pub atlas: Option<Arc<RegionAtlas>>,
    pub matching: MatchingSettings,
    pub regions: RegionsSettings,
}

/// Configure all analysis routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/panel/analyze", web::post().to(analyze));
}

/// Health check endpoint
async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
    })
}

fn error_response(status: actix_web::http::StatusCode, error: &str, message: String) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message,
        status_code: status.as_u16(),
    })
}

/// Resolve run options, prepare the pool and run the engine
///
/// Blocking: call from a worker thread, not from the async executor.
pub fn run_analysis(state: &AppState, request: AnalyzeRequest) -> Result<Vec<AnalysisResult>, EngineError> {
    let defaults = state.matching.analysis_options();
    let options = AnalysisOptions {
        pricing_method: request.pricing_method.unwrap_or(defaults.pricing_method),
        aggregation_method: request.aggregation_method.unwrap_or(defaults.aggregation_method),
        inflation_target_year: request.inflation_target_year.or(defaults.inflation_target_year),
    };

    let mut items = request.line_items;
    if let Some(atlas) = &state.atlas {
        let assigned = assign_subjects(&mut items, atlas, state.regions.locate_tolerance_m, state.regions.strict)?;
        tracing::debug!("Assigned subject codes to {} line items", assigned);
    }

    let filter = request.pool_filter.unwrap_or_default();
    let references = pool::prepare(request.references, &filter, &state.library, options.inflation_target_year)?;

    let engine = MatchingEngine::new(state.library.clone(), options)
        .with_params(state.matching.search.clone())
        .with_parallel_threshold(state.matching.parallel_threshold);

    Ok(engine.run(&items, &references))
}

/// Panel analysis endpoint
///
/// POST /api/v1/panel/analyze
///
/// Request body:
/// ```json
/// {
///   "lineItems": [{ "advertiser": "string", "format": "BB", "latitude": 55.75, ... }],
///   "references": [{ ... }],
///   "pricingMethod": "default",
///   "aggregationMethod": "mean",
///   "inflationTargetYear": 2025,
///   "poolFilter": { "subjectCodes": ["RU-MOW"] }
/// }
/// ```
async fn analyze(state: web::Data<AppState>, req: web::Json<AnalyzeRequest>) -> impl Responder {
    use actix_web::http::StatusCode;

    if let Err(errors) = req.validate() {
        tracing::info!("Validation failed for analyze request: field_errors={:?}", errors);
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let max_items = state.matching.max_line_items;
    if req.line_items.len() > max_items {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Validation failed",
            format!("lineItems: at most {} rows per run, got {}", max_items, req.line_items.len()),
        );
    }

    let run_id = Uuid::new_v4().to_string();
    let request = req.into_inner();
    let state = state.into_inner();
    let started = Instant::now();

    tracing::info!(
        "Run {}: {} line items, {} references",
        run_id,
        request.line_items.len(),
        request.references.len()
    );

    let outcome = tokio::task::spawn_blocking(move || run_analysis(&state, request)).await;

    match outcome {
        Ok(Ok(rows)) => {
            let matched_rows = rows.iter().filter(|row| row.is_matched()).count();
            let elapsed_ms = started.elapsed().as_millis();
            tracing::info!("Run {} finished in {} ms: {}/{} matched", run_id, elapsed_ms, matched_rows, rows.len());

            HttpResponse::Ok().json(AnalyzeResponse {
                run_id,
                columns: AnalysisResult::OUTPUT_COLUMNS.iter().map(|c| c.to_string()).collect(),
                total_rows: rows.len(),
                matched_rows,
                rows,
                elapsed_ms,
            })
        }
        Ok(Err(e @ EngineError::InvalidPoolFilter { .. })) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid pool filter", e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!("Run {} failed: {}", run_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed", e.to_string())
        }
        Err(e) => {
            tracing::error!("Run {} worker failed: {}", run_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Analysis failed", e.to_string())
        }
    }
}
