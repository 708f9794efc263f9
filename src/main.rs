use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use ooh_panel::config::Settings;
use ooh_panel::core::CoefficientLibrary;
use ooh_panel::routes::{self, AppState};
use ooh_panel::services::{load_region_atlas, load_tables};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST)).json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.json().init();
    }
}

fn startup_error(context: &str, e: impl std::fmt::Display) -> std::io::Error {
    error!("{}: {}", context, e);
    std::io::Error::new(std::io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    // LOG_LEVEL / LOG_FORMAT win over the config file
    let settings = Settings::load();
    let (log_level, log_format) = match &settings {
        Ok(s) => (s.logging.level.clone(), s.logging.format.clone()),
        Err(_) => ("info".to_string(), "json".to_string()),
    };
    let log_level = std::env::var("LOG_LEVEL").unwrap_or(log_level);
    let log_format = std::env::var("LOG_FORMAT").unwrap_or(log_format);
    init_logging(&log_level, &log_format);

    info!("Starting OOH panel service...");

    let settings = settings.map_err(|e| startup_error("Failed to load configuration", e))?;
    info!("Configuration loaded successfully");

    let tables = load_tables(&settings.tables).map_err(|e| startup_error("Failed to load coefficient tables", e))?;
    let library = CoefficientLibrary::with_capacity(Arc::new(tables), settings.matching.cache_capacity);

    // Region lookup is optional; without it line items must carry subject codes
    let atlas = match &settings.regions.geodata_dir {
        Some(dir) => Some(Arc::new(
            load_region_atlas(dir).map_err(|e| startup_error("Failed to load region outlines", e))?,
        )),
        None => {
            info!("No geodata directory configured, subject lookup disabled");
            None
        }
    };

    info!(
        "Engine configured: pricing={:?}, aggregation={}, search={:?}",
        settings.matching.pricing_method, settings.matching.aggregation_method, settings.matching.search
    );

    let app_state = AppState {
        library,
        atlas,
        matching: settings.matching.clone(),
        regions: settings.regions.clone(),
    };

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Reference pools can be large
            .app_data(
                web::JsonConfig::default()
                    .limit(64 * 1024 * 1024)
                    .error_handler(handle_json_payload_error),
            )
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
