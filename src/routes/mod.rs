// Route exports
pub mod analysis;

use actix_web::web;

pub use analysis::{run_analysis, AppState};

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .configure(analysis::configure),
    );
}
