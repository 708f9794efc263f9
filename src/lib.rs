//! OOH Panel - benchmark pricing service for outdoor advertising placements
//!
//! This library finds comparable historical placements ("panels") for each
//! row of an address program and derives a benchmark base price and market
//! composition statistics from them.

pub mod config;
pub mod core;
pub mod models;
pub mod routes;
pub mod services;

// Re-export commonly used types
pub use crate::core::{
    distance::{haversine, haversine_many},
    CoefficientLibrary, CoefficientTables, EngineError, MatchingEngine, Panel, PoolFilter, RegionAtlas, SearchParams,
};
pub use crate::models::{AnalysisOptions, AnalysisResult, AnalyzeRequest, AnalyzeResponse, LineItem, Placement, ReferenceConstruction};
