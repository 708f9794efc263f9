// Core algorithm exports
pub mod coefficients;
pub mod distance;
pub mod engine;
pub mod filters;
pub mod panel;
pub mod pool;
pub mod regions;
pub mod size;

pub use coefficients::{CoefficientError, CoefficientLibrary, CoefficientTables, TablesError};
pub use distance::{haversine, haversine_many, is_close};
pub use engine::{assign_subjects, EngineError, MatchingEngine, SearchParams};
pub use panel::{Candidate, Panel, PanelError};
pub use pool::PoolFilter;
pub use regions::{subject_name, GeoError, RegionAtlas};
pub use size::{normalize_size, parse_size, sizes_similar};
