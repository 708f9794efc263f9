// Service exports
pub mod reference_data;

pub use reference_data::{load_region_atlas, load_tables, ReferenceDataError};
