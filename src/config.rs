use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;

use crate::core::engine::SearchParams;
use crate::core::regions::LOCATE_TOLERANCE_M;
use crate::models::{AggregationMethod, AnalysisOptions, PricingMethod};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    #[serde(default)]
    pub matching: MatchingSettings,
    #[serde(default)]
    pub tables: TablesSettings,
    #[serde(default)]
    pub regions: RegionsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingSettings {
    #[serde(default)]
    pub pricing_method: PricingMethod,
    #[serde(default)]
    pub aggregation_method: AggregationMethod,
    pub inflation_target_year: Option<i32>,
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    #[serde(default = "default_max_line_items")]
    pub max_line_items: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    #[serde(default)]
    pub search: SearchParams,
}

impl Default for MatchingSettings {
    fn default() -> Self {
        Self {
            pricing_method: PricingMethod::default(),
            aggregation_method: AggregationMethod::default(),
            inflation_target_year: None,
            parallel_threshold: default_parallel_threshold(),
            max_line_items: default_max_line_items(),
            cache_capacity: default_cache_capacity(),
            search: SearchParams::default(),
        }
    }
}

impl MatchingSettings {
    /// Run options used when a request does not override them
    pub fn analysis_options(&self) -> AnalysisOptions {
        AnalysisOptions {
            pricing_method: self.pricing_method,
            aggregation_method: self.aggregation_method,
            inflation_target_year: self.inflation_target_year,
        }
    }
}

fn default_parallel_threshold() -> usize { 64 }
fn default_max_line_items() -> usize { 20_000 }
fn default_cache_capacity() -> u64 { 10_000 }

#[derive(Debug, Clone, Deserialize)]
pub struct TablesSettings {
    #[serde(default = "default_tables_path")]
    pub path: String,
    /// Fail at startup when the file is missing instead of running with empty tables
    #[serde(default)]
    pub required: bool,
}

impl Default for TablesSettings {
    fn default() -> Self {
        Self {
            path: default_tables_path(),
            required: false,
        }
    }
}

fn default_tables_path() -> String { "config/coefficients.toml".to_string() }

#[derive(Debug, Clone, Deserialize)]
pub struct RegionsSettings {
    /// Directory of `<subject code>.geojson` files; no lookup when unset
    pub geodata_dir: Option<String>,
    #[serde(default = "default_locate_tolerance")]
    pub locate_tolerance_m: f64,
    /// Reject a run when a line item cannot be placed in a subject
    #[serde(default)]
    pub strict: bool,
}

impl Default for RegionsSettings {
    fn default() -> Self {
        Self {
            geodata_dir: None,
            locate_tolerance_m: default_locate_tolerance(),
            strict: false,
        }
    }
}

fn default_locate_tolerance() -> f64 { LOCATE_TOLERANCE_M }

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "json".to_string() }

fn environment() -> Environment {
    // e.g., OOH__SERVER__PORT -> server.port
    Environment::with_prefix("OOH")
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
}

impl Settings {
    /// Load configuration from file and environment variables
    ///
    /// Configuration is loaded in the following order (later overrides earlier):
    /// 1. Default values in the struct
    /// 2. Configuration file (config/default.toml)
    /// 3. Local overrides (config/local.toml)
    /// 4. Environment variables (prefixed with OOH__)
    pub fn load() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Load configuration from a custom path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(environment())
            .build()?
            .try_deserialize()
    }

    /// Parse configuration from TOML text without consulting the environment
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from_str(raw, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
