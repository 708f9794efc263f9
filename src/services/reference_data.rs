use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::TablesSettings;
use crate::core::coefficients::{CoefficientTables, TablesError};
use crate::core::regions::{GeoError, RegionAtlas};

/// Errors that can occur while loading reference data at startup
#[derive(Debug, Error)]
pub enum ReferenceDataError {
    #[error("Coefficient tables error: {0}")]
    Tables(#[from] TablesError),

    #[error("Geodata I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Geodata error: {0}")]
    Geo(#[from] GeoError),

    #[error("No region outlines found in {0}")]
    EmptyAtlas(PathBuf),
}

/// Load the coefficient tables named in the settings
///
/// A missing optional file yields empty tables: every lookup then falls back
/// to 1.0 and inflation uses the default rates.
pub fn load_tables(settings: &TablesSettings) -> Result<CoefficientTables, ReferenceDataError> {
    let path = Path::new(&settings.path);
    if !path.exists() && !settings.required {
        tracing::warn!("Coefficient tables not found at {}, using empty tables", path.display());
        return Ok(CoefficientTables::default());
    }

    let tables = CoefficientTables::load(path)?;
    tracing::info!(
        "Loaded coefficient tables from {} ({} seasons, {} sides, {} inflation subjects)",
        path.display(),
        tables.season.len(),
        tables.side.len(),
        tables.inflation.len()
    );
    Ok(tables)
}

/// Build a region atlas from every `<code>.geojson` file in a directory
///
/// Files load in name order, which fixes the lookup order of the subjects.
pub fn load_region_atlas<P: AsRef<Path>>(dir: P) -> Result<RegionAtlas, ReferenceDataError> {
    let dir = dir.as_ref();
    let io_error = |source| ReferenceDataError::Io { path: dir.to_path_buf(), source };

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(io_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("geojson")))
        .collect();
    files.sort();

    let mut atlas = RegionAtlas::new();
    for file in &files {
        let Some(code) = file.file_stem().and_then(|stem| stem.to_str()) else {
            tracing::warn!("Skipping geodata file with a non UTF-8 name: {}", file.display());
            continue;
        };
        let raw = fs::read_to_string(file).map_err(|source| ReferenceDataError::Io {
            path: file.clone(),
            source,
        })?;
        atlas.insert_geojson(code, &raw)?;
        tracing::debug!("Loaded region outline {}", code);
    }

    if atlas.is_empty() && !atlas.has_country() {
        return Err(ReferenceDataError::EmptyAtlas(dir.to_path_buf()));
    }

    tracing::info!(
        "Loaded {} subject outlines from {} (country outline: {})",
        atlas.len(),
        dir.display(),
        atlas.has_country()
    );
    Ok(atlas)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ooh-panel-{}-{}", name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_region_atlas() {
        let dir = temp_dir("atlas");
        fs::write(
            dir.join("RU-MOW.geojson"),
            r#"{"type":"Polygon","coordinates":[[[37.3,55.5],[37.9,55.5],[37.9,56.0],[37.3,56.0],[37.3,55.5]]]}"#,
        )
        .unwrap();
        fs::write(dir.join("notes.txt"), "ignored").unwrap();

        let atlas = load_region_atlas(&dir).unwrap();
        assert_eq!(atlas.len(), 1);
        assert_eq!(
            atlas.locate_subject(55.75, 37.61, 2000.0, true).unwrap().as_deref(),
            Some("RU-MOW")
        );

        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_empty_geodata_dir_is_an_error() {
        let dir = temp_dir("empty");
        assert!(matches!(load_region_atlas(&dir), Err(ReferenceDataError::EmptyAtlas(_))));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_missing_optional_tables() {
        let settings = TablesSettings {
            path: "does/not/exist.toml".to_string(),
            required: false,
        };
        let tables = load_tables(&settings).unwrap();
        assert!(tables.season.is_empty());
        assert_eq!(tables.default_inflation.get("2024"), Some(&1.25));

        let required = TablesSettings { required: true, ..settings };
        assert!(matches!(load_tables(&required), Err(ReferenceDataError::Tables(_))));
    }
}
