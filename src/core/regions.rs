//! Administrative subject lookup by coordinates.
//!
//! Region outlines are held in Web-Mercator metres so that the lookup
//! tolerance is a plain planar distance. A point "buffered" by the tolerance
//! intersects a region exactly when its distance to the region's polygons is
//! at most that tolerance.

use geo::{Coord, EuclideanDistance, Intersects, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use thiserror::Error;

/// Default buffer around a point when locating its subject, in metres
pub const LOCATE_TOLERANCE_M: f64 = 2000.0;

/// Default buffer for the whole-country check, in metres
pub const COUNTRY_TOLERANCE_M: f64 = 500.0;

/// Region code reserved for the whole-country outline
pub const COUNTRY_CODE: &str = "RUSSIA";

/// Label for any subject outside the named ones
pub const OTHER_REGIONS: &str = "Regions";

/// WGS84 semi-major axis used by EPSG:3857
const MERCATOR_RADIUS_M: f64 = 6_378_137.0;

/// Mercator is undefined at the poles
const MAX_MERCATOR_LAT: f64 = 85.051_128_78;

/// Errors that can occur during region lookup
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeoError {
    #[error("Subject not found for coordinates [{lat}][{lon}]")]
    SubjectNotFound { lat: f64, lon: f64 },

    #[error("Invalid GeoJSON for region {code}: {reason}")]
    InvalidGeoJson { code: String, reason: String },
}

/// Display name of a subject code
///
/// Four subjects are named individually; every other code, blank ones
/// included, falls into the catch-all bucket.
pub fn subject_name(subject_code: &str) -> &'static str {
    match subject_code.trim() {
        "RU-MOW" => "Moscow",
        "RU-MOS" => "Moscow Oblast",
        "RU-SPB" => "Saint Petersburg",
        "RU-LEN" => "Leningrad Oblast",
        _ => OTHER_REGIONS,
    }
}

/// Project WGS84 degrees onto the Web-Mercator plane (metres)
pub fn to_web_mercator(lat: f64, lon: f64) -> Coord<f64> {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = MERCATOR_RADIUS_M * lon.to_radians();
    let y = MERCATOR_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln();
    Coord { x, y }
}

/// A named region outline in projected coordinates
#[derive(Debug, Clone)]
pub struct Region {
    pub code: String,
    pub outline: MultiPolygon<f64>,
}

impl Region {
    /// Build a region from lon/lat polygons, projecting every vertex
    pub fn from_wgs84(code: impl Into<String>, outline: MultiPolygon<f64>) -> Self {
        let projected = outline
            .0
            .iter()
            .map(|polygon| {
                let project = |ring: &LineString<f64>| -> LineString<f64> {
                    ring.coords().map(|c| to_web_mercator(c.y, c.x)).collect()
                };
                Polygon::new(
                    project(polygon.exterior()),
                    polygon.interiors().iter().map(project).collect(),
                )
            })
            .collect::<Vec<_>>();

        Self {
            code: code.into(),
            outline: MultiPolygon::new(projected),
        }
    }

    /// Whether a projected point buffered by `tolerance_m` touches this region
    pub fn touches(&self, point: &Point<f64>, tolerance_m: f64) -> bool {
        self.outline.0.iter().any(|polygon| {
            polygon.intersects(point) || point.euclidean_distance(polygon) <= tolerance_m
        })
    }
}

/// Named subject outlines plus the optional whole-country outline
#[derive(Debug, Clone, Default)]
pub struct RegionAtlas {
    subjects: Vec<Region>,
    country: Option<Region>,
}

impl RegionAtlas {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region; the whole-country code is kept apart from the subjects
    pub fn insert(&mut self, region: Region) {
        if region.code.trim().eq_ignore_ascii_case(COUNTRY_CODE) {
            self.country = Some(region);
        } else {
            self.subjects.push(region);
        }
    }

    /// Add a region parsed from a GeoJSON document
    pub fn insert_geojson(&mut self, code: &str, raw: &str) -> Result<(), GeoError> {
        let invalid = |reason: String| GeoError::InvalidGeoJson { code: code.to_string(), reason };
        let doc: GeoJson = serde_json::from_str(raw).map_err(|e| invalid(e.to_string()))?;

        let mut polygons = Vec::new();
        doc.collect_polygons(&mut polygons).map_err(invalid)?;
        if polygons.is_empty() {
            return Err(invalid("no polygon geometry".to_string()));
        }

        self.insert(Region::from_wgs84(code, MultiPolygon::new(polygons)));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn has_country(&self) -> bool {
        self.country.is_some()
    }

    /// Find the subject whose outline lies within `tolerance_m` of a point
    ///
    /// Subjects are tested in insertion order and the first hit wins. A miss is
    /// `Ok(None)` unless `strict` is set.
    pub fn locate_subject(&self, lat: f64, lon: f64, tolerance_m: f64, strict: bool) -> Result<Option<String>, GeoError> {
        let point = Point::from(to_web_mercator(lat, lon));

        if let Some(region) = self.subjects.iter().find(|r| r.touches(&point, tolerance_m)) {
            return Ok(Some(region.code.clone()));
        }

        if strict {
            return Err(GeoError::SubjectNotFound { lat, lon });
        }
        tracing::warn!("Subject not found for coordinates: [{}][{}]", lat, lon);
        Ok(None)
    }

    /// Whether a point lies inside the whole-country outline (with tolerance)
    pub fn is_inside_country(&self, lat: f64, lon: f64, tolerance_m: f64) -> bool {
        let point = Point::from(to_web_mercator(lat, lon));
        self.country
            .as_ref()
            .map(|country| country.touches(&point, tolerance_m))
            .unwrap_or(false)
    }
}

/// `[lon, lat]`, optionally followed by an altitude
type Position = Vec<f64>;

/// The GeoJSON objects a region file may contain
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum GeoJson {
    FeatureCollection {
        features: Vec<GeoJson>,
    },
    Feature {
        #[serde(default)]
        geometry: Option<Box<GeoJson>>,
    },
    Polygon {
        coordinates: Vec<Vec<Position>>,
    },
    MultiPolygon {
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    // Points and lines carry no area
    #[serde(other)]
    Other,
}

impl GeoJson {
    fn collect_polygons(self, out: &mut Vec<Polygon<f64>>) -> Result<(), String> {
        match self {
            GeoJson::FeatureCollection { features } => {
                features.into_iter().try_for_each(|feature| feature.collect_polygons(out))
            }
            GeoJson::Feature { geometry } => match geometry {
                Some(geometry) => (*geometry).collect_polygons(out),
                None => Ok(()),
            },
            GeoJson::Polygon { coordinates } => {
                out.push(to_polygon(coordinates)?);
                Ok(())
            }
            GeoJson::MultiPolygon { coordinates } => {
                for rings in coordinates {
                    out.push(to_polygon(rings)?);
                }
                Ok(())
            }
            GeoJson::Other => Ok(()),
        }
    }
}

fn to_ring(positions: Vec<Position>) -> Result<LineString<f64>, String> {
    positions
        .into_iter()
        .map(|position| match position.as_slice() {
            [x, y, ..] => Ok(Coord { x: *x, y: *y }),
            _ => Err("position needs two numbers".to_string()),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(LineString::from)
}

fn to_polygon(rings: Vec<Vec<Position>>) -> Result<Polygon<f64>, String> {
    let mut rings = rings.into_iter().map(to_ring);
    let exterior = rings.next().ok_or("polygon has no exterior ring")??;
    let interiors = rings.collect::<Result<Vec<_>, _>>()?;
    Ok(Polygon::new(exterior, interiors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> String {
        format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","properties":{{}},
            "geometry":{{"type":"Polygon","coordinates":[[[{a},{b}],[{c},{b}],[{c},{d}],[{a},{d}],[{a},{b}]]]}}}}]}}"#,
            a = min_lon,
            b = min_lat,
            c = max_lon,
            d = max_lat
        )
    }

    fn atlas() -> RegionAtlas {
        let mut atlas = RegionAtlas::new();
        atlas.insert_geojson("RU-MOW", &square(37.3, 55.5, 37.9, 56.0)).unwrap();
        atlas.insert_geojson("RU-SPB", &square(30.0, 59.7, 30.6, 60.1)).unwrap();
        atlas.insert_geojson("russia", &square(20.0, 41.0, 180.0, 82.0)).unwrap();
        atlas
    }

    #[test]
    fn test_subject_names() {
        assert_eq!(subject_name("RU-MOW"), "Moscow");
        assert_eq!(subject_name(" RU-LEN "), "Leningrad Oblast");
        assert_eq!(subject_name("RU-KDA"), OTHER_REGIONS);
        assert_eq!(subject_name("  "), OTHER_REGIONS);
    }

    #[test]
    fn test_country_kept_apart() {
        let atlas = atlas();
        assert_eq!(atlas.len(), 2);
        assert!(atlas.has_country());
    }

    #[test]
    fn test_locate_inside() {
        let atlas = atlas();
        let code = atlas.locate_subject(55.75, 37.61, LOCATE_TOLERANCE_M, false).unwrap();
        assert_eq!(code.as_deref(), Some("RU-MOW"));

        let code = atlas.locate_subject(59.93, 30.33, LOCATE_TOLERANCE_M, true).unwrap();
        assert_eq!(code.as_deref(), Some("RU-SPB"));
    }

    #[test]
    fn test_locate_within_tolerance() {
        let atlas = atlas();
        // ~0.6 km east of the Moscow square's eastern edge
        assert_eq!(
            atlas.locate_subject(55.75, 37.91, LOCATE_TOLERANCE_M, false).unwrap().as_deref(),
            Some("RU-MOW")
        );
        assert_eq!(atlas.locate_subject(55.75, 37.91, 10.0, false).unwrap(), None);
    }

    #[test]
    fn test_locate_miss() {
        let atlas = atlas();
        assert_eq!(atlas.locate_subject(45.03, 38.97, LOCATE_TOLERANCE_M, false).unwrap(), None);
        assert!(matches!(
            atlas.locate_subject(45.03, 38.97, LOCATE_TOLERANCE_M, true),
            Err(GeoError::SubjectNotFound { .. })
        ));
    }

    #[test]
    fn test_inside_country() {
        let atlas = atlas();
        assert!(atlas.is_inside_country(45.03, 38.97, COUNTRY_TOLERANCE_M));
        assert!(!atlas.is_inside_country(48.85, 2.35, COUNTRY_TOLERANCE_M));
        assert!(!RegionAtlas::new().is_inside_country(55.75, 37.61, COUNTRY_TOLERANCE_M));
    }

    #[test]
    fn test_invalid_geojson() {
        let mut atlas = RegionAtlas::new();
        assert!(atlas.insert_geojson("X", "not json").is_err());
        assert!(atlas.insert_geojson("X", r#"{"type":"Point","coordinates":[1,2]}"#).is_err());
        assert!(atlas.insert_geojson("X", r#"{"coordinates":[]}"#).is_err());
        assert!(atlas.insert_geojson("X", r#"{"type":"Polygon","coordinates":[[[37.3]]]}"#).is_err());
        assert!(atlas.is_empty());
    }

    #[test]
    fn test_multipolygon_with_altitude_and_empty_feature() {
        let mut atlas = RegionAtlas::new();
        let raw = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{"name":"none"},"geometry":null},
            {"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[
                [[[30.0,59.7,0.0],[30.6,59.7,0.0],[30.6,60.1,0.0],[30.0,60.1,0.0],[30.0,59.7,0.0]]]
            ]}}
        ]}"#;
        atlas.insert_geojson("RU-SPB", raw).unwrap();

        assert_eq!(atlas.len(), 1);
        assert_eq!(
            atlas.locate_subject(59.93, 30.33, LOCATE_TOLERANCE_M, true).unwrap().as_deref(),
            Some("RU-SPB")
        );
    }
}
