/// Earth's radius in kilometers
const EARTH_RADIUS_KM: f64 = 6371.0;

/// Calculate the Haversine distance between two points in kilometers
///
/// # Arguments
/// * `lat1` - Latitude of first point in degrees
/// * `lon1` - Longitude of first point in degrees
/// * `lat2` - Latitude of second point in degrees
/// * `lon2` - Longitude of second point in degrees
///
/// # Returns
/// Distance in kilometers
#[inline]
pub fn haversine(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1.to_radians();
    let lat2_rad = lat2.to_radians();
    let delta_lat = (lat2 - lat1).to_radians();
    let delta_lon = (lon2 - lon1).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push `a` a hair past 1.0 for antipodal points
    let c = 2.0 * a.min(1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

/// Distances from one origin to many points, element-wise
///
/// `lats` and `lons` are zipped; an empty candidate set yields an empty vector.
pub fn haversine_many(lat: f64, lon: f64, lats: &[f64], lons: &[f64]) -> Vec<f64> {
    debug_assert_eq!(lats.len(), lons.len());
    lats.iter()
        .zip(lons)
        .map(|(&lat2, &lon2)| haversine(lat, lon, lat2, lon2))
        .collect()
}

/// Check whether two points lie within `radius_km` of each other
#[inline]
pub fn is_close(lat1: f64, lon1: f64, lat2: f64, lon2: f64, radius_km: f64) -> bool {
    haversine(lat1, lon1, lat2, lon2) <= radius_km
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_distance() {
        // Distance from London to Paris (approximately 344 km)
        let london_lat = 51.5074;
        let london_lon = -0.1278;
        let paris_lat = 48.8566;
        let paris_lon = 2.3522;

        let distance = haversine(london_lat, london_lon, paris_lat, paris_lon);
        assert!((distance - 344.0).abs() < 10.0, "Distance should be ~344km, got {}", distance);
    }

    #[test]
    fn test_haversine_identity_and_symmetry() {
        assert_eq!(haversine(55.7558, 37.6173, 55.7558, 37.6173), 0.0);

        let ab = haversine(55.7558, 37.6173, 59.9343, 30.3351);
        let ba = haversine(59.9343, 30.3351, 55.7558, 37.6173);
        assert!((ab - ba).abs() < 1e-9);
        // Moscow to Saint Petersburg is roughly 634 km
        assert!((ab - 634.0).abs() < 10.0, "got {}", ab);
    }

    #[test]
    fn test_haversine_many_empty() {
        let distances = haversine_many(55.75, 37.61, &[], &[]);
        assert!(distances.is_empty());
    }

    #[test]
    fn test_haversine_many_matches_scalar() {
        let lats = [55.75, 55.76, 55.80];
        let lons = [37.61, 37.62, 37.70];
        let distances = haversine_many(55.75, 37.61, &lats, &lons);

        assert_eq!(distances.len(), 3);
        assert_eq!(distances[0], 0.0);
        for i in 0..3 {
            assert_eq!(distances[i], haversine(55.75, 37.61, lats[i], lons[i]));
        }
    }

    #[test]
    fn test_is_close_ten_meters() {
        // ~5.5 m north
        assert!(is_close(55.75, 37.61, 55.75005, 37.61, 0.01));
        // ~111 m north
        assert!(!is_close(55.75, 37.61, 55.751, 37.61, 0.01));
    }
}
