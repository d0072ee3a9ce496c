use crate::models::RoutePoint;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Calorie estimate for running/walking: kcal burned per kilometer.
pub const KCAL_PER_KM: f64 = 60.0;

/// Haversine distance between two points in meters.
#[must_use]
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    // Rounding can push `a` a hair above 1 for antipodal points
    let c = 2.0 * a.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Total length of a route in meters, following points in order.
#[must_use]
pub fn route_distance(points: &[RoutePoint]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }

    points
        .windows(2)
        .map(|w| haversine_distance(w[0].latitude, w[0].longitude, w[1].latitude, w[1].longitude))
        .sum()
}

#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn estimate_calories(distance_meters: f64) -> i64 {
    if !distance_meters.is_finite() || distance_meters <= 0.0 {
        return 0;
    }
    (distance_meters / 1000.0 * KCAL_PER_KM).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> RoutePoint {
        RoutePoint {
            id: 0,
            uuid: String::new(),
            session_id: "s".to_string(),
            latitude: lat,
            longitude: lon,
            altitude: None,
            timestamp_millis: 0,
            synced: false,
        }
    }

    #[test]
    fn test_haversine_zero() {
        assert!(haversine_distance(40.0, -3.7, 40.0, -3.7).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_one_millidegree_at_equator() {
        let d = haversine_distance(0.0, 0.0, 0.0, 0.001);
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = haversine_distance(48.8566, 2.3522, 51.5074, -0.1278);
        let b = haversine_distance(51.5074, -0.1278, 48.8566, 2.3522);
        assert!((a - b).abs() < 1e-6);
        // Paris to London is roughly 344 km
        assert!((a / 1000.0 - 343.5).abs() < 2.0, "got {a}");
    }

    #[test]
    fn test_route_distance() {
        assert!(route_distance(&[]).abs() < f64::EPSILON);
        assert!(route_distance(&[point(0.0, 0.0)]).abs() < f64::EPSILON);
        let d = route_distance(&[point(0.0, 0.0), point(0.0, 0.001), point(0.0, 0.002)]);
        assert!((d - 222.39).abs() < 0.05, "got {d}");
    }

    #[test]
    fn test_route_distance_depends_on_order() {
        let forward = route_distance(&[point(0.0, 0.0), point(0.0, 0.001), point(0.0, 0.002)]);
        let shuffled = route_distance(&[point(0.0, 0.0), point(0.0, 0.002), point(0.0, 0.001)]);
        assert!((shuffled - 333.58).abs() < 0.05, "got {shuffled}");
        assert!((shuffled - forward).abs() > 100.0);
    }

    #[test]
    fn test_estimate_calories() {
        assert_eq!(estimate_calories(222.39), 13);
        assert_eq!(estimate_calories(5_000.0), 300);
        assert_eq!(estimate_calories(0.0), 0);
        assert_eq!(estimate_calories(-10.0), 0);
        assert_eq!(estimate_calories(f64::NAN), 0);
    }
}
