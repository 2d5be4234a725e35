//! Geo-fence predicate: haversine distance between a drop's center and a
//! registration request's claimed location.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoMode {
    Exclusive,
    Bonus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GeoFence {
    pub lat: f64,
    pub lng: f64,
    pub radius_meters: f64,
    pub mode: GeoMode,
    pub bonus_multiplier: f64,
}

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two lat/lng pairs, in meters.
pub fn haversine_distance_meters(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lng2 - lng1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_METERS * c
}

/// Whether `(lat, lng)` falls within `fence`'s radius.
pub fn inside_geo_fence(fence: &GeoFence, lat: f64, lng: f64) -> bool {
    haversine_distance_meters(fence.lat, fence.lng, lat, lng) <= fence.radius_meters
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence() -> GeoFence {
        GeoFence {
            lat: 37.0,
            lng: -122.0,
            radius_meters: 1000.0,
            mode: GeoMode::Exclusive,
            bonus_multiplier: 1.5,
        }
    }

    #[test]
    fn nearby_point_is_inside() {
        assert!(inside_geo_fence(&fence(), 37.001, -122.0));
    }

    #[test]
    fn distant_point_is_outside() {
        assert!(!inside_geo_fence(&fence(), 38.0, -122.0));
    }

    #[test]
    fn distance_zero_at_center() {
        assert_eq!(haversine_distance_meters(37.0, -122.0, 37.0, -122.0), 0.0);
    }
}
