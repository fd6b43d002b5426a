use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Latitude/longitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Reject NaN/infinite values and out-of-range degrees. Caller-supplied
    /// coordinates are untrusted.
    pub fn validate(&self) -> Result<(), &'static str> {
        if !self.latitude.is_finite() || !self.longitude.is_finite() {
            return Err("coordinates must be finite");
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err("latitude out of range");
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err("longitude out of range");
        }
        Ok(())
    }
}

/// Distance between two points, in meters.
pub trait GeoDistance: Send + Sync {
    fn distance_m(&self, a: &GeoPoint, b: &GeoPoint) -> f64;
}

/// Great-circle distance on a spherical Earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct Haversine;

impl GeoDistance for Haversine {
    fn distance_m(&self, a: &GeoPoint, b: &GeoPoint) -> f64 {
        let phi1 = a.latitude.to_radians();
        let phi2 = b.latitude.to_radians();
        let d_phi = (b.latitude - a.latitude).to_radians();
        let d_lambda = (b.longitude - a.longitude).to_radians();

        let h = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * h.sqrt().min(1.0).asin()
    }
}
