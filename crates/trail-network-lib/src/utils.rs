//! Utility functions for coordinate projection and distance calculations

use geo::Point;

/// Earth's mean radius in meters
pub const EARTH_RADIUS_M: f64 = 6371000.0;

/// Maximum latitude accepted by the local projection
pub const MAX_LATITUDE: f64 = 85.05112878;

/// Calculate the Haversine distance between two WGS84 points in meters
///
/// Points are `geo::Point` with x = longitude and y = latitude, as stored in GPX waypoints.
#[inline]
pub fn haversine_distance(p1: Point<f64>, p2: Point<f64>) -> f64 {
    let lat1 = p1.y().to_radians();
    let lat2 = p2.y().to_radians();
    let delta_lat = (p2.y() - p1.y()).to_radians();
    let delta_lon = (p2.x() - p1.x()).to_radians();

    let a = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_M * c
}

/// Distance accounting for elevation change on top of a horizontal distance
#[inline(always)]
pub fn distance_3d(horizontal: f64, elevation_delta: f64) -> f64 {
    horizontal.hypot(elevation_delta)
}

/// Equirectangular projection centred on a reference point
///
/// Maps WGS84 degrees to a local plane in meters. Distortion stays negligible over the extent of
/// a regional trail network, which keeps all tolerances expressible in meters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LocalProjection {
    origin_lat: f64,
    origin_lon: f64,
    /// Precomputed cos(origin latitude)
    cos_lat: f64,
}

impl LocalProjection {
    /// Create a projection centred on the given origin (degrees)
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        let origin_lat = origin_lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
        Self {
            origin_lat,
            origin_lon,
            cos_lat: origin_lat.to_radians().cos(),
        }
    }

    /// Origin of the projection as (latitude, longitude)
    #[inline]
    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lat, self.origin_lon)
    }

    /// Convert WGS84 (lat, lon) to local (x, y) meters
    #[inline(always)]
    pub fn project(&self, lat: f64, lon: f64) -> (f64, f64) {
        let x = (lon - self.origin_lon).to_radians() * EARTH_RADIUS_M * self.cos_lat;
        let y = (lat - self.origin_lat).to_radians() * EARTH_RADIUS_M;
        (x, y)
    }

    /// Convert local (x, y) meters back to WGS84 (lat, lon)
    #[inline(always)]
    pub fn unproject(&self, x: f64, y: f64) -> (f64, f64) {
        let lat = self.origin_lat + (y / EARTH_RADIUS_M).to_degrees();
        let lon = self.origin_lon + (x / (EARTH_RADIUS_M * self.cos_lat)).to_degrees();
        (lat, lon)
    }
}

/// Snap a value to a precision grid, returning the integer cell index
#[inline(always)]
pub fn grid_cell(value: f64, precision: f64) -> i64 {
    (value / precision).round() as i64
}

/// Acute angle in degrees between two undirected 2D directions
///
/// Returns 90 for degenerate (zero-length) directions.
pub fn acute_angle_degrees(u: (f64, f64), v: (f64, f64)) -> f64 {
    let norm = u.0.hypot(u.1) * v.0.hypot(v.1);
    if norm <= f64::EPSILON {
        return 90.0;
    }
    let cos = ((u.0 * v.0 + u.1 * v.1) / norm).abs().min(1.0);
    cos.acos().to_degrees()
}
