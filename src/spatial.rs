//! Great-circle distance, the in-query membership test and degree/meter
//! conversions used to size query bounding boxes.
//!
//! Bucket ranges are a superset filter; [`is_in_query`] is the exact check
//! that decides whether a key is inside a query circle.

use crate::types::GeoPoint;
use geo::{Distance, Haversine};
use std::f64::consts::PI;

/// Mean earth radius in meters, the sphere `geo`'s Haversine measures on.
pub const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Length of one degree of latitude on the sphere used for distances.
pub const METERS_PER_DEGREE_LATITUDE: f64 = EARTH_RADIUS_METERS * PI / 180.0;

/// Full meridional circumference on that sphere.
pub const EARTH_MERIDIONAL_CIRCUMFERENCE: f64 = 2.0 * PI * EARTH_RADIUS_METERS;

const EPSILON: f64 = 1e-12;

/// Great-circle distance in meters between two points (haversine).
///
/// Returns exactly `0.0` for identical points and never NaN, including for
/// antipodal pairs.
///
/// # Examples
///
/// ```rust
/// use spatio_live::{GeoPoint, spatial::distance};
///
/// let nyc = GeoPoint::new(40.7128, -74.0060)?;
/// let la = GeoPoint::new(34.0522, -118.2437)?;
///
/// let dist = distance(&nyc, &la);
/// assert!(dist > 3_900_000.0 && dist < 4_000_000.0); // ~3,936 km
/// assert_eq!(distance(&nyc, &nyc), 0.0);
/// # Ok::<(), spatio_live::GeoError>(())
/// ```
pub fn distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    Haversine.distance(geo::Point::from(*a), geo::Point::from(*b))
}

/// Whether `point` lies inside the circle `(center, radius_meters)`.
pub fn is_in_query(point: &GeoPoint, center: &GeoPoint, radius_meters: f64) -> bool {
    distance(point, center) <= radius_meters
}

/// Degrees of latitude spanned by `meters` along a meridian.
pub fn meters_to_latitude_degrees(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE_LATITUDE
}

/// Degrees of longitude spanned by `meters` along the parallel at `latitude`.
///
/// Near the poles the parallel shrinks to nothing; the span is clamped to the
/// full 360 degrees.
pub fn meters_to_longitude_degrees(meters: f64, latitude: f64) -> f64 {
    let meters_per_degree = METERS_PER_DEGREE_LATITUDE * latitude.to_radians().cos();
    if meters_per_degree < EPSILON {
        if meters > 0.0 { 360.0 } else { 0.0 }
    } else {
        (meters / meters_per_degree).min(360.0)
    }
}

/// Wrap a longitude into [-180, 180].
pub fn wrap_longitude(longitude: f64) -> f64 {
    if (-180.0..=180.0).contains(&longitude) {
        return longitude;
    }
    let adjusted = longitude + 180.0;
    if adjusted > 0.0 {
        (adjusted % 360.0) - 180.0
    } else {
        180.0 - (-adjusted % 360.0)
    }
}

/// Degree-space box around a query circle.
///
/// Latitudes are clamped to the poles. `longitude_delta` is the half-width;
/// when it reaches 180 the box wraps the whole globe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryBounds {
    pub south: f64,
    pub north: f64,
    pub center_longitude: f64,
    pub longitude_delta: f64,
}

impl QueryBounds {
    pub fn around(center: &GeoPoint, radius_meters: f64) -> Self {
        let latitude_delta = meters_to_latitude_degrees(radius_meters);
        let north = (center.latitude() + latitude_delta).min(90.0);
        let south = (center.latitude() - latitude_delta).max(-90.0);

        // The widest parallel crossing of the circle is at whichever edge lies
        // closer to a pole.
        let longitude_delta = meters_to_longitude_degrees(radius_meters, north)
            .max(meters_to_longitude_degrees(radius_meters, south));

        Self {
            south,
            north,
            center_longitude: center.longitude(),
            longitude_delta,
        }
    }

    pub fn wraps_globe(&self) -> bool {
        self.longitude_delta >= 180.0
    }
}
