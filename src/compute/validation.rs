//! Validation for coordinates, query radii, keys and geohash precision.

use crate::compute::geohash::MAX_PRECISION;
use crate::error::{GeoError, Result};

/// Validates a latitude/longitude pair.
///
/// Latitude: [-90.0, 90.0], Longitude: [-180.0, 180.0]
///
/// # Examples
///
/// ```
/// use spatio_live::compute::validation::validate_coordinates;
///
/// // Valid point
/// assert!(validate_coordinates(37.7749, -122.4194).is_ok());
///
/// // Invalid longitude
/// assert!(validate_coordinates(40.0, 200.0).is_err());
///
/// // Invalid latitude
/// assert!(validate_coordinates(95.0, -74.0).is_err());
/// ```
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<()> {
    if !latitude.is_finite() {
        return Err(GeoError::InvalidCoordinate(format!(
            "Latitude must be finite, got: {}",
            latitude
        )));
    }

    if !longitude.is_finite() {
        return Err(GeoError::InvalidCoordinate(format!(
            "Longitude must be finite, got: {}",
            longitude
        )));
    }

    if !(-90.0..=90.0).contains(&latitude) {
        return Err(GeoError::InvalidCoordinate(format!(
            "Latitude out of range [-90.0, 90.0]: {}",
            latitude
        )));
    }

    if !(-180.0..=180.0).contains(&longitude) {
        return Err(GeoError::InvalidCoordinate(format!(
            "Longitude out of range [-180.0, 180.0]: {}",
            longitude
        )));
    }

    Ok(())
}

/// Validates a query radius in meters. Zero is allowed and matches only the center.
pub fn validate_radius(radius_meters: f64) -> Result<()> {
    if !radius_meters.is_finite() {
        return Err(GeoError::InvalidRadius(format!(
            "Radius must be finite, got: {}",
            radius_meters
        )));
    }

    if radius_meters < 0.0 {
        return Err(GeoError::InvalidRadius(format!(
            "Radius must not be negative, got: {}",
            radius_meters
        )));
    }

    Ok(())
}

/// Validates a geohash precision in characters.
pub fn validate_precision(precision: usize) -> Result<()> {
    if !(1..=MAX_PRECISION).contains(&precision) {
        return Err(GeoError::InvalidConfig(format!(
            "Geohash precision must be between 1 and {}, got: {}",
            MAX_PRECISION, precision
        )));
    }
    Ok(())
}

/// Characters a path-keyed store cannot accept inside a single key segment.
const FORBIDDEN_KEY_CHARS: [char; 6] = ['.', '#', '$', '[', ']', '/'];

/// Validates a location key.
///
/// Keys are single path segments: non-empty, without `.`, `#`, `$`, `[`, `]`,
/// `/` or control characters.
///
/// # Examples
///
/// ```
/// use spatio_live::compute::validation::validate_key;
///
/// assert!(validate_key("driver:42").is_ok());
/// assert!(validate_key("").is_err());
/// assert!(validate_key("fleet/driver").is_err());
/// ```
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GeoError::InvalidKey("Key must not be empty".to_string()));
    }

    if let Some(c) = key
        .chars()
        .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_control())
    {
        return Err(GeoError::InvalidKey(format!(
            "Key {:?} contains forbidden character {:?}",
            key, c
        )));
    }

    Ok(())
}
