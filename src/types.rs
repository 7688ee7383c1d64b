//! Core value types and configuration for spatio-live
//!
//! This module provides the validated [`GeoPoint`] value type and the
//! serializable [`Config`] shared by the store facade and its queries.
use crate::compute::geohash::{DEFAULT_PRECISION, MAX_PRECISION};
use crate::compute::validation::validate_coordinates;
use crate::error::{GeoError, Result};
use serde::de::Error;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A validated latitude/longitude pair in degrees.
///
/// Coordinates are checked on construction, so every `GeoPoint` in the
/// system is finite and in range.
///
/// # Example
///
/// ```rust
/// use spatio_live::GeoPoint;
///
/// let sf = GeoPoint::new(37.7749, -122.4194)?;
/// assert_eq!(sf.latitude(), 37.7749);
///
/// assert!(GeoPoint::new(91.0, 0.0).is_err());
/// # Ok::<(), spatio_live::GeoError>(())
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPoint")]
pub struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Deserialize)]
struct RawPoint {
    latitude: f64,
    longitude: f64,
}

impl TryFrom<RawPoint> for GeoPoint {
    type Error = GeoError;

    fn try_from(raw: RawPoint) -> Result<Self> {
        GeoPoint::new(raw.latitude, raw.longitude)
    }
}

impl GeoPoint {
    /// Create a point, rejecting out-of-range or non-finite coordinates.
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        validate_coordinates(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    /// `[latitude, longitude]`, the order used in stored values.
    pub fn to_array(&self) -> [f64; 2] {
        [self.latitude, self.longitude]
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

impl From<GeoPoint> for geo::Point {
    fn from(point: GeoPoint) -> Self {
        geo::Point::new(point.longitude, point.latitude)
    }
}

impl TryFrom<geo::Point> for GeoPoint {
    type Error = GeoError;

    fn try_from(point: geo::Point) -> Result<Self> {
        GeoPoint::new(point.y(), point.x())
    }
}

/// Index and query configuration
///
/// Field names describe the shape of stored values: each key maps to
/// `{ order_field: "<geohash>", location_field: [lat, lon] }`, and the
/// backend orders children by `order_field`.
///
/// # Example
///
/// ```rust
/// use spatio_live::Config;
///
/// // Create default config
/// let config = Config::default();
/// assert_eq!(config.geohash_precision, 10);
///
/// // Load from JSON
/// let json = r#"{ "geohash_precision": 8 }"#;
/// let config = Config::from_json(json).unwrap();
/// assert_eq!(config.order_field, "g");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Length of the geohash written for every location (1-12, default: 10)
    #[serde(default = "Config::default_geohash_precision")]
    pub geohash_precision: usize,

    /// Field holding the geohash; range subscriptions order by it
    #[serde(default = "Config::default_order_field")]
    pub order_field: String,

    /// Field holding the `[latitude, longitude]` pair
    #[serde(default = "Config::default_location_field")]
    pub location_field: String,
}

impl Config {
    const fn default_geohash_precision() -> usize {
        DEFAULT_PRECISION
    }

    fn default_order_field() -> String {
        "g".to_string()
    }

    fn default_location_field() -> String {
        "l".to_string()
    }

    pub fn with_geohash_precision(precision: usize) -> Self {
        assert!(
            (1..=MAX_PRECISION).contains(&precision),
            "Geohash precision must be between 1 and 12"
        );

        Self {
            geohash_precision: precision,
            ..Self::default()
        }
    }

    pub fn with_fields(mut self, order_field: &str, location_field: &str) -> Self {
        self.order_field = order_field.to_string();
        self.location_field = location_field.to_string();
        self
    }

    /// Validate configuration values
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.geohash_precision < 1 || self.geohash_precision > MAX_PRECISION {
            return Err(format!(
                "Geohash precision must be between 1 and {}",
                MAX_PRECISION
            ));
        }

        if self.order_field.is_empty() || self.location_field.is_empty() {
            return Err("Field names must not be empty".to_string());
        }

        if self.order_field == self.location_field {
            return Err("Order field and location field must differ".to_string());
        }

        Ok(())
    }

    /// Load configuration from JSON string
    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as JSON string
    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load configuration from TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> std::result::Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    /// Save configuration as TOML string (requires toml feature)
    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> std::result::Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geohash_precision: Self::default_geohash_precision(),
            order_field: Self::default_order_field(),
            location_field: Self::default_location_field(),
        }
    }
}
