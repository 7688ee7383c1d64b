//! Geohash codec.
//!
//! Maps a [`GeoPoint`] to a fixed-length base-32 string by interleaving
//! binary-subdivided longitude and latitude bits, most significant first.
//! Lexicographic order over the strings follows a Z-order curve, so a prefix
//! names a rectangular cell and a contiguous string range names a run of
//! neighbouring cells. Encoding and bounding-box decoding delegate to the
//! `geohash` crate; the alphabet helpers here are what the bucket planner
//! needs to build ranges at sub-character bit resolution.

use crate::compute::validation::validate_precision;
use crate::error::{GeoError, Result};
use crate::types::GeoPoint;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The geohash base-32 alphabet, in sort order.
pub const BASE32: &[u8; 32] = b"0123456789bcdefghjkmnpqrstuvwxyz";

pub const BITS_PER_CHAR: usize = 5;

/// Default stored geohash length (~50 bits, sub-meter cells).
pub const DEFAULT_PRECISION: usize = 10;

/// Longest geohash the codec produces.
pub const MAX_PRECISION: usize = 12;

/// A geohash string.
///
/// Ordering is plain string ordering, which is the order a backend sorts
/// stored values by.
///
/// # Examples
///
/// ```rust
/// use spatio_live::{GeoPoint, Geohash};
///
/// let point = GeoPoint::new(37.7749, -122.4194)?;
/// let hash = Geohash::encode(&point, 10)?;
/// assert_eq!(hash.as_str(), "9q8yyk8yuv");
///
/// let cell = hash.bounding_box()?;
/// assert!(cell.contains(&point));
/// # Ok::<(), spatio_live::GeoError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geohash(String);

impl Geohash {
    /// Encode a point at the given precision (in characters).
    pub fn encode(point: &GeoPoint, precision: usize) -> Result<Self> {
        validate_precision(precision)?;
        let coord = ::geohash::Coord {
            x: point.longitude(),
            y: point.latitude(),
        };
        ::geohash::encode(coord, precision)
            .map(Geohash)
            .map_err(|e| GeoError::InvalidCoordinate(e.to_string()))
    }

    /// Parse an existing geohash string, checking length and alphabet.
    pub fn parse(hash: &str) -> Result<Self> {
        if hash.is_empty() || hash.len() > MAX_PRECISION {
            return Err(GeoError::InvalidGeohash(format!(
                "Geohash length must be between 1 and {}, got: {}",
                MAX_PRECISION,
                hash.len()
            )));
        }
        if let Some(c) = hash.chars().find(|c| base32_value(*c).is_none()) {
            return Err(GeoError::InvalidGeohash(format!(
                "Character {:?} is not in the geohash alphabet",
                c
            )));
        }
        Ok(Geohash(hash.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length in characters.
    pub fn precision(&self) -> usize {
        self.0.len()
    }

    /// The real-world cell this hash denotes.
    pub fn bounding_box(&self) -> Result<CellBounds> {
        decode_bbox(&self.0)
    }
}

impl fmt::Display for Geohash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Geohash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Degree-space bounds of a geohash cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellBounds {
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
}

impl CellBounds {
    pub fn height_degrees(&self) -> f64 {
        self.max_latitude - self.min_latitude
    }

    pub fn width_degrees(&self) -> f64 {
        self.max_longitude - self.min_longitude
    }

    /// Inclusive on every edge.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        (self.min_latitude..=self.max_latitude).contains(&point.latitude())
            && (self.min_longitude..=self.max_longitude).contains(&point.longitude())
    }
}

/// Encode a point at the given precision (in characters).
pub fn encode(point: &GeoPoint, precision: usize) -> Result<Geohash> {
    Geohash::encode(point, precision)
}

/// Decode a geohash string into the bounds of its cell.
pub fn decode_bbox(hash: &str) -> Result<CellBounds> {
    let rect = ::geohash::decode_bbox(hash).map_err(|e| GeoError::InvalidGeohash(e.to_string()))?;
    Ok(CellBounds {
        min_latitude: rect.min().y,
        max_latitude: rect.max().y,
        min_longitude: rect.min().x,
        max_longitude: rect.max().x,
    })
}

/// Numeric value (0-31) of a base-32 character.
pub fn base32_value(c: char) -> Option<u8> {
    if !c.is_ascii() {
        return None;
    }
    BASE32
        .iter()
        .position(|b| *b == c as u8)
        .map(|idx| idx as u8)
}

/// Base-32 character for a value in 0-31.
pub fn base32_char(value: u8) -> Option<char> {
    BASE32.get(value as usize).map(|b| *b as char)
}
