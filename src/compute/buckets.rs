//! Bucket planning: turning a query circle into geohash range queries.
//!
//! A query circle is covered by every geohash cell that intersects its
//! degree-space bounding box, at the coarsest bit resolution whose cells are
//! still at least as large as the radius in both axes. Each cell becomes a
//! lexicographic range `[start, end]` over stored geohashes, and ranges that
//! touch or overlap are merged, so a typical query needs a handful of range
//! subscriptions (usually no more than nine).
//!
//! The cover is conservative: corners of square cells reach outside the
//! circle, so results must still pass [`crate::spatial::is_in_query`].

use crate::compute::geohash::{BITS_PER_CHAR, Geohash, base32_char, base32_value};
use crate::compute::validation::{validate_precision, validate_radius};
use crate::error::{GeoError, Result};
use crate::spatial::{
    EARTH_MERIDIONAL_CIRCUMFERENCE, QueryBounds, meters_to_latitude_degrees,
    meters_to_longitude_degrees, wrap_longitude,
};
use crate::types::GeoPoint;
use std::collections::BTreeSet;
use std::fmt;

/// Sorts after every base-32 character, closing a range at the end of a prefix.
const RANGE_END_SENTINEL: char = '~';

/// A lexicographic interval `[start, end]` over geohash strings.
///
/// Each range maps to one backend subscription ordered by the geohash field.
/// Equality is by value, so two plans can be diffed as sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketRange {
    start: String,
    end: String,
}

impl BucketRange {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Range covering every geohash in the cell of `hash` at `bits` resolution.
    ///
    /// `bits` may fall between character boundaries; the last character is
    /// then split into a sub-range of the alphabet.
    pub fn for_geohash(hash: &Geohash, bits: usize) -> Result<Self> {
        let precision = bits.div_ceil(BITS_PER_CHAR);
        let hash = hash.as_str();
        if hash.len() < precision {
            return Ok(Self::new(hash, format!("{}{}", hash, RANGE_END_SENTINEL)));
        }

        let prefix = &hash[..precision];
        let (base, last) = prefix.split_at(precision - 1);
        let last_char = last.chars().next().ok_or_else(|| {
            GeoError::InvalidGeohash("Cannot build a range from an empty geohash".to_string())
        })?;
        let last_value = base32_value(last_char)
            .ok_or_else(|| GeoError::InvalidGeohash(format!("Bad character {:?}", last_char)))?;

        let significant_bits = bits - base.len() * BITS_PER_CHAR;
        let unused_bits = (BITS_PER_CHAR - significant_bits) as u32;
        let start_value = (last_value >> unused_bits) << unused_bits;
        let end_value = start_value as u16 + (1u16 << unused_bits);

        let start = format!("{}{}", base, base32_char(start_value).unwrap_or(RANGE_END_SENTINEL));
        let end = match u8::try_from(end_value).ok().and_then(base32_char) {
            Some(c) => format!("{}{}", base, c),
            None => format!("{}{}", base, RANGE_END_SENTINEL),
        };
        Ok(Self { start, end })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn end(&self) -> &str {
        &self.end
    }

    /// Whether a stored geohash falls in this range (inclusive both ends,
    /// like the backend's range read).
    pub fn contains(&self, hash: &Geohash) -> bool {
        let hash = hash.as_str();
        self.start.as_str() <= hash && hash <= self.end.as_str()
    }

    /// `other` starts before `self` and reaches into it without covering it.
    fn is_prefix(&self, other: &BucketRange) -> bool {
        other.end >= self.start && other.start < self.start && other.end < self.end
    }

    fn is_super_range(&self, other: &BucketRange) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    fn can_join(&self, other: &BucketRange) -> bool {
        self.is_prefix(other)
            || other.is_prefix(self)
            || self.is_super_range(other)
            || other.is_super_range(self)
    }

    fn join(&self, other: &BucketRange) -> BucketRange {
        if other.is_prefix(self) {
            BucketRange::new(self.start.clone(), other.end.clone())
        } else if self.is_prefix(other) {
            BucketRange::new(other.start.clone(), self.end.clone())
        } else if self.is_super_range(other) {
            self.clone()
        } else {
            other.clone()
        }
    }
}

impl fmt::Display for BucketRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Total interleaved bits whose latitude cells are at least `resolution` meters tall.
fn latitude_bits(resolution: f64) -> i64 {
    let bits = (EARTH_MERIDIONAL_CIRCUMFERENCE / 2.0 / resolution).log2();
    (bits.floor() as i64).saturating_mul(2)
}

/// Total interleaved bits whose longitude cells are at least `resolution` meters
/// wide at `latitude`. Longitude takes the odd bit, hence `2n - 1`.
fn longitude_bits(resolution: f64, latitude: f64) -> i64 {
    let degrees = meters_to_longitude_degrees(resolution, latitude);
    // A zero-width span needs no longitude coarsening at all.
    let bits = if degrees > 0.0 {
        (360.0 / degrees).log2().max(1.0)
    } else {
        f64::INFINITY
    };
    (bits.floor() as i64).saturating_mul(2) - 1
}

/// Coarsest bit resolution whose cells are no smaller than the query radius,
/// capped at `max_bits`.
pub fn bits_for_radius(center: &GeoPoint, radius_meters: f64, max_bits: usize) -> usize {
    let latitude_delta = meters_to_latitude_degrees(radius_meters);
    let north = (center.latitude() + latitude_delta).min(90.0);
    let south = (center.latitude() - latitude_delta).max(-90.0);

    let bits = latitude_bits(radius_meters)
        .min(longitude_bits(radius_meters, north))
        .min(longitude_bits(radius_meters, south))
        .min(max_bits as i64);
    bits.max(1) as usize
}

/// Sample positions from `low` to `high`, at most `step` apart, ends included.
fn axis_samples(low: f64, high: f64, step: f64) -> Vec<f64> {
    let mut samples = Vec::new();
    if step > 0.0 {
        let mut value = low;
        while value < high {
            samples.push(value);
            value += step;
        }
    }
    samples.push(high);
    samples
}

/// Plan the bucket ranges covering the circle `(center, radius_meters)` for
/// geohashes stored at `precision` characters.
///
/// # Examples
///
/// ```rust
/// use spatio_live::{GeoPoint, Geohash, compute::buckets::plan_buckets};
///
/// let center = GeoPoint::new(37.0, -122.0)?;
/// let buckets = plan_buckets(&center, 500.0, 10)?;
/// assert!(!buckets.is_empty() && buckets.len() <= 9);
///
/// let hash = Geohash::encode(&center, 10)?;
/// assert!(buckets.iter().any(|b| b.contains(&hash)));
/// # Ok::<(), spatio_live::GeoError>(())
/// ```
pub fn plan_buckets(
    center: &GeoPoint,
    radius_meters: f64,
    precision: usize,
) -> Result<BTreeSet<BucketRange>> {
    validate_radius(radius_meters)?;
    validate_precision(precision)?;

    let bits = bits_for_radius(center, radius_meters, precision * BITS_PER_CHAR);
    let hash_precision = bits.div_ceil(BITS_PER_CHAR);

    let (cell_width, cell_height) = cell_size(bits);

    let bounds = QueryBounds::around(center, radius_meters);

    // Half-cell steps so float error at cell edges cannot skip a cell.
    let latitudes = axis_samples(bounds.south, bounds.north, cell_height / 2.0);
    let longitudes = if bounds.wraps_globe() {
        axis_samples(-180.0, 180.0, cell_width / 2.0)
    } else {
        axis_samples(
            bounds.center_longitude - bounds.longitude_delta,
            bounds.center_longitude + bounds.longitude_delta,
            cell_width / 2.0,
        )
        .into_iter()
        .map(wrap_longitude)
        .collect()
    };

    let mut ranges = BTreeSet::new();
    for latitude in &latitudes {
        for longitude in &longitudes {
            let sample = GeoPoint::new(*latitude, *longitude)?;
            let hash = Geohash::encode(&sample, hash_precision)?;
            ranges.insert(BucketRange::for_geohash(&hash, bits)?);
        }
    }

    let merged = merge_ranges(ranges);
    log::trace!(
        "planned {} bucket(s) at {} bits for {} r={}m",
        merged.len(),
        bits,
        center,
        radius_meters
    );
    Ok(merged)
}

/// Width and height in degrees of a `bits`-deep cell.
///
/// Matches [`decode_bbox`](crate::compute::geohash::decode_bbox) whenever
/// `bits` falls on a character boundary; planner depths need not.
/// Longitude takes the first of every bit pair.
fn cell_size(bits: usize) -> (f64, f64) {
    let longitude_bits = bits.div_ceil(2) as i32;
    let latitude_bits = (bits / 2) as i32;
    (
        360.0 / 2f64.powi(longitude_bits),
        180.0 / 2f64.powi(latitude_bits),
    )
}

/// Join touching or overlapping ranges until no pair can be joined.
/// Never increases the number of ranges.
pub fn merge_ranges(ranges: BTreeSet<BucketRange>) -> BTreeSet<BucketRange> {
    let mut ranges: Vec<BucketRange> = ranges.into_iter().collect();
    loop {
        let pair = (0..ranges.len())
            .flat_map(|i| ((i + 1)..ranges.len()).map(move |j| (i, j)))
            .find(|&(i, j)| ranges[i].can_join(&ranges[j]));

        match pair {
            Some((i, j)) => {
                let joined = ranges[i].join(&ranges[j]);
                ranges.swap_remove(j);
                ranges[i] = joined;
            }
            None => break,
        }
    }
    ranges.into_iter().collect()
}
