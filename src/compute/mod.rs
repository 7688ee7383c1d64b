//! Compute layer: the geohash codec, bucket planning and input validation.
//!
//! Nothing in here touches a store. The query engine calls into these
//! functions to decide which range subscriptions to hold and how to read
//! what comes back.

pub mod buckets;
pub mod geohash;
pub mod validation;

pub use self::buckets::{BucketRange, plan_buckets};
pub use self::geohash::{CellBounds, Geohash, decode_bbox, encode};
