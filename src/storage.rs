//! Backend store abstraction for spatio-live
//!
//! The query engine never stores anything itself. It needs a backend that
//! keeps keyed JSON values, can order children by one field and serve live
//! range reads over that order, and can read or write a single key. This
//! module defines that contract ([`OrderedStore`]) and the shape of the
//! values written for each location.

pub mod memory;

pub use memory::MemoryStore;

use crate::compute::geohash::Geohash;
use crate::error::{GeoError, Result};
use crate::types::{Config, GeoPoint};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

/// Opaque failure reported by a backend.
///
/// Cloneable so one subscription failure can be handed to every listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (code {code})")]
pub struct StoreError {
    pub code: i32,
    pub message: String,
}

impl StoreError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Identifies one range subscription within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Event delivered on a range subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeEvent {
    /// A child entered the range (including every child of the initial snapshot)
    ChildAdded { key: String, value: Value },
    /// A child inside the range was rewritten and is still inside it
    ChildChanged { key: String, value: Value },
    /// A child left the range or was deleted
    ChildRemoved { key: String },
    /// Every child of the initial snapshot has been delivered; sent once
    InitialSnapshotComplete,
    /// The subscription failed; other subscriptions are unaffected
    Failed(StoreError),
}

/// A live range read. Events arrive in order on `events` until the
/// subscription is cancelled with [`OrderedStore::unsubscribe`].
///
/// The channel is unbounded; a backend that needs flow control applies it
/// on its side of the channel.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub events: UnboundedReceiver<RangeEvent>,
}

/// Trait for ordered key-value backends.
///
/// Implementations own transport, authentication and retries. None of these
/// methods may block on I/O: subscriptions deliver through their channel and
/// point operations return futures.
pub trait OrderedStore: Send + Sync {
    /// Open a live read of every child whose `order_field` lies in `[start, end]`.
    fn subscribe_range(&self, order_field: &str, start: &str, end: &str) -> Subscription;

    /// Stop delivery on a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Read the current value of one key.
    fn get_once(&self, key: &str) -> BoxFuture<'static, std::result::Result<Option<Value>, StoreError>>;

    /// Write (`Some`) or delete (`None`) one key.
    fn set_value(
        &self,
        key: &str,
        value: Option<Value>,
    ) -> BoxFuture<'static, std::result::Result<(), StoreError>>;
}

/// Build the stored value for a location:
/// `{ <order_field>: "<geohash>", <location_field>: [lat, lon] }`.
pub fn encode_location(point: &GeoPoint, config: &Config) -> Result<Value> {
    let hash = Geohash::encode(point, config.geohash_precision)?;
    let mut fields = Map::new();
    fields.insert(config.order_field.clone(), Value::String(hash.to_string()));
    fields.insert(
        config.location_field.clone(),
        serde_json::to_value(point.to_array())?,
    );
    Ok(Value::Object(fields))
}

/// Read the location out of a stored value.
///
/// Anything other than an object whose `location_field` is a two-element
/// array of valid numeric coordinates is [`GeoError::MalformedStoredValue`].
pub fn decode_location(value: &Value, location_field: &str) -> Result<GeoPoint> {
    let pair = value
        .get(location_field)
        .and_then(Value::as_array)
        .ok_or_else(|| {
            GeoError::MalformedStoredValue(format!("missing {:?} array in {}", location_field, value))
        })?;

    match pair.as_slice() {
        [lat, lon] => {
            let (Some(lat), Some(lon)) = (lat.as_f64(), lon.as_f64()) else {
                return Err(GeoError::MalformedStoredValue(format!(
                    "non-numeric coordinates in {}",
                    value
                )));
            };
            GeoPoint::new(lat, lon)
                .map_err(|e| GeoError::MalformedStoredValue(format!("{} in {}", e, value)))
        }
        _ => Err(GeoError::MalformedStoredValue(format!(
            "expected [lat, lon], got {} element(s) in {}",
            pair.len(),
            value
        ))),
    }
}

/// The string a backend orders this value by, if it has one.
pub fn order_value<'a>(value: &'a Value, order_field: &str) -> Option<&'a str> {
    value.get(order_field).and_then(Value::as_str)
}
