//! Store facade: keyed location writes and reads plus query construction.
//!
//! Every location is written as `{ <order_field>: "<geohash>", <location_field>: [lat, lon] }`
//! so the backend can order children by geohash and serve the bucket ranges
//! planned for each [`GeoQuery`].

use crate::builder::GeoIndexBuilder;
use crate::compute::validation::validate_key;
use crate::error::Result;
use crate::query::GeoQuery;
use crate::query::dispatch::EventTarget;
use crate::storage::{OrderedStore, decode_location, encode_location};
use crate::types::{Config, GeoPoint};
use std::sync::Arc;

/// Locations of keyed objects in an ordered store.
///
/// Cheap to clone; clones share the store and the event target.
///
/// # Examples
///
/// ```rust
/// use spatio_live::{GeoIndex, GeoPoint, MemoryStore};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> spatio_live::Result<()> {
/// let index = GeoIndex::new(Arc::new(MemoryStore::new()))?;
///
/// let sf = GeoPoint::new(37.7749, -122.4194)?;
/// index.set_location("courier-7", sf).await?;
/// assert_eq!(index.get_location("courier-7").await?, Some(sf));
///
/// index.remove_location("courier-7").await?;
/// assert_eq!(index.get_location("courier-7").await?, None);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GeoIndex {
    store: Arc<dyn OrderedStore>,
    event_target: Arc<dyn EventTarget>,
    config: Config,
}

impl GeoIndex {
    /// Index over `store` with the default configuration. Must be called
    /// inside a tokio runtime.
    pub fn new(store: Arc<dyn OrderedStore>) -> Result<Self> {
        GeoIndexBuilder::new().store(store).build()
    }

    pub fn with_config(store: Arc<dyn OrderedStore>, config: Config) -> Result<Self> {
        GeoIndexBuilder::new().store(store).config(config).build()
    }

    /// Index whose queries deliver callbacks through `event_target`.
    pub fn with_event_target(
        store: Arc<dyn OrderedStore>,
        config: Config,
        event_target: Arc<dyn EventTarget>,
    ) -> Result<Self> {
        GeoIndexBuilder::new()
            .store(store)
            .config(config)
            .event_target(event_target)
            .build()
    }

    pub fn builder() -> GeoIndexBuilder {
        GeoIndexBuilder::new()
    }

    pub(crate) fn from_parts(
        store: Arc<dyn OrderedStore>,
        event_target: Arc<dyn EventTarget>,
        config: Config,
    ) -> Self {
        Self {
            store,
            event_target,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn OrderedStore> {
        &self.store
    }

    /// Write the location of `key`, replacing any previous one.
    pub async fn set_location(&self, key: &str, location: GeoPoint) -> Result<()> {
        validate_key(key)?;
        let value = encode_location(&location, &self.config)?;
        self.store.set_value(key, Some(value)).await?;
        log::trace!("set {:?} to {}", key, location);
        Ok(())
    }

    /// Delete the location of `key`. Deleting an absent key is not an error.
    pub async fn remove_location(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        self.store.set_value(key, None).await?;
        log::trace!("removed {:?}", key);
        Ok(())
    }

    /// Read the location of `key`.
    ///
    /// A stored value that is not a valid location reads as `None`.
    pub async fn get_location(&self, key: &str) -> Result<Option<GeoPoint>> {
        validate_key(key)?;
        let Some(value) = self.store.get_once(key).await? else {
            return Ok(None);
        };

        match decode_location(&value, &self.config.location_field) {
            Ok(location) => Ok(Some(location)),
            Err(e) => {
                log::warn!("treating {:?} as absent: {}", key, e);
                Ok(None)
            }
        }
    }

    /// New live query for keys within `radius_meters` of `center`.
    ///
    /// Nothing is subscribed until the first listener is added.
    pub fn query_at_location(&self, center: GeoPoint, radius_meters: f64) -> Result<GeoQuery> {
        GeoQuery::new(
            self.store.clone(),
            self.event_target.clone(),
            self.config.clone(),
            center,
            radius_meters,
        )
    }
}
