//! Index builder for flexible configuration
//!
//! Picks the backend store, the stored-value configuration and where listener
//! callbacks run before creating a [`GeoIndex`].

use crate::error::{GeoError, Result};
use crate::index::GeoIndex;
use crate::query::dispatch::{EventTarget, SerialEventTarget};
use crate::storage::{MemoryStore, OrderedStore};
use crate::types::Config;
use std::sync::Arc;

/// Builder for a [`GeoIndex`].
///
/// Without a store the index runs on a fresh [`MemoryStore`]; without an
/// event target it spawns a [`SerialEventTarget`] on the current runtime.
pub struct GeoIndexBuilder {
    store: Option<Arc<dyn OrderedStore>>,
    event_target: Option<Arc<dyn EventTarget>>,
    config: Config,
}

impl GeoIndexBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            event_target: None,
            config: Config::default(),
        }
    }

    /// Backend holding the locations.
    pub fn store(mut self, store: Arc<dyn OrderedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an in-process [`MemoryStore`].
    pub fn in_memory(mut self) -> Self {
        self.store = None;
        self
    }

    /// Stored-value configuration (geohash precision and field names).
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn geohash_precision(mut self, precision: usize) -> Self {
        self.config.geohash_precision = precision;
        self
    }

    /// Where listener callbacks of every query from this index run.
    pub fn event_target(mut self, target: Arc<dyn EventTarget>) -> Self {
        self.event_target = Some(target);
        self
    }

    /// Validate the configuration and build the index.
    pub fn build(self) -> Result<GeoIndex> {
        self.config.validate().map_err(GeoError::InvalidConfig)?;

        let store = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let event_target = match self.event_target {
            Some(target) => target,
            None => SerialEventTarget::spawn()?,
        };

        Ok(GeoIndex::from_parts(store, event_target, self.config))
    }
}

impl Default for GeoIndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}
