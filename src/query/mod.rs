//! Live radius queries.
//!
//! A [`GeoQuery`] keeps one backend range subscription per bucket of its
//! circle, turns the child events of those subscriptions into
//! entered/exited/moved/ready notifications and follows the circle as it is
//! moved or resized.
//!
//! Each query serializes all of its state behind one mutex. Subscription
//! events are drained by one tokio task per subscription; every event takes
//! the lock, updates [`state::QueryState`] and posts the resulting
//! notifications to the query's [`EventTarget`] before releasing it.

pub mod dispatch;
pub mod listener;
pub mod state;

pub use dispatch::{EventTarget, SerialEventTarget};
pub use listener::{ChannelListener, GeoQueryEvent, GeoQueryEventListener};
pub use state::QueryPhase;

use crate::compute::buckets::BucketRange;
use crate::compute::validation::validate_radius;
use crate::error::{GeoError, Result};
use crate::storage::{
    OrderedStore, RangeEvent, StoreError, Subscription, SubscriptionId, decode_location,
};
use crate::types::{Config, GeoPoint};
use listener::ListenerId;
use parking_lot::Mutex;
use serde_json::Value;
use state::{Effects, Notification, QueryState};
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;

/// A live query for every key within `radius` meters of `center`.
///
/// Handles are cheap to clone and share one query. Subscriptions are opened
/// when the first listener is added and closed when the last one is removed
/// or the last handle is dropped.
///
/// # Examples
///
/// ```rust
/// use spatio_live::{GeoIndex, GeoPoint, MemoryStore};
/// use spatio_live::query::{ChannelListener, GeoQueryEvent};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> spatio_live::Result<()> {
/// let index = GeoIndex::new(Arc::new(MemoryStore::new()))?;
/// index.set_location("truck-1", GeoPoint::new(37.0001, -122.0001)?).await?;
///
/// let query = index.query_at_location(GeoPoint::new(37.0, -122.0)?, 500.0)?;
/// let (listener, mut events) = ChannelListener::new();
/// query.add_listener(listener)?;
///
/// assert!(matches!(events.recv().await, Some(GeoQueryEvent::KeyEntered { .. })));
/// assert_eq!(events.recv().await, Some(GeoQueryEvent::Ready));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct GeoQuery {
    inner: Arc<QueryInner>,
}

struct QueryInner {
    this: Weak<QueryInner>,
    store: Arc<dyn OrderedStore>,
    events: Arc<dyn EventTarget>,
    runtime: Handle,
    config: Config,
    state: Mutex<QueryState>,
}

impl GeoQuery {
    /// Create a query on the current tokio runtime. No subscription is
    /// opened until a listener is added.
    pub fn new(
        store: Arc<dyn OrderedStore>,
        events: Arc<dyn EventTarget>,
        config: Config,
        center: GeoPoint,
        radius_meters: f64,
    ) -> Result<Self> {
        validate_radius(radius_meters)?;
        config.validate().map_err(GeoError::InvalidConfig)?;
        let runtime = Handle::try_current().map_err(|e| GeoError::NoRuntime(e.to_string()))?;

        let inner = Arc::new_cyclic(|this| QueryInner {
            this: this.clone(),
            store,
            events,
            runtime,
            state: Mutex::new(QueryState::new(config.geohash_precision, center, radius_meters)),
            config,
        });
        Ok(Self { inner })
    }

    /// Register a listener.
    ///
    /// The first listener opens the bucket subscriptions. Later listeners are
    /// sent `entered` for every key already inside the circle, then `ready`
    /// if the query is synced.
    pub fn add_listener(&self, listener: Arc<dyn GeoQueryEventListener>) -> Result<()> {
        self.inner.transition(|state| state.add_listener(listener))
    }

    /// Unregister a listener. Removing the last one closes every subscription
    /// and forgets every key.
    pub fn remove_listener<L>(&self, listener: &Arc<L>) -> Result<()>
    where
        L: GeoQueryEventListener + ?Sized,
    {
        let id = ListenerId::of(listener);
        self.inner.transition(|state| state.remove_listener(id))
    }

    pub fn remove_all_listeners(&self) {
        let mut state = self.inner.state.lock();
        let effects = state.remove_all_listeners();
        self.inner.apply(&mut *state, effects);
    }

    pub fn set_center(&self, center: GeoPoint) -> Result<()> {
        self.inner
            .transition(|state| state.set_location(center, state.radius()))
    }

    pub fn set_radius(&self, radius_meters: f64) -> Result<()> {
        validate_radius(radius_meters)?;
        self.inner
            .transition(|state| state.set_location(state.center(), radius_meters))
    }

    /// Move and resize in one step, with a single bucket recomputation.
    pub fn set_location(&self, center: GeoPoint, radius_meters: f64) -> Result<()> {
        validate_radius(radius_meters)?;
        self.inner
            .transition(|state| state.set_location(center, radius_meters))
    }

    pub fn center(&self) -> GeoPoint {
        self.inner.state.lock().center()
    }

    pub fn radius(&self) -> f64 {
        self.inner.state.lock().radius()
    }

    pub fn phase(&self) -> QueryPhase {
        self.inner.state.lock().phase()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.state.lock().listener_count()
    }

    /// Bucket ranges currently subscribed, sorted.
    pub fn active_buckets(&self) -> Vec<BucketRange> {
        self.inner.state.lock().active_buckets()
    }

    /// Keys currently inside the circle with their last known location.
    pub fn keys_in_query(&self) -> Vec<(String, GeoPoint)> {
        self.inner.state.lock().keys_in_query()
    }
}

impl fmt::Debug for GeoQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("GeoQuery")
            .field("center", &state.center())
            .field("radius", &state.radius())
            .field("phase", &state.phase())
            .field("listeners", &state.listener_count())
            .finish()
    }
}

impl QueryInner {
    fn transition<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut QueryState) -> Result<Effects>,
    {
        let mut state = self.state.lock();
        let effects = f(&mut *state)?;
        self.apply(&mut *state, effects);
        Ok(())
    }

    /// Carry out `effects` while the caller still holds the lock.
    fn apply(&self, state: &mut QueryState, effects: Effects) {
        for id in effects.close {
            log::debug!("closing subscription {}", id);
            self.store.unsubscribe(id);
        }

        for range in effects.open {
            let subscription =
                self.store
                    .subscribe_range(&self.config.order_field, range.start(), range.end());
            log::debug!("opened subscription {} for {}", subscription.id, range);
            state.attach(&range, subscription.id);
            self.runtime
                .spawn(pump(self.this.clone(), range, subscription));
        }

        for key in effects.lookups {
            let lookup = self.store.get_once(&key);
            let engine = self.this.clone();
            self.runtime.spawn(async move {
                let result = lookup.await;
                if let Some(inner) = engine.upgrade() {
                    inner.finish_removal(&key, result);
                }
            });
        }

        for Notification { listener, event } in effects.notifications {
            self.events
                .post(Box::new(move || event.deliver(listener.as_ref())));
        }
    }

    /// Handle one event from the subscription `id` on `range`.
    ///
    /// Returns `false` once the subscription is no longer the live one for
    /// its range, after which nothing it delivers matters.
    fn on_range_event(&self, range: &BucketRange, id: SubscriptionId, event: RangeEvent) -> bool {
        let mut state = self.state.lock();
        if !state.is_current(range, id) {
            log::trace!("dropping late event from cancelled subscription {}", id);
            return false;
        }

        let effects = match event {
            RangeEvent::ChildAdded { key, value } | RangeEvent::ChildChanged { key, value } => {
                match decode_location(&value, &self.config.location_field) {
                    Ok(location) => state.update_location(&key, location),
                    Err(e) => {
                        log::warn!("ignoring {:?} in {}: {}", key, range, e);
                        Ok(Effects::default())
                    }
                }
            }
            RangeEvent::ChildRemoved { key } => Ok(state.child_removed(&key)),
            RangeEvent::InitialSnapshotComplete => Ok(state.bucket_synced(range)),
            RangeEvent::Failed(error) => {
                log::warn!("subscription {} for {} failed: {}", id, range, error);
                Ok(state.subscription_failed(&error))
            }
        };

        match effects {
            Ok(effects) => self.apply(&mut *state, effects),
            Err(e) => log::warn!("failed to apply event from {}: {}", range, e),
        }
        true
    }

    /// Second half of a remove: the key's current value has been read.
    fn finish_removal(&self, key: &str, result: std::result::Result<Option<Value>, StoreError>) {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                log::warn!("lookup of removed key {:?} failed, keeping its state: {}", key, e);
                return;
            }
        };

        let current = match value.map(|v| decode_location(&v, &self.config.location_field)) {
            Some(Ok(location)) => Some(location),
            Some(Err(e)) => {
                log::warn!("treating {:?} as absent: {}", key, e);
                None
            }
            None => None,
        };

        let mut state = self.state.lock();
        match state.reconcile_removed(key, current) {
            Ok(effects) => self.apply(&mut *state, effects),
            Err(e) => log::warn!("failed to reconcile removed key {:?}: {}", key, e),
        }
    }
}

impl Drop for QueryInner {
    fn drop(&mut self) {
        let effects = self.state.get_mut().reset();
        if !effects.close.is_empty() {
            log::debug!("query dropped, closing {} subscription(s)", effects.close.len());
        }
        for id in effects.close {
            self.store.unsubscribe(id);
        }
    }
}

/// Drain one subscription into its query until the subscription ends, is
/// replaced, or the query is dropped.
async fn pump(engine: Weak<QueryInner>, range: BucketRange, mut subscription: Subscription) {
    let id = subscription.id;
    while let Some(event) = subscription.events.recv().await {
        let Some(inner) = engine.upgrade() else {
            break;
        };
        if !inner.on_range_event(&range, id, event) {
            break;
        }
    }
    log::trace!("subscription {} for {} finished", id, range);
}
