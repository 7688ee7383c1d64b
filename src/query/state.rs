//! Query state machine.
//!
//! [`QueryState`] holds everything one live query knows: its circle, the
//! active bucket set and the subscription behind each bucket, which buckets
//! still owe their initial snapshot, per-key membership and the registered
//! listeners. It performs no I/O. Every transition returns [`Effects`] that
//! the owning [`GeoQuery`](crate::GeoQuery) carries out while still holding
//! the lock, which keeps notification order identical to transition order.

use crate::compute::buckets::{BucketRange, plan_buckets};
use crate::compute::geohash::Geohash;
use crate::error::{GeoError, Result};
use crate::query::listener::{GeoQueryEvent, GeoQueryEventListener, ListenerId};
use crate::spatial::is_in_query;
use crate::storage::{StoreError, SubscriptionId};
use crate::types::GeoPoint;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a live query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryPhase {
    /// No listeners, no subscriptions
    Unconfigured,
    /// Some bucket has not delivered its initial snapshot yet
    Loading,
    /// Every bucket is synced
    Ready,
}

impl fmt::Display for QueryPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPhase::Unconfigured => write!(f, "unconfigured"),
            QueryPhase::Loading => write!(f, "loading"),
            QueryPhase::Ready => write!(f, "ready"),
        }
    }
}

/// What the query remembers about one key.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct KeyState {
    pub(crate) location: GeoPoint,
    pub(crate) geohash: Geohash,
    pub(crate) in_query: bool,
}

/// One event for one listener.
pub(crate) struct Notification {
    pub(crate) listener: Arc<dyn GeoQueryEventListener>,
    pub(crate) event: GeoQueryEvent,
}

/// Side effects of a transition, in the order they must be carried out.
#[derive(Default)]
pub(crate) struct Effects {
    /// Subscriptions to cancel
    pub(crate) close: Vec<SubscriptionId>,
    /// Buckets to subscribe; report the id back through [`QueryState::attach`]
    pub(crate) open: Vec<BucketRange>,
    /// Keys whose current value must be read for remove reconciliation
    pub(crate) lookups: Vec<String>,
    pub(crate) notifications: Vec<Notification>,
}

#[cfg(test)]
impl Effects {
    pub(crate) fn is_empty(&self) -> bool {
        self.close.is_empty()
            && self.open.is_empty()
            && self.lookups.is_empty()
            && self.notifications.is_empty()
    }
}

pub(crate) struct QueryState {
    precision: usize,
    center: GeoPoint,
    radius: f64,
    /// `None` until the first listener arrives and after a reset
    buckets: Option<BTreeMap<BucketRange, Option<SubscriptionId>>>,
    outstanding: BTreeSet<BucketRange>,
    ready_fired: bool,
    keys: BTreeMap<String, KeyState>,
    listeners: Vec<(ListenerId, Arc<dyn GeoQueryEventListener>)>,
}

impl QueryState {
    pub(crate) fn new(precision: usize, center: GeoPoint, radius: f64) -> Self {
        Self {
            precision,
            center,
            radius,
            buckets: None,
            outstanding: BTreeSet::new(),
            ready_fired: false,
            keys: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    pub(crate) fn center(&self) -> GeoPoint {
        self.center
    }

    pub(crate) fn radius(&self) -> f64 {
        self.radius
    }

    pub(crate) fn phase(&self) -> QueryPhase {
        match self.buckets {
            None => QueryPhase::Unconfigured,
            Some(_) if self.outstanding.is_empty() => QueryPhase::Ready,
            Some(_) => QueryPhase::Loading,
        }
    }

    pub(crate) fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub(crate) fn active_buckets(&self) -> Vec<BucketRange> {
        self.buckets
            .as_ref()
            .map(|b| b.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Keys currently inside the circle, sorted.
    pub(crate) fn keys_in_query(&self) -> Vec<(String, GeoPoint)> {
        self.keys
            .iter()
            .filter(|(_, state)| state.in_query)
            .map(|(key, state)| (key.clone(), state.location))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn key_state(&self, key: &str) -> Option<&KeyState> {
        self.keys.get(key)
    }

    /// Record the subscription opened for `range`.
    pub(crate) fn attach(&mut self, range: &BucketRange, id: SubscriptionId) {
        if let Some(slot) = self.buckets.as_mut().and_then(|b| b.get_mut(range)) {
            *slot = Some(id);
        }
    }

    /// Whether `id` is the live subscription for `range`. Anything else is a
    /// late delivery from a cancelled subscription.
    pub(crate) fn is_current(&self, range: &BucketRange, id: SubscriptionId) -> bool {
        self.buckets
            .as_ref()
            .and_then(|b| b.get(range))
            .is_some_and(|slot| *slot == Some(id))
    }

    pub(crate) fn add_listener(&mut self, listener: Arc<dyn GeoQueryEventListener>) -> Result<Effects> {
        let id = ListenerId::of(&listener);
        if self.listeners.iter().any(|(existing, _)| *existing == id) {
            return Err(GeoError::DuplicateListener);
        }
        self.listeners.push((id, listener.clone()));

        if self.buckets.is_none() {
            return self.setup();
        }

        let mut effects = Effects::default();
        for (key, location) in self.keys_in_query() {
            effects.notifications.push(Notification {
                listener: listener.clone(),
                event: GeoQueryEvent::KeyEntered { key, location },
            });
        }
        if self.phase() == QueryPhase::Ready {
            effects.notifications.push(Notification {
                listener,
                event: GeoQueryEvent::Ready,
            });
        }
        Ok(effects)
    }

    pub(crate) fn remove_listener(&mut self, id: ListenerId) -> Result<Effects> {
        let position = self
            .listeners
            .iter()
            .position(|(existing, _)| *existing == id)
            .ok_or(GeoError::UnknownListener)?;
        self.listeners.remove(position);

        if self.listeners.is_empty() {
            Ok(self.reset())
        } else {
            Ok(Effects::default())
        }
    }

    pub(crate) fn remove_all_listeners(&mut self) -> Effects {
        self.listeners.clear();
        self.reset()
    }

    /// Move and/or resize the circle. Inputs are already validated.
    pub(crate) fn set_location(&mut self, center: GeoPoint, radius: f64) -> Result<Effects> {
        self.center = center;
        self.radius = radius;
        if self.listeners.is_empty() {
            Ok(Effects::default())
        } else {
            self.setup()
        }
    }

    /// Cancel every subscription and forget every key.
    pub(crate) fn reset(&mut self) -> Effects {
        let mut effects = Effects::default();
        if let Some(buckets) = self.buckets.take() {
            effects.close.extend(buckets.into_values().flatten());
        }
        self.outstanding.clear();
        self.keys.clear();
        self.ready_fired = false;
        effects
    }

    /// Bring the bucket set in line with the current circle.
    fn setup(&mut self) -> Result<Effects> {
        let planned = plan_buckets(&self.center, self.radius, self.precision)?;
        let mut effects = Effects::default();

        let old = self.buckets.take().unwrap_or_default();
        let mut buckets = BTreeMap::new();
        for (range, subscription) in old {
            if planned.contains(&range) {
                buckets.insert(range, subscription);
            } else {
                self.outstanding.remove(&range);
                effects.close.extend(subscription);
            }
        }
        for range in planned {
            if !buckets.contains_key(&range) {
                self.outstanding.insert(range.clone());
                effects.open.push(range.clone());
                buckets.insert(range, None);
            }
        }
        self.buckets = Some(buckets);

        log::debug!(
            "query {} r={}m: {} bucket(s), {} opened, {} closed",
            self.center,
            self.radius,
            self.buckets.as_ref().map_or(0, BTreeMap::len),
            effects.open.len(),
            effects.close.len()
        );

        if !effects.open.is_empty() {
            self.ready_fired = false;
        }

        // Geometry alone can move keys across the circle's edge
        let known: Vec<(String, GeoPoint)> = self
            .keys
            .iter()
            .map(|(key, state)| (key.clone(), state.location))
            .collect();
        for (key, location) in known {
            self.classify(&key, location, &mut effects)?;
        }

        let before = self.keys.len();
        let buckets = self.buckets.as_ref();
        self.keys.retain(|_, state| {
            buckets.is_some_and(|b| b.keys().any(|range| range.contains(&state.geohash)))
        });
        if self.keys.len() != before {
            log::trace!("purged {} key(s) outside the bucket set", before - self.keys.len());
        }

        self.check_ready(&mut effects);
        Ok(effects)
    }

    fn covers(&self, hash: &Geohash) -> bool {
        self.buckets
            .as_ref()
            .is_some_and(|b| b.keys().any(|range| range.contains(hash)))
    }

    /// A child was added to or changed in one of the buckets.
    pub(crate) fn update_location(&mut self, key: &str, location: GeoPoint) -> Result<Effects> {
        let mut effects = Effects::default();
        self.classify(key, location, &mut effects)?;
        Ok(effects)
    }

    /// Classify an observation of `key` at `location` and store it.
    fn classify(&mut self, key: &str, location: GeoPoint, effects: &mut Effects) -> Result<()> {
        let previous = self.keys.get(key);
        let is_new = previous.is_none();
        let was_in_query = previous.is_some_and(|state| state.in_query);
        let changed = previous.is_some_and(|state| state.location != location);
        let now_in_query = is_in_query(&location, &self.center, self.radius);

        let event = if (is_new || !was_in_query) && now_in_query {
            Some(GeoQueryEvent::KeyEntered {
                key: key.to_string(),
                location,
            })
        } else if !is_new && changed && now_in_query {
            Some(GeoQueryEvent::KeyMoved {
                key: key.to_string(),
                location,
            })
        } else if was_in_query && !now_in_query {
            Some(GeoQueryEvent::KeyExited {
                key: key.to_string(),
            })
        } else {
            None
        };

        if let Some(event) = event {
            log::trace!("{:?}", event);
            self.broadcast(event, effects);
        }

        let geohash = Geohash::encode(&location, self.precision)?;
        self.keys.insert(
            key.to_string(),
            KeyState {
                location,
                geohash,
                in_query: now_in_query,
            },
        );
        Ok(())
    }

    /// A child left one of the buckets. The value may just have been
    /// rewritten elsewhere, so its current value has to be read back first.
    pub(crate) fn child_removed(&mut self, key: &str) -> Effects {
        let mut effects = Effects::default();
        if self.keys.contains_key(key) {
            effects.lookups.push(key.to_string());
        }
        effects
    }

    /// Finish a remove once the current value of `key` is known
    /// (`None` when absent or unreadable).
    pub(crate) fn reconcile_removed(&mut self, key: &str, current: Option<GeoPoint>) -> Result<Effects> {
        let mut effects = Effects::default();
        let still_covered = match current {
            Some(location) => self.covers(&Geohash::encode(&location, self.precision)?),
            None => false,
        };
        if still_covered {
            return Ok(effects);
        }

        if let Some(state) = self.keys.remove(key) {
            if state.in_query {
                self.broadcast(
                    GeoQueryEvent::KeyExited {
                        key: key.to_string(),
                    },
                    &mut effects,
                );
            }
        }
        Ok(effects)
    }

    /// A bucket delivered its initial snapshot.
    pub(crate) fn bucket_synced(&mut self, range: &BucketRange) -> Effects {
        let mut effects = Effects::default();
        if self.outstanding.remove(range) {
            log::trace!("bucket {} synced, {} outstanding", range, self.outstanding.len());
            self.check_ready(&mut effects);
        }
        effects
    }

    /// A bucket subscription failed. It stays outstanding.
    pub(crate) fn subscription_failed(&mut self, error: &StoreError) -> Effects {
        let mut effects = Effects::default();
        self.broadcast(GeoQueryEvent::Error(error.clone()), &mut effects);
        effects
    }

    fn check_ready(&mut self, effects: &mut Effects) {
        if self.phase() == QueryPhase::Ready && !self.ready_fired {
            self.ready_fired = true;
            self.broadcast(GeoQueryEvent::Ready, effects);
        }
    }

    fn broadcast(&self, event: GeoQueryEvent, effects: &mut Effects) {
        for (_, listener) in &self.listeners {
            effects.notifications.push(Notification {
                listener: listener.clone(),
                event: event.clone(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::listener::ChannelListener;

    fn point(lat: f64, lon: f64) -> GeoPoint {
        GeoPoint::new(lat, lon).unwrap()
    }

    fn events(effects: &Effects) -> Vec<GeoQueryEvent> {
        effects.notifications.iter().map(|n| n.event.clone()).collect()
    }

    fn listener() -> Arc<dyn GeoQueryEventListener> {
        let (listener, _events) = ChannelListener::new();
        listener
    }

    /// A state with one listener whose buckets are all attached and synced.
    fn ready_state(center: GeoPoint, radius: f64) -> QueryState {
        let mut state = QueryState::new(10, center, radius);
        let effects = state.add_listener(listener()).unwrap();
        for (n, range) in effects.open.iter().enumerate() {
            state.attach(range, SubscriptionId(n as u64 + 1));
        }
        for range in &effects.open {
            state.bucket_synced(range);
        }
        assert_eq!(state.phase(), QueryPhase::Ready);
        state
    }

    #[test]
    fn test_first_listener_opens_buckets() {
        let mut state = QueryState::new(10, point(37.0, -122.0), 500.0);
        assert_eq!(state.phase(), QueryPhase::Unconfigured);

        let effects = state.add_listener(listener()).unwrap();
        assert!(!effects.open.is_empty());
        assert!(effects.notifications.is_empty());
        assert_eq!(state.phase(), QueryPhase::Loading);
        assert_eq!(state.active_buckets().len(), effects.open.len());
    }

    #[test]
    fn test_duplicate_and_unknown_listeners() {
        let mut state = QueryState::new(10, point(0.0, 0.0), 100.0);
        let first = listener();
        state.add_listener(first.clone()).unwrap();
        assert!(matches!(
            state.add_listener(first.clone()),
            Err(GeoError::DuplicateListener)
        ));

        let stranger = listener();
        assert!(matches!(
            state.remove_listener(ListenerId::of(&stranger)),
            Err(GeoError::UnknownListener)
        ));
        assert_eq!(state.listener_count(), 1);
    }

    #[test]
    fn test_ready_fires_once_after_all_buckets_sync() {
        let mut state = QueryState::new(10, point(37.0, -122.0), 5_000.0);
        let effects = state.add_listener(listener()).unwrap();
        let ranges = effects.open.clone();

        let mut readies = 0;
        for range in &ranges {
            let effects = state.bucket_synced(range);
            readies += events(&effects)
                .iter()
                .filter(|e| **e == GeoQueryEvent::Ready)
                .count();
        }
        assert_eq!(readies, 1);

        // A repeated completion signal changes nothing
        assert!(state.bucket_synced(&ranges[0]).is_empty());
    }

    #[test]
    fn test_classification() {
        let center = point(37.0, -122.0);
        let mut state = ready_state(center, 500.0);

        let inside = point(37.0001, -122.0001);
        let inside_elsewhere = point(37.0002, -121.9998);
        let outside = point(37.1, -122.0);

        // New key outside: remembered silently
        assert!(state.update_location("far", outside).unwrap().is_empty());
        assert!(!state.key_state("far").unwrap().in_query);

        let e = state.update_location("k", inside).unwrap();
        assert_eq!(
            events(&e),
            vec![GeoQueryEvent::KeyEntered { key: "k".into(), location: inside }]
        );

        // Same location again: nothing
        assert!(state.update_location("k", inside).unwrap().is_empty());

        let e = state.update_location("k", inside_elsewhere).unwrap();
        assert_eq!(
            events(&e),
            vec![GeoQueryEvent::KeyMoved { key: "k".into(), location: inside_elsewhere }]
        );

        let e = state.update_location("k", outside).unwrap();
        assert_eq!(events(&e), vec![GeoQueryEvent::KeyExited { key: "k".into() }]);

        // Moving around outside: nothing
        assert!(state.update_location("k", point(37.2, -122.0)).unwrap().is_empty());

        let e = state.update_location("k", inside).unwrap();
        assert_eq!(
            events(&e),
            vec![GeoQueryEvent::KeyEntered { key: "k".into(), location: inside }]
        );
    }

    #[test]
    fn test_child_removed_requires_lookup() {
        let mut state = ready_state(point(37.0, -122.0), 500.0);
        assert!(state.child_removed("unknown").is_empty());

        state.update_location("k", point(37.0001, -122.0001)).unwrap();
        let effects = state.child_removed("k");
        assert_eq!(effects.lookups, vec!["k".to_string()]);
        assert!(effects.notifications.is_empty());
        assert!(state.key_state("k").is_some());
    }

    #[test]
    fn test_reconcile_removed() {
        let mut state = ready_state(point(37.0, -122.0), 500.0);
        let inside = point(37.0001, -122.0001);
        state.update_location("k", inside).unwrap();

        // Rewritten, still covered: benign race, untouched
        let effects = state.reconcile_removed("k", Some(inside)).unwrap();
        assert!(effects.is_empty());
        assert!(state.key_state("k").is_some());

        // Gone for real
        let effects = state.reconcile_removed("k", None).unwrap();
        assert_eq!(events(&effects), vec![GeoQueryEvent::KeyExited { key: "k".into() }]);
        assert!(state.key_state("k").is_none());

        // Moved far away and not in query: purged silently
        state.update_location("o", point(37.1, -122.0)).unwrap();
        let effects = state.reconcile_removed("o", Some(point(0.0, 0.0))).unwrap();
        assert!(effects.is_empty());
        assert!(state.key_state("o").is_none());
    }

    #[test]
    fn test_recenter_reclassifies_and_purges() {
        let center = point(37.0, -122.0);
        let mut state = ready_state(center, 500.0);
        state.update_location("k", point(37.0001, -122.0001)).unwrap();

        let effects = state.set_location(point(40.0, -74.0), 500.0).unwrap();
        assert!(!effects.open.is_empty());
        assert!(!effects.close.is_empty());
        assert_eq!(events(&effects), vec![GeoQueryEvent::KeyExited { key: "k".into() }]);
        assert!(state.key_state("k").is_none());
        assert_eq!(state.phase(), QueryPhase::Loading);
    }

    #[test]
    fn test_same_location_is_idempotent() {
        let center = point(37.0, -122.0);
        let mut state = ready_state(center, 500.0);
        state.update_location("k", point(37.0001, -122.0001)).unwrap();

        let effects = state.set_location(center, 500.0).unwrap();
        assert!(effects.is_empty());
        assert_eq!(state.phase(), QueryPhase::Ready);
    }

    #[test]
    fn test_growing_radius_enters_known_keys() {
        let center = point(37.0, -122.0);
        let mut state = ready_state(center, 500.0);
        let near = point(37.0065, -122.0);
        state.update_location("near", near).unwrap();
        assert!(!state.key_state("near").unwrap().in_query);

        let effects = state.set_location(center, 1_000.0).unwrap();
        assert!(events(&effects).contains(&GeoQueryEvent::KeyEntered {
            key: "near".into(),
            location: near
        }));
    }

    #[test]
    fn test_late_listener_gets_replay() {
        let center = point(37.0, -122.0);
        let mut state = ready_state(center, 500.0);
        let inside = point(37.0001, -122.0001);
        state.update_location("k", inside).unwrap();
        state.update_location("far", point(37.1, -122.0)).unwrap();

        let effects = state.add_listener(listener()).unwrap();
        assert!(effects.open.is_empty());
        assert_eq!(
            events(&effects),
            vec![
                GeoQueryEvent::KeyEntered { key: "k".into(), location: inside },
                GeoQueryEvent::Ready,
            ]
        );
    }

    #[test]
    fn test_last_listener_resets() {
        let mut state = QueryState::new(10, point(37.0, -122.0), 500.0);
        let only = listener();
        let opened = state.add_listener(only.clone()).unwrap().open;
        for (n, range) in opened.iter().enumerate() {
            state.attach(range, SubscriptionId(n as u64));
        }
        state.update_location("k", point(37.0001, -122.0001)).unwrap();

        let effects = state.remove_listener(ListenerId::of(&only)).unwrap();
        assert_eq!(effects.close.len(), opened.len());
        assert_eq!(state.phase(), QueryPhase::Unconfigured);
        assert!(state.key_state("k").is_none());
        assert!(!state.is_current(&opened[0], SubscriptionId(0)));
    }

    #[test]
    fn test_failure_broadcast_keeps_bucket_outstanding() {
        let mut state = QueryState::new(10, point(37.0, -122.0), 500.0);
        state.add_listener(listener()).unwrap();
        state.add_listener(listener()).unwrap();

        let error = StoreError::new(-3, "permission denied");
        let effects = state.subscription_failed(&error);
        assert_eq!(
            events(&effects),
            vec![GeoQueryEvent::Error(error.clone()), GeoQueryEvent::Error(error)]
        );
        assert_eq!(state.phase(), QueryPhase::Loading);
    }
}
