//! Shared helpers for integration tests.
#![allow(dead_code)]

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use serde_json::Value;
use spatio_live::storage::encode_location;
use spatio_live::{
    Config, GeoPoint, GeoQueryEvent, Geohash, OrderedStore, RangeEvent, StoreError, Subscription,
    SubscriptionId,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn point(lat: f64, lon: f64) -> GeoPoint {
    GeoPoint::new(lat, lon).expect("valid test coordinate")
}

/// Stored value for `location` under the default configuration.
pub fn located(location: GeoPoint) -> Value {
    encode_location(&location, &Config::default()).expect("encodable test coordinate")
}

pub fn hash(location: GeoPoint) -> Geohash {
    Geohash::encode(&location, Config::default().geohash_precision).expect("encodable")
}

/// Wait for the next listener event, failing the test after two seconds.
pub async fn next_event(events: &mut UnboundedReceiver<GeoQueryEvent>) -> GeoQueryEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for a query event")
        .expect("listener channel closed")
}

/// Collect events up to and including the next `Ready`.
pub async fn events_until_ready(events: &mut UnboundedReceiver<GeoQueryEvent>) -> Vec<GeoQueryEvent> {
    let mut seen = Vec::new();
    loop {
        let event = next_event(events).await;
        let done = event == GeoQueryEvent::Ready;
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Give spawned pumps, lookups and the event target time to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Everything already delivered, without waiting.
pub fn drain(events: &mut UnboundedReceiver<GeoQueryEvent>) -> Vec<GeoQueryEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

pub fn entered_keys(events: &[GeoQueryEvent]) -> Vec<String> {
    let mut keys: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            GeoQueryEvent::KeyEntered { key, .. } => Some(key.clone()),
            _ => None,
        })
        .collect();
    keys.sort();
    keys
}

pub fn exited_keys(events: &[GeoQueryEvent]) -> Vec<String> {
    let mut keys: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            GeoQueryEvent::KeyExited { key } => Some(key.clone()),
            _ => None,
        })
        .collect();
    keys.sort();
    keys
}

struct ScriptedRange {
    start: String,
    end: String,
    sender: UnboundedSender<RangeEvent>,
}

#[derive(Default)]
struct ScriptedState {
    next_id: u64,
    live: BTreeMap<SubscriptionId, ScriptedRange>,
    cancelled: BTreeMap<SubscriptionId, ScriptedRange>,
    values: HashMap<String, Value>,
    lookup_error: Option<StoreError>,
    lookups: Vec<String>,
}

/// Store whose subscriptions only deliver what the test sends.
///
/// Cancelled subscriptions keep their channel so a test can deliver late
/// events after `unsubscribe`.
#[derive(Default)]
pub struct ScriptedStore {
    state: Mutex<ScriptedState>,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Live subscriptions as `(id, start, end)`.
    pub fn live(&self) -> Vec<(SubscriptionId, String, String)> {
        self.state
            .lock()
            .live
            .iter()
            .map(|(id, r)| (*id, r.start.clone(), r.end.clone()))
            .collect()
    }

    pub fn cancelled(&self) -> Vec<SubscriptionId> {
        self.state.lock().cancelled.keys().copied().collect()
    }

    /// Live subscription whose range holds `location`'s geohash.
    pub fn covering(&self, location: GeoPoint) -> SubscriptionId {
        let hash = hash(location);
        let state = self.state.lock();
        state
            .live
            .iter()
            .find(|(_, r)| r.start.as_str() <= hash.as_str() && hash.as_str() <= r.end.as_str())
            .map(|(id, _)| *id)
            .expect("no live subscription covers location")
    }

    /// Deliver `event` on subscription `id`, live or cancelled.
    pub fn send(&self, id: SubscriptionId, event: RangeEvent) {
        let state = self.state.lock();
        let range = state
            .live
            .get(&id)
            .or_else(|| state.cancelled.get(&id))
            .expect("unknown subscription");
        let _ = range.sender.send(event);
    }

    /// Deliver `ChildAdded` for `key` at `location` on the covering subscription.
    pub fn add(&self, key: &str, location: GeoPoint) {
        let id = self.covering(location);
        self.send(
            id,
            RangeEvent::ChildAdded {
                key: key.to_string(),
                value: located(location),
            },
        );
    }

    /// Signal snapshot completion on every live subscription.
    pub fn complete_all(&self) {
        let state = self.state.lock();
        for range in state.live.values() {
            let _ = range.sender.send(RangeEvent::InitialSnapshotComplete);
        }
    }

    /// What `get_once(key)` returns from now on.
    pub fn set_current(&self, key: &str, value: Option<Value>) {
        let mut state = self.state.lock();
        match value {
            Some(value) => state.values.insert(key.to_string(), value),
            None => state.values.remove(key),
        };
    }

    /// Make every `get_once` fail (`Some`) or succeed again (`None`).
    pub fn fail_lookups(&self, error: Option<StoreError>) {
        self.state.lock().lookup_error = error;
    }

    /// Keys passed to `get_once` so far.
    pub fn lookups(&self) -> Vec<String> {
        self.state.lock().lookups.clone()
    }
}

impl OrderedStore for ScriptedStore {
    fn subscribe_range(&self, _order_field: &str, start: &str, end: &str) -> Subscription {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        let (sender, events) = unbounded_channel();
        state.live.insert(
            id,
            ScriptedRange {
                start: start.to_string(),
                end: end.to_string(),
                sender,
            },
        );
        Subscription { id, events }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut state = self.state.lock();
        if let Some(range) = state.live.remove(&id) {
            state.cancelled.insert(id, range);
        }
    }

    fn get_once(&self, key: &str) -> BoxFuture<'static, Result<Option<Value>, StoreError>> {
        let mut state = self.state.lock();
        state.lookups.push(key.to_string());
        let result = match &state.lookup_error {
            Some(error) => Err(error.clone()),
            None => Ok(state.values.get(key).cloned()),
        };
        future::ready(result).boxed()
    }

    fn set_value(&self, key: &str, value: Option<Value>) -> BoxFuture<'static, Result<(), StoreError>> {
        self.set_current(key, value);
        future::ready(Ok(())).boxed()
    }
}
