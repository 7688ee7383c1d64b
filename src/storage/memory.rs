//! In-process ordered store.
//!
//! Keeps every value in a `BTreeMap` and serves live range reads by diffing
//! each write against every open subscription. Useful for tests, demos and
//! single-process deployments that want live queries without a remote backend.
//!
//! Writes never wait on readers, so each subscription's queue is unbounded
//! and grows while its query falls behind.

use super::{OrderedStore, RangeEvent, StoreError, Subscription, SubscriptionId, order_value};
use futures::FutureExt;
use futures::future::{self, BoxFuture};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

/// Memory store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of keys
    pub key_count: usize,
    /// Range subscriptions currently open
    pub subscription_count: usize,
    /// Number of writes performed
    pub operations_count: u64,
}

struct RangeSubscriber {
    order_field: String,
    start: String,
    end: String,
    sender: UnboundedSender<RangeEvent>,
}

impl RangeSubscriber {
    fn covers(&self, value: &Value) -> bool {
        order_value(value, &self.order_field)
            .is_some_and(|v| self.start.as_str() <= v && v <= self.end.as_str())
    }

    fn covers_opt(&self, value: Option<&Value>) -> bool {
        value.is_some_and(|v| self.covers(v))
    }
}

#[derive(Default)]
struct MemoryState {
    data: BTreeMap<String, Value>,
    subscriptions: FxHashMap<SubscriptionId, RangeSubscriber>,
    next_id: u64,
    operations_count: u64,
}

/// In-memory [`OrderedStore`].
///
/// All operations complete immediately; returned futures are already resolved.
///
/// # Examples
///
/// ```rust
/// use spatio_live::storage::{MemoryStore, OrderedStore, RangeEvent};
/// use serde_json::json;
///
/// # futures::executor::block_on(async {
/// let store = MemoryStore::new();
/// store.set_value("a", Some(json!({ "g": "9q8yy", "l": [37.0, -122.0] }))).await?;
///
/// let mut sub = store.subscribe_range("g", "9q8", "9q8~");
/// assert!(matches!(sub.events.try_recv(), Ok(RangeEvent::ChildAdded { .. })));
/// assert_eq!(sub.events.try_recv(), Ok(RangeEvent::InitialSnapshotComplete));
/// # Ok::<(), spatio_live::storage::StoreError>(())
/// # }).unwrap();
/// ```
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.state.lock().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().data.is_empty()
    }

    /// Ids of the subscriptions still open, sorted.
    pub fn active_subscriptions(&self) -> Vec<SubscriptionId> {
        let mut ids: Vec<_> = self.state.lock().subscriptions.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Report `error` on every open subscription.
    ///
    /// Subscriptions stay registered and keep receiving writes; failure
    /// handling is up to the consumer.
    pub fn fail_subscriptions(&self, error: StoreError) {
        let state = self.state.lock();
        for subscriber in state.subscriptions.values() {
            let _ = subscriber.sender.send(RangeEvent::Failed(error.clone()));
        }
    }

    pub fn stats(&self) -> StoreStats {
        let state = self.state.lock();
        StoreStats {
            key_count: state.data.len(),
            subscription_count: state.subscriptions.len(),
            operations_count: state.operations_count,
        }
    }

    fn write(&self, key: &str, value: Option<Value>) {
        let mut state = self.state.lock();
        state.operations_count += 1;

        let previous = match &value {
            Some(v) => state.data.insert(key.to_string(), v.clone()),
            None => state.data.remove(key),
        };

        let mut closed = Vec::new();
        for (id, subscriber) in &state.subscriptions {
            let was_in = subscriber.covers_opt(previous.as_ref());
            let is_in = subscriber.covers_opt(value.as_ref());

            let event = match (&value, was_in, is_in) {
                (Some(v), false, true) => RangeEvent::ChildAdded {
                    key: key.to_string(),
                    value: v.clone(),
                },
                (Some(v), true, true) if previous.as_ref() != Some(v) => RangeEvent::ChildChanged {
                    key: key.to_string(),
                    value: v.clone(),
                },
                (_, true, false) => RangeEvent::ChildRemoved {
                    key: key.to_string(),
                },
                _ => continue,
            };

            if subscriber.sender.send(event).is_err() {
                closed.push(*id);
            }
        }

        // Receivers dropped without unsubscribing
        for id in closed {
            state.subscriptions.remove(&id);
        }
    }
}

impl OrderedStore for MemoryStore {
    fn subscribe_range(&self, order_field: &str, start: &str, end: &str) -> Subscription {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = SubscriptionId(state.next_id);
        let (sender, events) = unbounded_channel();

        let subscriber = RangeSubscriber {
            order_field: order_field.to_string(),
            start: start.to_string(),
            end: end.to_string(),
            sender,
        };

        let mut snapshot: Vec<(&str, &String, &Value)> = state
            .data
            .iter()
            .filter(|(_, value)| subscriber.covers(value))
            .filter_map(|(key, value)| order_value(value, order_field).map(|o| (o, key, value)))
            .collect();
        snapshot.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, key, value) in snapshot {
            let _ = subscriber.sender.send(RangeEvent::ChildAdded {
                key: key.clone(),
                value: value.clone(),
            });
        }
        let _ = subscriber.sender.send(RangeEvent::InitialSnapshotComplete);

        state.subscriptions.insert(id, subscriber);
        Subscription { id, events }
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subscriptions.remove(&id);
    }

    fn get_once(&self, key: &str) -> BoxFuture<'static, Result<Option<Value>, StoreError>> {
        let value = self.state.lock().data.get(key).cloned();
        future::ready(Ok(value)).boxed()
    }

    fn set_value(&self, key: &str, value: Option<Value>) -> BoxFuture<'static, Result<(), StoreError>> {
        self.write(key, value);
        future::ready(Ok(())).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn located(hash: &str) -> Value {
        json!({ "g": hash, "l": [0.0, 0.0] })
    }

    fn drain(events: &mut UnboundedReceiver<RangeEvent>) -> Vec<RangeEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn write(store: &MemoryStore, key: &str, value: Option<Value>) {
        futures::executor::block_on(store.set_value(key, value)).unwrap();
    }

    #[test]
    fn test_memory_store_basic_ops() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        write(&store, "a", Some(located("s0000")));
        assert_eq!(store.len(), 1);

        let value = futures::executor::block_on(store.get_once("a")).unwrap();
        assert_eq!(value, Some(located("s0000")));

        write(&store, "a", None);
        assert!(store.is_empty());
        assert_eq!(futures::executor::block_on(store.get_once("a")).unwrap(), None);

        let stats = store.stats();
        assert_eq!(stats.key_count, 0);
        assert_eq!(stats.operations_count, 2);
    }

    #[test]
    fn test_snapshot_in_order_field_order() {
        let store = MemoryStore::new();
        write(&store, "z", Some(located("9q8a")));
        write(&store, "a", Some(located("9q8c")));
        write(&store, "m", Some(located("9q8b")));
        write(&store, "out", Some(located("9q9")));
        write(&store, "nohash", Some(json!({ "l": [0.0, 0.0] })));

        let mut sub = store.subscribe_range("g", "9q8", "9q8~");
        let keys: Vec<_> = drain(&mut sub.events)
            .into_iter()
            .filter_map(|e| match e {
                RangeEvent::ChildAdded { key, .. } => Some(key),
                RangeEvent::InitialSnapshotComplete => Some("<done>".to_string()),
                _ => None,
            })
            .collect();
        assert_eq!(keys, vec!["z", "m", "a", "<done>"]);
    }

    #[test]
    fn test_range_bounds_are_inclusive() {
        let store = MemoryStore::new();
        write(&store, "start", Some(located("b")));
        write(&store, "end", Some(located("c")));
        write(&store, "after", Some(located("c0")));

        let mut sub = store.subscribe_range("g", "b", "c");
        assert_eq!(drain(&mut sub.events).len(), 3);
    }

    #[test]
    fn test_writes_diff_into_events() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe_range("g", "9q8", "9q8~");
        assert_eq!(drain(&mut sub.events), vec![RangeEvent::InitialSnapshotComplete]);

        write(&store, "k", Some(located("9q8yy")));
        write(&store, "k", Some(located("9q8yy")));
        write(&store, "k", Some(located("9q8zz")));
        write(&store, "k", Some(located("9q9")));
        write(&store, "k", Some(located("9q8aa")));
        write(&store, "k", None);
        write(&store, "other", Some(located("dr5")));

        assert_eq!(
            drain(&mut sub.events),
            vec![
                RangeEvent::ChildAdded { key: "k".into(), value: located("9q8yy") },
                RangeEvent::ChildChanged { key: "k".into(), value: located("9q8zz") },
                RangeEvent::ChildRemoved { key: "k".into() },
                RangeEvent::ChildAdded { key: "k".into(), value: located("9q8aa") },
                RangeEvent::ChildRemoved { key: "k".into() },
            ]
        );
    }

    #[test]
    fn test_unsubscribe_and_failures() {
        let store = MemoryStore::new();
        let mut first = store.subscribe_range("g", "a", "b");
        let mut second = store.subscribe_range("g", "a", "b");
        assert_eq!(store.active_subscriptions(), vec![first.id, second.id]);

        store.unsubscribe(first.id);
        store.unsubscribe(SubscriptionId(999));
        assert_eq!(store.active_subscriptions(), vec![second.id]);

        drain(&mut first.events);
        drain(&mut second.events);
        let error = StoreError::new(-3, "permission denied");
        store.fail_subscriptions(error.clone());
        write(&store, "k", Some(located("a1")));

        assert!(drain(&mut first.events).is_empty());
        assert_eq!(
            drain(&mut second.events),
            vec![
                RangeEvent::Failed(error),
                RangeEvent::ChildAdded { key: "k".into(), value: located("a1") },
            ]
        );
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let store = MemoryStore::new();
        let sub = store.subscribe_range("g", "a", "b");
        drop(sub);
        assert_eq!(store.stats().subscription_count, 1);

        write(&store, "k", Some(located("a1")));
        assert_eq!(store.stats().subscription_count, 0);
    }
}
