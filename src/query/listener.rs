//! Listener API for live queries.

use crate::storage::StoreError;
use crate::types::GeoPoint;
use std::sync::Arc;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// Receives the events of a [`GeoQuery`](crate::GeoQuery).
///
/// Callbacks run on the query's event target, one at a time and in the order
/// the underlying state changes happened. They never run while the query's
/// internal lock is held, so calling back into the query is allowed.
pub trait GeoQueryEventListener: Send + Sync {
    /// A key moved into the query circle, or was already inside it when the
    /// listener was added.
    fn on_key_entered(&self, key: &str, location: GeoPoint);

    /// A key inside the circle left it or was deleted.
    fn on_key_exited(&self, key: &str);

    /// A key inside the circle moved and is still inside.
    fn on_key_moved(&self, key: &str, location: GeoPoint);

    /// Every bucket subscription has delivered its initial snapshot.
    fn on_ready(&self);

    /// One bucket subscription failed. The query keeps running.
    fn on_error(&self, error: &StoreError) {
        log::warn!("geo query subscription failed: {}", error);
    }
}

/// Owned form of a listener callback.
#[derive(Debug, Clone, PartialEq)]
pub enum GeoQueryEvent {
    KeyEntered { key: String, location: GeoPoint },
    KeyExited { key: String },
    KeyMoved { key: String, location: GeoPoint },
    Ready,
    Error(StoreError),
}

impl GeoQueryEvent {
    /// Invoke the matching callback on `listener`.
    pub fn deliver(&self, listener: &dyn GeoQueryEventListener) {
        match self {
            GeoQueryEvent::KeyEntered { key, location } => listener.on_key_entered(key, *location),
            GeoQueryEvent::KeyExited { key } => listener.on_key_exited(key),
            GeoQueryEvent::KeyMoved { key, location } => listener.on_key_moved(key, *location),
            GeoQueryEvent::Ready => listener.on_ready(),
            GeoQueryEvent::Error(error) => listener.on_error(error),
        }
    }
}

/// Listener that forwards every event into a channel.
///
/// # Examples
///
/// ```rust
/// use spatio_live::query::{ChannelListener, GeoQueryEvent, GeoQueryEventListener};
///
/// let (listener, mut events) = ChannelListener::new();
/// listener.on_ready();
/// assert_eq!(events.try_recv().unwrap(), GeoQueryEvent::Ready);
/// ```
#[derive(Debug)]
pub struct ChannelListener {
    sender: UnboundedSender<GeoQueryEvent>,
}

impl ChannelListener {
    pub fn new() -> (Arc<Self>, UnboundedReceiver<GeoQueryEvent>) {
        let (sender, receiver) = unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }

    fn forward(&self, event: GeoQueryEvent) {
        // Receiver gone: nobody is interested any more
        let _ = self.sender.send(event);
    }
}

impl GeoQueryEventListener for ChannelListener {
    fn on_key_entered(&self, key: &str, location: GeoPoint) {
        self.forward(GeoQueryEvent::KeyEntered {
            key: key.to_string(),
            location,
        });
    }

    fn on_key_exited(&self, key: &str) {
        self.forward(GeoQueryEvent::KeyExited {
            key: key.to_string(),
        });
    }

    fn on_key_moved(&self, key: &str, location: GeoPoint) {
        self.forward(GeoQueryEvent::KeyMoved {
            key: key.to_string(),
            location,
        });
    }

    fn on_ready(&self) {
        self.forward(GeoQueryEvent::Ready);
    }

    fn on_error(&self, error: &StoreError) {
        self.forward(GeoQueryEvent::Error(error.clone()));
    }
}

/// Registration identity of a listener: the address of its allocation.
///
/// Two clones of the same `Arc` share an id; two separately allocated
/// listeners never do while both are alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(usize);

impl ListenerId {
    pub(crate) fn of<L: GeoQueryEventListener + ?Sized>(listener: &Arc<L>) -> Self {
        ListenerId(Arc::as_ptr(listener) as *const () as usize)
    }
}
