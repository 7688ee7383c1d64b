//! Live "who is near here" queries over keyed locations in an ordered store.
//!
//! Locations are stored under their geohash so a circle can be served by a
//! handful of range reads. A [`GeoQuery`] keeps those reads open, follows the
//! circle as it moves and tells its listeners which keys enter, leave or
//! move inside it.
//!
//! ```rust
//! use spatio_live::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> spatio_live::Result<()> {
//! let index = GeoIndex::new(Arc::new(MemoryStore::new()))?;
//! index.set_location("bike-12", GeoPoint::new(51.5079, -0.0877)?).await?;
//!
//! let query = index.query_at_location(GeoPoint::new(51.5074, -0.0878)?, 250.0)?;
//! let (listener, mut events) = ChannelListener::new();
//! query.add_listener(listener)?;
//!
//! while let Some(event) = events.recv().await {
//!     if event == GeoQueryEvent::Ready {
//!         break;
//!     }
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod compute;
pub mod error;
pub mod index;
pub mod query;
pub mod spatial;
pub mod storage;
pub mod types;

pub use builder::GeoIndexBuilder;
pub use error::{GeoError, Result};
pub use index::GeoIndex;

pub use compute::{BucketRange, CellBounds, Geohash, plan_buckets};

pub use query::{
    ChannelListener, EventTarget, GeoQuery, GeoQueryEvent, GeoQueryEventListener, QueryPhase,
    SerialEventTarget,
};

pub use spatial::{distance, is_in_query};

pub use storage::{MemoryStore, OrderedStore, RangeEvent, StoreError, Subscription, SubscriptionId};

pub use types::{Config, GeoPoint};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoError, GeoIndex, GeoIndexBuilder, GeoQuery, Result};

    pub use crate::{Config, GeoPoint, Geohash};

    pub use crate::{ChannelListener, GeoQueryEvent, GeoQueryEventListener, QueryPhase};

    pub use crate::{MemoryStore, OrderedStore, StoreError};

    pub use crate::spatial::{distance, is_in_query};
}
