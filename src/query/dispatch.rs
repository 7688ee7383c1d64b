//! Where listener callbacks run.
//!
//! The query engine builds notifications while holding its lock and hands
//! them to an [`EventTarget`]. The target must run jobs one at a time in the
//! order they were posted.

use crate::error::{GeoError, Result};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};

/// A deferred listener callback.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Single-queue FIFO executor for listener callbacks.
///
/// `post` is called with the query lock held, so it must neither block nor
/// drop jobs. Implementations that need back-pressure should apply it
/// downstream of the queue, e.g. in the listener.
pub trait EventTarget: Send + Sync {
    /// Queue `job`. Must not run it inline.
    fn post(&self, job: Job);
}

/// Default [`EventTarget`]: one tokio task draining an unbounded queue.
///
/// The queue has no bound: a listener slower than the event rate makes it
/// grow without limit. A job that panics is logged and skipped; later jobs
/// still run.
#[derive(Debug, Clone)]
pub struct SerialEventTarget {
    sender: UnboundedSender<Job>,
}

impl SerialEventTarget {
    /// Spawn on the current tokio runtime.
    pub fn spawn() -> Result<Arc<Self>> {
        let handle = Handle::try_current().map_err(|e| GeoError::NoRuntime(e.to_string()))?;
        Ok(Self::spawn_on(&handle))
    }

    /// Spawn on a specific runtime.
    pub fn spawn_on(handle: &Handle) -> Arc<Self> {
        let (sender, mut receiver) = unbounded_channel::<Job>();
        handle.spawn(async move {
            while let Some(job) = receiver.recv().await {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
                    log::error!("listener callback panicked: {}", panic_message(panic.as_ref()));
                }
            }
            log::trace!("event target closed");
        });
        Arc::new(Self { sender })
    }
}

impl EventTarget for SerialEventTarget {
    fn post(&self, job: Job) {
        if self.sender.send(job).is_err() {
            log::warn!("event target is shut down; dropping listener callback");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic>")
}
