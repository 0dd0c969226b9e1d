//! Ordered registry of output sinks.
//!
//! Sinks are appended at the tail and never removed, so the dispatch order is
//! the registration order for every message. The consumer keeps a
//! [`SinkSnapshot`] and only re-reads the registry when a registration has
//! happened since its last refresh.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::log_msg::LogRecord;

/// An output destination invoked once per dispatched message.
///
/// The return value is never consulted and failures are the sink's own
/// business. A panic is caught by the consumer and counted, and the remaining
/// sinks still run.
///
/// # Examples
///
/// ```
/// # use deferred_logger::{Sink, LogRecord};
/// # use std::sync::Mutex;
/// struct Collect(Mutex<Vec<String>>);
///
/// impl Sink for Collect {
///     fn dispatch(&self, record: &LogRecord<'_>) {
///         self.0.lock().unwrap().push(record.text.to_owned());
///     }
/// }
/// ```
pub trait Sink: Send + Sync {
    fn dispatch(&self, record: &LogRecord<'_>);
}

impl<F> Sink for F
where
    F: Fn(&LogRecord<'_>) + Send + Sync,
{
    fn dispatch(&self, record: &LogRecord<'_>) {
        self(record)
    }
}

/// Result of handing one record to one sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The handle has no dispatch function.
    Skipped,
    Panicked,
}

/// A named registration.
#[derive(Clone)]
pub struct SinkHandle {
    name: Arc<str>,
    sink: Option<Arc<dyn Sink>>,
}

impl SinkHandle {
    pub fn new(name: impl Into<Arc<str>>, sink: impl Sink + 'static) -> Self {
        Self::from_arc(name, Arc::new(sink))
    }

    /// Registers a sink the caller keeps a reference to, e.g. to inspect it later.
    pub fn from_arc(name: impl Into<Arc<str>>, sink: Arc<dyn Sink>) -> Self {
        Self {
            name: name.into(),
            sink: Some(sink),
        }
    }

    /// A registration without a dispatch function. It holds its place in the
    /// order but is skipped during fan-out.
    pub fn detached(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            sink: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_detached(&self) -> bool {
        self.sink.is_none()
    }

    pub fn deliver(&self, record: &LogRecord<'_>) -> Delivery {
        let Some(sink) = &self.sink else {
            return Delivery::Skipped;
        };
        match catch_unwind(AssertUnwindSafe(|| sink.dispatch(record))) {
            Ok(()) => Delivery::Delivered,
            Err(_) => {
                warn!(sink = %self.name, "sink panicked during dispatch");
                Delivery::Panicked
            }
        }
    }
}

impl fmt::Debug for SinkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkHandle")
            .field("name", &self.name)
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Per-message fan-out tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub skipped: usize,
    pub panicked: usize,
}

/// Hands `record` to every sink in order. Never stops early.
pub fn fan_out(sinks: &[SinkHandle], record: &LogRecord<'_>) -> FanOut {
    let mut tally = FanOut::default();
    for handle in sinks {
        match handle.deliver(record) {
            Delivery::Delivered => tally.delivered += 1,
            Delivery::Skipped => tally.skipped += 1,
            Delivery::Panicked => tally.panicked += 1,
        }
    }
    tally
}

/// Append-only, insertion-ordered collection of sinks.
///
/// Registration is expected to finish before steady-state logging starts.
/// Registering later is allowed; messages already being dispatched keep the
/// sink list they started with.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: RwLock<Vec<SinkHandle>>,
    generation: AtomicU64,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handle` and returns its position.
    pub fn register(&self, handle: SinkHandle) -> usize {
        let mut sinks = self.sinks.write();
        debug!(sink = handle.name(), position = sinks.len(), "sink registered");
        sinks.push(handle);
        self.generation.fetch_add(1, Ordering::Release);
        sinks.len() - 1
    }

    pub fn len(&self) -> usize {
        self.sinks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.read().is_empty()
    }

    /// Registered names, in dispatch order.
    pub fn names(&self) -> Vec<String> {
        self.sinks.read().iter().map(|h| h.name().to_owned()).collect()
    }

    /// All handles in dispatch order.
    pub fn get_all(&self) -> Vec<SinkHandle> {
        self.sinks.read().clone()
    }

    /// Brings `snapshot` up to date. Returns true if it changed.
    pub fn refresh(&self, snapshot: &mut SinkSnapshot) -> bool {
        let current = self.generation.load(Ordering::Acquire);
        if current == snapshot.generation {
            return false;
        }
        let sinks = self.sinks.read();
        snapshot.sinks.clone_from(&sinks);
        // Re-read under the lock; a register that raced the load above is included.
        snapshot.generation = self.generation.load(Ordering::Acquire);
        true
    }
}

impl fmt::Debug for SinkRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.sinks.read().iter()).finish()
    }
}

/// A consumer-side copy of the sink list.
#[derive(Debug, Default)]
pub struct SinkSnapshot {
    generation: u64,
    sinks: Vec<SinkHandle>,
}

impl SinkSnapshot {
    pub fn sinks(&self) -> &[SinkHandle] {
        &self.sinks
    }
}
