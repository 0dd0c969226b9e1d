//! Dispatch queue and consumer thread.
//!
//! The queue is a bounded channel of whole [`Message`]s; a message moves
//! through it by value, so its header and argument bytes stay in the arena
//! slot capture filled.
//! Producers only ever `try_send`. The consumer is the single thread that
//! blocks on it.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, trace, warn};

use crate::error::{Exhaustion, LogError, Result};
use crate::log_msg::{LogRecord, Message};
use crate::log_reconstruct::replay_to;
use crate::log_stats::PipelineStats;
use crate::printf::BoundedWriter;
use crate::sink_registry::{fan_out, SinkRegistry, SinkSnapshot};

/// How long the stop marker waits for room before checking the consumer again.
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

pub(crate) enum QueueItem {
    Message(Message),
    /// Stop marker, queued behind every pending message.
    Shutdown,
}

/// A push that was refused. The message comes back so the caller decides how
/// its slot is freed.
pub struct PushError {
    cause: Exhaustion,
    item: QueueItem,
}

impl PushError {
    pub fn cause(&self) -> Exhaustion {
        self.cause
    }

    pub fn into_message(self) -> Option<Message> {
        match self.item {
            QueueItem::Message(message) => Some(message),
            QueueItem::Shutdown => None,
        }
    }
}

impl fmt::Debug for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError").field("cause", &self.cause).finish()
    }
}

impl From<PushError> for LogError {
    fn from(err: PushError) -> Self {
        LogError::ResourceExhausted(err.cause)
    }
}

/// Bounded FIFO between any number of producers and one consumer.
#[derive(Clone)]
pub struct DispatchQueue {
    tx: Sender<QueueItem>,
    rx: Receiver<QueueItem>,
    capacity: usize,
    closed: Arc<AtomicBool>,
    /// Pushes between their closed check and their send.
    pushing: Arc<AtomicUsize>,
}

impl DispatchQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            // A zero-capacity channel is a rendezvous; try_send would always fail.
            return Err(LogError::InitializationFailure(
                "dispatch queue capacity must be non-zero".into(),
            ));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            closed: Arc::new(AtomicBool::new(false)),
            pushing: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Enqueues without ever blocking. Safe from interrupt context.
    ///
    /// A push that succeeds is always ahead of the stop marker, so the
    /// consumer dispatches it before exiting.
    pub fn push(&self, message: Message) -> std::result::Result<(), PushError> {
        let item = QueueItem::Message(message);
        self.pushing.fetch_add(1, Ordering::SeqCst);
        let result = if self.closed.load(Ordering::SeqCst) {
            Err(PushError {
                cause: Exhaustion::QueueClosed,
                item,
            })
        } else {
            self.tx.try_send(item).map_err(|err| match err {
                TrySendError::Full(item) => PushError {
                    cause: Exhaustion::QueueFull,
                    item,
                },
                TrySendError::Disconnected(item) => PushError {
                    cause: Exhaustion::QueueClosed,
                    item,
                },
            })
        };
        self.pushing.fetch_sub(1, Ordering::SeqCst);
        result
    }

    /// Blocks until a message is available. Returns `None` once the stop
    /// marker is reached.
    pub fn pop(&self) -> Option<Message> {
        match self.rx.recv() {
            Ok(QueueItem::Message(message)) => Some(message),
            Ok(QueueItem::Shutdown) | Err(_) => None,
        }
    }

    pub fn try_pop(&self) -> Option<Message> {
        match self.rx.try_recv() {
            Ok(QueueItem::Message(message)) => Some(message),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.rx.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuses further pushes, then waits out pushes that passed the closed
    /// check before it. Returns false if already closed.
    pub(crate) fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        // Pushes never block, so this wait is short.
        while self.pushing.load(Ordering::SeqCst) != 0 {
            thread::yield_now();
        }
        first
    }

    /// Queues the stop marker behind every pending message, waiting for room
    /// while `consumer_alive` holds. Returns false if the consumer exited
    /// before the marker fit.
    pub(crate) fn send_shutdown(&self, consumer_alive: impl Fn() -> bool) -> bool {
        let mut item = QueueItem::Shutdown;
        loop {
            match self.tx.send_timeout(item, SHUTDOWN_POLL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(back)) if consumer_alive() => item = back,
                // We hold a receiver, so this is only ever a timeout.
                Err(_) => return false,
            }
        }
    }

    /// Drops every pending message, returning how many there were.
    pub(crate) fn discard_pending(&self) -> usize {
        self.rx
            .try_iter()
            .filter(|item| matches!(item, QueueItem::Message(_)))
            .count()
    }
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// State owned by the consumer thread.
pub(crate) struct Consumer {
    queue: DispatchQueue,
    registry: Arc<SinkRegistry>,
    stats: Arc<PipelineStats>,
    buffer: Box<[u8]>,
    snapshot: SinkSnapshot,
}

impl Consumer {
    pub(crate) fn new(
        queue: DispatchQueue,
        registry: Arc<SinkRegistry>,
        stats: Arc<PipelineStats>,
        format_buffer_len: usize,
    ) -> Self {
        Self {
            queue,
            registry,
            stats,
            buffer: vec![0u8; format_buffer_len].into_boxed_slice(),
            snapshot: SinkSnapshot::default(),
        }
    }

    pub(crate) fn spawn(self, name: &str, stack_size: usize) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_owned())
            .stack_size(stack_size)
            .spawn(move || self.run())
            .map_err(|err| {
                LogError::InitializationFailure(format!("cannot spawn consumer thread: {err}"))
            })
    }

    fn run(mut self) {
        debug!(capacity = self.queue.capacity(), "consumer started");
        while let Some(message) = self.queue.pop() {
            self.process(message);
        }
        debug!("consumer stopped");
    }

    /// Replays one message, fans it out and frees its slot.
    ///
    /// A panic during replay drops the message and is counted; the consumer
    /// keeps running.
    pub(crate) fn process(&mut self, message: Message) {
        self.registry.refresh(&mut self.snapshot);

        let mut writer = BoundedWriter::new(&mut self.buffer);
        let replayed = catch_unwind(AssertUnwindSafe(|| {
            replay_to(&mut writer, message.format(), message.captured_args())
        }));
        let Ok(replayed) = replayed else {
            warn!(format = message.format(), "replay panicked, message dropped");
            drop(message);
            self.stats.record_discarded(1);
            return;
        };

        let truncated = replayed.is_err();
        let record = LogRecord::new(&message, writer.as_str());
        let tally = fan_out(self.snapshot.sinks(), &record);
        if truncated {
            trace!(format = message.format(), "replayed text truncated");
        }
        drop(message);

        self.stats
            .record_dispatched(truncated, tally.panicked, tally.skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log_msg::{message_size, Level};
    use crate::log_pool::{MessageArena, ReclaimPolicy};

    fn message(arena: &MessageArena, format: &'static str) -> Message {
        let slot = arena.allocate(message_size(0)).unwrap();
        Message::new("queue", "test", Level::Info, format, 0, slot)
    }

    fn arena() -> MessageArena {
        MessageArena::new(256, 16, ReclaimPolicy::Bump, 1).unwrap()
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(
            DispatchQueue::new(0),
            Err(LogError::InitializationFailure(_))
        ));
    }

    #[test]
    fn test_push_beyond_capacity_fails() {
        let arena = arena();
        let queue = DispatchQueue::new(2).unwrap();
        queue.push(message(&arena, "a")).unwrap();
        queue.push(message(&arena, "b")).unwrap();
        assert!(queue.is_full());

        let err = queue.push(message(&arena, "c")).unwrap_err();
        assert_eq!(err.cause(), Exhaustion::QueueFull);
        assert_eq!(err.into_message().unwrap().format(), "c");
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let arena = arena();
        let queue = DispatchQueue::new(1).unwrap();
        let consumer = queue.clone();
        let handle = thread::spawn(move || consumer.pop().map(|m| m.format()));

        thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        queue.push(message(&arena, "wake")).unwrap();
        assert_eq!(handle.join().unwrap(), Some("wake"));
    }

    #[test]
    fn test_closed_queue_refuses_and_stops_pop() {
        let arena = arena();
        let queue = DispatchQueue::new(4).unwrap();
        queue.push(message(&arena, "before")).unwrap();
        assert!(queue.close());
        assert!(!queue.close());

        let err = queue.push(message(&arena, "after")).unwrap_err();
        assert_eq!(err.cause(), Exhaustion::QueueClosed);

        assert!(queue.send_shutdown(|| true));
        assert_eq!(queue.pop().map(|m| m.format()), Some("before"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_shutdown_marker_gives_up_without_consumer() {
        let arena = arena();
        let queue = DispatchQueue::new(1).unwrap();
        queue.push(message(&arena, "stuck")).unwrap();

        assert!(!queue.send_shutdown(|| false));
        assert_eq!(queue.try_pop().map(|m| m.format()), Some("stuck"));
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_discard_pending_frees_slots() {
        let arena = arena();
        let queue = DispatchQueue::new(4).unwrap();
        let slot = arena.allocate(message_size(8)).unwrap();
        queue
            .push(Message::new("m", "f", Level::Debug, "x", 0, slot))
            .unwrap();
        assert_eq!(arena.live_slots(), 1);
        assert_eq!(queue.discard_pending(), 1);
        assert_eq!(arena.live_slots(), 0);
    }
}
