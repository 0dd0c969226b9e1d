//! Pipeline counters.
//!
//! Drops stay silent on the logging path, but every one is counted by cause
//! so a sink or a test can tell how much was lost.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Exhaustion, LogError};

#[derive(Debug, Default)]
pub struct PipelineStats {
    emitted: AtomicU64,
    dispatched: AtomicU64,
    dropped_arena: AtomicU64,
    dropped_queue: AtomicU64,
    dropped_transcription: AtomicU64,
    rejected_invalid: AtomicU64,
    discarded: AtomicU64,
    truncated: AtomicU64,
    sink_panics: AtomicU64,
    sinks_skipped: AtomicU64,
}

/// Point-in-time copy of [`PipelineStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Messages handed to the dispatch queue.
    pub emitted: u64,
    /// Messages the consumer has finished fanning out.
    pub dispatched: u64,
    /// Drops because the arena had no room or was contended.
    pub dropped_arena: u64,
    /// Drops because the queue was full or closed.
    pub dropped_queue: u64,
    pub dropped_transcription: u64,
    pub rejected_invalid: u64,
    /// Queued messages never handed to sinks: replay panicked, or shutdown
    /// found them with no consumer left to run.
    pub discarded: u64,
    /// Messages whose text did not fit the consumer's format buffer.
    pub truncated: u64,
    pub sink_panics: u64,
    pub sinks_skipped: u64,
}

impl StatsSnapshot {
    pub fn dropped(&self) -> u64 {
        self.dropped_arena + self.dropped_queue + self.dropped_transcription + self.discarded
    }

    /// Emitted but not yet dispatched or dropped by the consumer.
    pub fn pending(&self) -> u64 {
        self.emitted
            .saturating_sub(self.dispatched)
            .saturating_sub(self.discarded)
    }
}

impl PipelineStats {
    pub(crate) fn record_emitted(&self) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dispatched(&self, truncated: bool, panicked: usize, skipped: usize) {
        if truncated {
            self.truncated.fetch_add(1, Ordering::Relaxed);
        }
        if panicked > 0 {
            self.sink_panics.fetch_add(panicked as u64, Ordering::Relaxed);
        }
        if skipped > 0 {
            self.sinks_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        }
        // Last, so a reader that sees the message dispatched also sees its side counters.
        self.dispatched.fetch_add(1, Ordering::Release);
    }

    pub(crate) fn record_discarded(&self, count: usize) {
        self.discarded.fetch_add(count as u64, Ordering::Release);
    }

    /// Counts a failed emit under its cause.
    pub(crate) fn record_failure(&self, err: &LogError) {
        let counter = match err {
            LogError::InvalidArgument(_) => &self.rejected_invalid,
            LogError::TranscriptionFailure(_) => &self.dropped_transcription,
            LogError::ResourceExhausted(Exhaustion::QueueFull | Exhaustion::QueueClosed) => {
                &self.dropped_queue
            }
            LogError::ResourceExhausted(_) => &self.dropped_arena,
            LogError::InitializationFailure(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            dispatched: self.dispatched.load(Ordering::Acquire),
            emitted: self.emitted.load(Ordering::Relaxed),
            dropped_arena: self.dropped_arena.load(Ordering::Relaxed),
            dropped_queue: self.dropped_queue.load(Ordering::Relaxed),
            dropped_transcription: self.dropped_transcription.load(Ordering::Relaxed),
            rejected_invalid: self.rejected_invalid.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Acquire),
            truncated: self.truncated.load(Ordering::Relaxed),
            sink_panics: self.sink_panics.load(Ordering::Relaxed),
            sinks_skipped: self.sinks_skipped.load(Ordering::Relaxed),
        }
    }
}
