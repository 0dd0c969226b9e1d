//! Construction-time configuration.

use crate::error::{LogError, Result};
use crate::log_msg::MESSAGE_HEADER_SIZE;
use crate::log_pool::ReclaimPolicy;

/// Smallest consumer stack a hosted thread is given, whatever was asked for.
pub const MIN_CONSUMER_STACK: usize = 64 * 1024;

/// Sizes and names fixed when a [`Logger`](crate::Logger) is initialized.
///
/// The defaults mirror a small embedded build: a 1 KiB arena, a 32-entry
/// queue and a 256-byte format buffer.
///
/// # Examples
///
/// ```
/// # use deferred_logger::{LoggerConfig, ReclaimPolicy};
/// let config = LoggerConfig::default()
///     .with_arena_capacity(4096)
///     .with_reclaim_policy(ReclaimPolicy::Slab { slot_size: 64 });
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggerConfig {
    /// Bytes in the message arena.
    pub arena_capacity: usize,
    /// Entries in the dispatch queue.
    pub queue_capacity: usize,
    /// Slots that may be live at once.
    pub max_in_flight: usize,
    /// Requested consumer stack size, raised to [`MIN_CONSUMER_STACK`].
    pub consumer_stack_size: usize,
    pub consumer_thread_name: String,
    /// Bytes of replayed text handed to sinks; longer text is truncated.
    pub format_buffer_len: usize,
    /// `try_lock` attempts an interrupt-context caller makes on the arena guard.
    pub isr_lock_attempts: u32,
    pub reclaim_policy: ReclaimPolicy,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            arena_capacity: 1024,
            queue_capacity: 32,
            max_in_flight: 32,
            consumer_stack_size: 2048,
            consumer_thread_name: "LogThread".to_owned(),
            format_buffer_len: 256,
            isr_lock_attempts: 1,
            reclaim_policy: ReclaimPolicy::Bump,
        }
    }
}

impl LoggerConfig {
    pub fn with_arena_capacity(mut self, bytes: usize) -> Self {
        self.arena_capacity = bytes;
        self
    }

    pub fn with_queue_capacity(mut self, entries: usize) -> Self {
        self.queue_capacity = entries;
        self
    }

    pub fn with_max_in_flight(mut self, slots: usize) -> Self {
        self.max_in_flight = slots;
        self
    }

    pub fn with_consumer_stack_size(mut self, bytes: usize) -> Self {
        self.consumer_stack_size = bytes;
        self
    }

    pub fn with_consumer_thread_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_thread_name = name.into();
        self
    }

    pub fn with_format_buffer_len(mut self, bytes: usize) -> Self {
        self.format_buffer_len = bytes;
        self
    }

    pub fn with_isr_lock_attempts(mut self, attempts: u32) -> Self {
        self.isr_lock_attempts = attempts;
        self
    }

    pub fn with_reclaim_policy(mut self, policy: ReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    /// Stack size actually requested from the OS.
    pub fn effective_stack_size(&self) -> usize {
        self.consumer_stack_size.max(MIN_CONSUMER_STACK)
    }

    pub fn validate(&self) -> Result<()> {
        let zero = [
            ("arena_capacity", self.arena_capacity),
            ("queue_capacity", self.queue_capacity),
            ("max_in_flight", self.max_in_flight),
            ("format_buffer_len", self.format_buffer_len),
        ]
        .into_iter()
        .find(|&(_, value)| value == 0);

        if let Some((field, _)) = zero {
            return Err(LogError::InitializationFailure(format!(
                "{field} must be non-zero"
            )));
        }
        if self.arena_capacity < MESSAGE_HEADER_SIZE {
            return Err(LogError::InitializationFailure(format!(
                "arena_capacity must hold a {MESSAGE_HEADER_SIZE}-byte message header"
            )));
        }
        if self.consumer_thread_name.contains('\0') {
            return Err(LogError::InitializationFailure(
                "consumer thread name contains a NUL byte".into(),
            ));
        }
        if let ReclaimPolicy::Slab { slot_size } = self.reclaim_policy {
            if slot_size < MESSAGE_HEADER_SIZE || slot_size > self.arena_capacity {
                return Err(LogError::InitializationFailure(format!(
                    "slab slot size {slot_size} must lie between {MESSAGE_HEADER_SIZE} and {} bytes",
                    self.arena_capacity
                )));
            }
        }
        Ok(())
    }
}
