use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::LoggerConfig;
use crate::efficient_clock::TickClock;
use crate::error::{LogError, Result};
use crate::log_capture::capture_args;
use crate::log_format::layout_of;
use crate::log_msg::{message_size, Level, Message, MESSAGE_HEADER_SIZE};
use crate::log_pool::{ArgSlot, ExecContext, MessageArena};
use crate::log_queue::{Consumer, DispatchQueue};
use crate::log_stats::{PipelineStats, StatsSnapshot};
use crate::loggable::LogArg;
use crate::sink_registry::{Sink, SinkHandle, SinkRegistry};

/// Core deferred logging engine.
///
/// Producers call [`emit`](Self::emit) (or one of the level macros) from any
/// thread. Emit sizes the argument bytes from the format string, carves a slot
/// out of the arena, captures the arguments into it and queues the message.
/// Formatting and I/O happen later on the consumer thread, which replays each
/// message and hands it to every registered sink in order.
///
/// A `Logger` is a cheap handle; clones share one pipeline.
///
/// # Lifecycle
///
/// 1. [`initialize`](Self::initialize) builds the arena and queue.
/// 2. [`register_sink`](Self::register_sink) for every output.
/// 3. [`start_consumer`](Self::start_consumer) spawns the consumer thread.
/// 4. [`shutdown`](Self::shutdown) drains what is queued and joins it.
///
/// # Examples
///
/// ```
/// use deferred_logger::{log_info, Logger, LoggerConfig, LogRecord, SinkHandle};
/// use std::sync::{Arc, Mutex};
///
/// let logger = Logger::initialize(LoggerConfig::default()).unwrap();
/// let lines = Arc::new(Mutex::new(Vec::new()));
/// let seen = Arc::clone(&lines);
/// logger.register_sink(SinkHandle::new("memory", move |record: &LogRecord<'_>| {
///     seen.lock().unwrap().push(record.text.to_owned());
/// }));
/// logger.start_consumer().unwrap();
///
/// log_info!(logger, "Temperature: %d C", 25).unwrap();
/// logger.shutdown();
///
/// assert_eq!(*lines.lock().unwrap(), vec!["Temperature: 25 C".to_owned()]);
/// ```
#[derive(Clone)]
pub struct Logger {
    inner: Arc<LoggerInner>,
}

struct LoggerInner {
    config: LoggerConfig,
    arena: MessageArena,
    queue: DispatchQueue,
    registry: Arc<SinkRegistry>,
    stats: Arc<PipelineStats>,
    clock: TickClock,
    consumer: Mutex<ConsumerState>,
}

enum ConsumerState {
    Idle,
    Running(JoinHandle<()>),
    Stopped,
}

impl Logger {
    /// Builds the arena and the dispatch queue.
    ///
    /// Fails with [`LogError::InitializationFailure`] if the configuration is
    /// unusable or either primitive cannot be constructed.
    pub fn initialize(config: LoggerConfig) -> Result<Self> {
        config.validate()?;
        let arena = MessageArena::new(
            config.arena_capacity,
            config.max_in_flight,
            config.reclaim_policy,
            config.isr_lock_attempts,
        )?;
        let queue = DispatchQueue::new(config.queue_capacity)?;
        debug!(
            arena = config.arena_capacity,
            queue = config.queue_capacity,
            policy = ?config.reclaim_policy,
            "logger initialized"
        );

        Ok(Self {
            inner: Arc::new(LoggerInner {
                config,
                arena,
                queue,
                registry: Arc::new(SinkRegistry::new()),
                stats: Arc::new(PipelineStats::default()),
                clock: TickClock::start(),
                consumer: Mutex::new(ConsumerState::Idle),
            }),
        })
    }

    /// Appends a sink; it sees every message dispatched from now on.
    pub fn register_sink(&self, handle: SinkHandle) -> usize {
        self.inner.registry.register(handle)
    }

    pub fn add_sink(&self, name: &str, sink: impl Sink + 'static) -> usize {
        self.register_sink(SinkHandle::new(name, sink))
    }

    /// Spawns the consumer thread. May only succeed once.
    pub fn start_consumer(&self) -> Result<()> {
        let inner = &self.inner;
        let mut state = inner.consumer.lock();
        match *state {
            ConsumerState::Idle => {}
            ConsumerState::Running(_) => {
                return Err(LogError::InitializationFailure(
                    "consumer already started".into(),
                ))
            }
            ConsumerState::Stopped => {
                return Err(LogError::InitializationFailure("logger is shut down".into()))
            }
        }

        let consumer = Consumer::new(
            inner.queue.clone(),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.stats),
            inner.config.format_buffer_len,
        );
        let handle = consumer.spawn(
            &inner.config.consumer_thread_name,
            inner.config.effective_stack_size(),
        )?;
        *state = ConsumerState::Running(handle);
        Ok(())
    }

    /// Queues one message from task context.
    ///
    /// May wait for the arena guard, never for space. Fails with
    /// [`LogError::InvalidArgument`] when `format` is `None`,
    /// [`LogError::ResourceExhausted`] when the arena or queue has no room and
    /// [`LogError::TranscriptionFailure`] when `args` do not match the
    /// conversions in `format`. A failed message is dropped and counted.
    pub fn emit(
        &self,
        module: &'static str,
        function: &'static str,
        level: Level,
        format: impl Into<Option<&'static str>>,
        args: &[LogArg],
    ) -> Result<()> {
        self.emit_in(ExecContext::Task, module, function, level, format.into(), args)
    }

    /// Queues one message from interrupt context.
    ///
    /// Never blocks: a contended arena guard is retried a bounded number of
    /// times and then the message is dropped.
    pub fn emit_from_isr(
        &self,
        module: &'static str,
        function: &'static str,
        level: Level,
        format: impl Into<Option<&'static str>>,
        args: &[LogArg],
    ) -> Result<()> {
        self.emit_in(
            ExecContext::Interrupt,
            module,
            function,
            level,
            format.into(),
            args,
        )
    }

    fn emit_in(
        &self,
        ctx: ExecContext,
        module: &'static str,
        function: &'static str,
        level: Level,
        format: Option<&'static str>,
        args: &[LogArg],
    ) -> Result<()> {
        let result = self.try_emit(ctx, module, function, level, format, args);
        if let Err(err) = &result {
            trace!(module, function, error = %err, "message dropped");
            self.inner.stats.record_failure(err);
        }
        result
    }

    fn try_emit(
        &self,
        ctx: ExecContext,
        module: &'static str,
        function: &'static str,
        level: Level,
        format: Option<&'static str>,
        args: &[LogArg],
    ) -> Result<()> {
        let inner = &self.inner;
        let format = format.ok_or(LogError::InvalidArgument("format string is absent"))?;

        // Sizing and capture parse the same format string with the same parser.
        let required = message_size(layout_of(format).encoded_bytes);
        let mut slot = inner.arena.allocate_in(required, ctx)?;
        let args_area = &mut slot.as_bytes_mut()[MESSAGE_HEADER_SIZE..];
        if let Err(err) = capture_args(format, args, args_area) {
            inner.release(slot, ctx);
            return Err(err.into());
        }

        let message = Message::new(module, function, level, format, inner.clock.ticks(), slot);
        match inner.queue.push(message) {
            Ok(()) => {
                inner.stats.record_emitted();
                Ok(())
            }
            Err(err) => {
                let cause = err.cause();
                if let Some(message) = err.into_message() {
                    inner.release(message.into_slot(), ctx);
                }
                Err(cause.into())
            }
        }
    }

    /// Stops accepting messages, lets the consumer dispatch everything already
    /// queued and joins it. Messages queued while no consumer ever ran are
    /// discarded and counted. Later calls do nothing.
    pub fn shutdown(&self) -> StatsSnapshot {
        self.inner.stop_consumer();
        self.stats()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// True while the consumer thread is alive to dispatch.
    pub fn is_running(&self) -> bool {
        let state = self.inner.consumer.lock();
        matches!(&*state, ConsumerState::Running(handle) if !handle.is_finished())
    }

    pub fn arena(&self) -> &MessageArena {
        &self.inner.arena
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.inner.queue
    }

    pub fn sinks(&self) -> &SinkRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.inner.config
    }

    /// Current log tick, as stamped on messages.
    pub fn ticks(&self) -> u64 {
        self.inner.clock.ticks()
    }
}

impl LoggerInner {
    fn release(&self, slot: ArgSlot, ctx: ExecContext) {
        match ctx {
            ExecContext::Task => self.arena.free(slot),
            ExecContext::Interrupt => self.arena.free_from_isr(slot),
        }
    }

    fn stop_consumer(&self) {
        let mut state = self.consumer.lock();
        match std::mem::replace(&mut *state, ConsumerState::Stopped) {
            ConsumerState::Running(handle) => {
                self.queue.close();
                if !self.queue.send_shutdown(|| !handle.is_finished()) {
                    warn!("consumer exited before shutdown");
                }
                if handle.join().is_err() {
                    warn!("consumer thread panicked");
                }
                // Only non-empty if the consumer died early.
                let discarded = self.queue.discard_pending();
                if discarded > 0 {
                    warn!(discarded, "messages left undispatched");
                    self.stats.record_discarded(discarded);
                }
                debug!("logger shut down");
            }
            ConsumerState::Idle => {
                self.queue.close();
                let discarded = self.queue.discard_pending();
                self.stats.record_discarded(discarded);
                debug!(discarded, "logger shut down without a consumer");
            }
            ConsumerState::Stopped => {}
        }
    }
}

impl Drop for LoggerInner {
    fn drop(&mut self) {
        self.stop_consumer();
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("arena", &self.inner.arena)
            .field("queue", &self.inner.queue)
            .field("sinks", &self.inner.registry)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Expands to the name of the enclosing function.
#[doc(hidden)]
#[macro_export]
macro_rules! function_name {
    () => {{
        fn __here() {}
        fn type_name_of<T>(_: T) -> &'static str {
            ::core::any::type_name::<T>()
        }
        let name = type_name_of(__here);
        let mut name = name.strip_suffix("::__here").unwrap_or(name);
        while let Some(outer) = name.strip_suffix("::{{closure}}") {
            name = outer;
        }
        match name.rfind("::") {
            Some(pos) => &name[pos + 2..],
            None => name,
        }
    }};
}

/// Emits a message with an explicit level.
///
/// The format string uses printf conversions and is captured by reference;
/// each argument must implement [`Loggable`](crate::Loggable). Expands to the
/// `Result` of [`Logger::emit`].
///
/// ```
/// # use deferred_logger::{deferred_log, Level, Logger, LoggerConfig};
/// let logger = Logger::initialize(LoggerConfig::default()).unwrap();
/// deferred_log!(logger, Level::Warning, "%s at %.1f%%", "load", 93.5).unwrap();
/// assert_eq!(logger.stats().emitted, 1);
/// ```
#[macro_export]
macro_rules! deferred_log {
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.emit(
            ::core::module_path!(),
            $crate::function_name!(),
            $level,
            $fmt,
            &[$($crate::Loggable::to_log_arg(&$arg)),*],
        )
    };
}

/// Like [`deferred_log!`] but through [`Logger::emit_from_isr`].
#[macro_export]
macro_rules! deferred_log_isr {
    ($logger:expr, $level:expr, $fmt:literal $(, $arg:expr)* $(,)?) => {
        $logger.emit_from_isr(
            ::core::module_path!(),
            $crate::function_name!(),
            $level,
            $fmt,
            &[$($crate::Loggable::to_log_arg(&$arg)),*],
        )
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $($rest:tt)+) => {
        $crate::deferred_log!($logger, $crate::Level::Error, $($rest)+)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $($rest:tt)+) => {
        $crate::deferred_log!($logger, $crate::Level::Warning, $($rest)+)
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $($rest:tt)+) => {
        $crate::deferred_log!($logger, $crate::Level::Info, $($rest)+)
    };
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $($rest:tt)+) => {
        $crate::deferred_log!($logger, $crate::Level::Debug, $($rest)+)
    };
}
