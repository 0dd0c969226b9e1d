//! Ready-made sinks.
//!
//! Each one owns its error handling: a failed write is counted, never
//! reported back to the consumer.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::log_msg::{Level, LogRecord};
use crate::sink_registry::Sink;

impl Level {
    /// Facade level for this severity. `None` maps to `Trace`.
    pub fn to_log_level(self) -> log::Level {
        match self {
            Level::Error => log::Level::Error,
            Level::Warning => log::Level::Warn,
            Level::Info => log::Level::Info,
            Level::Debug => log::Level::Debug,
            Level::None => log::Level::Trace,
        }
    }
}

/// Forwards every record to the `log` facade, using the message's module as
/// the target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacadeSink;

impl Sink for LogFacadeSink {
    fn dispatch(&self, record: &LogRecord<'_>) {
        log::log!(
            target: record.module,
            record.level.to_log_level(),
            "[{}] {}: {}",
            record.ticks,
            record.function,
            record.text
        );
    }
}

/// Re-emits every record as a `tracing` event with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl Sink for TracingSink {
    fn dispatch(&self, r: &LogRecord<'_>) {
        macro_rules! event {
            ($mac:ident) => {
                tracing::$mac!(
                    target: "deferred",
                    module = r.module,
                    function = r.function,
                    ticks = r.ticks,
                    "{}",
                    r.text
                )
            };
        }
        match r.level {
            Level::Error => event!(error),
            Level::Warning => event!(warn),
            Level::Info => event!(info),
            Level::Debug => event!(debug),
            Level::None => event!(trace),
        }
    }
}

/// Writes the standard line to any `io::Write`:
/// `[ticks] <TAG> module::function: text` followed by the line ending,
/// optionally wrapped in the level colour.
pub struct WriterSink<W> {
    writer: Mutex<W>,
    colored: bool,
    line_ending: &'static str,
    write_errors: AtomicU64,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
            colored: false,
            line_ending: "\r\n",
            write_errors: AtomicU64::new(0),
        }
    }

    pub fn colored(mut self, colored: bool) -> Self {
        self.colored = colored;
        self
    }

    pub fn with_line_ending(mut self, ending: &'static str) -> Self {
        self.line_ending = ending;
        self
    }

    /// Writes that failed since construction.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_record(&self, record: &LogRecord<'_>) -> io::Result<()> {
        let mut writer = self.writer.lock();
        if self.colored {
            write!(writer, "{}{}", record.colored(), self.line_ending)
        } else {
            write!(writer, "{}{}", record, self.line_ending)
        }
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> Sink for WriterSink<W> {
    fn dispatch(&self, record: &LogRecord<'_>) {
        if self.write_record(record).is_err() {
            self.write_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
