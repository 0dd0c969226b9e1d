//! # Deferred Logger
//!
//! A logging engine that keeps formatting and I/O off the caller's path.
//!
//! * **Cheap producers**: an emit call sizes, captures and enqueues; it never
//!   formats text and never blocks on a slow consumer
//! * **Interrupt safe**: [`Logger::emit_from_isr`] gives up instead of waiting
//! * **Bounded memory**: each message (header plus argument bytes) lives in one
//!   arena allocated up front
//! * **Ordered fan-out**: one consumer thread replays each message and hands it
//!   to every sink in registration order
//!
//! ## Main Components
//!
//! * [`log_format`]: printf specifier parser shared by sizing, capture and replay
//! * [`log_capture`] / [`log_reconstruct`]: tagged argument capture and replay
//! * [`log_pool`]: the message arena (bump or slab reclaim)
//! * [`log_queue`]: the bounded dispatch queue and consumer thread
//! * [`sink_registry`] / [`sinks`]: the sink contract and stock sinks
//! * [`Logger`]: the handle tying them together
//!
//! ## Quick Start
//!
//! ```
//! use deferred_logger::{log_info, log_warn, Logger, LoggerConfig, WriterSink};
//!
//! let logger = Logger::initialize(LoggerConfig::default()).unwrap();
//! logger.add_sink("stdout", WriterSink::stdout());
//! logger.start_consumer().unwrap();
//!
//! log_info!(logger, "Hello, world!").unwrap();
//! log_warn!(logger, "Temperature: %.1f C on %s", 25.5, "probe0").unwrap();
//!
//! let stats = logger.shutdown();
//! assert_eq!(stats.dispatched, 2);
//! ```

pub mod config;
pub mod deferred_logger;
pub mod efficient_clock;
pub mod error;
pub mod log_capture;
pub mod log_format;
pub mod log_msg;
pub mod log_pool;
pub mod log_queue;
pub mod log_reconstruct;
pub mod log_stats;
pub mod loggable;
pub mod printf;
pub mod sink_registry;
pub mod sinks;

pub use config::LoggerConfig;
pub use deferred_logger::Logger;
pub use error::{CaptureError, Exhaustion, LogError, Result};
pub use log_format::calculate_args_size;
pub use log_msg::{message_size, Level, LogRecord, Message, MESSAGE_HEADER_SIZE};
pub use log_pool::{ArgSlot, MessageArena, ReclaimPolicy};
pub use log_queue::DispatchQueue;
pub use log_reconstruct::{format_immediate, reconstruct, CapturedArgs, CapturedBuffer};
pub use log_stats::StatsSnapshot;
pub use loggable::{LogArg, Loggable};
pub use sink_registry::{Sink, SinkHandle, SinkRegistry};
pub use sinks::{LogFacadeSink, TracingSink, WriterSink};
