//! Message data model.
//!
//! A [`Message`] is created by a producer, filled by capture exactly once,
//! moved through the dispatch queue, read by the consumer, and finally dropped,
//! which returns its arena slot. Each stage owns it exclusively.
//!
//! A slot holds a fixed [`MESSAGE_HEADER_SIZE`]-byte header followed by the
//! captured arguments:
//!
//! | bytes   | content              |
//! |---------|----------------------|
//! | 0..8    | tick stamp, LE `u64` |
//! | 8       | level                |
//! | 9..16   | reserved, zero       |
//! | 16..    | captured arguments   |
//!
//! Module, function and format are `'static` and travel with the handle.

use std::fmt;
use std::ops::Range;

use crate::log_pool::ArgSlot;
use crate::log_reconstruct::CapturedArgs;

/// ANSI sequence that ends a coloured line.
pub const RESET_COLOR: &str = "\x1b[0m";

/// Arena bytes every message occupies ahead of its captured arguments.
pub const MESSAGE_HEADER_SIZE: usize = 16;

const TICKS: Range<usize> = 0..8;
const LEVEL: usize = 8;

/// Arena bytes taken by a message with `args_len` bytes of captured arguments.
pub const fn message_size(args_len: usize) -> usize {
    MESSAGE_HEADER_SIZE + args_len
}

/// Severity of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum Level {
    #[default]
    None = 0,
    Error = 1,
    Warning = 2,
    Info = 3,
    Debug = 4,
}

impl Level {
    /// Three-letter tag shown in rendered lines, empty for `None`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Level::None => "",
            Level::Error => "ERR",
            Level::Warning => "WRN",
            Level::Info => "INF",
            Level::Debug => "DBG",
        }
    }

    pub const fn color(self) -> &'static str {
        match self {
            Level::None => "",
            Level::Error => "\x1b[31m",
            Level::Warning => "\x1b[33m",
            Level::Info => "\x1b[37m",
            Level::Debug => "\x1b[34m",
        }
    }

    pub fn from_u8(raw: u8) -> Option<Self> {
        Some(match raw {
            0 => Level::None,
            1 => Level::Error,
            2 => Level::Warning,
            3 => Level::Info,
            4 => Level::Debug,
            _ => return None,
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A captured message waiting for, or undergoing, dispatch.
pub struct Message {
    module: &'static str,
    function: &'static str,
    format: &'static str,
    slot: ArgSlot,
}

impl Message {
    /// Writes the header into a slot whose arguments capture has already
    /// filled for `format`.
    ///
    /// The slot must be at least [`MESSAGE_HEADER_SIZE`] bytes.
    pub(crate) fn new(
        module: &'static str,
        function: &'static str,
        level: Level,
        format: &'static str,
        ticks: u64,
        mut slot: ArgSlot,
    ) -> Self {
        debug_assert!(slot.len() >= MESSAGE_HEADER_SIZE);
        let header = &mut slot.as_bytes_mut()[..MESSAGE_HEADER_SIZE];
        header[TICKS].copy_from_slice(&ticks.to_le_bytes());
        header[LEVEL] = level as u8;
        header[LEVEL + 1..].fill(0);
        Self {
            module,
            function,
            format,
            slot,
        }
    }

    fn header(&self) -> &[u8] {
        &self.slot.as_bytes()[..MESSAGE_HEADER_SIZE]
    }

    pub fn module(&self) -> &'static str {
        self.module
    }

    pub fn function(&self) -> &'static str {
        self.function
    }

    pub fn level(&self) -> Level {
        Level::from_u8(self.header()[LEVEL]).unwrap_or_default()
    }

    pub fn format(&self) -> &'static str {
        self.format
    }

    pub fn ticks(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.header()[TICKS]);
        u64::from_le_bytes(raw)
    }

    pub fn captured_args(&self) -> CapturedArgs<'_> {
        CapturedArgs::trusted(&self.slot.as_bytes()[MESSAGE_HEADER_SIZE..])
    }

    /// Arena bytes held, header included.
    pub fn size(&self) -> usize {
        self.slot.len()
    }

    /// Gives the arena slot back, for callers that must choose how it is freed.
    pub(crate) fn into_slot(self) -> ArgSlot {
        self.slot
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("module", &self.module)
            .field("function", &self.function)
            .field("level", &self.level())
            .field("format", &self.format)
            .field("ticks", &self.ticks())
            .field("size", &self.size())
            .finish()
    }
}

/// What a sink sees for one dispatched message.
///
/// `text` is the replayed output, already truncated to the consumer's format
/// buffer. Sinks that do their own formatting can walk
/// [`captured_args`](Self::captured_args) instead.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub module: &'static str,
    pub function: &'static str,
    pub level: Level,
    pub format: &'static str,
    pub ticks: u64,
    pub text: &'a str,
    captured: CapturedArgs<'a>,
}

impl<'a> LogRecord<'a> {
    pub(crate) fn new(message: &'a Message, text: &'a str) -> Self {
        Self {
            module: message.module,
            function: message.function,
            level: message.level(),
            format: message.format,
            ticks: message.ticks(),
            text,
            captured: message.captured_args(),
        }
    }

    pub fn captured_args(&self) -> CapturedArgs<'a> {
        self.captured
    }

    /// Renders the record with the level colour around it.
    pub fn colored(&self) -> Colored<'_, 'a> {
        Colored(self)
    }
}

/// `[ticks] <TAG> module::function: text`
impl fmt::Display for LogRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] <{}> {}::{}: {}",
            self.ticks,
            self.level.as_str(),
            self.module,
            self.function,
            self.text
        )
    }
}

pub struct Colored<'r, 'a>(&'r LogRecord<'a>);

impl fmt::Display for Colored<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.0.level.color(), self.0, RESET_COLOR)
    }
}
