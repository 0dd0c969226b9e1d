//! Error taxonomy for the logging pipeline.
//!
//! Every error is returned synchronously to the producer at the emit call site.
//! Nothing is retried automatically and sink failures never show up here.

use thiserror::Error;

use crate::log_format::ArgKind;

/// Errors surfaced by the pipeline entry points.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LogError {
    /// Missing format string or otherwise unusable input.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Arena or dispatch queue could not take the message; it was dropped.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(Exhaustion),

    /// Capture could not write the argument bytes the format string requires.
    #[error("argument transcription failed: {0}")]
    TranscriptionFailure(CaptureError),

    /// A required primitive could not be constructed.
    #[error("initialization failed: {0}")]
    InitializationFailure(String),
}

/// Which bounded resource ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exhaustion {
    #[error("message arena is full")]
    ArenaFull,

    #[error("message arena guard was contended in interrupt context")]
    ArenaContended,

    #[error("message needs {requested} bytes but slots hold {slot_size}")]
    SlotTooSmall { requested: usize, slot_size: usize },

    #[error("{limit} messages already in flight")]
    TooManyInFlight { limit: usize },

    #[error("dispatch queue is full")]
    QueueFull,

    #[error("dispatch queue is closed")]
    QueueClosed,
}

/// Why capture refused to transcribe an argument list.
///
/// Capture validates the argument list against the conversions parsed from the
/// format string, so a mismatch is reported here instead of being replayed as
/// garbage later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("conversion #{index} ({expected:?}) has no argument")]
    MissingArgument { index: usize, expected: ArgKind },

    #[error("conversion #{index} expects {expected:?} but got {found}")]
    TypeMismatch {
        index: usize,
        expected: ArgKind,
        found: &'static str,
    },

    #[error("format consumes {expected} arguments but {found} were supplied")]
    SurplusArguments { expected: usize, found: usize },

    #[error("destination holds {available} bytes but {required} are required")]
    BufferTooSmall { required: usize, available: usize },
}

impl From<Exhaustion> for LogError {
    fn from(cause: Exhaustion) -> Self {
        LogError::ResourceExhausted(cause)
    }
}

impl From<CaptureError> for LogError {
    fn from(cause: CaptureError) -> Self {
        LogError::TranscriptionFailure(cause)
    }
}

pub type Result<T> = std::result::Result<T, LogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = LogError::from(Exhaustion::QueueFull);
        assert_eq!(err.to_string(), "resource exhausted: dispatch queue is full");

        let err = LogError::from(CaptureError::SurplusArguments { expected: 1, found: 2 });
        assert_eq!(
            err.to_string(),
            "argument transcription failed: format consumes 1 arguments but 2 were supplied"
        );
    }

    #[test]
    fn test_slot_too_small_message() {
        let err = Exhaustion::SlotTooSmall { requested: 80, slot_size: 64 };
        assert_eq!(err.to_string(), "message needs 80 bytes but slots hold 64");
    }
}
