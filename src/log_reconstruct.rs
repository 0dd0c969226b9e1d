//! Replay of captured arguments.
//!
//! Rebuilds the text a message would have produced at its call site by walking
//! the tagged byte sequence written by capture. No native `va_list` is
//! synthesized; the [`ArgReader`] cursor decodes records itself, so replay
//! works the same on every ABI.

use std::fmt;

use crate::error::CaptureError;
use crate::log_capture::{capture_args, coerce};
use crate::log_format::{layout_of, ArgKind, TAG_SIZE};
use crate::loggable::LogArg;
use crate::printf::{format_to, ArgSource, ArgValue, BoundedWriter};

const WORD: usize = std::mem::size_of::<usize>();

/// Bytes known to have been written by capture and not touched since.
///
/// Only the crate can vouch for a byte slice, because string arguments are
/// stored as raw pointers that replay turns back into `&'static str`.
#[derive(Debug, Clone, Copy)]
pub struct CapturedArgs<'a> {
    bytes: &'a [u8],
}

impl<'a> CapturedArgs<'a> {
    pub(crate) fn trusted(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Wraps raw bytes for replay.
    ///
    /// # Safety
    ///
    /// `bytes` must be exactly what [`capture_args`] wrote (a prefix of its
    /// destination of the returned length), unmodified since.
    pub unsafe fn from_bytes_unchecked(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn reader(&self) -> ArgReader<'a> {
        ArgReader { bytes: self.bytes, pos: 0 }
    }
}

/// An owned capture, for formatting outside the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedBuffer {
    bytes: Vec<u8>,
}

impl CapturedBuffer {
    pub fn capture(fmt: &str, args: &[LogArg]) -> Result<Self, CaptureError> {
        let mut bytes = vec![0u8; layout_of(fmt).encoded_bytes];
        let written = capture_args(fmt, args, &mut bytes)?;
        bytes.truncate(written);
        Ok(Self { bytes })
    }

    pub fn args(&self) -> CapturedArgs<'_> {
        CapturedArgs::trusted(&self.bytes)
    }
}

/// Cursor over a captured tagged sequence.
///
/// Each call consumes one record. A record whose tag does not match the
/// requested class is still consumed so later arguments stay in step.
#[derive(Debug, Clone)]
pub struct ArgReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ArgReader<'a> {
    /// Bytes not yet decoded.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let slice = self.bytes.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(slice)
    }

    fn read_word(&mut self) -> Option<usize> {
        let mut word = [0u8; WORD];
        word.copy_from_slice(self.read_bytes(WORD)?);
        Some(usize::from_le_bytes(word))
    }

    /// Decodes the next record whatever its class.
    pub fn next_value(&mut self) -> Option<(ArgKind, ArgValue<'static>)> {
        let kind = ArgKind::from_tag(*self.read_bytes(TAG_SIZE)?.first()?)?;
        let value = match kind {
            ArgKind::Double => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(self.read_bytes(8)?);
                ArgValue::Double(f64::from_le_bytes(raw))
            }
            ArgKind::Str => {
                let ptr = self.read_word()?;
                let len = self.read_word()?;
                // SAFETY: CapturedArgs only wraps bytes written by capture, which
                // stored the pointer and length of a live `&'static str` here.
                let s = unsafe {
                    std::str::from_utf8_unchecked(std::slice::from_raw_parts(ptr as *const u8, len))
                };
                ArgValue::Str(s)
            }
            ArgKind::Pointer => ArgValue::Pointer(self.read_word()?),
            integer => {
                let width = integer.promoted_size();
                let mut raw = [0u8; 8];
                raw[..width].copy_from_slice(self.read_bytes(width)?);
                ArgValue::Int(u64::from_le_bytes(raw))
            }
        };
        Some((kind, value))
    }
}

impl<'a> ArgSource<'static> for ArgReader<'a> {
    fn next_arg(&mut self, kind: ArgKind) -> Option<ArgValue<'static>> {
        let (found, value) = self.next_value()?;
        (found == kind).then_some(value)
    }
}

impl Iterator for ArgReader<'_> {
    type Item = (ArgKind, ArgValue<'static>);

    fn next(&mut self) -> Option<Self::Item> {
        self.next_value()
    }
}

/// Argument source over live call-site arguments.
struct CallSiteArgs<'s> {
    args: std::slice::Iter<'s, LogArg>,
}

impl ArgSource<'static> for CallSiteArgs<'_> {
    fn next_arg(&mut self, kind: ArgKind) -> Option<ArgValue<'static>> {
        coerce(kind, self.args.next()?)
    }
}

/// Replays `captured` against `fmt` into `out`, returning the bytes written.
///
/// Output longer than `out` is truncated at a UTF-8 boundary; the buffer is
/// never overrun and no terminator is added.
pub fn reconstruct(fmt: &str, captured: CapturedArgs<'_>, out: &mut [u8]) -> usize {
    let mut writer = BoundedWriter::new(out);
    // A full buffer surfaces as fmt::Error; the truncated prefix is the result.
    let _ = format_to(&mut writer, fmt, &mut captured.reader());
    writer.written()
}

/// Replays `captured` against `fmt` into any formatter.
pub fn replay_to<W: fmt::Write + ?Sized>(
    out: &mut W,
    fmt: &str,
    captured: CapturedArgs<'_>,
) -> fmt::Result {
    format_to(out, fmt, &mut captured.reader())
}

/// Formats `fmt` with `args` right away, as the call site would have.
pub fn format_immediate(fmt: &str, args: &[LogArg]) -> String {
    let mut out = String::new();
    let _ = format_to(&mut out, fmt, &mut CallSiteArgs { args: args.iter() });
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replay(fmt: &str, args: &[LogArg]) -> String {
        let captured = CapturedBuffer::capture(fmt, args).unwrap();
        let mut out = [0u8; 256];
        let n = reconstruct(fmt, captured.args(), &mut out);
        String::from_utf8(out[..n].to_vec()).unwrap()
    }

    #[test]
    fn test_replay_simple() {
        assert_eq!(replay("Value: %d", &[LogArg::Int(42)]), "Value: 42");
        assert_eq!(replay("no args", &[]), "no args");
        assert_eq!(replay("%s=%.1f", &[LogArg::Str("t"), LogArg::Float(2.25)]), "t=2.2");
    }

    #[test]
    fn test_reader_walks_records() {
        let captured =
            CapturedBuffer::capture("%d %s %p", &[LogArg::Int(7), LogArg::Str("x"), LogArg::Ptr(16)])
                .unwrap();
        let kinds: Vec<_> = captured.args().reader().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, vec![ArgKind::Int, ArgKind::Str, ArgKind::Pointer]);
    }

    #[test]
    fn test_replay_with_other_format_marks_mismatch() {
        let captured = CapturedBuffer::capture("%d", &[LogArg::Int(1)]).unwrap();
        let mut out = [0u8; 32];
        let n = reconstruct("%s and %d", captured.args(), &mut out);
        assert_eq!(&out[..n], b"<?> and <?>");
    }

    #[test]
    fn test_truncation_never_overflows() {
        let captured = CapturedBuffer::capture("%s", &[LogArg::Str("abcdefgh")]).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(reconstruct("%s", captured.args(), &mut out), 4);
        assert_eq!(&out, b"abcd");
    }

    #[test]
    fn test_format_immediate_matches_replay() {
        let args = [LogArg::Uint(255), LogArg::Float(-0.5), LogArg::Char('z')];
        let fmt = "%#06x|%+.3e|%c";
        assert_eq!(format_immediate(fmt, &args), replay(fmt, &args));
        assert_eq!(format_immediate(fmt, &args), "0x00ff|-5.000e-01|z");
    }
}
