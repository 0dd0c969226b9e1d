//! Argument capture.
//!
//! Copies a call site's arguments into the arena slot as a tagged sequence,
//! one `(tag, value bytes)` record per conversion, in format-string order.
//! Values are little-endian and unaligned so the encoding is independent of
//! the target's calling convention.

use crate::error::CaptureError;
use crate::log_format::{conversions, layout_of, ArgKind, TAG_SIZE};
use crate::loggable::LogArg;
use crate::printf::ArgValue;

/// Applies C default argument promotion to `arg` for a conversion of `kind`.
///
/// Integers are truncated to the promoted width, exactly like a native
/// `va_arg` of that type would see them. Returns `None` when the argument
/// cannot feed the conversion at all.
pub fn coerce(kind: ArgKind, arg: &LogArg) -> Option<ArgValue<'static>> {
    if kind.is_integer() {
        let bits = match *arg {
            LogArg::Int(v) => v as u64,
            LogArg::Uint(v) => v,
            LogArg::Bool(v) => u64::from(v),
            LogArg::Char(c) => u64::from(c),
            _ => return None,
        };
        return Some(ArgValue::Int(truncate_bits(bits, kind.promoted_size())));
    }

    match (kind, *arg) {
        (ArgKind::Double, LogArg::Float(v)) => Some(ArgValue::Double(v)),
        (ArgKind::Str, LogArg::Str(s)) => Some(ArgValue::Str(s)),
        (ArgKind::Pointer, LogArg::Ptr(addr)) => Some(ArgValue::Pointer(addr)),
        (ArgKind::Pointer, LogArg::Str(s)) => Some(ArgValue::Pointer(s.as_ptr() as usize)),
        _ => None,
    }
}

pub(crate) fn truncate_bits(bits: u64, width: usize) -> u64 {
    if width >= 8 {
        bits
    } else {
        bits & ((1u64 << (8 * width)) - 1)
    }
}

/// Writes the arguments of `fmt` into `dst`, returning the number of bytes written.
///
/// The argument list must match the conversions exactly: one argument per
/// conversion, each of a compatible class, and nothing left over. On any
/// mismatch nothing useful is in `dst` and the message must be abandoned.
pub fn capture_args(fmt: &str, args: &[LogArg], dst: &mut [u8]) -> Result<usize, CaptureError> {
    let layout = layout_of(fmt);
    if args.len() > layout.count {
        return Err(CaptureError::SurplusArguments {
            expected: layout.count,
            found: args.len(),
        });
    }
    if dst.len() < layout.encoded_bytes {
        return Err(CaptureError::BufferTooSmall {
            required: layout.encoded_bytes,
            available: dst.len(),
        });
    }

    let mut pos = 0;
    for (index, spec) in conversions(fmt).enumerate() {
        let expected = spec.kind();
        let arg = args
            .get(index)
            .ok_or(CaptureError::MissingArgument { index, expected })?;
        let value = coerce(expected, arg).ok_or(CaptureError::TypeMismatch {
            index,
            expected,
            found: arg.type_name(),
        })?;
        pos += encode(expected, value, &mut dst[pos..]);
    }

    Ok(pos)
}

/// Writes one tagged record, returning its length. `dst` must have room for it.
fn encode(kind: ArgKind, value: ArgValue<'static>, dst: &mut [u8]) -> usize {
    dst[0] = kind.tag();
    let body = &mut dst[TAG_SIZE..TAG_SIZE + kind.stored_size()];
    match value {
        ArgValue::Int(bits) => {
            let width = kind.promoted_size();
            body.copy_from_slice(&bits.to_le_bytes()[..width]);
        }
        ArgValue::Double(v) => body.copy_from_slice(&v.to_le_bytes()),
        ArgValue::Str(s) => {
            let (ptr, len) = body.split_at_mut(std::mem::size_of::<usize>());
            ptr.copy_from_slice(&(s.as_ptr() as usize).to_le_bytes());
            len.copy_from_slice(&s.len().to_le_bytes());
        }
        ArgValue::Pointer(addr) => body.copy_from_slice(&addr.to_le_bytes()),
    }
    TAG_SIZE + kind.stored_size()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_writes_tagged_records() {
        let fmt = "%d %f";
        let mut buf = [0u8; 64];
        let written = capture_args(fmt, &[LogArg::Int(-1), LogArg::Float(0.5)], &mut buf).unwrap();

        assert_eq!(written, layout_of(fmt).encoded_bytes);
        assert_eq!(buf[0], ArgKind::Int.tag());
        assert_eq!(&buf[1..5], &[0xff, 0xff, 0xff, 0xff]);
        assert_eq!(buf[5], ArgKind::Double.tag());
        assert_eq!(&buf[6..14], &0.5f64.to_le_bytes());
    }

    #[test]
    fn test_no_conversions_writes_nothing() {
        let mut buf = [0u8; 0];
        assert_eq!(capture_args("plain", &[], &mut buf), Ok(0));
    }

    #[test]
    fn test_zero_length_destination_fails() {
        let mut buf = [0u8; 0];
        assert!(matches!(
            capture_args("%d", &[LogArg::Int(1)], &mut buf),
            Err(CaptureError::BufferTooSmall { available: 0, .. })
        ));
    }

    #[test]
    fn test_mismatches_are_rejected() {
        let mut buf = [0u8; 64];
        assert_eq!(
            capture_args("%d %d", &[LogArg::Int(1)], &mut buf),
            Err(CaptureError::MissingArgument { index: 1, expected: ArgKind::Int })
        );
        assert_eq!(
            capture_args("%f", &[LogArg::Int(1)], &mut buf),
            Err(CaptureError::TypeMismatch {
                index: 0,
                expected: ArgKind::Double,
                found: "signed integer",
            })
        );
        assert_eq!(
            capture_args("%d", &[LogArg::Int(1), LogArg::Int(2)], &mut buf),
            Err(CaptureError::SurplusArguments { expected: 1, found: 2 })
        );
    }

    #[test]
    fn test_integer_promotion_truncates() {
        assert_eq!(coerce(ArgKind::Int, &LogArg::Int(-1)), Some(ArgValue::Int(0xffff_ffff)));
        assert_eq!(coerce(ArgKind::LongLong, &LogArg::Int(-1)), Some(ArgValue::Int(u64::MAX)));
        assert_eq!(coerce(ArgKind::Int, &LogArg::Bool(true)), Some(ArgValue::Int(1)));
        assert_eq!(coerce(ArgKind::Int, &LogArg::Char('A')), Some(ArgValue::Int(65)));
        assert_eq!(coerce(ArgKind::Int, &LogArg::Float(1.0)), None);
    }
}
