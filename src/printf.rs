//! Printf-compatible text engine.
//!
//! Drives a [`fmt::Write`] from a format string and an [`ArgSource`]. The same
//! engine renders replayed messages on the consumer thread and immediate
//! call-site formatting, which is what makes capture-then-replay reproduce
//! byte-identical text.
//!
//! Output follows glibc `printf` for the supported conversions, with two
//! deliberate differences: `%c` renders the Unicode scalar value instead of a
//! raw byte, and `%n` consumes its pointer without writing through it.

use std::fmt::{self, Write};

use crate::log_capture::truncate_bits;
use crate::log_format::{segments, ArgKind, ConversionSpec, Length, Segment};

/// Text written where an argument is missing or does not match its conversion.
pub const MISMATCH_MARKER: &str = "<?>";

/// A decoded argument ready for rendering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ArgValue<'a> {
    /// Raw bits of an integer, zero-extended from its promoted width.
    Int(u64),
    Double(f64),
    Str(&'a str),
    Pointer(usize),
}

/// Supplies arguments to the engine in format-string order.
pub trait ArgSource<'a> {
    /// Pulls the next argument for a conversion of class `kind`.
    ///
    /// Returns `None` when the source is exhausted or the next argument is not
    /// of that class.
    fn next_arg(&mut self, kind: ArgKind) -> Option<ArgValue<'a>>;
}

/// Renders `fmt` into `out`, pulling one argument per conversion from `args`.
pub fn format_to<'a, W, S>(out: &mut W, fmt: &str, args: &mut S) -> fmt::Result
where
    W: Write + ?Sized,
    S: ArgSource<'a> + ?Sized,
{
    for segment in segments(fmt) {
        match segment {
            Segment::Literal(text) | Segment::Unrecognized(text) => out.write_str(text)?,
            Segment::Percent => out.write_char('%')?,
            Segment::Conversion(spec) => match args.next_arg(spec.kind()) {
                Some(value) => write_conversion(out, &spec, value)?,
                None => out.write_str(MISMATCH_MARKER)?,
            },
        }
    }
    Ok(())
}

fn write_conversion<W: Write + ?Sized>(
    out: &mut W,
    spec: &ConversionSpec,
    value: ArgValue<'_>,
) -> fmt::Result {
    match (spec.conversion, value) {
        (b'd' | b'i', ArgValue::Int(bits)) => write_signed(out, spec, bits),
        (b'o' | b'u' | b'x' | b'X', ArgValue::Int(bits)) => write_unsigned(out, spec, bits),
        (b'c', ArgValue::Int(bits)) => {
            let c = char::from_u32(bits as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            let mut encoded = [0u8; 4];
            pad(out, spec, "", c.encode_utf8(&mut encoded), false)
        }
        (b'f' | b'F' | b'e' | b'E' | b'g' | b'G', ArgValue::Double(v)) => {
            write_float(out, spec, v)
        }
        (b's', ArgValue::Str(s)) => {
            let s = match spec.precision {
                Some(limit) => truncate_at_boundary(s, limit),
                None => s,
            };
            pad(out, spec, "", s, false)
        }
        (b'p', ArgValue::Pointer(0)) => pad(out, spec, "", "(nil)", false),
        (b'p', ArgValue::Pointer(addr)) => {
            let body = format!("{:x}", addr);
            pad(out, spec, "0x", &body, false)
        }
        (b'n', ArgValue::Pointer(_)) => Ok(()),
        _ => out.write_str(MISMATCH_MARKER),
    }
}

fn sign_extend(bits: u64, width: usize) -> i64 {
    let shift = 64 - 8 * width.clamp(1, 8) as u32;
    ((bits << shift) as i64) >> shift
}

fn write_signed<W: Write + ?Sized>(out: &mut W, spec: &ConversionSpec, bits: u64) -> fmt::Result {
    let value = sign_extend(bits, spec.kind().promoted_size());
    let value = match spec.length {
        Length::Char => value as i8 as i64,
        Length::Short => value as i16 as i64,
        _ => value,
    };

    let sign = if value < 0 {
        "-"
    } else if spec.flags.plus {
        "+"
    } else if spec.flags.space {
        " "
    } else {
        ""
    };
    let (zeros, digits) =
        int_precision(value.unsigned_abs().to_string(), value == 0, spec.precision);
    let body = Body {
        zeros,
        tail: &digits,
        ..Body::default()
    };
    pad_body(out, spec, sign, body, spec.precision.is_none())
}

fn write_unsigned<W: Write + ?Sized>(
    out: &mut W,
    spec: &ConversionSpec,
    bits: u64,
) -> fmt::Result {
    let value = truncate_bits(bits, spec.kind().promoted_size());
    let value = match spec.length {
        Length::Char => value as u8 as u64,
        Length::Short => value as u16 as u64,
        _ => value,
    };

    let raw = match spec.conversion {
        b'o' => format!("{:o}", value),
        b'x' => format!("{:x}", value),
        b'X' => format!("{:X}", value),
        _ => value.to_string(),
    };
    let (zeros, mut digits) = int_precision(raw, value == 0, spec.precision);

    let mut prefix = "";
    if spec.flags.alternate {
        match spec.conversion {
            b'o' if zeros == 0 && !digits.starts_with('0') => digits.insert(0, '0'),
            b'x' if value != 0 => prefix = "0x",
            b'X' if value != 0 => prefix = "0X",
            _ => {}
        }
    }
    let body = Body {
        zeros,
        tail: &digits,
        ..Body::default()
    };
    pad_body(out, spec, prefix, body, spec.precision.is_none())
}

/// Leading zeros the precision asks for, and the digits that follow them.
fn int_precision(digits: String, is_zero: bool, precision: Option<usize>) -> (usize, String) {
    match precision {
        Some(0) if is_zero => (0, String::new()),
        Some(p) => (p.saturating_sub(digits.len()), digits),
        None => (0, digits),
    }
}

/// Every finite `f64` has an exact decimal expansion with at most 1074
/// fraction digits and 767 significant digits. Past this precision the
/// digits are all zeros and are streamed instead of formatted.
const EXACT_DIGITS: usize = 1100;

/// Float text as digits, a run of `zeros` trailing digits, then the exponent.
struct FloatText {
    digits: String,
    zeros: usize,
    exponent: String,
}

fn write_float<W: Write + ?Sized>(out: &mut W, spec: &ConversionSpec, v: f64) -> fmt::Result {
    let upper = spec.conversion.is_ascii_uppercase();
    let sign = if v.is_sign_negative() {
        "-"
    } else if spec.flags.plus {
        "+"
    } else if spec.flags.space {
        " "
    } else {
        ""
    };

    if !v.is_finite() {
        let body = match (v.is_nan(), upper) {
            (true, false) => "nan",
            (true, true) => "NAN",
            (false, false) => "inf",
            (false, true) => "INF",
        };
        return pad(out, spec, sign, body, false);
    }

    let magnitude = v.abs();
    let precision = spec.precision.unwrap_or(6);
    let alternate = spec.flags.alternate;
    let text = match spec.conversion {
        b'f' | b'F' => fixed(magnitude, precision, alternate),
        b'e' | b'E' => exponential(magnitude, precision, alternate, upper),
        _ => general(magnitude, precision, alternate, upper),
    };
    let body = Body {
        head: &text.digits,
        zeros: text.zeros,
        tail: &text.exponent,
    };
    pad_body(out, spec, sign, body, true)
}

fn fixed(v: f64, precision: usize, alternate: bool) -> FloatText {
    let mut digits = format!("{:.*}", precision.min(EXACT_DIGITS), v);
    if alternate && precision == 0 {
        digits.push('.');
    }
    FloatText {
        digits,
        zeros: precision.saturating_sub(EXACT_DIGITS),
        exponent: String::new(),
    }
}

/// Splits Rust's `{:e}` output into mantissa and decimal exponent.
///
/// The mantissa carries at most [`EXACT_DIGITS`] fraction digits.
fn rust_exponential(v: f64, precision: usize) -> (String, i32) {
    let formatted = format!("{:.*e}", precision.min(EXACT_DIGITS), v);
    match formatted.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (formatted, 0),
    }
}

fn exponential(v: f64, precision: usize, alternate: bool, upper: bool) -> FloatText {
    let (mut digits, exp) = rust_exponential(v, precision);
    if alternate && precision == 0 {
        digits.push('.');
    }
    FloatText {
        digits,
        zeros: precision.saturating_sub(EXACT_DIGITS),
        exponent: exponent_suffix(exp, upper),
    }
}

fn exponent_suffix(exp: i32, upper: bool) -> String {
    format!(
        "{}{}{:02}",
        if upper { 'E' } else { 'e' },
        if exp < 0 { '-' } else { '+' },
        exp.unsigned_abs()
    )
}

fn general(v: f64, precision: usize, alternate: bool, upper: bool) -> FloatText {
    let p = precision.max(1);
    let exp = if v == 0.0 { 0 } else { rust_exponential(v, p - 1).1 };

    let (mut digits, fraction, exponent) = if exp >= -4 && (exp < 0 || (exp as usize) < p) {
        let fraction = if exp < 0 {
            (p - 1).saturating_add(exp.unsigned_abs() as usize)
        } else {
            p - 1 - exp as usize
        };
        let digits = format!("{:.*}", fraction.min(EXACT_DIGITS), v);
        (digits, fraction, String::new())
    } else {
        let (mantissa, exp) = rust_exponential(v, p - 1);
        (mantissa, p - 1, exponent_suffix(exp, upper))
    };

    let mut zeros = fraction.saturating_sub(EXACT_DIGITS);
    if alternate {
        if !digits.contains('.') {
            digits.push('.');
        }
    } else {
        strip_fraction_zeros(&mut digits);
        zeros = 0;
    }
    FloatText {
        digits,
        zeros,
        exponent,
    }
}

fn strip_fraction_zeros(body: &mut String) {
    if body.contains('.') {
        let trimmed = body.trim_end_matches('0').trim_end_matches('.').len();
        body.truncate(trimmed);
    }
}

/// Longest prefix of `s` not exceeding `limit` bytes that ends on a char boundary.
pub(crate) fn truncate_at_boundary(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Conversion text: `head`, then `zeros` zero digits, then `tail`.
#[derive(Default, Clone, Copy)]
struct Body<'a> {
    head: &'a str,
    zeros: usize,
    tail: &'a str,
}

impl Body<'_> {
    fn len(&self) -> usize {
        self.head
            .len()
            .saturating_add(self.zeros)
            .saturating_add(self.tail.len())
    }

    fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> fmt::Result {
        out.write_str(self.head)?;
        write_repeated(out, '0', self.zeros)?;
        out.write_str(self.tail)
    }
}

/// Writes `prefix` and `body` padded to the field width.
///
/// Zero padding goes between the prefix and the body and only applies when
/// `zero_allowed` is set and the field is right-aligned.
fn pad<W: Write + ?Sized>(
    out: &mut W,
    spec: &ConversionSpec,
    prefix: &str,
    body: &str,
    zero_allowed: bool,
) -> fmt::Result {
    let body = Body {
        head: body,
        ..Body::default()
    };
    pad_body(out, spec, prefix, body, zero_allowed)
}

fn pad_body<W: Write + ?Sized>(
    out: &mut W,
    spec: &ConversionSpec,
    prefix: &str,
    body: Body<'_>,
    zero_allowed: bool,
) -> fmt::Result {
    let len = prefix.len().saturating_add(body.len());
    let fill = spec.width.unwrap_or(0).saturating_sub(len);

    if spec.flags.left {
        out.write_str(prefix)?;
        body.write_to(out)?;
        write_repeated(out, ' ', fill)
    } else if spec.flags.zero && zero_allowed {
        out.write_str(prefix)?;
        write_repeated(out, '0', fill)?;
        body.write_to(out)
    } else {
        write_repeated(out, ' ', fill)?;
        out.write_str(prefix)?;
        body.write_to(out)
    }
}

fn write_repeated<W: Write + ?Sized>(out: &mut W, c: char, count: usize) -> fmt::Result {
    for _ in 0..count {
        out.write_char(c)?;
    }
    Ok(())
}

/// A [`fmt::Write`] over a fixed byte buffer that truncates instead of growing.
///
/// Truncation always lands on a UTF-8 boundary so the written prefix is valid
/// text. Once the buffer is full every further write fails, which stops the
/// engine early.
pub struct BoundedWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> BoundedWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, len: 0 }
    }

    pub fn written(&self) -> usize {
        self.len
    }

    pub fn as_str(&self) -> &str {
        // Only whole chars are ever copied in.
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }
}

impl Write for BoundedWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = self.buf.len() - self.len;
        let chunk = truncate_at_boundary(s, room);
        self.buf[self.len..self.len + chunk.len()].copy_from_slice(chunk.as_bytes());
        self.len += chunk.len();
        if chunk.len() < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}
