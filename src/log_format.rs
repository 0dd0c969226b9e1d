//! Printf-style format string analysis.
//!
//! This is the single parser shared by sizing, capture, and replay. Keeping one
//! parser means the arena allocation, the captured bytes, and the replayed text
//! can never disagree about which arguments a format string consumes.
//!
//! The parser is lenient: an unrecognized or malformed specifier becomes a
//! [`Segment::Unrecognized`] that consumes no argument and contributes zero bytes.
//! Only the conversions `d i o u x X c f F e E g G s p n` and the length
//! modifiers `hh h l ll z t j` are understood. `L`, `q`, `*` widths, `%a` and
//! positional arguments all fall through as unrecognized.

use std::ffi::{c_int, c_long, c_longlong};
use std::mem::size_of;

/// Size of the type tag written in front of every captured argument.
pub const TAG_SIZE: usize = 1;

/// Storage class of one argument, after C default argument promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ArgKind {
    /// `int`, also the promoted form of `char` and `short`.
    Int = 1,
    /// `long`
    Long = 2,
    /// `long long`
    LongLong = 3,
    /// `size_t`
    Size = 4,
    /// `ptrdiff_t`
    PtrDiff = 5,
    /// `intmax_t`
    IntMax = 6,
    /// `double`, also the promoted form of `float`.
    Double = 7,
    /// `char *`
    Str = 8,
    /// `void *` and the `int *` of `%n`.
    Pointer = 9,
}

impl ArgKind {
    /// Byte width of the promoted argument in a native variadic call.
    pub const fn promoted_size(self) -> usize {
        match self {
            ArgKind::Int => size_of::<c_int>(),
            ArgKind::Long => size_of::<c_long>(),
            ArgKind::LongLong => size_of::<c_longlong>(),
            ArgKind::Size => size_of::<usize>(),
            ArgKind::PtrDiff => size_of::<isize>(),
            ArgKind::IntMax => size_of::<i64>(),
            ArgKind::Double => size_of::<f64>(),
            ArgKind::Str | ArgKind::Pointer => size_of::<*const u8>(),
        }
    }

    /// Value bytes written by capture, not counting the tag.
    ///
    /// Identical to [`promoted_size`](Self::promoted_size) except for strings, which
    /// carry their length next to the pointer.
    pub const fn stored_size(self) -> usize {
        match self {
            ArgKind::Str => size_of::<*const u8>() + size_of::<usize>(),
            other => other.promoted_size(),
        }
    }

    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => ArgKind::Int,
            2 => ArgKind::Long,
            3 => ArgKind::LongLong,
            4 => ArgKind::Size,
            5 => ArgKind::PtrDiff,
            6 => ArgKind::IntMax,
            7 => ArgKind::Double,
            8 => ArgKind::Str,
            9 => ArgKind::Pointer,
            _ => return None,
        })
    }

    pub const fn is_integer(self) -> bool {
        matches!(
            self,
            ArgKind::Int
                | ArgKind::Long
                | ArgKind::LongLong
                | ArgKind::Size
                | ArgKind::PtrDiff
                | ArgKind::IntMax
        )
    }
}

/// Length modifier of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Length {
    #[default]
    None,
    /// `hh`
    Char,
    /// `h`
    Short,
    /// `l`
    Long,
    /// `ll`
    LongLong,
    /// `z`
    Size,
    /// `t`
    PtrDiff,
    /// `j`
    IntMax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    /// `-`
    pub left: bool,
    /// `+`
    pub plus: bool,
    /// ` `
    pub space: bool,
    /// `#`
    pub alternate: bool,
    /// `0`
    pub zero: bool,
}

/// One fully parsed `%...` conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionSpec {
    pub flags: Flags,
    pub width: Option<usize>,
    pub precision: Option<usize>,
    pub length: Length,
    /// The conversion character, one of `diouxXcfFeEgGspn`.
    pub conversion: u8,
}

impl ConversionSpec {
    /// The storage class this conversion pulls from the argument list.
    pub fn kind(&self) -> ArgKind {
        match self.conversion {
            b'd' | b'i' | b'o' | b'u' | b'x' | b'X' => match self.length {
                Length::None | Length::Char | Length::Short => ArgKind::Int,
                Length::Long => ArgKind::Long,
                Length::LongLong => ArgKind::LongLong,
                Length::Size => ArgKind::Size,
                Length::PtrDiff => ArgKind::PtrDiff,
                Length::IntMax => ArgKind::IntMax,
            },
            b'c' => ArgKind::Int,
            b'f' | b'F' | b'e' | b'E' | b'g' | b'G' => ArgKind::Double,
            b's' => ArgKind::Str,
            _ => ArgKind::Pointer,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self.conversion, b'd' | b'i')
    }
}

/// A piece of a format string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied verbatim.
    Literal(&'a str),
    /// `%%`
    Percent,
    Conversion(ConversionSpec),
    /// A specifier the parser does not understand, kept verbatim.
    Unrecognized(&'a str),
}

/// Iterator over the segments of a format string.
pub struct FormatSegments<'a> {
    fmt: &'a str,
    pos: usize,
}

pub fn segments(fmt: &str) -> FormatSegments<'_> {
    FormatSegments { fmt, pos: 0 }
}

/// Iterator over the argument-consuming conversions only.
pub fn conversions(fmt: &str) -> impl Iterator<Item = ConversionSpec> + '_ {
    segments(fmt).filter_map(|segment| match segment {
        Segment::Conversion(spec) => Some(spec),
        _ => None,
    })
}

impl<'a> Iterator for FormatSegments<'a> {
    type Item = Segment<'a>;

    fn next(&mut self) -> Option<Segment<'a>> {
        let bytes = self.fmt.as_bytes();
        let start = self.pos;
        if start >= bytes.len() {
            return None;
        }

        if bytes[start] != b'%' {
            let end = bytes[start..]
                .iter()
                .position(|&b| b == b'%')
                .map_or(bytes.len(), |offset| start + offset);
            self.pos = end;
            return Some(Segment::Literal(&self.fmt[start..end]));
        }

        if bytes.get(start + 1) == Some(&b'%') {
            self.pos = start + 2;
            return Some(Segment::Percent);
        }

        let (segment, end) = parse_specifier(self.fmt, start);
        self.pos = end;
        Some(segment)
    }
}

/// Parses the specifier starting at the `%` at `start`, returning the segment
/// and the index just past it.
fn parse_specifier(fmt: &str, start: usize) -> (Segment<'_>, usize) {
    let bytes = fmt.as_bytes();
    let mut p = start + 1;

    let mut flags = Flags::default();
    while let Some(&b) = bytes.get(p) {
        match b {
            b'-' => flags.left = true,
            b'+' => flags.plus = true,
            b' ' => flags.space = true,
            b'#' => flags.alternate = true,
            b'0' => flags.zero = true,
            _ => break,
        }
        p += 1;
    }

    let width = parse_number(bytes, &mut p);

    let mut precision = None;
    if bytes.get(p) == Some(&b'.') {
        p += 1;
        precision = Some(parse_number(bytes, &mut p).unwrap_or(0));
    }

    let length = match (bytes.get(p), bytes.get(p + 1)) {
        (Some(b'h'), Some(b'h')) => {
            p += 2;
            Length::Char
        }
        (Some(b'h'), _) => {
            p += 1;
            Length::Short
        }
        (Some(b'l'), Some(b'l')) => {
            p += 2;
            Length::LongLong
        }
        (Some(b'l'), _) => {
            p += 1;
            Length::Long
        }
        (Some(b'z'), _) => {
            p += 1;
            Length::Size
        }
        (Some(b't'), _) => {
            p += 1;
            Length::PtrDiff
        }
        (Some(b'j'), _) => {
            p += 1;
            Length::IntMax
        }
        _ => Length::None,
    };

    match bytes.get(p) {
        Some(&conversion) if CONVERSIONS.contains(&conversion) => (
            Segment::Conversion(ConversionSpec {
                flags,
                width,
                precision,
                length,
                conversion,
            }),
            p + 1,
        ),
        Some(_) => {
            // Swallow the offending character whole, even if it is multi-byte.
            let width = fmt[p..].chars().next().map_or(1, char::len_utf8);
            (Segment::Unrecognized(&fmt[start..p + width]), p + width)
        }
        None => (Segment::Unrecognized(&fmt[start..]), bytes.len()),
    }
}

const CONVERSIONS: &[u8] = b"diouxXcfFeEgGspn";

fn parse_number(bytes: &[u8], p: &mut usize) -> Option<usize> {
    let mut value: Option<usize> = None;
    while let Some(&b) = bytes.get(*p) {
        if !b.is_ascii_digit() {
            break;
        }
        let digit = usize::from(b - b'0');
        value = Some(value.unwrap_or(0).saturating_mul(10).saturating_add(digit));
        *p += 1;
    }
    value
}

/// Byte requirements of a format string's argument list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArgsLayout {
    /// Number of argument-consuming conversions.
    pub count: usize,
    /// Sum of promoted argument sizes, the native variadic layout.
    pub promoted_bytes: usize,
    /// Bytes capture writes: one tag plus the stored value per argument.
    pub encoded_bytes: usize,
}

pub fn layout_of(fmt: &str) -> ArgsLayout {
    conversions(fmt).fold(ArgsLayout::default(), |layout, spec| {
        let kind = spec.kind();
        ArgsLayout {
            count: layout.count + 1,
            promoted_bytes: layout.promoted_bytes + kind.promoted_size(),
            encoded_bytes: layout.encoded_bytes + TAG_SIZE + kind.stored_size(),
        }
    })
}

/// Number of bytes needed to hold the arguments of `fmt` at their promoted sizes.
///
/// Returns 0 for a missing format string or one without conversions.
pub fn calculate_args_size(fmt: Option<&str>) -> usize {
    fmt.map_or(0, |fmt| layout_of(fmt).promoted_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const INT: usize = size_of::<c_int>();
    const PTR: usize = size_of::<*const u8>();

    #[test]
    fn test_segments_split_literals_and_conversions() {
        let parts: Vec<_> = segments("a%db%%c").collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[0], Segment::Literal("a"));
        assert!(matches!(parts[1], Segment::Conversion(spec) if spec.conversion == b'd'));
        assert_eq!(parts[2], Segment::Literal("b"));
        assert_eq!(parts[3], Segment::Percent);
        assert_eq!(parts[4], Segment::Literal("c"));
    }

    #[test]
    fn test_flags_width_precision() {
        let spec = conversions("%-+ #012.5lld").next().unwrap();
        assert!(spec.flags.left && spec.flags.plus && spec.flags.space);
        assert!(spec.flags.alternate && spec.flags.zero);
        assert_eq!(spec.width, Some(12));
        assert_eq!(spec.precision, Some(5));
        assert_eq!(spec.length, Length::LongLong);
        assert_eq!(spec.kind(), ArgKind::LongLong);
    }

    #[test]
    fn test_bare_dot_means_zero_precision() {
        let spec = conversions("%.f").next().unwrap();
        assert_eq!(spec.precision, Some(0));
        assert_eq!(spec.width, None);
    }

    #[test]
    fn test_length_modifier_does_not_widen_doubles() {
        assert_eq!(conversions("%lf").next().unwrap().kind(), ArgKind::Double);
        assert_eq!(conversions("%hhd").next().unwrap().kind(), ArgKind::Int);
        assert_eq!(conversions("%ls").next().unwrap().kind(), ArgKind::Str);
    }

    #[test]
    fn test_unrecognized_is_verbatim() {
        let parts: Vec<_> = segments("x%Lfy").collect();
        assert_eq!(parts, vec![
            Segment::Literal("x"),
            Segment::Unrecognized("%L"),
            Segment::Literal("fy"),
        ]);

        let parts: Vec<_> = segments("%é!").collect();
        assert_eq!(parts, vec![Segment::Unrecognized("%é"), Segment::Literal("!")]);

        let parts: Vec<_> = segments("tail %-5").collect();
        assert_eq!(parts, vec![Segment::Literal("tail "), Segment::Unrecognized("%-5")]);
    }

    #[test]
    fn test_layout_counts_tags() {
        let layout = layout_of("%d %s");
        assert_eq!(layout.count, 2);
        assert_eq!(layout.promoted_bytes, INT + PTR);
        assert_eq!(
            layout.encoded_bytes,
            2 * TAG_SIZE + ArgKind::Int.stored_size() + ArgKind::Str.stored_size()
        );
    }

    #[test]
    fn test_missing_format_is_zero() {
        assert_eq!(calculate_args_size(None), 0);
        assert_eq!(calculate_args_size(Some("")), 0);
        assert_eq!(calculate_args_size(Some("100%% plain")), 0);
    }

    #[test]
    fn test_tags_round_trip() {
        for tag in 0..=u8::MAX {
            if let Some(kind) = ArgKind::from_tag(tag) {
                assert_eq!(kind.tag(), tag);
            }
        }
        assert_eq!(ArgKind::from_tag(0), None);
    }
}
