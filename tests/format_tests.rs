use deferred_logger::calculate_args_size;
use deferred_logger::log_format::{conversions, layout_of, segments, ArgKind, Segment};
use std::mem::size_of;
use std::os::raw::{c_int, c_long, c_longlong};

const INT: usize = size_of::<c_int>();
const PTR: usize = size_of::<*const u8>();
const DOUBLE: usize = size_of::<f64>();

#[test]
fn test_mixed_conversions_sum_promoted_sizes() {
    assert_eq!(
        calculate_args_size(Some("%d %s %lld")),
        INT + PTR + size_of::<c_longlong>()
    );
}

#[test]
fn test_small_types_promote() {
    // char, short and float all travel at their promoted width.
    assert_eq!(calculate_args_size(Some("%hhd %hd %c")), 3 * INT);
    assert_eq!(calculate_args_size(Some("%f %e %g")), 3 * DOUBLE);
    assert_eq!(calculate_args_size(Some("%ld %zu %td %jd")),
        size_of::<c_long>() + size_of::<usize>() + size_of::<isize>() + size_of::<i64>());
}

#[test]
fn test_flags_width_precision_are_skipped() {
    assert_eq!(calculate_args_size(Some("%-08.3f|%+5d|% x|%#o")), DOUBLE + 3 * INT);
}

#[test]
fn test_literal_percent_contributes_nothing() {
    assert_eq!(calculate_args_size(Some("100%%")), 0);
    assert_eq!(calculate_args_size(Some("%%d")), 0);
    assert_eq!(calculate_args_size(Some("no conversions")), 0);
    assert_eq!(calculate_args_size(None), 0);
}

/// Pins the exact set of conversions sizing recognizes. Anything outside it,
/// including valid C conversions such as `%a` or `%Lf`, is skipped and replayed
/// verbatim.
#[test]
fn test_recognized_specifier_coverage() {
    let expected = [
        ('d', ArgKind::Int),
        ('i', ArgKind::Int),
        ('o', ArgKind::Int),
        ('u', ArgKind::Int),
        ('x', ArgKind::Int),
        ('X', ArgKind::Int),
        ('c', ArgKind::Int),
        ('f', ArgKind::Double),
        ('F', ArgKind::Double),
        ('e', ArgKind::Double),
        ('E', ArgKind::Double),
        ('g', ArgKind::Double),
        ('G', ArgKind::Double),
        ('s', ArgKind::Str),
        ('p', ArgKind::Pointer),
        ('n', ArgKind::Pointer),
    ];
    for (conversion, kind) in expected {
        let fmt = format!("%{}", conversion);
        let specs: Vec<_> = conversions(&fmt).collect();
        assert_eq!(specs.len(), 1, "{} should be recognized", fmt);
        assert_eq!(specs[0].kind(), kind, "{} has the wrong storage class", fmt);
    }

    for unrecognized in ["%a", "%A", "%q", "%*d", "%Lf", "%C", "%S", "%m"] {
        assert_eq!(layout_of(unrecognized).count, 0, "{} should be skipped", unrecognized);
        assert!(segments(unrecognized).any(|s| matches!(s, Segment::Unrecognized(_))));
    }
}

#[test]
fn test_length_modifiers_pick_storage_class() {
    let kinds: Vec<_> = conversions("%hhx %hx %lx %llx %zx %tx %jx").map(|s| s.kind()).collect();
    assert_eq!(kinds, vec![
        ArgKind::Int,
        ArgKind::Int,
        ArgKind::Long,
        ArgKind::LongLong,
        ArgKind::Size,
        ArgKind::PtrDiff,
        ArgKind::IntMax,
    ]);
}

#[test]
fn test_encoded_layout_adds_tags() {
    let layout = layout_of("%d %s %lld");
    assert_eq!(layout.count, 3);
    assert_eq!(layout.promoted_bytes, calculate_args_size(Some("%d %s %lld")));
    assert!(layout.encoded_bytes > layout.promoted_bytes);
}
