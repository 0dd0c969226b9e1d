/// A single producer-side argument, tagged with its Rust value class.
///
/// Call sites build a slice of these in place of a C variadic list. Capture
/// later checks every value against the conversion that consumes it, applying
/// C promotion rules, before anything is written to the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogArg {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    Char(char),
    /// Borrowed for the whole program, so replay on the consumer thread can
    /// still read it after the producer returns.
    Str(&'static str),
    Ptr(usize),
}

impl LogArg {
    /// Short name of the value class, used in mismatch reports.
    pub fn type_name(&self) -> &'static str {
        match self {
            LogArg::Int(_) => "signed integer",
            LogArg::Uint(_) => "unsigned integer",
            LogArg::Float(_) => "float",
            LogArg::Bool(_) => "bool",
            LogArg::Char(_) => "char",
            LogArg::Str(_) => "string",
            LogArg::Ptr(_) => "pointer",
        }
    }
}

/// A trait for values that can be passed to the deferred log macros.
///
/// Only types whose value can be copied out at the call site implement it.
/// Borrowed strings must be `'static`; anything else has to be formatted
/// by the caller first.
pub trait Loggable {
    fn to_log_arg(&self) -> LogArg;
}

macro_rules! impl_loggable {
    ($variant:ident as $wide:ty: $($t:ty),*) => {
        $(
            impl Loggable for $t {
                #[inline(always)]
                fn to_log_arg(&self) -> LogArg {
                    LogArg::$variant(*self as $wide)
                }
            }
        )*
    };
}

impl_loggable!(Int as i64: i8, i16, i32, i64, isize);
impl_loggable!(Uint as u64: u8, u16, u32, u64, usize);
impl_loggable!(Float as f64: f32, f64);

impl Loggable for bool {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        LogArg::Bool(*self)
    }
}

impl Loggable for char {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        LogArg::Char(*self)
    }
}

impl Loggable for &'static str {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        LogArg::Str(*self)
    }
}

impl<T: ?Sized> Loggable for *const T {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        LogArg::Ptr(self.cast::<()>() as usize)
    }
}

impl<T: ?Sized> Loggable for *mut T {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        LogArg::Ptr(self.cast::<()>() as usize)
    }
}

impl<T: Loggable + ?Sized> Loggable for &T {
    #[inline(always)]
    fn to_log_arg(&self) -> LogArg {
        (**self).to_log_arg()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_widening() {
        assert_eq!((-5i8).to_log_arg(), LogArg::Int(-5));
        assert_eq!(250u8.to_log_arg(), LogArg::Uint(250));
        assert_eq!(1.5f32.to_log_arg(), LogArg::Float(1.5));
        assert_eq!(usize::MAX.to_log_arg(), LogArg::Uint(usize::MAX as u64));
    }

    #[test]
    fn test_string_and_pointer() {
        let name: &'static str = "sensor";
        assert_eq!(name.to_log_arg(), LogArg::Str("sensor"));

        let value = 7u32;
        let ptr = &value as *const u32;
        assert_eq!(ptr.to_log_arg(), LogArg::Ptr(ptr as usize));
    }

    #[test]
    fn test_references_forward() {
        let value = 42i32;
        assert_eq!((&value).to_log_arg(), LogArg::Int(42));
        assert_eq!((&&value).to_log_arg(), LogArg::Int(42));
    }

    #[test]
    fn test_type_names() {
        assert_eq!(LogArg::Bool(true).type_name(), "bool");
        assert_eq!(LogArg::Str("x").type_name(), "string");
    }
}
