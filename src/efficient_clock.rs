//! Tick source stamped on every message at emit time.
//!
//! Producers may be interrupt handlers, so reading the clock must not take a
//! lock or make a system call on the common targets. A hardware counter is
//! read directly and scaled down to a coarser log tick.

#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::_rdtsc;

/// Raw counter ticks per log tick.
/// Adjust this constant to match your CPU and desired resolution.
pub const TICKS_PER_UNIT: u64 = 30_000;

/// Log ticks elapsed since the pipeline was initialized.
///
/// # Examples
///
/// ```
/// # use deferred_logger::efficient_clock::TickClock;
/// let clock = TickClock::start();
/// let first = clock.ticks();
/// let second = clock.ticks();
/// assert!(second >= first);
/// ```
#[derive(Copy, Clone, Debug)]
pub struct TickClock {
    origin: u64,
}

impl TickClock {
    /// Creates a clock whose tick 0 is now.
    pub fn start() -> Self {
        Self { origin: get_timestamp() }
    }

    /// Ticks since [`start`](Self::start), never going backwards past zero.
    #[inline(always)]
    pub fn ticks(&self) -> u64 {
        get_timestamp().saturating_sub(self.origin) / TICKS_PER_UNIT
    }

    /// Raw counter value this clock counts from.
    pub fn origin(&self) -> u64 {
        self.origin
    }
}

impl Default for TickClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Returns a monotonic timestamp with the highest precision available.
///
/// This function uses architecture-specific instructions when available:
/// - x86_64: RDTSC instruction (CPU time stamp counter)
/// - aarch64: CNTVCT_EL0 register (ARM virtual counter)
/// - Other platforms: System time with nanosecond precision
#[inline(always)]
pub fn get_timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    unsafe {
        _rdtsc()
    }

    #[cfg(target_arch = "aarch64")]
    unsafe {
        let mut value: u64;
        std::arch::asm!("mrs {}, cntvct_el0", out(reg) value);
        value
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }
}
