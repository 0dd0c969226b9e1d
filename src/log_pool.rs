//! Message arena.
//!
//! A fixed byte region, allocated once, from which every message's header and
//! captured-argument bytes are carved. Nothing is allocated on the logging path after
//! construction.
//!
//! Two reclaim policies are available:
//!
//! * [`ReclaimPolicy::Bump`]: a high-water cursor. Freeing gives space back only
//!   when the freed slot is the most recent live allocation; any other free
//!   leaves its bytes reserved until [`MessageArena::reset`]. Under deferred,
//!   out-of-order consumption usable capacity shrinks over time.
//! * [`ReclaimPolicy::Slab`]: equal-sized slots and a free list of indices.
//!   Any slot is reclaimed whatever the free order, at the cost of capping the
//!   size of a single message at the slot size.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::trace;

use crate::error::{Exhaustion, LogError, Result};

/// Alignment of the arena region.
const ARENA_ALIGN: usize = 8;

/// How freed slots are returned to the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReclaimPolicy {
    #[default]
    Bump,
    Slab { slot_size: usize },
}

/// Execution context of the caller touching the arena guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecContext {
    /// A task may wait for the guard as long as it takes.
    Task,
    /// An interrupt handler gets a bounded number of attempts and then gives up.
    Interrupt,
}

struct ArenaState {
    /// End of the newest live bump allocation.
    cursor: usize,
    /// Free slab indices, popped from the back.
    free_slots: Vec<usize>,
    /// Largest `used_bytes` ever observed.
    peak: usize,
}

struct ArenaInner {
    region: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    policy: ReclaimPolicy,
    slot_count: usize,
    max_in_flight: usize,
    isr_lock_attempts: u32,
    live: AtomicUsize,
    state: Mutex<ArenaState>,
}

// The region is only reached through slots, and live slots never overlap.
unsafe impl Send for ArenaInner {}
unsafe impl Sync for ArenaInner {}

impl Drop for ArenaInner {
    fn drop(&mut self) {
        // Slots hold an Arc to us, so none can be live here.
        unsafe { dealloc(self.region.as_ptr(), self.layout) };
    }
}

impl ArenaInner {
    fn lock(&self, ctx: ExecContext) -> Option<MutexGuard<'_, ArenaState>> {
        match ctx {
            ExecContext::Task => Some(self.state.lock()),
            ExecContext::Interrupt => {
                for _ in 0..self.isr_lock_attempts.max(1) {
                    if let Some(guard) = self.state.try_lock() {
                        return Some(guard);
                    }
                    std::hint::spin_loop();
                }
                None
            }
        }
    }

    fn used_bytes(&self, state: &ArenaState) -> usize {
        match self.policy {
            ReclaimPolicy::Bump => state.cursor,
            ReclaimPolicy::Slab { slot_size } => {
                (self.slot_count - state.free_slots.len()) * slot_size
            }
        }
    }

    /// Returns a slot's space. Gives up silently if the guard is contended in
    /// interrupt context; the bytes then stay reserved until a reset.
    fn release(&self, offset: usize, reserved: usize, ctx: ExecContext) {
        let Some(mut state) = self.lock(ctx) else {
            trace!(offset, reserved, "arena guard contended, slot left reserved");
            self.live.fetch_sub(1, Ordering::AcqRel);
            return;
        };

        match self.policy {
            ReclaimPolicy::Bump => {
                if offset + reserved == state.cursor {
                    state.cursor = offset;
                }
            }
            ReclaimPolicy::Slab { slot_size } => {
                state.free_slots.push(offset / slot_size);
            }
        }
        // Decremented under the guard so `reset` never sees a half-released slot.
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Fixed-capacity arena handing out [`ArgSlot`]s.
///
/// Cloning is cheap and every clone refers to the same region.
#[derive(Clone)]
pub struct MessageArena {
    inner: Arc<ArenaInner>,
}

impl MessageArena {
    /// Allocates the region up front.
    ///
    /// `max_in_flight` bounds how many slots may be live at once;
    /// `isr_lock_attempts` bounds how often an interrupt-context caller tries
    /// the guard before giving up.
    pub fn new(
        capacity: usize,
        max_in_flight: usize,
        policy: ReclaimPolicy,
        isr_lock_attempts: u32,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(LogError::InitializationFailure(
                "arena capacity must be non-zero".into(),
            ));
        }
        if max_in_flight == 0 {
            return Err(LogError::InitializationFailure(
                "arena must allow at least one message in flight".into(),
            ));
        }

        let slot_count = match policy {
            ReclaimPolicy::Bump => 0,
            ReclaimPolicy::Slab { slot_size: 0 } => {
                return Err(LogError::InitializationFailure(
                    "slab slot size must be non-zero".into(),
                ))
            }
            ReclaimPolicy::Slab { slot_size } => capacity / slot_size,
        };
        if matches!(policy, ReclaimPolicy::Slab { .. }) && slot_count == 0 {
            return Err(LogError::InitializationFailure(
                "arena capacity is smaller than one slab slot".into(),
            ));
        }

        let layout = Layout::from_size_align(capacity, ARENA_ALIGN)
            .map_err(|e| LogError::InitializationFailure(format!("arena layout: {e}")))?;
        let region = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or_else(|| {
            LogError::InitializationFailure(format!("could not allocate {capacity} arena bytes"))
        })?;

        Ok(Self {
            inner: Arc::new(ArenaInner {
                region,
                layout,
                capacity,
                policy,
                slot_count,
                max_in_flight,
                isr_lock_attempts,
                live: AtomicUsize::new(0),
                state: Mutex::new(ArenaState {
                    cursor: 0,
                    free_slots: (0..slot_count).rev().collect(),
                    peak: 0,
                }),
            }),
        })
    }

    /// Carves a slot of `len` bytes, waiting for the guard if needed.
    ///
    /// Lack of space is reported immediately, never waited on.
    pub fn allocate(&self, len: usize) -> Result<ArgSlot> {
        self.allocate_in(len, ExecContext::Task)
    }

    /// Like [`allocate`](Self::allocate) but never blocks on the guard.
    pub fn allocate_from_isr(&self, len: usize) -> Result<ArgSlot> {
        self.allocate_in(len, ExecContext::Interrupt)
    }

    pub fn allocate_in(&self, len: usize, ctx: ExecContext) -> Result<ArgSlot> {
        let inner = &self.inner;
        let mut state = inner.lock(ctx).ok_or(Exhaustion::ArenaContended)?;

        if inner.live.load(Ordering::Acquire) >= inner.max_in_flight {
            return Err(Exhaustion::TooManyInFlight { limit: inner.max_in_flight }.into());
        }

        let (offset, reserved) = match inner.policy {
            ReclaimPolicy::Bump => {
                if len > inner.capacity - state.cursor {
                    return Err(Exhaustion::ArenaFull.into());
                }
                let offset = state.cursor;
                state.cursor += len;
                (offset, len)
            }
            ReclaimPolicy::Slab { slot_size } => {
                if len > slot_size {
                    return Err(Exhaustion::SlotTooSmall { requested: len, slot_size }.into());
                }
                let index = state.free_slots.pop().ok_or(Exhaustion::ArenaFull)?;
                (index * slot_size, slot_size)
            }
        };

        inner.live.fetch_add(1, Ordering::AcqRel);
        let used = inner.used_bytes(&state);
        state.peak = state.peak.max(used);

        Ok(ArgSlot {
            arena: Arc::clone(inner),
            offset,
            len,
            reserved,
        })
    }

    /// Returns a slot to the arena.
    ///
    /// With the bump policy the space is reclaimed only if `slot` is the most
    /// recent live allocation.
    pub fn free(&self, slot: ArgSlot) {
        debug_assert!(Arc::ptr_eq(&self.inner, &slot.arena), "slot freed to a foreign arena");
        drop(slot);
    }

    /// Returns a slot from interrupt context without blocking.
    ///
    /// If the guard cannot be taken the slot's bytes stay reserved until the
    /// next [`reset`](Self::reset).
    pub fn free_from_isr(&self, slot: ArgSlot) {
        debug_assert!(Arc::ptr_eq(&self.inner, &slot.arena), "slot freed to a foreign arena");
        slot.release(ExecContext::Interrupt);
    }

    /// Reclaims the whole region. Refused while any slot is still live.
    pub fn reset(&self) -> bool {
        let inner = &self.inner;
        let mut state = inner.state.lock();
        if inner.live.load(Ordering::Acquire) != 0 {
            return false;
        }
        state.cursor = 0;
        state.free_slots.clear();
        state.free_slots.extend((0..inner.slot_count).rev());
        true
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn policy(&self) -> ReclaimPolicy {
        self.inner.policy
    }

    /// Bytes currently reserved, live or stranded.
    pub fn used_bytes(&self) -> usize {
        let state = self.inner.state.lock();
        self.inner.used_bytes(&state)
    }

    pub fn peak_used_bytes(&self) -> usize {
        self.inner.state.lock().peak
    }

    pub fn live_slots(&self) -> usize {
        self.inner.live.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for MessageArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageArena")
            .field("capacity", &self.inner.capacity)
            .field("policy", &self.inner.policy)
            .field("used_bytes", &self.used_bytes())
            .field("live_slots", &self.live_slots())
            .finish()
    }
}

/// Exclusive ownership of a range of arena bytes.
///
/// Dropping the slot frees it from task context.
pub struct ArgSlot {
    arena: Arc<ArenaInner>,
    offset: usize,
    len: usize,
    reserved: usize,
}

// A slot is the only handle to its byte range.
unsafe impl Send for ArgSlot {}

impl ArgSlot {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of the slot within the arena region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: offset + len lies inside the region, and no other slot
        // covers these bytes while this one is live.
        unsafe { std::slice::from_raw_parts(self.arena.region.as_ptr().add(self.offset), self.len) }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as for `as_bytes`, and `&mut self` makes the borrow unique.
        unsafe {
            std::slice::from_raw_parts_mut(self.arena.region.as_ptr().add(self.offset), self.len)
        }
    }

    fn release(self, ctx: ExecContext) {
        let this = std::mem::ManuallyDrop::new(self);
        this.arena.release(this.offset, this.reserved, ctx);
        // SAFETY: `this` is never touched again; the Arc is moved out exactly once.
        drop(unsafe { std::ptr::read(&this.arena) });
    }
}

impl Drop for ArgSlot {
    fn drop(&mut self) {
        self.arena.release(self.offset, self.reserved, ExecContext::Task);
    }
}

impl std::fmt::Debug for ArgSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArgSlot")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bump(capacity: usize) -> MessageArena {
        MessageArena::new(capacity, 16, ReclaimPolicy::Bump, 1).unwrap()
    }

    #[test]
    fn test_slots_are_disjoint_and_writable() {
        let arena = bump(32);
        let mut a = arena.allocate(8).unwrap();
        let mut b = arena.allocate(8).unwrap();
        a.as_bytes_mut().fill(0xaa);
        b.as_bytes_mut().fill(0xbb);
        assert_eq!(a.offset(), 0);
        assert_eq!(b.offset(), 8);
        assert!(a.as_bytes().iter().all(|&x| x == 0xaa));
        assert!(b.as_bytes().iter().all(|&x| x == 0xbb));
    }

    #[test]
    fn test_zero_length_slot() {
        let arena = bump(8);
        let slot = arena.allocate(0).unwrap();
        assert!(slot.is_empty());
        assert_eq!(arena.used_bytes(), 0);
        arena.free(slot);
        assert_eq!(arena.live_slots(), 0);
    }

    #[test]
    fn test_in_flight_limit() {
        let arena = MessageArena::new(64, 2, ReclaimPolicy::Bump, 1).unwrap();
        let _a = arena.allocate(1).unwrap();
        let _b = arena.allocate(1).unwrap();
        assert_eq!(
            arena.allocate(1).unwrap_err(),
            LogError::ResourceExhausted(Exhaustion::TooManyInFlight { limit: 2 })
        );
    }

    #[test]
    fn test_isr_allocation_gives_up_when_contended() {
        let arena = bump(64);
        let _guard = arena.inner.state.lock();
        assert_eq!(
            arena.allocate_from_isr(4).unwrap_err(),
            LogError::ResourceExhausted(Exhaustion::ArenaContended)
        );
    }

    #[test]
    fn test_isr_free_under_contention_strands_bytes() {
        let arena = bump(64);
        let slot = arena.allocate(16).unwrap();
        {
            let _guard = arena.inner.state.lock();
            arena.free_from_isr(slot);
        }
        assert_eq!(arena.live_slots(), 0);
        assert_eq!(arena.used_bytes(), 16);
        assert!(arena.reset());
        assert_eq!(arena.used_bytes(), 0);
    }

    #[test]
    fn test_rejects_bad_construction() {
        assert!(MessageArena::new(0, 1, ReclaimPolicy::Bump, 1).is_err());
        assert!(MessageArena::new(64, 0, ReclaimPolicy::Bump, 1).is_err());
        assert!(MessageArena::new(64, 1, ReclaimPolicy::Slab { slot_size: 0 }, 1).is_err());
        assert!(MessageArena::new(16, 1, ReclaimPolicy::Slab { slot_size: 32 }, 1).is_err());
    }
}
