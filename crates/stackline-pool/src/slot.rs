//! Instrumented buffer locks.
//!
//! Every buffer in the arena sits in a [`BufferSlot`]: a `parking_lot::Mutex`
//! plus an atomic tag naming the stage that currently holds the lock. The tag
//! is set right after the mutex is acquired and cleared right before it is
//! released, so observers (tests, debug logging) can see which stage owns a
//! buffer at any instant without taking the lock themselves.

use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Identity of a buffer lock holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Holder {
    /// Acquisition stage writing a raw stack
    Acquisition = 1,
    /// Accumulation stage folding a raw stack
    Accumulation = 2,
    /// Persistence stage serializing a raw stack
    Persistence = 3,
    /// Projection stage reducing an accumulation
    Projection = 4,
    /// Display stage rendering
    Display = 5,
    /// Caller-side readers going through the pipeline handle
    External = 6,
}

impl Holder {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(Holder::Acquisition),
            2 => Some(Holder::Accumulation),
            3 => Some(Holder::Persistence),
            4 => Some(Holder::Projection),
            5 => Some(Holder::Display),
            6 => Some(Holder::External),
            _ => None,
        }
    }
}

const UNHELD: u8 = 0;

/// A buffer behind its own mutex, tagged with its current holder.
pub struct BufferSlot<T> {
    data: Mutex<T>,
    holder: AtomicU8,
    lock_count: AtomicU64,
}

impl<T> BufferSlot<T> {
    /// Wrap `value` in an unheld slot.
    pub fn new(value: T) -> Self {
        Self {
            data: Mutex::new(value),
            holder: AtomicU8::new(UNHELD),
            lock_count: AtomicU64::new(0),
        }
    }

    /// Lock the slot on behalf of `holder`, blocking until it is free.
    pub fn lock(&self, holder: Holder) -> SlotGuard<'_, T> {
        let guard = self.data.lock();
        self.claim(holder);
        SlotGuard {
            guard,
            holder: &self.holder,
        }
    }

    /// Lock the slot if nobody else holds it.
    pub fn try_lock(&self, holder: Holder) -> Option<SlotGuard<'_, T>> {
        let guard = self.data.try_lock()?;
        self.claim(holder);
        Some(SlotGuard {
            guard,
            holder: &self.holder,
        })
    }

    /// Stage currently holding the lock, if any.
    #[must_use]
    pub fn holder(&self) -> Option<Holder> {
        Holder::from_tag(self.holder.load(Ordering::Acquire))
    }

    /// Number of times this slot has been locked.
    #[must_use]
    pub fn lock_count(&self) -> u64 {
        self.lock_count.load(Ordering::Relaxed)
    }

    fn claim(&self, holder: Holder) {
        let previous = self.holder.swap(holder as u8, Ordering::AcqRel);
        if previous != UNHELD {
            // The mutex is held, so a stale tag means a guard leaked its
            // release. Buffer ownership is still sound; only the tag lied.
            tracing::error!(
                ?holder,
                previous = ?Holder::from_tag(previous),
                "buffer slot tag was not cleared by its previous holder"
            );
            debug_assert_eq!(previous, UNHELD, "buffer slot holder tag out of sync");
        }
        self.lock_count.fetch_add(1, Ordering::Relaxed);
    }
}

impl<T: Default> Default for BufferSlot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for BufferSlot<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferSlot")
            .field("holder", &self.holder())
            .field("lock_count", &self.lock_count())
            .finish()
    }
}

/// RAII guard for a locked [`BufferSlot`].
///
/// Clears the holder tag before the mutex is released.
pub struct SlotGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    holder: &'a AtomicU8,
}

impl<T> Deref for SlotGuard<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SlotGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for SlotGuard<'_, T> {
    fn drop(&mut self) {
        // Runs before `guard` is dropped, i.e. while the mutex is still held.
        self.holder.store(UNHELD, Ordering::Release);
    }
}
