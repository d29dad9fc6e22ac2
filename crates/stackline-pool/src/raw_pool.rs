//! Raw frame-stack pool and permission slips.
//!
//! # Design
//!
//! All raw buffers are allocated once, at the capacity shape, and live in a
//! fixed arena addressed by [`BufferIndex`]. Ownership moves between stages
//! as a [`PermissionSlip`]:
//!
//! ```text
//! 1. take()/take_timeout() pops an idle index and mints a slip
//! 2. The slip travels Acquisition -> Accumulation -> Persistence
//! 3. Persistence calls release(slip), which consumes it
//! 4. The index is idle again and waiters on `returned` are woken
//! ```
//!
//! Slips are only minted here, are neither `Clone` nor `Copy`, and `release`
//! takes them by value. Double release and use of a stale index therefore
//! cannot be written, which is how the exclusivity invariant is enforced.
//!
//! The free list and the in-flight markers sit behind one mutex so that
//! [`RawBufferPool::census`] always observes `idle + in_flight == total`.

use crate::slot::{BufferSlot, Holder, SlotGuard};
use parking_lot::{Mutex, RwLock};
use stackline_core::{PipelineError, PipelineResult, SaveInfo, StackShape};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Stable index of a raw buffer within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferIndex(usize);

impl BufferIndex {
    /// Position in the arena.
    #[must_use]
    pub fn get(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BufferIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ownership token for one raw buffer.
///
/// Whoever holds the slip may lock the buffer it names. Dropping a slip
/// without releasing it would leak the buffer from the pool, so every stage
/// either forwards it or hands it to [`RawBufferPool::release`].
#[derive(Debug)]
#[must_use = "a permission slip must be forwarded or released"]
pub struct PermissionSlip {
    index: BufferIndex,
    shape: StackShape,
    sequence: u64,
    save: Option<SaveInfo>,
    acquired: bool,
}

impl PermissionSlip {
    /// Buffer this slip grants access to.
    pub fn index(&self) -> BufferIndex {
        self.index
    }

    /// Logical shape in effect when the slip was issued.
    pub fn shape(&self) -> StackShape {
        self.shape
    }

    /// Monotonic stack number assigned by the pool.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Save request, if any.
    pub fn save_info(&self) -> Option<&SaveInfo> {
        self.save.as_ref()
    }

    /// Attach or clear a save request.
    pub fn set_save_info(&mut self, save: Option<SaveInfo>) {
        self.save = save;
    }

    /// Whether acquisition filled the buffer. Unfilled slips are only
    /// travelling home and must not be accumulated or saved.
    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    /// Mark the buffer as filled (or not).
    pub fn set_acquired(&mut self, acquired: bool) {
        self.acquired = acquired;
    }
}

/// Atomic snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCensus {
    /// Buffers sitting in the free list.
    pub idle: usize,
    /// Buffers owned by some stage or queue.
    pub in_flight: usize,
    /// Buffers in the arena.
    pub total: usize,
}

impl PoolCensus {
    /// `idle + in_flight == total`.
    #[must_use]
    pub fn is_conserved(&self) -> bool {
        self.idle + self.in_flight == self.total
    }
}

struct FreeList {
    idle: VecDeque<usize>,
    loaned: Vec<bool>,
}

/// Every raw buffer of a pool, taken out for a shape change.
///
/// Holding a reservation is the only way to change the pool shape.
#[derive(Debug)]
#[must_use = "a reservation holds every buffer; hand it back with release_all"]
pub struct Reservation {
    slips: Vec<PermissionSlip>,
}

impl Reservation {
    /// Number of buffers held.
    pub fn len(&self) -> usize {
        self.slips.len()
    }

    /// True for a pool of size zero, which cannot be built.
    pub fn is_empty(&self) -> bool {
        self.slips.is_empty()
    }
}

/// Fixed-capacity pool of raw frame stacks.
pub struct RawBufferPool {
    slots: Box<[BufferSlot<Vec<u16>>]>,
    capacity: StackShape,
    shape: RwLock<StackShape>,
    free: Mutex<FreeList>,
    returned: Notify,
    next_sequence: AtomicU64,
    total_loans: AtomicU64,
    total_returns: AtomicU64,
}

impl RawBufferPool {
    /// Allocate `count` buffers of `capacity`.
    ///
    /// The logical shape starts equal to the capacity.
    ///
    /// # Errors
    /// `Configuration` if `count` is zero, `InvalidShape` if `capacity` is
    /// empty.
    pub fn new(count: usize, capacity: StackShape) -> PipelineResult<Arc<Self>> {
        Self::with_shape(count, capacity, capacity)
    }

    /// Allocate `count` buffers of `capacity` with logical `shape` in effect.
    ///
    /// # Errors
    /// As [`new`](Self::new), plus `InvalidShape` if `shape` does not fit.
    pub fn with_shape(
        count: usize,
        capacity: StackShape,
        shape: StackShape,
    ) -> PipelineResult<Arc<Self>> {
        if count == 0 {
            return Err(PipelineError::Configuration(
                "raw buffer count must be greater than 0".into(),
            ));
        }
        if capacity.is_empty() {
            return Err(PipelineError::InvalidShape {
                requested: capacity,
                capacity,
            });
        }

        if shape.is_empty() || !shape.fits_within(&capacity) {
            return Err(PipelineError::InvalidShape {
                requested: shape,
                capacity,
            });
        }

        let slots: Box<[BufferSlot<Vec<u16>>]> = (0..count)
            .map(|_| BufferSlot::new(vec![0u16; capacity.len()]))
            .collect();

        info!(
            count,
            %capacity,
            %shape,
            total_mb = (count * capacity.byte_len()) as f64 / (1024.0 * 1024.0),
            "RawBufferPool created"
        );

        Ok(Arc::new(Self {
            slots,
            capacity,
            shape: RwLock::new(shape),
            free: Mutex::new(FreeList {
                idle: (0..count).collect(),
                loaned: vec![false; count],
            }),
            returned: Notify::new(),
            next_sequence: AtomicU64::new(0),
            total_loans: AtomicU64::new(0),
            total_returns: AtomicU64::new(0),
        }))
    }

    /// Try to take an idle buffer without waiting.
    pub fn try_take(&self) -> Option<PermissionSlip> {
        self.take_idle(true)
    }

    /// Pop an idle buffer. Reservations do not consume sequence numbers.
    fn take_idle(&self, sequenced: bool) -> Option<PermissionSlip> {
        let index = {
            let mut free = self.free.lock();
            let index = free.idle.pop_front()?;
            free.loaned[index] = true;
            index
        };
        self.total_loans.fetch_add(1, Ordering::Relaxed);

        Some(PermissionSlip {
            index: BufferIndex(index),
            shape: *self.shape.read(),
            sequence: if sequenced {
                self.next_sequence.fetch_add(1, Ordering::Relaxed)
            } else {
                self.next_sequence.load(Ordering::Relaxed)
            },
            save: None,
            acquired: false,
        })
    }

    /// Take an idle buffer, waiting up to `timeout` for one to be released.
    ///
    /// Returns `None` if the timeout expires first.
    pub async fn take_timeout(&self, timeout: Duration) -> Option<PermissionSlip> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a release between the
            // check and the await is not missed.
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slip) = self.try_take() {
                return Some(slip);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    size = self.size(),
                    "Raw buffer take timed out - backpressure detected"
                );
                return None;
            }
        }
    }

    /// Return a buffer to the free list.
    pub fn release(&self, slip: PermissionSlip) {
        let index = slip.index.get();
        {
            let mut free = self.free.lock();
            debug_assert!(free.loaned[index], "released buffer {} was not in flight", index);
            free.loaned[index] = false;
            free.idle.push_back(index);
        }
        self.total_returns.fetch_add(1, Ordering::Relaxed);
        self.returned.notify_waiters();
        debug!(index, sequence = slip.sequence, "raw buffer returned to pool");
    }

    /// Take every buffer, waiting up to `timeout` for in-flight ones to
    /// come home.
    ///
    /// Buffers are collected as they become idle, so new `take` calls cannot
    /// starve the reservation. On timeout the collected buffers are released
    /// again and `None` is returned.
    pub async fn reserve_all(&self, timeout: Duration) -> Option<Reservation> {
        let deadline = Instant::now() + timeout;
        let mut slips = Vec::with_capacity(self.size());
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            while let Some(slip) = self.take_idle(false) {
                slips.push(slip);
            }
            if slips.len() == self.size() {
                return Some(Reservation { slips });
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                warn!(
                    reserved = slips.len(),
                    size = self.size(),
                    "Timed out waiting for raw buffers to drain"
                );
                for slip in slips {
                    self.release(slip);
                }
                return None;
            }
        }
    }

    /// Hand every reserved buffer back.
    pub fn release_all(&self, reservation: Reservation) {
        for slip in reservation.slips {
            self.release(slip);
        }
    }

    /// Change the logical shape. Requires holding every buffer.
    ///
    /// # Errors
    /// `InvalidShape` if `shape` is empty or does not fit the allocation; the
    /// previous shape stays in effect.
    pub fn set_shape(&self, _reservation: &Reservation, shape: StackShape) -> PipelineResult<()> {
        self.validate_shape(shape)?;
        let previous = std::mem::replace(&mut *self.shape.write(), shape);
        info!(%previous, %shape, "raw buffer pool reshaped");
        Ok(())
    }

    /// Check `shape` against the allocation without applying it.
    ///
    /// # Errors
    /// `InvalidShape` if `shape` is empty or does not fit.
    pub fn validate_shape(&self, shape: StackShape) -> PipelineResult<()> {
        if shape.is_empty() || !shape.fits_within(&self.capacity) {
            return Err(PipelineError::InvalidShape {
                requested: shape,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Lock the buffer named by `slip`.
    ///
    /// The returned guard covers the whole allocation; use
    /// `slip.shape().len()` to bound the logical stack.
    pub fn lock<'a>(&'a self, slip: &PermissionSlip, holder: Holder) -> SlotGuard<'a, Vec<u16>> {
        self.slots[slip.index.get()].lock(holder)
    }

    /// Slot for `index`, for instrumentation.
    #[must_use]
    pub fn slot(&self, index: BufferIndex) -> &BufferSlot<Vec<u16>> {
        &self.slots[index.get()]
    }

    /// Current logical shape.
    #[must_use]
    pub fn shape(&self) -> StackShape {
        *self.shape.read()
    }

    /// Shape the buffers were allocated at.
    #[must_use]
    pub fn capacity(&self) -> StackShape {
        self.capacity
    }

    /// Number of buffers in the arena.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Occupancy snapshot taken under the free-list lock.
    #[must_use]
    pub fn census(&self) -> PoolCensus {
        let free = self.free.lock();
        PoolCensus {
            idle: free.idle.len(),
            in_flight: free.loaned.iter().filter(|&&loaned| loaned).count(),
            total: self.slots.len(),
        }
    }

    /// Number of idle buffers.
    #[must_use]
    pub fn available(&self) -> usize {
        self.free.lock().idle.len()
    }

    /// Total slips issued since creation.
    #[must_use]
    pub fn total_loans(&self) -> u64 {
        self.total_loans.load(Ordering::Relaxed)
    }

    /// Total slips released since creation.
    #[must_use]
    pub fn total_returns(&self) -> u64 {
        self.total_returns.load(Ordering::Relaxed)
    }

    /// Wait until every buffer is idle or `timeout` expires.
    ///
    /// Returns whether the pool drained.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.returned.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.available() == self.size() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return false;
            }
        }
    }
}

impl std::fmt::Debug for RawBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawBufferPool")
            .field("capacity", &self.capacity)
            .field("shape", &self.shape())
            .field("census", &self.census())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(count: usize) -> Arc<RawBufferPool> {
        RawBufferPool::new(count, StackShape::new(4, 8, 8)).unwrap()
    }

    #[test]
    fn test_pool_creation() {
        let pool = pool(3);
        assert_eq!(pool.size(), 3);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.shape(), StackShape::new(4, 8, 8));
        assert_eq!(
            pool.census(),
            PoolCensus {
                idle: 3,
                in_flight: 0,
                total: 3
            }
        );
    }

    #[test]
    fn test_zero_sized_pool_rejected() {
        assert!(matches!(
            RawBufferPool::new(0, StackShape::new(1, 1, 1)),
            Err(PipelineError::Configuration(_))
        ));
        assert!(matches!(
            RawBufferPool::new(2, StackShape::new(0, 8, 8)),
            Err(PipelineError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_take_and_release_conserve() {
        let pool = pool(2);

        let a = pool.try_take().unwrap();
        let census = pool.census();
        assert_eq!(census.idle, 1);
        assert_eq!(census.in_flight, 1);
        assert!(census.is_conserved());

        let b = pool.try_take().unwrap();
        assert_ne!(a.index(), b.index());
        assert!(pool.try_take().is_none());
        assert!(pool.census().is_conserved());

        pool.release(a);
        assert_eq!(pool.available(), 1);
        pool.release(b);
        assert_eq!(pool.census().idle, 2);
        assert_eq!(pool.total_loans(), 2);
        assert_eq!(pool.total_returns(), 2);
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let pool = pool(2);
        let a = pool.try_take().unwrap();
        let b = pool.try_take().unwrap();
        assert!(b.sequence() > a.sequence());
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn test_fresh_slip_is_unacquired() {
        let pool = pool(1);
        let mut slip = pool.try_take().unwrap();
        assert!(!slip.is_acquired());
        assert!(slip.save_info().is_none());
        slip.set_acquired(true);
        slip.set_save_info(Some(SaveInfo::raw("/tmp/x.raw")));
        assert!(slip.is_acquired());
        assert!(slip.save_info().is_some());
        pool.release(slip);
    }

    #[tokio::test]
    async fn test_take_timeout_expires() {
        let pool = pool(1);
        let _held = pool.try_take().unwrap();
        assert!(pool.take_timeout(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_take_timeout_wakes_on_release() {
        let pool = pool(1);
        let held = pool.try_take().unwrap();

        let releaser = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            releaser.release(held);
        });

        let slip = pool.take_timeout(Duration::from_secs(2)).await;
        assert!(slip.is_some());
        pool.release(slip.unwrap());
    }

    #[tokio::test]
    async fn test_reserve_all_waits_for_in_flight() {
        let pool = pool(3);
        let held = pool.try_take().unwrap();

        let releaser = Arc::clone(&pool);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            releaser.release(held);
        });

        let reservation = pool.reserve_all(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reservation.len(), 3);
        assert_eq!(pool.census().in_flight, 3);

        pool.set_shape(&reservation, StackShape::new(2, 8, 8)).unwrap();
        pool.release_all(reservation);
        assert_eq!(pool.available(), 3);
        assert_eq!(pool.shape(), StackShape::new(2, 8, 8));
        assert_eq!(pool.try_take().unwrap().shape(), StackShape::new(2, 8, 8));
    }

    #[tokio::test]
    async fn test_reservation_keeps_sequence() {
        let pool = pool(2);
        let first = pool.try_take().unwrap();
        pool.release(first);

        let reservation = pool.reserve_all(Duration::from_millis(10)).await.unwrap();
        pool.release_all(reservation);
        assert_eq!(pool.try_take().unwrap().sequence(), 1);
    }

    #[tokio::test]
    async fn test_reserve_all_timeout_gives_buffers_back() {
        let pool = pool(2);
        let held = pool.try_take().unwrap();

        assert!(pool.reserve_all(Duration::from_millis(10)).await.is_none());
        assert_eq!(pool.available(), 1);
        assert!(pool.census().is_conserved());
        pool.release(held);
    }

    #[tokio::test]
    async fn test_set_shape_rejects_oversize() {
        let pool = pool(1);
        let reservation = pool.reserve_all(Duration::from_millis(10)).await.unwrap();

        let err = pool
            .set_shape(&reservation, StackShape::new(8, 8, 8))
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidShape { .. }));
        assert!(pool.set_shape(&reservation, StackShape::new(1, 0, 8)).is_err());
        assert_eq!(pool.shape(), StackShape::new(4, 8, 8));
        pool.release_all(reservation);
    }

    #[tokio::test]
    async fn test_wait_idle() {
        let pool = pool(2);
        assert!(pool.wait_idle(Duration::from_millis(1)).await);

        let held = pool.try_take().unwrap();
        assert!(!pool.wait_idle(Duration::from_millis(10)).await);
        pool.release(held);
        assert!(pool.wait_idle(Duration::from_millis(10)).await);
    }

    #[test]
    fn test_with_shape() {
        let pool =
            RawBufferPool::with_shape(2, StackShape::new(4, 8, 8), StackShape::new(2, 4, 8))
                .unwrap();
        assert_eq!(pool.shape(), StackShape::new(2, 4, 8));
        assert_eq!(pool.capacity(), StackShape::new(4, 8, 8));
        assert!(
            RawBufferPool::with_shape(2, StackShape::new(4, 8, 8), StackShape::new(2, 9, 8))
                .is_err()
        );
    }

    #[test]
    fn test_take_timeout_without_runtime_harness() {
        let pool = pool(1);
        let slip = tokio_test::block_on(pool.take_timeout(Duration::from_millis(5)));
        assert!(slip.is_some());
        pool.release(slip.unwrap());
    }

    #[test]
    fn test_lock_records_holder() {
        let pool = pool(1);
        let slip = pool.try_take().unwrap();
        {
            let mut stack = pool.lock(&slip, Holder::Acquisition);
            stack[..slip.shape().len()].fill(5);
            assert_eq!(pool.slot(slip.index()).holder(), Some(Holder::Acquisition));
        }
        assert_eq!(pool.slot(slip.index()).holder(), None);
        pool.release(slip);
    }
}
