//! Preallocated buffer storage for the stackline pipeline.
//!
//! Nothing in this crate allocates after construction. It provides:
//!
//! - [`RawBufferPool`]: the fixed arena of raw frame stacks, with a free list
//!   and [`PermissionSlip`] ownership tokens
//! - [`AccumulationPair`] / [`DisplayPair`]: the two double-buffered stages
//! - [`BufferSlot`]: a mutex tagged with its current [`Holder`], used for all
//!   of the above
//!
//! # Example
//!
//! ```
//! use stackline_core::StackShape;
//! use stackline_pool::{Holder, RawBufferPool};
//!
//! let pool = RawBufferPool::new(3, StackShape::new(4, 8, 8)).unwrap();
//! let slip = pool.try_take().unwrap();
//! {
//!     let mut stack = pool.lock(&slip, Holder::Acquisition);
//!     stack[..slip.shape().len()].fill(10);
//! }
//! pool.release(slip);
//! assert!(pool.census().is_conserved());
//! ```

pub mod double;
pub mod raw_pool;
pub mod slot;

pub use double::{
    fold_max, max_project, AccumulationBuffer, AccumulationPair, AccumulationState,
    DisplayBuffer, DisplayPair, FoldOutcome, PairIndex,
};
pub use raw_pool::{BufferIndex, PermissionSlip, PoolCensus, RawBufferPool, Reservation};
pub use slot::{BufferSlot, Holder, SlotGuard};
