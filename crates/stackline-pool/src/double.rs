//! Double-buffered accumulation and display storage.
//!
//! Accumulation and display each own exactly two buffers. At any time one is
//! being written by its producer stage and the other is either being read
//! downstream or waiting to be reused, so neither side ever waits on the
//! other for a whole stack.
//!
//! Buffers are addressed by [`PairIndex`] and travel between stages as plain
//! indices over channels. Like raw buffers, each sits in a [`BufferSlot`] so
//! lock holders are visible to instrumentation.

use crate::slot::{BufferSlot, Holder, SlotGuard};
use stackline_core::StackShape;

/// Which half of a buffer pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairIndex {
    /// Slot 0
    First,
    /// Slot 1
    Second,
}

impl PairIndex {
    /// The other half.
    #[must_use]
    pub fn other(self) -> Self {
        match self {
            PairIndex::First => PairIndex::Second,
            PairIndex::Second => PairIndex::First,
        }
    }

    fn slot(self) -> usize {
        match self {
            PairIndex::First => 0,
            PairIndex::Second => 1,
        }
    }
}

impl std::fmt::Display for PairIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.slot())
    }
}

// =============================================================================
// Kernels
// =============================================================================

/// `acc[i] = max(acc[i], src[i])` over the shorter of the two slices.
#[inline]
pub fn fold_max(acc: &mut [u16], src: &[u16]) {
    for (a, &s) in acc.iter_mut().zip(src) {
        if s > *a {
            *a = s;
        }
    }
}

/// Maximum over the frame axis of `stack`, written to `out`.
///
/// `stack` must hold at least `shape.len()` samples and `out` at least
/// `shape.frame_len()`.
pub fn max_project(stack: &[u16], shape: StackShape, out: &mut [u16]) {
    let frame_len = shape.frame_len();
    let out = &mut out[..frame_len];
    let mut frames = stack[..shape.len()].chunks_exact(frame_len);
    match frames.next() {
        Some(first) => out.copy_from_slice(first),
        None => return,
    }
    for frame in frames {
        fold_max(out, frame);
    }
}

// =============================================================================
// Accumulation
// =============================================================================

/// Lifecycle of an accumulation buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulationState {
    /// Reset; the next stack is copied in.
    Empty,
    /// Holds the running maximum of at least one stack.
    Accumulating,
    /// Handed to projection; must not be written until reset.
    HandedOff,
}

/// What [`AccumulationBuffer::fold`] did with a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldOutcome {
    /// First stack after a reset, copied verbatim.
    Copied,
    /// Merged with elementwise maximum.
    Folded,
    /// Dropped because the stack cap was reached.
    Skipped,
}

/// Running elementwise maximum of raw stacks.
#[derive(Debug)]
pub struct AccumulationBuffer {
    data: Vec<u16>,
    state: AccumulationState,
    shape: StackShape,
    stacks: u64,
    skipped: u64,
}

impl AccumulationBuffer {
    fn new(capacity: StackShape) -> Self {
        Self {
            data: vec![0u16; capacity.len()],
            state: AccumulationState::Empty,
            shape: capacity,
            stacks: 0,
            skipped: 0,
        }
    }

    /// Fold one raw stack of `shape` into the buffer.
    ///
    /// With `cap = Some(n)`, stacks beyond the `n`th are skipped and counted.
    pub fn fold(&mut self, stack: &[u16], shape: StackShape, cap: Option<u64>) -> FoldOutcome {
        let len = shape.len();
        match self.state {
            AccumulationState::Accumulating if shape == self.shape => {
                if cap.is_some_and(|cap| self.stacks >= cap) {
                    self.skipped += 1;
                    return FoldOutcome::Skipped;
                }
                fold_max(&mut self.data[..len], &stack[..len]);
                self.stacks += 1;
                FoldOutcome::Folded
            }
            _ => {
                self.data[..len].copy_from_slice(&stack[..len]);
                self.shape = shape;
                self.state = AccumulationState::Accumulating;
                self.stacks = 1;
                self.skipped = 0;
                FoldOutcome::Copied
            }
        }
    }

    /// Mark as handed to projection.
    pub fn hand_off(&mut self) {
        self.state = AccumulationState::HandedOff;
    }

    /// Back to `Empty` at `shape`.
    pub fn reset(&mut self, shape: StackShape) {
        self.state = AccumulationState::Empty;
        self.shape = shape;
        self.stacks = 0;
        self.skipped = 0;
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AccumulationState {
        self.state
    }

    /// Shape of the accumulated stacks.
    #[must_use]
    pub fn shape(&self) -> StackShape {
        self.shape
    }

    /// Stacks folded since the last reset.
    #[must_use]
    pub fn stacks(&self) -> u64 {
        self.stacks
    }

    /// Stacks dropped by the cap since the last reset.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// The logical stack.
    #[must_use]
    pub fn as_slice(&self) -> &[u16] {
        &self.data[..self.shape.len()]
    }

    /// Maximum over the frame axis into `out`.
    pub fn project_into(&self, out: &mut DisplayBuffer) {
        let (height, width) = self.shape.frame_dims();
        max_project(&self.data, self.shape, &mut out.data);
        out.height = height;
        out.width = width;
        out.stacks = self.stacks;
    }
}

/// The two accumulation buffers.
#[derive(Debug)]
pub struct AccumulationPair {
    slots: [BufferSlot<AccumulationBuffer>; 2],
    capacity: StackShape,
}

impl AccumulationPair {
    /// Allocate both buffers at `capacity`.
    #[must_use]
    pub fn new(capacity: StackShape) -> Self {
        Self {
            slots: [
                BufferSlot::new(AccumulationBuffer::new(capacity)),
                BufferSlot::new(AccumulationBuffer::new(capacity)),
            ],
            capacity,
        }
    }

    /// Lock one buffer.
    pub fn lock(&self, index: PairIndex, holder: Holder) -> SlotGuard<'_, AccumulationBuffer> {
        self.slots[index.slot()].lock(holder)
    }

    /// Slot for instrumentation.
    #[must_use]
    pub fn slot(&self, index: PairIndex) -> &BufferSlot<AccumulationBuffer> {
        &self.slots[index.slot()]
    }

    /// Allocation shape.
    #[must_use]
    pub fn capacity(&self) -> StackShape {
        self.capacity
    }
}

// =============================================================================
// Display
// =============================================================================

/// A 2-D projection ready to render.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    data: Vec<u16>,
    height: usize,
    width: usize,
    stacks: u64,
}

impl DisplayBuffer {
    fn new(height: usize, width: usize) -> Self {
        Self {
            data: vec![0u16; height * width],
            height,
            width,
            stacks: 0,
        }
    }

    /// Logical `(height, width)`.
    #[must_use]
    pub fn dims(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Number of raw stacks behind this projection.
    #[must_use]
    pub fn stacks(&self) -> u64 {
        self.stacks
    }

    /// Row-major pixels of the logical frame.
    #[must_use]
    pub fn pixels(&self) -> &[u16] {
        &self.data[..self.height * self.width]
    }
}

/// The two display buffers.
#[derive(Debug)]
pub struct DisplayPair {
    slots: [BufferSlot<DisplayBuffer>; 2],
}

impl DisplayPair {
    /// Allocate both buffers for frames of `capacity`.
    ///
    /// Both start blank at the capacity frame size.
    #[must_use]
    pub fn new(capacity: StackShape) -> Self {
        let (height, width) = capacity.frame_dims();
        Self {
            slots: [
                BufferSlot::new(DisplayBuffer::new(height, width)),
                BufferSlot::new(DisplayBuffer::new(height, width)),
            ],
        }
    }

    /// Lock one buffer.
    pub fn lock(&self, index: PairIndex, holder: Holder) -> SlotGuard<'_, DisplayBuffer> {
        self.slots[index.slot()].lock(holder)
    }

    /// Slot for instrumentation.
    #[must_use]
    pub fn slot(&self, index: PairIndex) -> &BufferSlot<DisplayBuffer> {
        &self.slots[index.slot()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(shape: StackShape, value: u16) -> Vec<u16> {
        vec![value; shape.len()]
    }

    #[test]
    fn test_pair_index_other() {
        assert_eq!(PairIndex::First.other(), PairIndex::Second);
        assert_eq!(PairIndex::Second.other().other(), PairIndex::Second);
    }

    #[test]
    fn test_first_fold_copies_then_maxes() {
        let shape = StackShape::new(2, 2, 2);
        let mut acc = AccumulationBuffer::new(shape);

        let first = vec![1, 9, 3, 4, 5, 6, 7, 0];
        let second = vec![8, 2, 3, 1, 9, 9, 0, 1];

        assert_eq!(acc.fold(&first, shape, None), FoldOutcome::Copied);
        assert_eq!(acc.as_slice(), &first[..]);
        assert_eq!(acc.fold(&second, shape, None), FoldOutcome::Folded);
        assert_eq!(acc.as_slice(), &[8, 9, 3, 4, 9, 9, 7, 1]);
        assert_eq!(acc.stacks(), 2);
        assert_eq!(acc.state(), AccumulationState::Accumulating);
    }

    #[test]
    fn test_fold_after_reset_forgets_old_values() {
        let shape = StackShape::new(1, 2, 2);
        let mut acc = AccumulationBuffer::new(shape);
        acc.fold(&constant(shape, 50), shape, None);
        acc.hand_off();
        acc.reset(shape);
        assert_eq!(acc.state(), AccumulationState::Empty);

        acc.fold(&constant(shape, 5), shape, None);
        assert_eq!(acc.as_slice(), &[5, 5, 5, 5]);
    }

    #[test]
    fn test_cap_skips_extra_stacks() {
        let shape = StackShape::new(1, 1, 2);
        let mut acc = AccumulationBuffer::new(shape);
        assert_eq!(acc.fold(&[1, 1], shape, Some(2)), FoldOutcome::Copied);
        assert_eq!(acc.fold(&[2, 2], shape, Some(2)), FoldOutcome::Folded);
        assert_eq!(acc.fold(&[9, 9], shape, Some(2)), FoldOutcome::Skipped);
        assert_eq!(acc.as_slice(), &[2, 2]);
        assert_eq!(acc.skipped(), 1);
    }

    #[test]
    fn test_max_project_single_frame_is_identity() {
        let shape = StackShape::new(1, 2, 3);
        let stack = vec![1, 2, 3, 4, 5, 6];
        let mut out = vec![0u16; 6];
        max_project(&stack, shape, &mut out);
        assert_eq!(out, stack);
    }

    #[test]
    fn test_max_project_over_frames() {
        let shape = StackShape::new(3, 1, 3);
        let stack = vec![1, 7, 2, 4, 0, 2, 3, 3, 9];
        let mut out = vec![0u16; 3];
        max_project(&stack, shape, &mut out);
        assert_eq!(out, vec![4, 7, 9]);
    }

    #[test]
    fn test_project_into_sets_dims() {
        let capacity = StackShape::new(4, 8, 8);
        let shape = StackShape::new(2, 4, 4);
        let mut acc = AccumulationBuffer::new(capacity);
        let mut stack = constant(shape, 3);
        stack[16] = 40;
        acc.fold(&stack, shape, None);

        let mut display = DisplayBuffer::new(8, 8);
        acc.project_into(&mut display);
        assert_eq!(display.dims(), (4, 4));
        assert_eq!(display.pixels().len(), 16);
        assert_eq!(display.pixels()[0], 40);
        assert!(display.pixels()[1..].iter().all(|&v| v == 3));
        assert_eq!(display.stacks(), 1);
    }

    #[test]
    fn test_pairs_lock_independently() {
        let pair = AccumulationPair::new(StackShape::new(1, 2, 2));
        let _first = pair.lock(PairIndex::First, Holder::Accumulation);
        let second = pair.slot(PairIndex::Second).try_lock(Holder::Projection);
        assert!(second.is_some());
        assert_eq!(
            pair.slot(PairIndex::First).holder(),
            Some(Holder::Accumulation)
        );
    }
}
