//! Logical frame-stack geometry.

use serde::{Deserialize, Serialize};

/// Shape of a frame stack: `(frames, height, width)`, row-major, frame-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackShape {
    /// Number of frames in the stack.
    pub frames: usize,
    /// Rows per frame.
    pub height: usize,
    /// Columns per frame.
    pub width: usize,
}

impl StackShape {
    /// Build a shape.
    #[must_use]
    pub const fn new(frames: usize, height: usize, width: usize) -> Self {
        Self {
            frames,
            height,
            width,
        }
    }

    /// Samples in one frame.
    #[must_use]
    pub const fn frame_len(&self) -> usize {
        self.height * self.width
    }

    /// Samples in the whole stack.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.frames * self.frame_len()
    }

    /// True when any dimension is zero.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames == 0 || self.height == 0 || self.width == 0
    }

    /// Bytes needed for the stack at 16 bits per sample.
    #[must_use]
    pub const fn byte_len(&self) -> usize {
        self.len() * std::mem::size_of::<u16>()
    }

    /// Whether every dimension of `self` is within `capacity`.
    ///
    /// Checked per dimension, not by total sample count, so a reinterpreted
    /// stack never needs a display frame larger than the one allocated.
    #[must_use]
    pub const fn fits_within(&self, capacity: &StackShape) -> bool {
        self.frames <= capacity.frames
            && self.height <= capacity.height
            && self.width <= capacity.width
    }

    /// `(height, width)` of one frame.
    #[must_use]
    pub const fn frame_dims(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

impl std::fmt::Display for StackShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}, {})", self.frames, self.height, self.width)
    }
}

impl From<(usize, usize, usize)> for StackShape {
    fn from((frames, height, width): (usize, usize, usize)) -> Self {
        Self::new(frames, height, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lengths() {
        let shape = StackShape::new(4, 8, 16);
        assert_eq!(shape.frame_len(), 128);
        assert_eq!(shape.len(), 512);
        assert_eq!(shape.byte_len(), 1024);
        assert!(!shape.is_empty());
    }

    #[test]
    fn test_fits_within_is_per_dimension() {
        let capacity = StackShape::new(4, 8, 8);
        assert!(StackShape::new(2, 8, 8).fits_within(&capacity));
        assert!(StackShape::new(4, 8, 8).fits_within(&capacity));
        // Same sample count as (2, 8, 8) but wider than the allocation.
        assert!(!StackShape::new(1, 8, 16).fits_within(&capacity));
        assert!(!StackShape::new(5, 1, 1).fits_within(&capacity));
    }

    #[test]
    fn test_empty() {
        assert!(StackShape::new(0, 8, 8).is_empty());
        assert!(StackShape::new(1, 0, 8).is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(StackShape::new(2, 3, 4).to_string(), "(2, 3, 4)");
    }
}
