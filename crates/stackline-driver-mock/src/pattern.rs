//! Synthetic stack content.

use crate::common::MockRng;
use serde::{Deserialize, Serialize};
use stackline_core::StackShape;

/// What the synthetic source writes into each stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StackPattern {
    /// Every sample of stack `n` equals `values[n % values.len()]`.
    Constant {
        /// Values cycled per stack
        values: Vec<u16>,
    },
    /// Diagonal ramp, shifted by one pixel per frame.
    Gradient,
    /// Sinusoidal illumination stripes along x. Each frame of a stack steps
    /// the phase by `1 / frames` of a period.
    Stripes {
        /// Stripe period in pixels
        period: usize,
    },
    /// Checkerboard with a Gaussian hotspot orbiting the centre, one step
    /// per stack.
    Orbit,
    /// Uniform noise in `0..=amplitude`.
    Noise {
        /// Largest value
        amplitude: u16,
        /// RNG seed
        seed: u64,
    },
}

impl Default for StackPattern {
    fn default() -> Self {
        StackPattern::Stripes { period: 16 }
    }
}

/// Renders a [`StackPattern`] into caller-owned stacks.
#[derive(Debug)]
pub struct PatternGenerator {
    pattern: StackPattern,
    rng: Option<MockRng>,
}

impl PatternGenerator {
    /// Generator for `pattern`.
    #[must_use]
    pub fn new(pattern: StackPattern) -> Self {
        let rng = match pattern {
            StackPattern::Noise { seed, .. } => Some(MockRng::new(Some(seed))),
            _ => None,
        };
        Self { pattern, rng }
    }

    /// Pattern being rendered.
    #[must_use]
    pub fn pattern(&self) -> &StackPattern {
        &self.pattern
    }

    /// Write stack number `sequence` of `shape` into `stack[..shape.len()]`.
    pub fn fill_stack(&self, stack: &mut [u16], shape: StackShape, sequence: u64) {
        let stack = &mut stack[..shape.len()];
        match &self.pattern {
            StackPattern::Constant { values } => {
                let value = if values.is_empty() {
                    0
                } else {
                    values[(sequence % values.len() as u64) as usize]
                };
                stack.fill(value);
            }
            StackPattern::Noise { amplitude, .. } => {
                if let Some(rng) = &self.rng {
                    rng.fill_noise(stack, *amplitude);
                }
            }
            pattern => {
                for (f, frame) in stack.chunks_exact_mut(shape.frame_len()).enumerate() {
                    match pattern {
                        StackPattern::Gradient => gradient(frame, shape, f),
                        StackPattern::Stripes { period } => stripes(frame, shape, f, *period),
                        _ => orbit(frame, shape, sequence),
                    }
                }
            }
        }
    }
}

fn gradient(frame: &mut [u16], shape: StackShape, f: usize) {
    let (h, w) = shape.frame_dims();
    let span = (w + h).max(1);
    for y in 0..h {
        for x in 0..w {
            frame[y * w + x] = (((x + y + f) % span) * 65535 / span) as u16;
        }
    }
}

fn stripes(frame: &mut [u16], shape: StackShape, f: usize, period: usize) {
    let (h, w) = shape.frame_dims();
    let period = period.max(2) as f64;
    let phase = f as f64 / shape.frames.max(1) as f64;
    let row: Vec<u16> = (0..w)
        .map(|x| {
            let theta = 2.0 * std::f64::consts::PI * (x as f64 / period + phase);
            (4096.0 + 28672.0 * (1.0 + theta.cos())) as u16
        })
        .collect();
    for y in 0..h {
        frame[y * w..(y + 1) * w].copy_from_slice(&row);
    }
}

fn orbit(frame: &mut [u16], shape: StackShape, sequence: u64) {
    let (h, w) = shape.frame_dims();
    let checker_size = (w.min(h) / 8).max(1);

    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);
    let orbit_radius = w.min(h) as f64 / 4.0;
    let angle = (sequence as f64 * 0.2) % (2.0 * std::f64::consts::PI);
    let hotspot_x = cx + orbit_radius * angle.cos();
    let hotspot_y = cy + orbit_radius * angle.sin();
    let sigma = (w.min(h) as f64 / 10.0).max(1.0);

    for y in 0..h {
        for x in 0..w {
            let base: u32 = if ((x / checker_size) + (y / checker_size)) % 2 == 0 {
                16384
            } else {
                19660
            };
            let dx = x as f64 - hotspot_x;
            let dy = y as f64 - hotspot_y;
            let gaussian = (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
            frame[y * w + x] = (base + (gaussian * 32768.0) as u32).min(65535) as u16;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_cycles_per_stack() {
        let shape = StackShape::new(2, 2, 2);
        let generator = PatternGenerator::new(StackPattern::Constant {
            values: vec![10, 20, 30],
        });
        let mut stack = vec![0u16; shape.len()];
        for (sequence, expected) in [(0, 10), (1, 20), (2, 30), (3, 10)] {
            generator.fill_stack(&mut stack, shape, sequence);
            assert!(stack.iter().all(|&v| v == expected));
        }
    }

    #[test]
    fn test_fill_leaves_tail_untouched() {
        let shape = StackShape::new(1, 2, 2);
        let generator = PatternGenerator::new(StackPattern::Constant { values: vec![5] });
        let mut stack = vec![0u16; 8];
        generator.fill_stack(&mut stack, shape, 0);
        assert_eq!(stack, vec![5, 5, 5, 5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_stripes_shift_between_frames() {
        let shape = StackShape::new(3, 4, 16);
        let generator = PatternGenerator::new(StackPattern::Stripes { period: 8 });
        let mut stack = vec![0u16; shape.len()];
        generator.fill_stack(&mut stack, shape, 0);

        let frames: Vec<&[u16]> = stack.chunks_exact(shape.frame_len()).collect();
        assert_ne!(frames[0], frames[1]);
        // Rows within a frame are identical.
        assert_eq!(frames[0][..16], frames[0][16..32]);
    }

    #[test]
    fn test_orbit_moves_with_sequence() {
        let shape = StackShape::new(1, 32, 32);
        let generator = PatternGenerator::new(StackPattern::Orbit);
        let mut a = vec![0u16; shape.len()];
        let mut b = vec![0u16; shape.len()];
        generator.fill_stack(&mut a, shape, 0);
        generator.fill_stack(&mut b, shape, 5);
        assert_ne!(a, b);
    }

    #[test]
    fn test_pattern_config_parsing() {
        let pattern: StackPattern =
            serde_json::from_str(r#"{"kind": "constant", "values": [1, 2]}"#).unwrap();
        assert_eq!(pattern, StackPattern::Constant { values: vec![1, 2] });
    }
}
