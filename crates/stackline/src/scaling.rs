//! Intensity scaling from 16-bit projections to 8-bit display pixels.
//!
//! A [`IntensityScaling`] owns a 65 536-entry lookup table mapping every
//! possible `u16` sample to a `u8`. Samples at or below `low` render black,
//! samples at or above `high` render white, and the range in between is
//! linear.
//!
//! In [`ScalingMode::Linear`] the bounds are fixed by the caller. The two
//! auto modes derive the bounds from every frame they render and rebuild the
//! table each time:
//!
//! - `Autoscale`: min and max of the frame
//! - `MedianAutoscale`: min and max of a 3×3 median-filtered copy, so isolated
//!   hot or dead pixels do not set the range

use serde::{Deserialize, Serialize};
use stackline_core::PipelineError;
use std::str::FromStr;

/// Largest sample value.
pub const MAX_INTENSITY: u16 = u16::MAX;

const LUT_LEN: usize = 1 << 16;

/// How display bounds are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScalingMode {
    /// Caller-supplied bounds.
    #[default]
    Linear,
    /// Bounds from the frame's own min and max.
    Autoscale,
    /// Bounds from the min and max of a 3×3 median filtered frame.
    #[serde(alias = "median_filter_autoscale", alias = "median_autoscale")]
    MedianAutoscale,
}

impl ScalingMode {
    /// Canonical name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ScalingMode::Linear => "linear",
            ScalingMode::Autoscale => "autoscale",
            ScalingMode::MedianAutoscale => "median-autoscale",
        }
    }

    /// Whether bounds are recomputed per frame.
    #[must_use]
    pub fn is_auto(&self) -> bool {
        !matches!(self, ScalingMode::Linear)
    }
}

impl std::fmt::Display for ScalingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScalingMode {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(ScalingMode::Linear),
            "autoscale" | "auto" => Ok(ScalingMode::Autoscale),
            "median-autoscale" | "median_autoscale" | "median_filter_autoscale" => {
                Ok(ScalingMode::MedianAutoscale)
            }
            other => Err(PipelineError::Configuration(format!(
                "unknown scaling mode '{}' (expected linear, autoscale or median-autoscale)",
                other
            ))),
        }
    }
}

/// `(mode, low, high)` as reported by `get_scaling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingSnapshot {
    /// Active mode
    pub mode: ScalingMode,
    /// Lower bound
    pub low: u16,
    /// Upper bound, always greater than `low`
    pub high: u16,
}

/// Clamp bounds to the sample range and force `low < high`.
///
/// A collapsed or inverted range is widened by moving `high` to `low + 1`,
/// or by moving `low` down when `low` is already at the top.
#[must_use]
pub fn normalize_bounds(low: i64, high: i64) -> (u16, u16) {
    let max = i64::from(MAX_INTENSITY);
    let low = low.clamp(0, max) as u16;
    let high = high.clamp(0, max) as u16;
    if high > low {
        (low, high)
    } else if low == MAX_INTENSITY {
        (MAX_INTENSITY - 1, MAX_INTENSITY)
    } else {
        (low, low + 1)
    }
}

/// Scaling policy plus its lookup table.
#[derive(Clone)]
pub struct IntensityScaling {
    mode: ScalingMode,
    low: u16,
    high: u16,
    lut: Vec<u8>,
    filtered: Vec<u16>,
}

impl IntensityScaling {
    /// Build a policy; bounds are normalized.
    #[must_use]
    pub fn new(mode: ScalingMode, low: i64, high: i64) -> Self {
        let (low, high) = normalize_bounds(low, high);
        let mut scaling = Self {
            mode,
            low,
            high,
            lut: vec![0u8; LUT_LEN],
            filtered: Vec::new(),
        };
        scaling.rebuild_lut();
        scaling
    }

    /// Change mode and, where given, bounds.
    ///
    /// Missing bounds keep their current value.
    pub fn set(&mut self, mode: ScalingMode, low: Option<i64>, high: Option<i64>) {
        let (low, high) = normalize_bounds(
            low.unwrap_or(i64::from(self.low)),
            high.unwrap_or(i64::from(self.high)),
        );
        self.mode = mode;
        self.set_bounds(low, high);
    }

    /// Current `(mode, low, high)`.
    #[must_use]
    pub fn snapshot(&self) -> ScalingSnapshot {
        ScalingSnapshot {
            mode: self.mode,
            low: self.low,
            high: self.high,
        }
    }

    /// Lookup for one sample.
    #[must_use]
    pub fn map(&self, sample: u16) -> u8 {
        self.lut[usize::from(sample)]
    }

    /// Render `pixels` (`height × width`, row-major) into `out`.
    ///
    /// Auto modes first refresh the bounds from the frame.
    pub fn render(&mut self, pixels: &[u16], height: usize, width: usize, out: &mut Vec<u8>) {
        match self.mode {
            ScalingMode::Linear => {}
            ScalingMode::Autoscale => {
                if let Some((low, high)) = min_max(pixels) {
                    let (low, high) = normalize_bounds(i64::from(low), i64::from(high));
                    self.set_bounds(low, high);
                }
            }
            ScalingMode::MedianAutoscale => {
                let mut filtered = std::mem::take(&mut self.filtered);
                median_filter_3x3(pixels, height, width, &mut filtered);
                if let Some((low, high)) = min_max(&filtered) {
                    let (low, high) = normalize_bounds(i64::from(low), i64::from(high));
                    self.set_bounds(low, high);
                }
                self.filtered = filtered;
            }
        }

        out.clear();
        out.extend(pixels.iter().map(|&v| self.lut[usize::from(v)]));
    }

    fn set_bounds(&mut self, low: u16, high: u16) {
        if (low, high) != (self.low, self.high) {
            self.low = low;
            self.high = high;
            self.rebuild_lut();
        }
    }

    fn rebuild_lut(&mut self) {
        let low = u32::from(self.low);
        let high = u32::from(self.high);
        let span = high - low;
        for (value, entry) in self.lut.iter_mut().enumerate() {
            let value = value as u32;
            *entry = if value <= low {
                0
            } else if value >= high {
                u8::MAX
            } else {
                ((value - low) * 255 / span) as u8
            };
        }
    }
}

impl Default for IntensityScaling {
    fn default() -> Self {
        Self::new(ScalingMode::Linear, 0, i64::from(MAX_INTENSITY))
    }
}

impl std::fmt::Debug for IntensityScaling {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntensityScaling")
            .field("mode", &self.mode)
            .field("low", &self.low)
            .field("high", &self.high)
            .finish()
    }
}

fn min_max(values: &[u16]) -> Option<(u16, u16)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))),
    )
}

/// 3×3 median filter with edge replication.
pub fn median_filter_3x3(pixels: &[u16], height: usize, width: usize, out: &mut Vec<u16>) {
    out.clear();
    out.resize(height * width, 0);
    if height == 0 || width == 0 {
        return;
    }

    let mut window = [0u16; 9];
    for y in 0..height {
        let rows = [y.saturating_sub(1), y, (y + 1).min(height - 1)];
        for x in 0..width {
            let cols = [x.saturating_sub(1), x, (x + 1).min(width - 1)];
            let mut k = 0;
            for &row in &rows {
                for &col in &cols {
                    window[k] = pixels[row * width + col];
                    k += 1;
                }
            }
            let (_, median, _) = window.select_nth_unstable(4);
            out[y * width + x] = *median;
        }
    }
}
