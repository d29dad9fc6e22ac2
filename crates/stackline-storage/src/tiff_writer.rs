//! 16-bit TIFF export of raw stacks.
//!
//! Each frame of the stack becomes its own grayscale TIFF named
//! `<stem>_0000.tiff`, `<stem>_0001.tiff`, ... next to the requested path.
//!
//! This module requires the `storage_tiff` feature:
//!
//! ```toml
//! [dependencies]
//! stackline-storage = { version = "0.1", features = ["storage_tiff"] }
//! ```

use anyhow::{anyhow, Context, Result};
use image::{ImageBuffer, Luma};
use stackline_core::StackShape;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// TIFF stack writer.
pub struct TiffWriter;

impl TiffWriter {
    /// Path of frame `index` for a stack saved at `path`.
    #[must_use]
    pub fn frame_path(path: &Path, index: usize) -> PathBuf {
        let base_name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("frame");
        path.with_file_name(format!("{}_{:04}.tiff", base_name, index))
    }

    /// Write every frame of the logical stack.
    ///
    /// Returns the paths written, in frame order.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stack` is shorter than `shape.len()`
    /// - a file cannot be created
    /// - TIFF encoding fails
    pub fn write_stack<P: AsRef<Path>>(
        stack: &[u16],
        shape: StackShape,
        path: P,
    ) -> Result<Vec<PathBuf>> {
        let path = path.as_ref();
        let samples = stack.get(..shape.len()).ok_or_else(|| {
            anyhow!(
                "Stack holds {} samples, shape {} needs {}",
                stack.len(),
                shape,
                shape.len()
            )
        })?;

        let mut written = Vec::with_capacity(shape.frames);
        for (i, frame) in samples.chunks_exact(shape.frame_len()).enumerate() {
            let numbered_path = Self::frame_path(path, i);
            Self::write_frame(frame, shape.width, shape.height, &numbered_path)
                .with_context(|| format!("Failed to write frame {} to {:?}", i, numbered_path))?;
            written.push(numbered_path);
        }

        tracing::info!(
            path = ?path,
            num_frames = shape.frames,
            dimensions = format!("{}x{}", shape.width, shape.height),
            "Wrote TIFF stack"
        );
        Ok(written)
    }

    fn write_frame(frame: &[u16], width: usize, height: usize, path: &Path) -> Result<()> {
        let (w, h) = (u32::try_from(width)?, u32::try_from(height)?);
        let img: ImageBuffer<Luma<u16>, Vec<u16>> = ImageBuffer::from_raw(w, h, frame.to_vec())
            .ok_or_else(|| anyhow!("Failed to create 16-bit image buffer from frame data"))?;

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let writer = BufWriter::new(file);

        let bytes: Vec<u8> = img.as_raw().iter().flat_map(|&v| v.to_ne_bytes()).collect();

        let encoder = image::codecs::tiff::TiffEncoder::new(writer);
        encoder
            .encode(&bytes, w, h, image::ExtendedColorType::L16)
            .with_context(|| format!("Failed to encode 16-bit TIFF to {:?}", path))?;

        tracing::debug!(
            path = ?path,
            dimensions = format!("{}x{}", width, height),
            "Wrote 16-bit TIFF"
        );
        Ok(())
    }
}
