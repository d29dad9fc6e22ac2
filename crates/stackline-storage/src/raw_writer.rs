//! Headerless little-endian `u16` stack files.
//!
//! Layout is frame-major, row-major within a frame: sample `(f, y, x)` sits at
//! byte offset `2 * (f * height * width + y * width + x)`. Shape and dtype
//! live in the JSON sidecar, not in the data file.

use crate::sidecar::StackSidecar;
use anyhow::{anyhow, Context, Result};
use bytes::{Buf, BufMut, BytesMut};
use stackline_core::StackShape;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Raw stack writer.
pub struct RawWriter;

impl RawWriter {
    /// Write the first `shape.len()` samples of `stack` to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stack` is shorter than `shape.len()`
    /// - the file cannot be created or written
    pub fn write_stack<P: AsRef<Path>>(stack: &[u16], shape: StackShape, path: P) -> Result<()> {
        let path = path.as_ref();
        let samples = stack.get(..shape.len()).ok_or_else(|| {
            anyhow!(
                "Stack holds {} samples, shape {} needs {}",
                stack.len(),
                shape,
                shape.len()
            )
        })?;

        let mut encoded = BytesMut::with_capacity(shape.byte_len());
        for &sample in samples {
            encoded.put_u16_le(sample);
        }

        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(&encoded)
            .with_context(|| format!("Failed to write stack to {:?}", path))?;
        writer
            .flush()
            .with_context(|| format!("Failed to flush {:?}", path))?;

        tracing::debug!(
            path = ?path,
            %shape,
            bytes = encoded.len(),
            "Wrote raw stack"
        );
        Ok(())
    }

    /// Read a raw stack and its sidecar back.
    pub fn read_stack<P: AsRef<Path>>(path: P) -> Result<(StackSidecar, Vec<u16>)> {
        let path = path.as_ref();
        let sidecar = StackSidecar::read(&StackSidecar::path_for(path))?;
        let shape = sidecar.shape();

        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        if bytes.len() != shape.byte_len() {
            return Err(anyhow!(
                "{:?} holds {} bytes, sidecar shape {} needs {}",
                path,
                bytes.len(),
                shape,
                shape.byte_len()
            ));
        }

        let mut buf = &bytes[..];
        let mut stack = Vec::with_capacity(shape.len());
        while buf.has_remaining() {
            stack.push(buf.get_u16_le());
        }
        Ok((sidecar, stack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackline_core::SaveFormat;
    use tempfile::TempDir;

    #[test]
    fn test_byte_layout_is_little_endian_frame_major() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tiny.raw");
        let shape = StackShape::new(2, 1, 2);

        RawWriter::write_stack(&[0x0102, 0x0304, 0x0506, 0x0708], shape, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![0x02, 0x01, 0x04, 0x03, 0x06, 0x05, 0x08, 0x07]);
    }

    #[test]
    fn test_only_logical_region_is_written() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logical.raw");
        let capacity = StackShape::new(4, 4, 4);
        let shape = StackShape::new(1, 2, 2);
        let stack = vec![9u16; capacity.len()];

        RawWriter::write_stack(&stack, shape, &path).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_short_stack_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("short.raw");
        let result = RawWriter::write_stack(&[1, 2, 3], StackShape::new(1, 2, 2), &path);
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[test]
    fn test_read_rejects_size_mismatch() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("mismatch.raw");
        RawWriter::write_stack(&[1, 2], StackShape::new(1, 1, 2), &path).unwrap();
        StackSidecar::new(StackShape::new(2, 1, 2), 0, SaveFormat::Raw)
            .write(&StackSidecar::path_for(&path))
            .unwrap();

        assert!(RawWriter::read_stack(&path).is_err());
    }
}
