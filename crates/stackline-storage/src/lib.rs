//! Persistence writers for raw frame stacks.
//!
//! The persistence stage hands a locked raw buffer to [`save_stack`], which
//! dispatches on [`SaveFormat`]:
//!
//! - [`SaveFormat::Raw`]: headerless little-endian `u16` ([`raw_writer`])
//! - [`SaveFormat::Tiff`]: one 16-bit TIFF per frame ([`tiff_writer`], feature
//!   `storage_tiff`)
//!
//! Both formats get a `<path>.json` [`StackSidecar`] with shape, dtype, byte
//! order, sequence number and creation time.
//!
//! # Features
//!
//! - `storage_tiff`: TIFF export via the `image` crate

pub mod raw_writer;
pub mod sidecar;
#[cfg(feature = "storage_tiff")]
pub mod tiff_writer;

pub use raw_writer::RawWriter;
pub use sidecar::StackSidecar;
#[cfg(feature = "storage_tiff")]
pub use tiff_writer::TiffWriter;

use anyhow::Result;
use stackline_core::{SaveFormat, SaveInfo, StackShape};
use std::path::PathBuf;

/// Files produced by one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedStack {
    /// Data files, in frame order for TIFF.
    pub data: Vec<PathBuf>,
    /// The JSON sidecar.
    pub sidecar: PathBuf,
}

/// Persist the logical region of `stack` as requested by `save`.
///
/// # Errors
///
/// Any I/O or encoding failure, and
/// [`PipelineError::FeatureNotEnabled`](stackline_core::PipelineError::FeatureNotEnabled)
/// for TIFF when built without `storage_tiff`.
pub fn save_stack(
    stack: &[u16],
    shape: StackShape,
    sequence: u64,
    save: &SaveInfo,
) -> Result<SavedStack> {
    let data = match save.format {
        SaveFormat::Raw => {
            RawWriter::write_stack(stack, shape, &save.path)?;
            vec![save.path.clone()]
        }
        #[cfg(feature = "storage_tiff")]
        SaveFormat::Tiff => TiffWriter::write_stack(stack, shape, &save.path)?,
        #[cfg(not(feature = "storage_tiff"))]
        SaveFormat::Tiff => {
            return Err(stackline_core::PipelineError::FeatureNotEnabled(
                "storage_tiff".to_string(),
            )
            .into());
        }
    };

    let sidecar = StackSidecar::path_for(&save.path);
    StackSidecar::new(shape, sequence, save.format).write(&sidecar)?;

    tracing::debug!(
        path = ?save.path,
        format = %save.format,
        sequence,
        "Saved stack"
    );
    Ok(SavedStack { data, sidecar })
}
