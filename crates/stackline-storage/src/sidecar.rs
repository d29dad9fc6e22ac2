//! JSON metadata written next to every saved stack.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackline_core::{SaveFormat, StackShape};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

/// Metadata describing a saved stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSidecar {
    /// Columns per frame.
    pub width: usize,
    /// Rows per frame.
    pub height: usize,
    /// Frames in the stack.
    pub frames: usize,
    /// Always `"uint16"`.
    pub dtype: String,
    /// Always `"little"`.
    pub byte_order: String,
    /// Stack sequence number from the pool.
    pub sequence: u64,
    /// Write time.
    pub created_at: DateTime<Utc>,
    /// Format of the data file(s).
    pub format: SaveFormat,
}

impl StackSidecar {
    /// Sidecar for a stack of `shape` written now.
    #[must_use]
    pub fn new(shape: StackShape, sequence: u64, format: SaveFormat) -> Self {
        Self {
            width: shape.width,
            height: shape.height,
            frames: shape.frames,
            dtype: "uint16".to_string(),
            byte_order: "little".to_string(),
            sequence,
            created_at: Utc::now(),
            format,
        }
    }

    /// Shape described by this sidecar.
    #[must_use]
    pub fn shape(&self) -> StackShape {
        StackShape::new(self.frames, self.height, self.width)
    }

    /// `<data path>.json`.
    #[must_use]
    pub fn path_for(data_path: &Path) -> PathBuf {
        let mut name = data_path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// Write as pretty JSON to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to write sidecar {:?}", path))?;
        Ok(())
    }

    /// Read from `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        serde_json::from_reader(std::io::BufReader::new(file))
            .with_context(|| format!("Failed to parse sidecar {:?}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_appends_json() {
        assert_eq!(
            StackSidecar::path_for(Path::new("/data/stack_0001.raw")),
            PathBuf::from("/data/stack_0001.raw.json")
        );
    }

    #[test]
    fn test_serialized_fields() {
        let sidecar = StackSidecar::new(StackShape::new(4, 8, 16), 7, SaveFormat::Raw);
        let value = serde_json::to_value(&sidecar).unwrap();
        assert_eq!(value["width"], 16);
        assert_eq!(value["height"], 8);
        assert_eq!(value["frames"], 4);
        assert_eq!(value["dtype"], "uint16");
        assert_eq!(value["byte_order"], "little");
        assert_eq!(value["sequence"], 7);
        assert_eq!(value["format"], "raw");
        assert!(value["created_at"].as_str().unwrap().contains('T'));
    }
}
