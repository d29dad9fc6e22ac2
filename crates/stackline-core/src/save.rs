//! Save requests attached to permission slips.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// On-disk format for a saved raw stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFormat {
    /// Headerless little-endian `u16`, frame-major, plus a JSON sidecar.
    #[default]
    Raw,
    /// One 16-bit TIFF per frame plus a JSON sidecar (feature `storage_tiff`).
    Tiff,
}

impl SaveFormat {
    /// Lowercase name as used in configs and sidecars.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveFormat::Raw => "raw",
            SaveFormat::Tiff => "tiff",
        }
    }
}

impl std::fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "raw" | "bin" => Ok(SaveFormat::Raw),
            "tif" | "tiff" => Ok(SaveFormat::Tiff),
            other => Err(format!("unknown save format '{}' (expected raw or tiff)", other)),
        }
    }
}

/// Where and how to persist one raw buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveInfo {
    /// Destination of the stack data; the sidecar goes next to it.
    pub path: PathBuf,
    /// Output format.
    #[serde(default)]
    pub format: SaveFormat,
}

impl SaveInfo {
    /// Save request for `path` in `format`.
    pub fn new(path: impl Into<PathBuf>, format: SaveFormat) -> Self {
        Self {
            path: path.into(),
            format,
        }
    }

    /// Raw-format save request for `path`.
    pub fn raw(path: impl Into<PathBuf>) -> Self {
        Self::new(path, SaveFormat::Raw)
    }
}
