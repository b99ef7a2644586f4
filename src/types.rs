//! Core data types used throughout the phototag library
//!
//! This module contains the small value types shared between the mirror, the
//! tag index, the history store and the orchestrator.
//!
//! ## Overview
//!
//! - **Handles**: `DirId`, `ImageId` - arena keys linking nodes without
//!   owning references
//! - **History**: `HistoryEntry`, `HistoryRecord` - one committed rename
//! - **Results**: `FlushReport`, `FailedMove` - outcome of draining the
//!   rename queue
//! - **Configuration**: `PhotoTagConfig` - extension sets and file locations
//! - **Tag state**: `TagVisibility` - Active / Hidden / Absent
//!
//! ## Examples
//!
//! ```rust
//! use phototag::types::HistoryEntry;
//!
//! let entry = HistoryEntry::new("vacation.jpg", "vacation @beach.jpg", "Jan, 05, 2024, 10:00:00");
//! assert_eq!(entry.to_segment(), "vacation.jpg;vacation @beach.jpg;Jan, 05, 2024, 10:00:00");
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Marker inserted before the extension for every tag an image wears
pub const TAG_MARKER: &str = " @";

/// chrono format of history timestamps, e.g. `Mar, 07, 2024, 18:02:11`
pub const TIMESTAMP_FORMAT: &str = "%b, %d, %Y, %H:%M:%S";

/// Extensions recognized as images (lowercase, without the dot)
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["gif", "png", "jpg", "bmp", "tiff", "jpeg"];

/// Extensions handed to the classifier
pub const DEFAULT_CLASSIFY_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

/// Handle of a directory node in the mirror arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DirId(pub(crate) u64);

/// Handle of an image record in the mirror arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImageId(pub(crate) u64);

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dir#{}", self.0)
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "image#{}", self.0)
    }
}

/// One committed rename of an image
///
/// Names are bare file names, not paths. The timestamp is kept as the exact
/// text that was written to (or read from) the history store so that a
/// load/save cycle reproduces the file byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// File name before the rename
    pub old_name: String,
    /// File name after the rename
    pub new_name: String,
    /// Local time of the rename, formatted with [`TIMESTAMP_FORMAT`]
    pub timestamp: String,
}

impl HistoryEntry {
    /// Create an entry with an explicit timestamp
    pub fn new(
        old_name: impl Into<String>,
        new_name: impl Into<String>,
        timestamp: impl Into<String>,
    ) -> Self {
        Self {
            old_name: old_name.into(),
            new_name: new_name.into(),
            timestamp: timestamp.into(),
        }
    }

    /// Create an entry stamped with the current local time
    pub fn now(old_name: impl Into<String>, new_name: impl Into<String>) -> Self {
        Self::new(old_name, new_name, Local::now().format(TIMESTAMP_FORMAT).to_string())
    }

    /// Render as the `old;new;timestamp` segment of a store line
    pub fn to_segment(&self) -> String {
        format!("{};{};{}", self.old_name, self.new_name, self.timestamp)
    }

    /// Parse an `old;new;timestamp` segment
    ///
    /// Returns `None` unless the segment has exactly three fields.
    pub fn from_segment(segment: &str) -> Option<Self> {
        let fields: Vec<&str> = segment.split(';').collect();
        match fields.as_slice() {
            [old, new, ts] => Some(Self::new(*old, *new, *ts)),
            _ => None,
        }
    }
}

/// A history entry together with the path it belongs to
///
/// Used by the global history view, which mixes tracked images with
/// histories still waiting in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Absolute path of the image the entry belongs to
    pub path: PathBuf,
    /// The rename itself
    pub entry: HistoryEntry,
}

/// Visibility state of a tag in the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagVisibility {
    /// Listed and offered to the user
    Active,
    /// Still worn by at least one image but excluded from listings
    Hidden,
    /// Not tracked at all
    Absent,
}

/// A pending rename that could not be applied during a flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedMove {
    /// Image whose rename failed
    pub image: ImageId,
    /// Path the file is still at
    pub from: PathBuf,
    /// Path the rename was aiming for
    pub to: PathBuf,
    /// Error description
    pub reason: String,
}

/// Outcome of draining the pending-rename queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlushReport {
    /// Files renamed or moved on disk
    pub renamed: usize,
    /// Renames that turned out to be applied already
    pub already_applied: usize,
    /// Queued images whose logical and physical paths already agreed
    pub unchanged: usize,
    /// Renames that failed and were re-queued
    pub failed: Vec<FailedMove>,
}

impl FlushReport {
    /// Check whether every queued rename converged
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Total number of queue entries processed
    pub fn total(&self) -> usize {
        self.renamed + self.already_applied + self.unchanged + self.failed.len()
    }
}

/// Configuration of a phototag instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoTagConfig {
    /// Root directory of the mirrored tree
    pub root_path: PathBuf,
    /// Location of the history store file
    pub store_path: PathBuf,
    /// Extensions treated as images (lowercase, no dot)
    pub image_extensions: Vec<String>,
    /// Extensions passed to the classifier (lowercase, no dot)
    pub classify_extensions: Vec<String>,
    /// Version of phototag that created this config
    pub version: String,
}

/// Normalize an extension list: lowercase, leading dots removed, empties dropped
pub(crate) fn normalize_extensions<I, S>(extensions: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = extensions
        .into_iter()
        .map(|e| e.as_ref().trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
