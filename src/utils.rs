//! Utility functions for phototag
//!
//! Filesystem helpers shared by the mirror and the history store:
//!
//! - Single-level directory listing with entry classification
//! - Extension checks against a configured allow-list
//! - Physical rename/move with cross-device fallback
//! - Atomic file replacement through a temporary file

use crate::error::{PhotoTagError, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Kind of a directory entry as seen by the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file with an allowed image extension
    Image,
    /// Anything that exists and is not a regular file
    Directory,
}

/// A classified entry of a directory listing
#[derive(Debug, Clone)]
pub struct ListedEntry {
    /// Absolute path of the entry
    pub path: PathBuf,
    /// Its classification
    pub kind: EntryKind,
}

/// Outcome of a physical move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// The file was renamed or copied to its target
    Moved,
    /// The source is gone and the target exists: nothing to do
    AlreadyInPlace,
}

/// Check whether `path` carries one of `extensions` (case-insensitive)
///
/// `extensions` must already be lowercase and dot-less.
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            extensions.iter().any(|allowed| *allowed == e)
        })
        .unwrap_or(false)
}

/// List the direct children of `dir`, classified for the mirror
///
/// Regular files without an allowed extension are left out. Symbolic links
/// to directories are skipped so a link cycle cannot make the tree infinite.
/// Entries whose metadata cannot be read are skipped.
pub fn list_directory(dir: &Path, image_extensions: &[String]) -> Result<Vec<ListedEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(false) {
        let entry = entry?;
        let path = entry.path().to_path_buf();

        let metadata = match fs::metadata(&path) {
            Ok(m) => m,
            Err(e) => {
                trace!("Skipping {:?}: {}", path, e);
                continue;
            }
        };

        if metadata.is_file() {
            if has_extension(&path, image_extensions) {
                entries.push(ListedEntry { path, kind: EntryKind::Image });
            }
        } else if entry.path_is_symlink() {
            debug!("Not following directory link {:?}", path);
        } else {
            entries.push(ListedEntry { path, kind: EntryKind::Directory });
        }
    }

    Ok(entries)
}

/// Move `from` to `to`, refusing to overwrite an existing file
///
/// A move whose source is gone while the target exists counts as already
/// applied. When a plain rename fails (for example across filesystems) the
/// file is copied and the source removed.
pub fn move_file(from: &Path, to: &Path) -> Result<MoveOutcome> {
    let source_exists = from.exists();
    let target_exists = to.exists();

    if !source_exists && target_exists {
        return Ok(MoveOutcome::AlreadyInPlace);
    }
    if target_exists {
        return Err(PhotoTagError::TargetExists(to.to_path_buf()));
    }

    match fs::rename(from, to) {
        Ok(()) => Ok(MoveOutcome::Moved),
        Err(rename_err) => {
            if !source_exists {
                return Err(rename_err.into());
            }
            debug!("Rename {:?} -> {:?} failed ({}), copying instead", from, to, rename_err);
            fs::copy(from, to).map_err(|_| rename_err)?;
            fs::remove_file(from)?;
            Ok(MoveOutcome::Moved)
        }
    }
}

/// Replace `path` with `content` atomically
///
/// The content is written to a temporary file next to `path` and then
/// persisted over it, so readers see either the old or the new file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut temp = NamedTempFile::new_in(&dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path)?;
    Ok(())
}
