//! Flat-file persistence of the tag roster and rename histories
//!
//! The store is a single text file, rewritten wholesale at every checkpoint:
//!
//! ```text
//! beach, sunset, family
//! /photos/2024/vacation @sunset.jpg|vacation.jpg;vacation @beach.jpg;Jul, 02, 2024, 14:03:11|...
//! /photos/2023/dog.png|dog @max.png;dog.png;Dec, 24, 2023, 09:00:00
//! ```
//!
//! Line 1 is the visible tag roster joined with `", "` (possibly empty). Every
//! further line is an absolute image path followed by its history segments,
//! each segment being `old;new;timestamp`.
//!
//! ## Claiming
//!
//! At load, the first line for a path that exists is *cached* until the image
//! discovered at that path claims it. Every other line is an *orphan*: the
//! history of a file that vanished. Lines sharing a path are never merged, so
//! one file never inherits another file's renames. Whatever was not claimed is
//! written back on the next save, after the tracked images.
//!
//! A tracked image without history that sits on a path with orphans is saved
//! as a bare path line. Being first for its path, it keeps the image there
//! from claiming an orphan at the next load.
//!
//! Reading never fails; a missing or unreadable file yields an empty store.
//! Writing goes through a temporary file persisted over the store, so a
//! crash mid-write leaves the previous file intact.

use crate::error::Result;
use crate::image::ImageRecord;
use crate::types::HistoryEntry;
use crate::utils;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Separates the roster entries on line 1
pub const ROSTER_SEPARATOR: &str = ", ";

/// Separates the path and the history segments of a store line
pub const FIELD_SEPARATOR: char = '|';

/// Roster and rename histories persisted between runs
#[derive(Debug, Clone, Default)]
pub struct HistoryStore {
    path: PathBuf,
    roster: Vec<String>,
    /// Histories whose path existed at load, waiting to be claimed
    cached: BTreeMap<PathBuf, Vec<HistoryEntry>>,
    /// Existing paths saved without history, waiting to be claimed
    bare: BTreeSet<PathBuf>,
    /// Histories whose file is gone, one per line, oldest line first
    orphans: BTreeMap<PathBuf, Vec<Vec<HistoryEntry>>>,
}

impl HistoryStore {
    /// Create an empty store that will be written to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Load the store at `path`
    ///
    /// A missing or unreadable file gives an empty store. Malformed history
    /// segments are skipped with a warning.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history store at {:?}, starting empty", path);
                return Self::new(path);
            }
            Err(e) => {
                warn!("Cannot read history store {:?}: {}", path, e);
                return Self::new(path);
            }
        };

        let mut store = Self::new(path);
        store.parse(&content);
        info!(
            "Loaded history store {:?}: {} tags, {} cached, {} orphaned",
            store.path,
            store.roster.len(),
            store.cached.len(),
            store.orphan_count()
        );
        store
    }

    fn parse(&mut self, content: &str) {
        let mut lines = content.lines();

        if let Some(first) = lines.next() {
            self.roster = first
                .split(ROSTER_SEPARATOR)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }

        let mut seen = BTreeSet::new();
        for (number, line) in lines.enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(FIELD_SEPARATOR);
            let image_path = PathBuf::from(fields.next().unwrap_or_default());
            let first = !seen.contains(&image_path);

            if !line.contains(FIELD_SEPARATOR) {
                if first && image_path.exists() {
                    seen.insert(image_path.clone());
                    self.bare.insert(image_path);
                }
                continue;
            }

            let mut history = Vec::new();
            for segment in fields {
                match HistoryEntry::from_segment(segment) {
                    Some(entry) => history.push(entry),
                    None => warn!(
                        "Skipping malformed history segment {:?} on line {}",
                        segment,
                        number + 2
                    ),
                }
            }
            if history.is_empty() {
                continue;
            }

            seen.insert(image_path.clone());
            if first && image_path.exists() {
                self.cached.insert(image_path, history);
            } else {
                self.orphans.entry(image_path).or_default().push(history);
            }
        }
    }

    /// File the store is read from and written to
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Visible tags as they were saved
    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    /// Take the history waiting for `path`, at most once per saved line
    ///
    /// The line saved first for `path` decides: its history, or nothing for a
    /// bare line. Without such a line, the oldest orphan of a file that has
    /// reappeared is claimed.
    pub fn claim(&mut self, path: &Path) -> Option<Vec<HistoryEntry>> {
        let claimed = match self.cached.remove(path) {
            Some(history) => Some(history),
            None if self.bare.remove(path) => None,
            None => self.take_orphan(path),
        };
        if claimed.is_some() {
            debug!("Claimed history for {:?}", path);
        }
        claimed
    }

    fn take_orphan(&mut self, path: &Path) -> Option<Vec<HistoryEntry>> {
        let queue = self.orphans.get_mut(path)?;
        let history = (!queue.is_empty()).then(|| queue.remove(0));
        if queue.is_empty() {
            self.orphans.remove(path);
        }
        history
    }

    /// Keep the history of an image that vanished during the session
    pub fn retain_orphan(&mut self, path: PathBuf, history: Vec<HistoryEntry>) {
        if history.is_empty() {
            return;
        }
        debug!("Retaining {} history entries for vanished {:?}", history.len(), path);
        self.orphans.entry(path).or_default().push(history);
    }

    /// Every history not claimed by a tracked image, in path order
    ///
    /// For each path the cached history comes before its orphans.
    pub fn unclaimed(&self) -> impl Iterator<Item = (&Path, &[HistoryEntry])> {
        self.unclaimed_paths().flat_map(move |path| {
            self.cached
                .get(path)
                .into_iter()
                .chain(self.orphans.get(path).into_iter().flatten())
                .map(move |history| (path, history.as_slice()))
        })
    }

    /// Number of histories not claimed by a tracked image
    pub fn unclaimed_count(&self) -> usize {
        self.cached.len() + self.orphan_count()
    }

    fn orphan_count(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }

    fn has_unclaimed(&self, path: &Path) -> bool {
        self.cached.contains_key(path) || self.orphans.contains_key(path)
    }

    fn unclaimed_paths(&self) -> impl Iterator<Item = &Path> {
        self.cached
            .keys()
            .chain(self.bare.iter())
            .chain(self.orphans.keys())
            .map(PathBuf::as_path)
            .collect::<BTreeSet<_>>()
            .into_iter()
    }

    /// Render the store file for `visible` tags and tracked `images`
    pub fn render<'a, I>(&self, visible: &[String], images: I) -> String
    where
        I: IntoIterator<Item = &'a ImageRecord>,
    {
        let mut out = visible.join(ROSTER_SEPARATOR);
        out.push('\n');

        let mut tracked = BTreeSet::new();
        for image in images {
            let path = image.physical_path();
            if !image.history().is_empty() || self.has_unclaimed(path) {
                push_line(&mut out, path, image.history());
                tracked.insert(path);
            }
        }
        for path in self.unclaimed_paths() {
            if self.bare.contains(path) && !tracked.contains(path) {
                push_line(&mut out, path, &[]);
            }
            if let Some(history) = self.cached.get(path) {
                push_line(&mut out, path, history);
            }
            for history in self.orphans.get(path).into_iter().flatten() {
                push_line(&mut out, path, history);
            }
        }
        out
    }

    /// Overwrite the store file atomically
    ///
    /// # Errors
    ///
    /// Fails if the temporary file cannot be written or persisted; the
    /// previous store file is left untouched in that case.
    pub fn save<'a, I>(&mut self, visible: &[String], images: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a ImageRecord>,
    {
        let content = self.render(visible, images);
        utils::atomic_write(&self.path, content.as_bytes())?;
        self.roster = visible.to_vec();
        debug!("Saved history store {:?} ({} bytes)", self.path, content.len());
        Ok(())
    }
}

fn push_line(out: &mut String, path: &Path, history: &[HistoryEntry]) {
    out.push_str(&path.to_string_lossy());
    for entry in history {
        out.push(FIELD_SEPARATOR);
        out.push_str(&entry.to_segment());
    }
    out.push('\n');
}
