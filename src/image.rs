//! Image records and tag <-> filename derivation
//!
//! An image's tags live in its file name: every tag is a `" @tag"` marker
//! placed before the extension.
//!
//! ```text
//! vacation.jpg
//! vacation @beach.jpg
//! vacation @beach @sunset.jpg
//! ^^^^^^^^ ^^^^^^^^^^^^^^^ ^^^^
//!   base       markers     extension
//! ```
//!
//! [`ImageRecord`] keeps two paths. The *logical* path is the name the
//! record claims right now, with every tag edit applied. The *physical* path
//! is where the file was last seen on disk. Tag edits only move the logical
//! path; the mirror's flush renames the file and brings the two together.
//!
//! The tag set is always re-derivable from the logical file name and every
//! mutation keeps both in step.

use crate::error::{PhotoTagError, Result};
use crate::types::{DirId, HistoryEntry, ImageId, TAG_MARKER};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Memoized classifier result for an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Suggestion {
    /// The classifier has not been asked yet
    #[default]
    NotComputed,
    /// The classifier was asked and had nothing to offer
    Nothing,
    /// The classifier's suggested tag
    Tag(String),
}

/// Split a file name into its base, its tag tokens and its extension
///
/// The extension starts at the last `.` and includes it. Tag tokens are the
/// pieces between the first `" @"` marker and the extension, trimmed, with
/// empty pieces ignored.
///
/// ```rust
/// use phototag::image::split_file_name;
///
/// let (base, tags, ext) = split_file_name("vacation @beach @sunset.jpg");
/// assert_eq!(base, "vacation");
/// assert_eq!(tags, vec!["beach", "sunset"]);
/// assert_eq!(ext, ".jpg");
/// ```
pub fn split_file_name(name: &str) -> (&str, Vec<&str>, &str) {
    let (stem, ext) = split_extension(name);
    match stem.find(TAG_MARKER) {
        Some(first) => {
            let tags = stem[first + TAG_MARKER.len()..]
                .split(TAG_MARKER)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            (&stem[..first], tags, ext)
        }
        None => (stem, Vec::new(), ext),
    }
}

/// The tag set encoded in a file name
pub fn parse_tags(name: &str) -> BTreeSet<String> {
    split_file_name(name)
        .1
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) => (&name[..dot], &name[dot..]),
        None => (name, ""),
    }
}

/// `name` with `" @tag"` inserted immediately before the extension
fn with_marker(name: &str, tag: &str) -> String {
    let (stem, ext) = split_extension(name);
    format!("{}{}{}{}", stem, TAG_MARKER, tag, ext)
}

/// `name` with every marker for `tag` removed, everything else verbatim
fn without_marker(name: &str, tag: &str) -> String {
    let (stem, ext) = split_extension(name);
    let Some(first) = stem.find(TAG_MARKER) else {
        return name.to_string();
    };

    let mut out = stem[..first].to_string();
    for segment in stem[first + TAG_MARKER.len()..].split(TAG_MARKER) {
        if segment.trim() == tag {
            continue;
        }
        out.push_str(TAG_MARKER);
        out.push_str(segment);
    }
    out.push_str(ext);
    out
}

/// `name` without any markers, extension preserved
fn without_markers(name: &str) -> String {
    let (stem, ext) = split_extension(name);
    let base = match stem.find(TAG_MARKER) {
        Some(first) => &stem[..first],
        None => stem,
    };
    format!("{}{}", base, ext)
}

/// One tracked image file
///
/// Records are owned by the mirror's arena and addressed by [`ImageId`]. The
/// owning directory is a handle, not a reference.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    id: ImageId,
    /// Directory node that lists this image
    owner: DirId,
    /// Directory node the file physically sits in until the next flush
    origin: DirId,
    logical_path: PathBuf,
    physical_path: PathBuf,
    tags: BTreeSet<String>,
    history: Vec<HistoryEntry>,
    suggestion: Suggestion,
}

impl ImageRecord {
    /// Create a record for an image found at `path`
    ///
    /// Tags already encoded in the file name become the initial tag set.
    /// `history` is any rename history claimed from the store.
    ///
    /// # Errors
    ///
    /// Fails if the path has no UTF-8 file name, since tags could not be
    /// read from or written into it.
    pub fn new(
        id: ImageId,
        owner: DirId,
        path: PathBuf,
        history: Option<Vec<HistoryEntry>>,
    ) -> Result<Self> {
        let tags = match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => parse_tags(name),
            None => {
                return Err(PhotoTagError::custom(format!(
                    "image path has no UTF-8 file name: {:?}",
                    path
                )))
            }
        };

        Ok(Self {
            id,
            owner,
            origin: owner,
            logical_path: path.clone(),
            physical_path: path,
            tags,
            history: history.unwrap_or_default(),
            suggestion: Suggestion::NotComputed,
        })
    }

    /// Arena handle of this record
    pub fn id(&self) -> ImageId {
        self.id
    }

    /// Directory node currently listing this image
    pub fn owner(&self) -> DirId {
        self.owner
    }

    /// Directory node the file sits in on disk until the next flush
    pub fn origin(&self) -> DirId {
        self.origin
    }

    /// Logical file name, with pending tag edits applied
    pub fn file_name(&self) -> &str {
        // The constructor and every setter keep the name UTF-8
        self.logical_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
    }

    /// Path the record claims, ahead of disk while edits are pending
    pub fn logical_path(&self) -> &Path {
        &self.logical_path
    }

    /// Path last confirmed to exist on disk
    pub fn physical_path(&self) -> &Path {
        &self.physical_path
    }

    /// Tags encoded in the logical file name
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Check whether the image wears `tag`
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Rename history, oldest first
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Check whether a flush still has to touch the file
    pub fn is_pending_move(&self) -> bool {
        self.logical_path != self.physical_path || self.origin != self.owner
    }

    /// Memoized classifier result
    pub fn suggestion(&self) -> &Suggestion {
        &self.suggestion
    }

    /// Memoized suggested tag, if one was computed and found
    pub fn suggested_tag(&self) -> Option<&str> {
        match &self.suggestion {
            Suggestion::Tag(tag) => Some(tag),
            _ => None,
        }
    }

    pub(crate) fn set_suggestion(&mut self, suggestion: Suggestion) {
        self.suggestion = suggestion;
    }

    /// Add `tag`, appending its marker before the extension
    ///
    /// Returns `false` if the image already wears the tag.
    pub fn add_tag(&mut self, tag: &str) -> bool {
        if !self.tags.insert(tag.to_string()) {
            return false;
        }
        let name = with_marker(self.file_name(), tag);
        self.set_file_name(&name);
        true
    }

    /// Remove `tag` and every marker for it
    ///
    /// Returns `false` if the image does not wear the tag.
    pub fn remove_tag(&mut self, tag: &str) -> bool {
        if !self.tags.remove(tag) {
            return false;
        }
        let name = without_marker(self.file_name(), tag);
        self.set_file_name(&name);
        true
    }

    /// Remove every tag; the name reverts to its base plus extension
    pub fn clear_tags(&mut self) {
        self.tags.clear();
        let name = without_markers(self.file_name());
        self.set_file_name(&name);
    }

    /// Set the logical path verbatim and re-derive the tag set from it
    pub fn force_rename(&mut self, path: PathBuf) {
        self.tags = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(parse_tags)
            .unwrap_or_default();
        self.logical_path = path;
    }

    /// Append one rename to the history, stamped now
    pub fn record_rename(&mut self, old_name: &str, new_name: &str) {
        self.history.push(HistoryEntry::now(old_name, new_name));
    }

    /// Put history claimed from the store in front of the current history
    pub(crate) fn attach_history(&mut self, mut claimed: Vec<HistoryEntry>) {
        claimed.append(&mut self.history);
        self.history = claimed;
    }

    /// Move the record under another directory node
    ///
    /// Only the logical path changes; the file follows on the next flush.
    pub(crate) fn relocate(&mut self, dest: DirId, dest_path: &Path) {
        let name = self.file_name().to_string();
        self.owner = dest;
        self.logical_path = dest_path.join(name);
    }

    /// Record that the file now sits at the logical path
    pub(crate) fn commit_physical(&mut self) {
        self.physical_path = self.logical_path.clone();
        self.origin = self.owner;
    }

    fn set_file_name(&mut self, name: &str) {
        self.logical_path.set_file_name(name);
    }
}
