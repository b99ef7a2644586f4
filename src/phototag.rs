//! Main phototag implementation
//!
//! [`PhotoTag`] ties the mirror, the tag index and the history store together
//! and is the only type applications need to drive.
//!
//! ## Overview
//!
//! - Tag edits rename images *logically* and queue them; nothing touches the
//!   disk until the next directory switch.
//! - [`PhotoTag::switch_directory`] is the convergence checkpoint: it flushes
//!   every queued rename in the tree, folds discovered and vanished images
//!   into the tag index and the store, unhides the tags worn in the new
//!   directory and persists the store.
//! - Every applied name change appends one entry to the image's history; the
//!   history survives restarts through the store file.
//!
//! ## Example
//!
//! ```rust,no_run
//! use phototag::PhotoTagBuilder;
//! use std::path::Path;
//!
//! # fn main() -> phototag::Result<()> {
//! let mut photos = PhotoTagBuilder::new().build("/home/me/Pictures", "/home/me/.phototag")?;
//!
//! if let Some(image) = photos.image_at(Path::new("/home/me/Pictures/vacation.jpg")) {
//!     photos.add_tag(image, "beach")?;
//! }
//!
//! // Renames are applied at the next checkpoint
//! photos.close()?;
//! # Ok(())
//! # }
//! ```

use crate::classifier::TagClassifier;
use crate::error::{PhotoTagError, Result};
use crate::image::{parse_tags, ImageRecord, Suggestion};
use crate::mirror::{Mirror, MirrorChange};
use crate::storage::HistoryStore;
use crate::tag_index::{validate_tag, TagIndex};
use crate::types::{
    normalize_extensions, DirId, FlushReport, HistoryEntry, HistoryRecord, ImageId,
    PhotoTagConfig, TagVisibility, DEFAULT_CLASSIFY_EXTENSIONS, DEFAULT_IMAGE_EXTENSIONS,
};
use crate::utils;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, instrument, trace, warn};

/// Photo library whose tags live in the file names
pub struct PhotoTag {
    config: PhotoTagConfig,
    mirror: Mirror,
    tags: TagIndex,
    store: HistoryStore,
    classifier: Option<Box<dyn TagClassifier>>,
    current: DirId,
    closed: bool,
}

impl fmt::Debug for PhotoTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoTag")
            .field("config", &self.config)
            .field("current", &self.current)
            .field("images", &self.mirror.image_count())
            .field("tags", &self.tags.len())
            .field("classifier", &self.classifier.is_some())
            .finish_non_exhaustive()
    }
}

impl PhotoTag {
    /// Open a library with default settings
    ///
    /// Shorthand for `PhotoTagBuilder::new().build(root, store_path)`.
    pub fn open(root: impl AsRef<Path>, store_path: impl Into<PathBuf>) -> Result<Self> {
        PhotoTagBuilder::new().build(root, store_path)
    }

    /// Effective configuration
    pub fn config(&self) -> &PhotoTagConfig {
        &self.config
    }

    /// Read access to the mirrored tree
    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    /// Read access to the tag index
    pub fn tag_index(&self) -> &TagIndex {
        &self.tags
    }

    /// Read access to the history store
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    /// Directory the user is looking at
    pub fn current_directory(&self) -> DirId {
        self.current
    }

    /// Path of the current directory
    pub fn current_path(&self) -> &Path {
        self.mirror
            .node(self.current)
            .map(|n| n.path())
            .unwrap_or_else(|| self.mirror.root_path())
    }

    /// Look up an image record
    pub fn image(&self, image: ImageId) -> Option<&ImageRecord> {
        self.mirror.image(image)
    }

    /// Resolve an image by path
    ///
    /// Accepts the logical or physical path, a path that canonicalizes to
    /// one, or a bare name relative to the current directory.
    pub fn image_at(&self, path: &Path) -> Option<ImageId> {
        if let Some(id) = self.mirror.image_at(path) {
            return Some(id);
        }
        if let Some(id) = fs::canonicalize(path)
            .ok()
            .and_then(|p| self.mirror.image_at(&p))
        {
            return Some(id);
        }
        if path.is_relative() {
            return self.mirror.image_at(&self.current_path().join(path));
        }
        None
    }

    /// Resolve the tracked directory at `path`
    ///
    /// A relative path is taken relative to the current directory when it
    /// does not resolve from the working directory.
    pub fn directory_at(&mut self, path: &Path) -> Option<DirId> {
        let mut found = self.mirror.lookup(path);
        if found.is_none() && path.is_relative() {
            let joined = self.current_path().join(path);
            found = self.mirror.lookup(&joined);
        }
        self.absorb_changes();
        found
    }

    /// Switch to `dir`, converging disk and memory on the way
    ///
    /// Flushes every queued rename in the tree, absorbs the resulting
    /// changes, re-registers the tags worn by `dir`'s images and persists
    /// the store. A store write failure is logged, not returned.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::DirectoryNotFound`] if `dir` is not (or no longer)
    /// tracked.
    #[instrument(skip(self))]
    pub fn switch_directory(&mut self, dir: DirId) -> Result<FlushReport> {
        if self.mirror.node(dir).is_none() {
            return Err(PhotoTagError::DirectoryNotFound(dir.to_string()));
        }

        let report = self.mirror.flush();
        self.absorb_changes();

        if self.mirror.node(dir).is_none() {
            return Err(PhotoTagError::DirectoryNotFound(dir.to_string()));
        }
        self.current = dir;

        let worn: BTreeSet<String> = self
            .mirror
            .images_in(dir)
            .iter()
            .filter_map(|id| self.mirror.image(*id))
            .flat_map(|img| img.tags().iter().cloned())
            .collect();
        for tag in worn {
            if let Err(e) = self.tags.register_tag(&tag) {
                trace!("Not registering worn tag: {}", e);
            }
        }

        self.checkpoint();
        debug!("Current directory is now {:?}", self.current_path());
        Ok(report)
    }

    /// Switch to the directory at `path`
    ///
    /// Returns `false` if the path is not inside the tracked tree.
    #[instrument(skip(self))]
    pub fn open_directory(&mut self, path: &Path) -> Result<bool> {
        match self.directory_at(path) {
            Some(dir) => {
                self.switch_directory(dir)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Switch to the parent of the current directory
    ///
    /// Going up from the root widens the tracked tree to the parent
    /// directory. Returns `false` at the top of the drive.
    #[instrument(skip(self))]
    pub fn go_up(&mut self) -> Result<bool> {
        let parent = match self.mirror.ascend(self.current) {
            Ok(parent) => parent,
            Err(PhotoTagError::NoParentDirectory(path)) => {
                debug!("{:?} has no parent", path);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        self.absorb_changes();
        self.config.root_path = self.mirror.root_path().to_path_buf();
        self.switch_directory(parent)?;
        Ok(true)
    }

    /// Create directory `name` inside the current directory
    ///
    /// Returns `false` if an entry with that name already exists.
    #[instrument(skip(self))]
    pub fn create_subdirectory(&mut self, name: &str) -> Result<bool> {
        if self.current_path().join(name).exists() {
            return Ok(false);
        }
        self.mirror.create_subdirectory(self.current, name)?;
        self.absorb_changes();
        Ok(true)
    }

    /// Register `tag` as Active, unhiding it if needed
    #[instrument(skip(self))]
    pub fn register_tag(&mut self, tag: &str) -> Result<bool> {
        self.tags.register_tag(tag)
    }

    /// Soft delete `tag`; returns `false` if it was unknown
    #[instrument(skip(self))]
    pub fn retire_tag(&mut self, tag: &str) -> bool {
        self.tags.retire_tag(tag)
    }

    /// Active tags, sorted
    pub fn visible_tags(&self) -> Vec<String> {
        self.tags.list_visible()
    }

    /// State of `tag` in the index
    pub fn tag_visibility(&self, tag: &str) -> TagVisibility {
        self.tags.visibility(tag)
    }

    /// Tag `image` with `tag`
    ///
    /// Returns `false` if the image already had the tag. On success one
    /// history entry is recorded and the rename is queued.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::InvalidTag`] for a tag that cannot be stored,
    /// [`PhotoTagError::ImageNotFound`] for a stale handle.
    #[instrument(skip(self))]
    pub fn add_tag(&mut self, image: ImageId, tag: &str) -> Result<bool> {
        let record = self
            .mirror
            .image_mut(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;
        let before = record.file_name().to_string();
        if !self.tags.tag_image(record, tag)? {
            return Ok(false);
        }
        self.log_rename(image, &before)?;
        Ok(true)
    }

    /// Remove `tag` from `image`
    ///
    /// Returns `false` if the image was not tagged with it.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::ImageNotFound`] for a stale handle.
    #[instrument(skip(self))]
    pub fn remove_tag(&mut self, image: ImageId, tag: &str) -> Result<bool> {
        let record = self
            .mirror
            .image_mut(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;
        let before = record.file_name().to_string();
        if !self.tags.untag_image(record, tag) {
            return Ok(false);
        }
        self.log_rename(image, &before)?;
        Ok(true)
    }

    /// Remove every tag from `image` in one rename
    ///
    /// Returns `false` if the name did not change.
    #[instrument(skip(self))]
    pub fn clear_tags(&mut self, image: ImageId) -> Result<bool> {
        let record = self
            .mirror
            .image_mut(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;
        let before = record.file_name().to_string();
        for tag in record.tags() {
            self.tags.dissociate(image, tag);
        }
        record.clear_tags();
        if record.file_name() == before {
            return Ok(false);
        }
        self.log_rename(image, &before)?;
        Ok(true)
    }

    /// Move the image at `image_path` into the directory at `dest_path`
    ///
    /// Returns `false` if either path is unknown. The physical move happens
    /// at the next checkpoint; moving an image to its own directory still
    /// queues it.
    #[instrument(skip(self))]
    pub fn move_image(&mut self, dest_path: &Path, image_path: &Path) -> bool {
        let dest = self.directory_at(dest_path);
        let (Some(dest), Some(image)) = (dest, self.image_at(image_path)) else {
            debug!("Move target or image not tracked");
            return false;
        };
        match self.mirror.relocate(image, dest) {
            Ok(()) => true,
            Err(e) => {
                warn!("Cannot move {}: {}", image, e);
                false
            }
        }
    }

    /// Rename `image` back to `target_name`, retagging it accordingly
    ///
    /// The image ends up wearing exactly the tags encoded in `target_name`.
    /// One history entry records the whole change.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::InvalidTag`] if a tag the name would add cannot be
    /// stored; nothing is changed in that case. Also fails for a name that is
    /// not a single path component or lacks an image extension, and for a
    /// stale handle.
    #[instrument(skip(self))]
    pub fn revert_name(&mut self, image: ImageId, target_name: &str) -> Result<()> {
        let mut components = Path::new(target_name).components();
        if !matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        ) {
            return Err(PhotoTagError::custom(format!(
                "{:?} is not a file name",
                target_name
            )));
        }
        if !utils::has_extension(Path::new(target_name), self.mirror.image_extensions()) {
            return Err(PhotoTagError::custom(format!(
                "{:?} is not an image file name",
                target_name
            )));
        }

        let record = self
            .mirror
            .image_mut(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;
        let before = record.file_name().to_string();
        let current = record.tags().clone();
        let target = parse_tags(target_name);

        for tag in target.difference(&current) {
            validate_tag(tag)?;
        }
        for tag in current.difference(&target) {
            self.tags.dissociate(image, tag);
        }
        for tag in target.difference(&current) {
            self.tags.associate(image, tag)?;
        }

        let path = record.logical_path().with_file_name(target_name);
        record.force_rename(path);

        self.log_rename(image, &before)
    }

    /// Tag suggested by the classifier for `image`
    ///
    /// Only images with a classifiable extension are sent to the classifier,
    /// at most once per image. A failing classifier means no suggestion.
    #[instrument(skip(self))]
    pub fn suggested_tag(&mut self, image: ImageId) -> Result<Option<String>> {
        let record = self
            .mirror
            .image(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;

        match record.suggestion() {
            Suggestion::Tag(tag) => return Ok(Some(tag.clone())),
            Suggestion::Nothing => return Ok(None),
            Suggestion::NotComputed => {}
        }

        let Some(classifier) = self.classifier.as_ref() else {
            return Ok(None);
        };
        let path = record.physical_path().to_path_buf();
        let suggestion = if !utils::has_extension(&path, &self.config.classify_extensions) {
            Suggestion::Nothing
        } else {
            match classifier.suggest_tag(&path) {
                Ok(tag) if !tag.trim().is_empty() => Suggestion::Tag(tag.trim().to_string()),
                Ok(_) => Suggestion::Nothing,
                Err(e) => {
                    warn!("No suggestion for {:?}: {}", path, e);
                    Suggestion::Nothing
                }
            }
        };

        let result = match &suggestion {
            Suggestion::Tag(tag) => Some(tag.clone()),
            _ => None,
        };
        if let Some(record) = self.mirror.image_mut(image) {
            record.set_suggestion(suggestion);
        }
        Ok(result)
    }

    /// Images tagged with `tag`, optionally only those under `within`
    ///
    /// Hidden tags are searchable. Returns `None` for an unknown tag.
    pub fn images_with_tag(&self, tag: &str, within: Option<DirId>) -> Option<Vec<ImageId>> {
        let images = self.tags.images_with(tag)?;
        match within {
            None => Some(images),
            Some(dir) => {
                let under: BTreeSet<ImageId> = self.mirror.images_under(dir).into_iter().collect();
                Some(images.into_iter().filter(|id| under.contains(id)).collect())
            }
        }
    }

    /// Tags shared by every image in `images`
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::ImageNotFound`] if any handle is stale.
    pub fn common_tags(&self, images: &[ImageId]) -> Result<BTreeSet<String>> {
        let records = images
            .iter()
            .map(|id| {
                self.mirror
                    .image(*id)
                    .ok_or_else(|| PhotoTagError::ImageNotFound(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(self.tags.common_tags(&records))
    }

    /// Rename history of `image`, oldest first
    pub fn image_history(&self, image: ImageId) -> Result<&[HistoryEntry]> {
        self.mirror
            .image(image)
            .map(ImageRecord::history)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))
    }

    /// Every known history entry with the path it belongs to
    ///
    /// Tracked images come first, ordered by path, followed by histories in
    /// the store that no tracked image has claimed.
    pub fn all_histories(&self) -> Vec<HistoryRecord> {
        let mut records = Vec::new();
        for image in sorted_images(&self.mirror) {
            for entry in image.history() {
                records.push(HistoryRecord {
                    path: image.physical_path().to_path_buf(),
                    entry: entry.clone(),
                });
            }
        }
        for (path, history) in self.store.unclaimed() {
            for entry in history {
                records.push(HistoryRecord {
                    path: path.to_path_buf(),
                    entry: entry.clone(),
                });
            }
        }
        records
    }

    /// Apply queued renames without switching directory
    pub fn flush(&mut self) -> FlushReport {
        let report = self.mirror.flush();
        self.absorb_changes();
        report
    }

    /// Persist the roster and every history to the store file
    ///
    /// # Errors
    ///
    /// Fails if the store file cannot be written; the previous file is kept.
    #[instrument(skip(self))]
    pub fn save(&mut self) -> Result<()> {
        let visible = self.tags.list_visible();
        self.store.save(&visible, sorted_images(&self.mirror))
    }

    /// Flush pending renames and persist the store
    ///
    /// Dropping a `PhotoTag` does the same but can only log failures.
    #[instrument(skip(self))]
    pub fn close(mut self) -> Result<FlushReport> {
        self.closed = true;
        let report = self.flush();
        self.save()?;
        info!("Closed library at {:?}", self.config.root_path);
        Ok(report)
    }

    /// Record the rename from `before` to the current name and queue it
    fn log_rename(&mut self, image: ImageId, before: &str) -> Result<()> {
        let record = self
            .mirror
            .image_mut(image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;
        let after = record.file_name().to_string();
        if after == before {
            return Ok(());
        }
        record.record_rename(before, &after);
        debug!("{:?} -> {:?}", before, after);
        self.mirror.mark_pending(image)
    }

    /// Fold the mirror's structural changes into the index and the store
    fn absorb_changes(&mut self) {
        for change in self.mirror.take_changes() {
            match change {
                MirrorChange::Discovered(id) => {
                    let Some(record) = self.mirror.image_mut(id) else {
                        continue;
                    };
                    if let Some(history) = self.store.claim(record.physical_path()) {
                        record.attach_history(history);
                    }
                    self.tags.adopt(record);
                }
                MirrorChange::Dropped(record) => {
                    self.tags.forget(record.id(), record.tags());
                    self.store
                        .retain_orphan(record.physical_path().to_path_buf(), record.history().to_vec());
                }
            }
        }
    }

    fn checkpoint(&mut self) {
        if let Err(e) = self.save() {
            warn!("Failed to persist history store {:?}: {}", self.store.path(), e);
        }
    }
}

fn sorted_images(mirror: &Mirror) -> Vec<&ImageRecord> {
    let mut images: Vec<&ImageRecord> = mirror.all_images().collect();
    images.sort_by(|a, b| a.physical_path().cmp(b.physical_path()));
    images
}

impl Drop for PhotoTag {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let report = self.flush();
        if !report.is_clean() {
            warn!("{} renames still pending at shutdown", report.failed.len());
        }
        self.checkpoint();
    }
}

/// Builder for configuring a [`PhotoTag`] library
///
/// # Examples
///
/// ```rust,no_run
/// use phototag::PhotoTagBuilder;
///
/// # fn main() -> phototag::Result<()> {
/// let photos = PhotoTagBuilder::new()
///     .image_extensions(["jpg", "png", "webp"])
///     .build("/home/me/Pictures", "/home/me/.phototag")?;
/// # Ok(())
/// # }
/// ```
pub struct PhotoTagBuilder {
    image_extensions: Vec<String>,
    classify_extensions: Vec<String>,
    classifier: Option<Box<dyn TagClassifier>>,
}

impl fmt::Debug for PhotoTagBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhotoTagBuilder")
            .field("image_extensions", &self.image_extensions)
            .field("classify_extensions", &self.classify_extensions)
            .field("classifier", &self.classifier.is_some())
            .finish()
    }
}

impl PhotoTagBuilder {
    /// Create a builder with the default extension sets and no classifier
    pub fn new() -> Self {
        Self {
            image_extensions: normalize_extensions(DEFAULT_IMAGE_EXTENSIONS),
            classify_extensions: normalize_extensions(DEFAULT_CLASSIFY_EXTENSIONS),
            classifier: None,
        }
    }

    /// Set the extensions recognized as images
    ///
    /// Matching is case-insensitive; leading dots are ignored.
    pub fn image_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.image_extensions = normalize_extensions(extensions);
        self
    }

    /// Set the extensions handed to the classifier
    pub fn classify_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.classify_extensions = normalize_extensions(extensions);
        self
    }

    /// Use `classifier` for tag suggestions
    pub fn classifier(mut self, classifier: impl TagClassifier + 'static) -> Self {
        self.classifier = Some(Box::new(classifier));
        self
    }

    /// Open the library rooted at `root`, persisting to `store_path`
    ///
    /// Loads the store, mirrors the tree, lets every discovered image claim
    /// its history and switches to the root.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::RootNotFound`] if `root` is not a directory. A
    /// missing or unreadable store is not an error.
    #[instrument(skip(self, root, store_path))]
    pub fn build(self, root: impl AsRef<Path>, store_path: impl Into<PathBuf>) -> Result<PhotoTag> {
        let store = HistoryStore::load(store_path);
        let tags = TagIndex::with_roster(store.roster());
        let mirror = Mirror::new(root.as_ref(), &self.image_extensions)?;
        let current = mirror.root();

        let config = PhotoTagConfig {
            root_path: mirror.root_path().to_path_buf(),
            store_path: store.path().to_path_buf(),
            image_extensions: self.image_extensions,
            classify_extensions: self.classify_extensions,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        let mut photos = PhotoTag {
            config,
            mirror,
            tags,
            store,
            classifier: self.classifier,
            current,
            closed: false,
        };
        photos.absorb_changes();
        photos.switch_directory(current)?;

        info!(
            "Opened library at {:?}: {} images, {} visible tags",
            photos.config.root_path,
            photos.mirror.image_count(),
            photos.tags.list_visible().len()
        );
        Ok(photos)
    }
}

impl Default for PhotoTagBuilder {
    fn default() -> Self {
        Self::new()
    }
}
