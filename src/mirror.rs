//! In-memory mirror of a directory tree
//!
//! ## Overview
//!
//! The mirror caches the tracked part of the filesystem as an arena of
//! [`DirectoryNode`]s and [`ImageRecord`]s addressed by [`DirId`] and
//! [`ImageId`]. Parent and owner links are handles, so the tree holds no
//! reference cycles and records can be handed out by id.
//!
//! The tree is a cache, not a live view. [`Mirror::reconcile`] brings one
//! node back in line with its directory listing; new subdirectories are
//! scanned recursively the first time they appear.
//!
//! Tag edits never touch the disk directly. They move an image's logical
//! path and queue the image with [`Mirror::mark_pending`]; [`Mirror::flush`]
//! later performs the physical renames and reconciles every directory it
//! touched. A rename that fails stays queued and is retried on the next
//! flush.
//!
//! Structural changes found while reconciling are collected as
//! [`MirrorChange`]s. The owner of the mirror drains them with
//! [`Mirror::take_changes`] to keep its own indexes in step.

use crate::collections::{HashMap, HashSet};
use crate::error::{PhotoTagError, Result};
use crate::image::ImageRecord;
use crate::types::{DirId, FailedMove, FlushReport, ImageId};
use crate::utils::{self, EntryKind, MoveOutcome};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// One directory of the mirrored tree
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    id: DirId,
    path: PathBuf,
    parent: Option<DirId>,
    children: Vec<DirId>,
    images: Vec<ImageId>,
}

impl DirectoryNode {
    fn new(id: DirId, path: PathBuf, parent: Option<DirId>) -> Self {
        Self {
            id,
            path,
            parent,
            children: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Handle of this node
    pub fn id(&self) -> DirId {
        self.id
    }

    /// Absolute path of the directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parent node, `None` for the current root
    pub fn parent(&self) -> Option<DirId> {
        self.parent
    }

    /// Child directory nodes, in no particular order
    pub fn children(&self) -> &[DirId] {
        &self.children
    }

    /// Images listed under this directory
    pub fn images(&self) -> &[ImageId] {
        &self.images
    }
}

/// Structural change found while reconciling
#[derive(Debug, Clone)]
pub enum MirrorChange {
    /// A new image file appeared and got a record
    Discovered(ImageId),
    /// An image vanished from disk; its record is handed back
    Dropped(ImageRecord),
}

/// Arena-backed mirror of a directory tree with a deferred rename queue
#[derive(Debug)]
pub struct Mirror {
    root: DirId,
    dirs: HashMap<DirId, DirectoryNode>,
    images: HashMap<ImageId, ImageRecord>,
    /// Physical path -> image, across the whole tree
    by_physical: HashMap<PathBuf, ImageId>,
    pending: Vec<ImageId>,
    pending_set: HashSet<ImageId>,
    changes: Vec<MirrorChange>,
    image_extensions: Vec<String>,
    next_dir: u64,
    next_image: u64,
}

impl Mirror {
    /// Mirror the tree below `root`
    ///
    /// The root is canonicalized and every directory below it is scanned
    /// once. Every image found is reported as [`MirrorChange::Discovered`].
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::RootNotFound`] if `root` is not an existing directory.
    pub fn new(root: &Path, image_extensions: &[String]) -> Result<Self> {
        let root_path = fs::canonicalize(root)
            .map_err(|_| PhotoTagError::RootNotFound(root.to_path_buf()))?;
        if !root_path.is_dir() {
            return Err(PhotoTagError::RootNotFound(root.to_path_buf()));
        }

        let mut mirror = Self {
            root: DirId(0),
            dirs: HashMap::default(),
            images: HashMap::default(),
            by_physical: HashMap::default(),
            pending: Vec::new(),
            pending_set: HashSet::default(),
            changes: Vec::new(),
            image_extensions: image_extensions.to_vec(),
            next_dir: 0,
            next_image: 0,
        };

        let root_id = mirror.insert_dir(root_path.clone(), None);
        mirror.root = root_id;
        mirror.reconcile_tree(root_id);

        info!(
            "Mirrored {:?}: {} directories, {} images",
            root_path,
            mirror.dirs.len(),
            mirror.images.len()
        );
        Ok(mirror)
    }

    /// Handle of the current root node
    pub fn root(&self) -> DirId {
        self.root
    }

    /// Path of the current root node
    pub fn root_path(&self) -> &Path {
        // The root id always refers to a live node
        self.dirs
            .get(&self.root)
            .map(|n| n.path.as_path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Extensions recognized as images
    pub fn image_extensions(&self) -> &[String] {
        &self.image_extensions
    }

    /// Look up a directory node
    pub fn node(&self, dir: DirId) -> Option<&DirectoryNode> {
        self.dirs.get(&dir)
    }

    /// Look up an image record
    pub fn image(&self, image: ImageId) -> Option<&ImageRecord> {
        self.images.get(&image)
    }

    /// Look up an image record for mutation
    ///
    /// Changes to the logical path only reach the disk once the image is
    /// passed to [`Mirror::mark_pending`] and flushed.
    pub fn image_mut(&mut self, image: ImageId) -> Option<&mut ImageRecord> {
        self.images.get_mut(&image)
    }

    /// Images listed directly under `dir`
    pub fn images_in(&self, dir: DirId) -> &[ImageId] {
        self.dirs.get(&dir).map(|n| n.images.as_slice()).unwrap_or(&[])
    }

    /// Images listed anywhere under `dir`, including `dir` itself
    pub fn images_under(&self, dir: DirId) -> Vec<ImageId> {
        let mut found = Vec::new();
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.dirs.get(&current) {
                found.extend_from_slice(&node.images);
                stack.extend_from_slice(&node.children);
            }
        }
        found
    }

    /// Child directories of `dir`
    pub fn subdirectories(&self, dir: DirId) -> &[DirId] {
        self.dirs.get(&dir).map(|n| n.children.as_slice()).unwrap_or(&[])
    }

    /// Every tracked image, in no particular order
    pub fn all_images(&self) -> impl Iterator<Item = &ImageRecord> {
        self.images.values()
    }

    /// Number of tracked images
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Number of tracked directories
    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    /// Images waiting for the next flush, in queue order
    pub fn pending(&self) -> &[ImageId] {
        &self.pending
    }

    /// Drain the structural changes collected since the last call
    pub fn take_changes(&mut self) -> Vec<MirrorChange> {
        std::mem::take(&mut self.changes)
    }

    /// Resolve an image by its logical or physical path
    pub fn image_at(&self, path: &Path) -> Option<ImageId> {
        if let Some(id) = self.by_physical.get(path) {
            return Some(*id);
        }
        self.images
            .values()
            .find(|img| img.logical_path() == path)
            .map(ImageRecord::id)
    }

    /// Resolve the directory node for `path`
    ///
    /// A tracked image path or an existing file path resolves to its
    /// directory. If the path is not in the cached tree, the deepest cached
    /// ancestor is reconciled once and the lookup retried.
    pub fn lookup(&mut self, path: &Path) -> Option<DirId> {
        if let Some(owner) = self.image_at(path).and_then(|id| self.images.get(&id)).map(|i| i.owner()) {
            return Some(owner);
        }

        let mut target = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if target.is_file() {
            target = target.parent()?.to_path_buf();
        }

        let (deepest, exact) = self.descend(&target)?;
        if exact {
            return Some(deepest);
        }

        trace!("Lookup miss for {:?}, reconciling {:?}", target, self.dirs.get(&deepest).map(|n| &n.path));
        self.reconcile_tree(deepest);
        match self.descend(&target) {
            Some((dir, true)) => Some(dir),
            _ => None,
        }
    }

    /// Reconcile `dir` against its directory listing
    ///
    /// New subdirectories are scanned recursively; already known ones are
    /// left alone.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::DirectoryNotFound`] for a stale handle.
    pub fn reconcile(&mut self, dir: DirId) -> Result<()> {
        if !self.dirs.contains_key(&dir) {
            return Err(PhotoTagError::DirectoryNotFound(dir.to_string()));
        }
        self.reconcile_tree(dir);
        Ok(())
    }

    /// Parent of `dir`, growing the tree upwards when `dir` is the root
    ///
    /// Ascending from the root creates a node for the parent directory,
    /// makes it the new root with the old root as a child, and scans it.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::NoParentDirectory`] at the top of the drive,
    /// [`PhotoTagError::DirectoryNotFound`] for a stale handle.
    pub fn ascend(&mut self, dir: DirId) -> Result<DirId> {
        let node = self
            .dirs
            .get(&dir)
            .ok_or_else(|| PhotoTagError::DirectoryNotFound(dir.to_string()))?;
        if let Some(parent) = node.parent {
            return Ok(parent);
        }

        let parent_path = parent_dir(&node.path)?;
        let new_root = self.insert_dir(parent_path.clone(), None);
        if let Some(new_node) = self.dirs.get_mut(&new_root) {
            new_node.children.push(dir);
        }
        if let Some(old_root) = self.dirs.get_mut(&dir) {
            old_root.parent = Some(new_root);
        }
        self.root = new_root;
        self.reconcile_tree(new_root);

        info!("Root widened to {:?}", parent_path);
        Ok(new_root)
    }

    /// Create directory `name` inside `dir` and track it
    ///
    /// # Errors
    ///
    /// Fails for a stale handle, a name that is not a single path component,
    /// or when the directory cannot be created (including when it exists).
    pub fn create_subdirectory(&mut self, dir: DirId, name: &str) -> Result<DirId> {
        let parent_path = self
            .dirs
            .get(&dir)
            .map(|n| n.path.clone())
            .ok_or_else(|| PhotoTagError::DirectoryNotFound(dir.to_string()))?;

        let mut components = Path::new(name).components();
        let single = matches!(
            (components.next(), components.next()),
            (Some(std::path::Component::Normal(_)), None)
        );
        if !single {
            return Err(PhotoTagError::custom(format!(
                "invalid directory name {:?}",
                name
            )));
        }

        let path = parent_path.join(name);
        fs::create_dir(&path)?;
        debug!("Created directory {:?}", path);
        self.reconcile_tree(dir);

        self.dirs
            .get(&dir)
            .and_then(|n| {
                n.children
                    .iter()
                    .copied()
                    .find(|c| self.dirs.get(c).is_some_and(|child| child.path == path))
            })
            .ok_or_else(|| PhotoTagError::internal(format!("created directory {:?} was not tracked", path)))
    }

    /// Move `image` under `dest` in the tree and queue the physical move
    ///
    /// The image is queued even when `dest` already owns it.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::ImageNotFound`] or [`PhotoTagError::DirectoryNotFound`]
    /// for stale handles.
    pub fn relocate(&mut self, image: ImageId, dest: DirId) -> Result<()> {
        let dest_path = self
            .dirs
            .get(&dest)
            .map(|n| n.path.clone())
            .ok_or_else(|| PhotoTagError::DirectoryNotFound(dest.to_string()))?;
        let record = self
            .images
            .get_mut(&image)
            .ok_or_else(|| PhotoTagError::ImageNotFound(image.to_string()))?;

        let owner = record.owner();
        record.relocate(dest, &dest_path);

        if owner != dest {
            if let Some(node) = self.dirs.get_mut(&owner) {
                node.images.retain(|id| *id != image);
            }
            if let Some(node) = self.dirs.get_mut(&dest) {
                node.images.push(image);
            }
        }

        self.mark_pending(image)
    }

    /// Queue `image` for the next flush
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::ImageNotFound`] for a stale handle.
    pub fn mark_pending(&mut self, image: ImageId) -> Result<()> {
        if !self.images.contains_key(&image) {
            return Err(PhotoTagError::ImageNotFound(image.to_string()));
        }
        self.enqueue(image);
        Ok(())
    }

    /// Apply every queued rename on disk
    ///
    /// A rename whose source is gone while its target exists is treated as
    /// already applied, unless another record tracks the target. Failed renames are logged, listed in the report and
    /// stay queued. Every directory a rename touched, or tried to touch, is
    /// reconciled.
    pub fn flush(&mut self) -> FlushReport {
        let queue = std::mem::take(&mut self.pending);
        self.pending_set.clear();

        let mut report = FlushReport::default();
        let mut retry = Vec::new();
        let mut touched: Vec<DirId> = Vec::new();

        for id in queue {
            let Some(record) = self.images.get_mut(&id) else {
                continue;
            };
            if !record.is_pending_move() {
                report.unchanged += 1;
                continue;
            }

            let from = record.physical_path().to_path_buf();
            let to = record.logical_path().to_path_buf();
            let dirs = [record.origin(), record.owner()];

            // A target tracked by another record is occupied, never already applied
            let occupied = self
                .by_physical
                .get(&to)
                .is_some_and(|other| *other != id && to.exists());
            let outcome = if occupied {
                Err(PhotoTagError::TargetExists(to.clone()))
            } else {
                utils::move_file(&from, &to)
            };

            match outcome {
                Ok(outcome) => {
                    record.commit_physical();
                    match outcome {
                        MoveOutcome::Moved => {
                            debug!("Renamed {:?} -> {:?}", from, to);
                            report.renamed += 1;
                        }
                        MoveOutcome::AlreadyInPlace => {
                            debug!("Rename to {:?} already applied", to);
                            report.already_applied += 1;
                        }
                    }
                    self.by_physical.remove(&from);
                    self.by_physical.insert(to, id);
                    touched.extend(dirs);
                }
                Err(e) => {
                    warn!("Failed to rename {:?} -> {:?}: {}", from, to, e);
                    touched.extend(dirs);
                    report.failed.push(FailedMove {
                        image: id,
                        from,
                        to,
                        reason: e.to_string(),
                    });
                    retry.push(id);
                }
            }
        }

        for id in retry {
            self.enqueue(id);
        }

        touched.sort();
        touched.dedup();
        for dir in touched {
            // A directory gone from disk is dropped by reconciling its parent
            let target = match self.dirs.get(&dir) {
                Some(node) if !node.path.is_dir() => node.parent.unwrap_or(dir),
                Some(_) => dir,
                None => continue,
            };
            self.reconcile_tree(target);
        }

        if report.total() > 0 {
            info!(
                "Flushed {} renames ({} already applied, {} failed)",
                report.renamed,
                report.already_applied,
                report.failed.len()
            );
        }
        report
    }

    fn enqueue(&mut self, image: ImageId) {
        if self.pending_set.insert(image) {
            self.pending.push(image);
        }
    }

    fn insert_dir(&mut self, path: PathBuf, parent: Option<DirId>) -> DirId {
        let id = DirId(self.next_dir);
        self.next_dir += 1;
        self.dirs.insert(id, DirectoryNode::new(id, path, parent));
        id
    }

    fn insert_image(&mut self, owner: DirId, path: PathBuf) -> Option<ImageId> {
        let id = ImageId(self.next_image);
        match ImageRecord::new(id, owner, path.clone(), None) {
            Ok(record) => {
                self.next_image += 1;
                self.images.insert(id, record);
                self.by_physical.insert(path, id);
                if let Some(node) = self.dirs.get_mut(&owner) {
                    node.images.push(id);
                }
                self.changes.push(MirrorChange::Discovered(id));
                Some(id)
            }
            Err(e) => {
                debug!("Not tracking {:?}: {}", path, e);
                None
            }
        }
    }

    fn remove_image(&mut self, image: ImageId) {
        let Some(record) = self.images.remove(&image) else {
            return;
        };
        if self.by_physical.get(record.physical_path()) == Some(&image) {
            self.by_physical.remove(record.physical_path());
        }
        if self.pending_set.remove(&image) {
            self.pending.retain(|id| *id != image);
        }
        if let Some(node) = self.dirs.get_mut(&record.owner()) {
            node.images.retain(|id| *id != image);
        }
        debug!("Dropped {:?}", record.physical_path());
        self.changes.push(MirrorChange::Dropped(record));
    }

    fn remove_subtree(&mut self, dir: DirId) {
        if let Some(parent) = self.dirs.get(&dir).and_then(|n| n.parent) {
            if let Some(node) = self.dirs.get_mut(&parent) {
                node.children.retain(|c| *c != dir);
            }
        }

        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let Some(node) = self.dirs.remove(&current) else {
                continue;
            };
            debug!("Dropped directory {:?}", node.path);
            stack.extend(node.children);
            for image in node.images {
                self.remove_image(image);
            }
        }
    }

    /// Reconcile `dir`, then every directory discovered below it
    fn reconcile_tree(&mut self, dir: DirId) {
        let mut work = vec![dir];
        while let Some(current) = work.pop() {
            let discovered = self.reconcile_node(current);
            work.extend(discovered);
        }
    }

    /// Reconcile one node and return the directory nodes it created
    fn reconcile_node(&mut self, dir: DirId) -> Vec<DirId> {
        let Some(node) = self.dirs.get(&dir) else {
            return Vec::new();
        };
        let path = node.path.clone();
        let image_ids = node.images.clone();
        let child_ids = node.children.clone();

        // Images: keep while the file is where we last saw it, adopt an
        // already applied rename, drop otherwise. A file another record
        // has moved onto is no longer ours.
        for id in image_ids {
            let Some(record) = self.images.get_mut(&id) else {
                continue;
            };
            let owns_file = self.by_physical.get(record.physical_path()) == Some(&id);
            if owns_file && record.physical_path().exists() {
                continue;
            }
            if !owns_file {
                self.remove_image(id);
                continue;
            }
            let target_taken = self
                .by_physical
                .get(record.logical_path())
                .is_some_and(|other| *other != id);
            if record.is_pending_move() && !target_taken && record.logical_path().exists() {
                let old = record.physical_path().to_path_buf();
                record.commit_physical();
                let new = record.physical_path().to_path_buf();
                trace!("Adopted applied rename {:?} -> {:?}", old, new);
                self.by_physical.remove(&old);
                self.by_physical.insert(new, id);
                continue;
            }
            self.remove_image(id);
        }

        for child in child_ids {
            let gone = self
                .dirs
                .get(&child)
                .map(|c| !c.path.exists() || c.path.is_file())
                .unwrap_or(false);
            if gone {
                self.remove_subtree(child);
            }
        }

        let listing = if path.is_dir() {
            match utils::list_directory(&path, &self.image_extensions) {
                Ok(listing) => listing,
                Err(e) => {
                    warn!("Cannot read directory {:?}: {}", path, e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        let known_dirs: HashSet<PathBuf> = self
            .dirs
            .get(&dir)
            .map(|n| {
                n.children
                    .iter()
                    .filter_map(|c| self.dirs.get(c).map(|c| c.path.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut created = Vec::new();
        for entry in listing {
            match entry.kind {
                EntryKind::Image => {
                    // Also covers files of images moving in from elsewhere
                    if self.by_physical.contains_key(&entry.path) {
                        continue;
                    }
                    self.insert_image(dir, entry.path);
                }
                EntryKind::Directory => {
                    if known_dirs.contains(&entry.path) {
                        continue;
                    }
                    let child = self.insert_dir(entry.path, Some(dir));
                    if let Some(node) = self.dirs.get_mut(&dir) {
                        node.children.push(child);
                    }
                    created.push(child);
                }
            }
        }
        created
    }

    /// Walk down from the root towards `target`
    ///
    /// Returns the deepest cached node on the way and whether it is `target`
    /// itself, or `None` if `target` is outside the tree.
    fn descend(&self, target: &Path) -> Option<(DirId, bool)> {
        let mut current = self.dirs.get(&self.root)?;
        if !target.starts_with(&current.path) {
            return None;
        }
        loop {
            if current.path == target {
                return Some((current.id, true));
            }
            let next = current
                .children
                .iter()
                .filter_map(|c| self.dirs.get(c))
                .find(|c| target.starts_with(&c.path));
            match next {
                Some(child) => current = child,
                None => return Some((current.id, false)),
            }
        }
    }
}

/// Directory above `path`, or [`PhotoTagError::NoParentDirectory`] at a
/// filesystem root
fn parent_dir(path: &Path) -> Result<PathBuf> {
    path.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| PhotoTagError::NoParentDirectory(path.to_path_buf()))
}
