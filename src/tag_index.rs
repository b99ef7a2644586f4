//! Global tag registry
//!
//! The index maps every known tag to the images wearing it. Each tag is in
//! exactly one state:
//!
//! ```text
//!            register_tag / tag_image
//!   Absent ───────────────────────────► Active ◄──┐
//!     ▲                                   │       │ register_tag
//!     │ retire_tag (no images)            │       │
//!     ├───────────────────────────────────┘       │
//!     │                                           │
//!     │ last image untagged          retire_tag   │
//!     └────────────── Hidden ◄────────(images)────┘
//! ```
//!
//! A tag only becomes Absent once no image is associated with it, so a soft
//! deleted (Hidden) tag keeps answering lookups for the images that still
//! wear it.
//!
//! Associations are handles into the mirror's arena; the index never owns
//! image records. Operations that must also rename the image take the record
//! by `&mut` and update its file name in the same call.

use crate::collections::{HashMap, HashSet};
use crate::error::{PhotoTagError, Result};
use crate::image::ImageRecord;
use crate::types::{ImageId, TagVisibility};
use std::collections::BTreeSet;
use tracing::{debug, trace, warn};

/// Characters the filesystem or the history store cannot carry
pub const FORBIDDEN_CHARACTERS: &[char] = &['*', '/', '\\', ':', '?', '"', '<', '>', '|'];

/// Delimiters of the filename markers, history segments and roster line
pub const RESERVED_CHARACTERS: &[char] = &['@', ';', ','];

/// Check that `tag` can be encoded in a file name and in the history store
///
/// # Errors
///
/// [`PhotoTagError::InvalidTag`] if the tag is empty, has surrounding
/// whitespace, contains a control character, a forbidden filesystem
/// character or a reserved delimiter.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(PhotoTagError::invalid_tag(tag, "tag is empty"));
    }
    if tag.trim() != tag {
        return Err(PhotoTagError::invalid_tag(tag, "leading or trailing whitespace"));
    }
    if let Some(c) = tag
        .chars()
        .find(|c| FORBIDDEN_CHARACTERS.contains(c) || RESERVED_CHARACTERS.contains(c))
    {
        return Err(PhotoTagError::invalid_tag(tag, format!("contains '{}'", c)));
    }
    if tag.chars().any(char::is_control) {
        return Err(PhotoTagError::invalid_tag(tag, "contains a control character"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
enum TagState {
    Active(HashSet<ImageId>),
    Hidden(HashSet<ImageId>),
}

impl TagState {
    fn images(&self) -> &HashSet<ImageId> {
        match self {
            TagState::Active(images) | TagState::Hidden(images) => images,
        }
    }

    fn images_mut(&mut self) -> &mut HashSet<ImageId> {
        match self {
            TagState::Active(images) | TagState::Hidden(images) => images,
        }
    }

    fn visibility(&self) -> TagVisibility {
        match self {
            TagState::Active(_) => TagVisibility::Active,
            TagState::Hidden(_) => TagVisibility::Hidden,
        }
    }
}

/// Registry of tags and the images bearing them
#[derive(Debug, Clone, Default)]
pub struct TagIndex {
    tags: HashMap<String, TagState>,
}

impl TagIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index whose roster tags start Active with no images
    ///
    /// Roster entries that fail [`validate_tag`] are skipped.
    pub fn with_roster<I, S>(roster: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut index = Self::new();
        for tag in roster {
            let tag = tag.as_ref();
            match validate_tag(tag) {
                Ok(()) => {
                    index
                        .tags
                        .entry(tag.to_string())
                        .or_insert_with(|| TagState::Active(HashSet::default()));
                }
                Err(e) => warn!("Dropping roster entry: {}", e),
            }
        }
        index
    }

    /// Number of tracked (Active or Hidden) tags
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Check whether no tag is tracked
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Current state of `tag`
    pub fn visibility(&self, tag: &str) -> TagVisibility {
        self.tags
            .get(tag)
            .map(TagState::visibility)
            .unwrap_or(TagVisibility::Absent)
    }

    /// Make `tag` Active
    ///
    /// Returns `true` if the tag was created or unhidden, `false` if it was
    /// already Active.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::InvalidTag`] for a tag that fails [`validate_tag`].
    pub fn register_tag(&mut self, tag: &str) -> Result<bool> {
        validate_tag(tag)?;
        match self.tags.get_mut(tag) {
            Some(TagState::Active(_)) => Ok(false),
            Some(state @ TagState::Hidden(_)) => {
                let images = std::mem::take(state.images_mut());
                *state = TagState::Active(images);
                debug!("Unhid tag {:?}", tag);
                Ok(true)
            }
            None => {
                self.tags
                    .insert(tag.to_string(), TagState::Active(HashSet::default()));
                debug!("Registered tag {:?}", tag);
                Ok(true)
            }
        }
    }

    /// Soft delete `tag`
    ///
    /// A tag nobody wears is removed outright; otherwise it becomes Hidden.
    /// Returns `false` if the tag was Absent.
    pub fn retire_tag(&mut self, tag: &str) -> bool {
        let Some(state) = self.tags.get_mut(tag) else {
            return false;
        };
        if state.images().is_empty() {
            self.tags.remove(tag);
            debug!("Removed tag {:?}", tag);
        } else {
            let images = std::mem::take(state.images_mut());
            debug!("Hid tag {:?} ({} images still wear it)", tag, images.len());
            *state = TagState::Hidden(images);
        }
        true
    }

    /// Associate image `id` with `tag` without touching the image
    ///
    /// An Absent tag is registered first; a Hidden tag stays Hidden.
    /// Returns `false` if the association already existed.
    pub fn associate(&mut self, id: ImageId, tag: &str) -> Result<bool> {
        if !self.tags.contains_key(tag) {
            self.register_tag(tag)?;
        }
        match self.tags.get_mut(tag) {
            Some(state) => Ok(state.images_mut().insert(id)),
            None => Err(PhotoTagError::internal(format!("tag {:?} vanished during registration", tag))),
        }
    }

    /// Remove the association of image `id` with `tag` without touching the image
    ///
    /// A Hidden tag whose last image leaves becomes Absent. Returns `false`
    /// if there was no such association.
    pub fn dissociate(&mut self, id: ImageId, tag: &str) -> bool {
        let Some(state) = self.tags.get_mut(tag) else {
            return false;
        };
        if !state.images_mut().remove(&id) {
            return false;
        }
        if matches!(state, TagState::Hidden(images) if images.is_empty()) {
            self.tags.remove(tag);
            debug!("Hidden tag {:?} lost its last image", tag);
        }
        true
    }

    /// Tag an image: associate it and add the marker to its file name
    ///
    /// Returns `false` if the image was already associated with the tag.
    ///
    /// # Errors
    ///
    /// [`PhotoTagError::InvalidTag`] when an Absent tag fails validation;
    /// neither the index nor the image is changed.
    pub fn tag_image(&mut self, image: &mut ImageRecord, tag: &str) -> Result<bool> {
        if !self.associate(image.id(), tag)? {
            return Ok(false);
        }
        image.add_tag(tag);
        trace!("Tagged {} with {:?}", image.id(), tag);
        Ok(true)
    }

    /// Untag an image: drop the association and the marker from its file name
    ///
    /// Returns `false` if the image was not associated with the tag.
    pub fn untag_image(&mut self, image: &mut ImageRecord, tag: &str) -> bool {
        if !self.dissociate(image.id(), tag) {
            return false;
        }
        image.remove_tag(tag);
        trace!("Untagged {} from {:?}", image.id(), tag);
        true
    }

    /// Associate every tag an image already wears
    ///
    /// Used when the mirror discovers an image. Tags that fail validation
    /// stay in the file name but are not indexed. Returns the number of new
    /// associations.
    pub fn adopt(&mut self, image: &ImageRecord) -> usize {
        let mut adopted = 0;
        for tag in image.tags() {
            match self.associate(image.id(), tag) {
                Ok(true) => adopted += 1,
                Ok(false) => {}
                Err(e) => debug!("Not indexing tag of {:?}: {}", image.physical_path(), e),
            }
        }
        adopted
    }

    /// Drop every association of an image that left the mirror
    pub fn forget<'a, I>(&mut self, id: ImageId, tags: I)
    where
        I: IntoIterator<Item = &'a String>,
    {
        for tag in tags {
            self.dissociate(id, tag);
        }
    }

    /// Active tags, sorted
    pub fn list_visible(&self) -> Vec<String> {
        let mut visible: Vec<String> = self
            .tags
            .iter()
            .filter(|(_, state)| matches!(state, TagState::Active(_)))
            .map(|(tag, _)| tag.clone())
            .collect();
        visible.sort();
        visible
    }

    /// Images associated with `tag`, Active or Hidden
    ///
    /// Returns `None` for an Absent tag.
    pub fn images_with(&self, tag: &str) -> Option<Vec<ImageId>> {
        self.tags.get(tag).map(|state| {
            let mut ids: Vec<ImageId> = state.images().iter().copied().collect();
            ids.sort();
            ids
        })
    }

    /// Tags worn by every image in `images`
    ///
    /// Each image's own tag set is authoritative. Every tag is classified at
    /// most once across the scan.
    pub fn common_tags(&self, images: &[&ImageRecord]) -> BTreeSet<String> {
        let mut common = BTreeSet::new();
        let mut uncommon = BTreeSet::new();

        for image in images {
            for tag in image.tags() {
                if common.contains(tag) || uncommon.contains(tag) {
                    continue;
                }
                if images.iter().all(|other| other.has_tag(tag)) {
                    common.insert(tag.clone());
                } else {
                    uncommon.insert(tag.clone());
                }
            }
        }
        common
    }
}
