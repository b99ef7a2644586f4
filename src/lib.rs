//! # phototag - tags that live in file names
//!
//! A library for tagging image files by renaming them, with an auditable
//! rename history that survives restarts.
//!
//! ## Overview
//!
//! phototag keeps no tag database. An image wears its tags as `" @tag"`
//! markers in front of its extension:
//!
//! ```text
//! vacation.jpg  ->  vacation @beach.jpg  ->  vacation @beach @sunset.jpg
//! ```
//!
//! Any tool that can list files can therefore search by tag, and moving a
//! photo to another disk keeps its tags. phototag adds on top of that:
//!
//! - A mirror of the directory tree that tolerates files being renamed,
//!   moved or deleted behind its back
//! - A global tag registry where retired tags stay searchable while some
//!   image still wears them
//! - Deferred renames: edits are applied to the disk at checkpoints, and a
//!   rename that fails is retried at the next one
//! - A rename history per image, persisted in a flat file together with the
//!   list of visible tags
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use phototag::PhotoTag;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut photos = PhotoTag::open("./Pictures", "./config.txt")?;
//!
//! let image = photos
//!     .image_at(Path::new("vacation.jpg"))
//!     .ok_or("vacation.jpg is not tracked")?;
//! photos.add_tag(image, "beach")?;
//! photos.add_tag(image, "sunset")?;
//!
//! // Going somewhere else is a checkpoint: the file is renamed now
//! let root = photos.current_directory();
//! photos.switch_directory(root)?;
//!
//! for entry in photos.image_history(image)? {
//!     println!("{} -> {} ({})", entry.old_name, entry.new_name, entry.timestamp);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Tag rules
//!
//! Tags must be non-empty, without surrounding whitespace or control
//! characters, and may not contain `* / \ : ? " < > |` nor the delimiters
//! `@ ; ,` used by the file name markers and the history store. Violations
//! are reported as [`PhotoTagError::InvalidTag`] before anything changes.
//!
//! ## Module Organization
//!
//! - [`phototag`]: The [`PhotoTag`] orchestrator and its builder
//! - [`mirror`]: Directory tree mirror and rename queue
//! - [`image`]: Image records and file name parsing
//! - [`tag_index`]: Tag registry with soft delete
//! - [`storage`]: Flat-file roster and history persistence
//! - [`classifier`]: Tag suggestion boundary
//! - [`types`]: Common types and data structures
//! - [`error`]: Error types and handling

// Public API modules
pub mod classifier;
pub mod error;
pub mod image;
pub mod mirror;
pub mod phototag;
pub mod storage;
pub mod tag_index;
pub mod types;

// Internal modules (not part of public API)
mod collections;
mod utils;

// Re-export main types for convenience
pub use classifier::{CommandClassifier, TagClassifier};
pub use error::{PhotoTagError, Result};
pub use image::ImageRecord;
pub use mirror::{DirectoryNode, Mirror, MirrorChange};
pub use phototag::{PhotoTag, PhotoTagBuilder};
pub use storage::HistoryStore;
pub use tag_index::TagIndex;
pub use types::*;
