//! Error types for the phototag library
//!
//! This module defines all error types that can occur while mirroring a
//! directory tree, editing tags and persisting rename history. Only tag
//! validation and stale handles surface as errors during normal use; path
//! lookups report misses with `bool`/`Option` and physical renames that fail
//! are logged and retried on the next flush.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the phototag library
pub type Result<T> = std::result::Result<T, PhotoTagError>;

/// Main error type for all phototag operations
#[derive(Debug, Error)]
pub enum PhotoTagError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors while listing a directory
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Errors during JSON serialization (CLI output, config dumps)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tag text that cannot be stored in a filename
    #[error("Invalid tag {tag:?}: {reason}")]
    InvalidTag {
        /// The rejected tag
        tag: String,
        /// Why it was rejected
        reason: String,
    },

    /// The tracked root does not exist
    #[error("Root directory not found: {0:?}")]
    RootNotFound(PathBuf),

    /// A directory handle or path is not part of the mirror
    #[error("Directory not tracked: {0}")]
    DirectoryNotFound(String),

    /// An image handle or path is not part of the mirror
    #[error("Image not tracked: {0}")]
    ImageNotFound(String),

    /// The directory is already at the top of the drive
    #[error("No parent directory above {0:?}")]
    NoParentDirectory(PathBuf),

    /// A rename target is already occupied by another file
    #[error("Rename target already exists: {0:?}")]
    TargetExists(PathBuf),

    /// The history store could not be written
    #[error("Store error: {0}")]
    Store(String),

    /// The tag classifier failed
    #[error("Classifier error: {0}")]
    Classifier(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),

    /// Custom error type for extensions
    #[error("{0}")]
    Custom(String),
}

impl From<tempfile::PersistError> for PhotoTagError {
    fn from(err: tempfile::PersistError) -> Self {
        PhotoTagError::Store(err.to_string())
    }
}

impl PhotoTagError {
    /// Create an invalid tag error
    pub fn invalid_tag(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        PhotoTagError::InvalidTag {
            tag: tag.into(),
            reason: reason.into(),
        }
    }

    /// Create a classifier error with a custom message
    pub fn classifier(msg: impl Into<String>) -> Self {
        PhotoTagError::Classifier(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        PhotoTagError::Internal(msg.into())
    }

    /// Create a custom error with a custom message
    pub fn custom(msg: impl Into<String>) -> Self {
        PhotoTagError::Custom(msg.into())
    }

    /// Check if retrying the operation later may succeed
    ///
    /// Failed renames and store writes depend on filesystem state that can
    /// change; a rejected tag or an unknown handle will not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PhotoTagError::Io(_) | PhotoTagError::TargetExists(_) | PhotoTagError::Store(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            PhotoTagError::InvalidTag { tag, reason } => {
                format!(
                    "Tag '{}' cannot be used: {}. Tags may not contain * / \\ : ? \" < > | @ ; ,",
                    tag, reason
                )
            }
            PhotoTagError::RootNotFound(path) => {
                format!("Directory {:?} does not exist. Check the --root argument.", path)
            }
            PhotoTagError::TargetExists(path) => {
                format!(
                    "{:?} already exists. Rename or move that file first; the pending rename will be retried.",
                    path
                )
            }
            PhotoTagError::NoParentDirectory(path) => {
                format!("{:?} is already the top of the drive.", path)
            }
            _ => self.to_string(),
        }
    }
}
