//! Tag suggestion boundary
//!
//! Suggesting a tag from image content is delegated to an external, slow and
//! best-effort oracle. The orchestrator only needs [`TagClassifier`]; it
//! memoizes answers per image and treats failures as "no suggestion".

use crate::error::{PhotoTagError, Result};
use std::ffi::OsString;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Suggests a tag for an image file
pub trait TagClassifier: Send {
    /// Suggest one tag for the image at `path`
    fn suggest_tag(&self, path: &Path) -> Result<String>;
}

impl<F> TagClassifier for F
where
    F: Fn(&Path) -> Result<String> + Send,
{
    fn suggest_tag(&self, path: &Path) -> Result<String> {
        self(path)
    }
}

/// Classifier backed by an external program
///
/// The program is run with its configured arguments followed by the image
/// path. The first non-empty line it prints is the suggestion.
#[derive(Debug, Clone)]
pub struct CommandClassifier {
    program: OsString,
    args: Vec<OsString>,
}

impl CommandClassifier {
    /// Create a classifier running `program`
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument passed before the image path
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

impl TagClassifier for CommandClassifier {
    fn suggest_tag(&self, path: &Path) -> Result<String> {
        debug!("Running classifier {:?} on {:?}", self.program, path);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| PhotoTagError::classifier(format!("cannot run {:?}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(PhotoTagError::classifier(format!(
                "{:?} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PhotoTagError::classifier(format!("{:?} printed nothing", self.program)))
    }
}
