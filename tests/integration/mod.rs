//! Integration tests for phototag
//!
//! Tests realistic sessions: browsing between directories, moving photos
//! around, and reopening the library on the same store file.

use ::phototag::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;
use tracing::info;
use walkdir::WalkDir;

/// Test harness owning a photo tree, a store location and an open library
pub struct PhotoTagTestHarness {
    pub photos_dir: TempDir,
    pub state_dir: TempDir,
    pub library: Option<PhotoTag>,
}

impl PhotoTagTestHarness {
    /// Create a harness over an empty tree
    pub fn new() -> Self {
        let photos_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        let mut harness = Self {
            photos_dir,
            state_dir,
            library: None,
        };
        harness.reopen();
        harness
    }

    /// Create a harness over files at the given relative paths
    pub fn with_files(files: &[&str]) -> Self {
        let photos_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        for file in files {
            let path = photos_dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, file.as_bytes()).unwrap();
        }
        let mut harness = Self {
            photos_dir,
            state_dir,
            library: None,
        };
        harness.reopen();
        harness
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.path().join("config.txt")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.photos_dir.path().join(relative)
    }

    pub fn lib(&mut self) -> &mut PhotoTag {
        self.library.as_mut().unwrap()
    }

    /// Close the library (if open) and open it again
    pub fn reopen(&mut self) {
        if let Some(library) = self.library.take() {
            library.close().unwrap();
        }
        let library = PhotoTagBuilder::new()
            .build(self.photos_dir.path(), self.store_path())
            .unwrap();
        info!("Reopened library with {} images", library.mirror().image_count());
        self.library = Some(library);
    }

    /// Handle of the image at `relative`
    pub fn image(&mut self, relative: &str) -> ImageId {
        let path = self.path(relative);
        self.lib().image_at(&path).unwrap()
    }

    /// Switch to the current directory again, applying pending renames
    pub fn checkpoint(&mut self) -> FlushReport {
        let lib = self.lib();
        let current = lib.current_directory();
        lib.switch_directory(current).unwrap()
    }

    /// Relative names of every image file on disk, sorted
    pub fn files_on_disk(&self) -> Vec<String> {
        let mut files: Vec<String> = WalkDir::new(self.photos_dir.path())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| {
                e.path()
                    .strip_prefix(self.photos_dir.path())
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        files.sort();
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_browsing_session() {
        let mut h = PhotoTagTestHarness::with_files(&[
            "2023/xmas.jpg",
            "2024/june/beach.jpg",
            "2024/june/hotel.png",
            "2024/july/hike.jpg",
        ]);

        let june = h.path("2024/june");
        assert!(h.lib().open_directory(&june).unwrap());

        let beach = h.image("2024/june/beach.jpg");
        let hotel = h.image("2024/june/hotel.png");
        h.lib().add_tag(beach, "summer").unwrap();
        h.lib().add_tag(hotel, "summer").unwrap();
        h.lib().add_tag(beach, "sea").unwrap();

        // Nothing on disk changed yet
        assert!(h.path("2024/june/beach.jpg").exists());

        // Leaving the directory applies every pending rename
        assert!(h.lib().go_up().unwrap());
        assert_eq!(
            h.files_on_disk(),
            vec![
                "2023/xmas.jpg",
                "2024/july/hike.jpg",
                "2024/june/beach @summer @sea.jpg",
                "2024/june/hotel @summer.png",
            ]
        );

        let summer = h.lib().images_with_tag("summer", None).unwrap();
        assert_eq!(summer.len(), 2);
        let july_path = h.path("2024/july");
        let july = h.lib().directory_at(&july_path).unwrap();
        assert_eq!(h.lib().images_with_tag("summer", Some(july)), Some(vec![]));

        let common = h.lib().common_tags(&[beach, hotel]).unwrap();
        assert_eq!(common.into_iter().collect::<Vec<_>>(), vec!["summer".to_string()]);
    }

    #[test]
    #[traced_test]
    fn test_move_keeps_history_and_tags() {
        let mut h = PhotoTagTestHarness::with_files(&["inbox/cat.jpg", "pets/.keep"]);

        let cat = h.image("inbox/cat.jpg");
        h.lib().add_tag(cat, "cat").unwrap();
        let pets = h.path("pets");
        let cat_path = h.path("inbox/cat.jpg");
        assert!(h.lib().move_image(&pets, &cat_path));
        h.checkpoint();

        assert!(h.path("pets/cat @cat.jpg").exists());
        assert!(!h.path("inbox/cat.jpg").exists());

        h.reopen();
        let cat = h.image("pets/cat @cat.jpg");
        let history = h.lib().image_history(cat).unwrap().to_vec();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_name, "cat @cat.jpg");
        assert_eq!(h.lib().images_with_tag("cat", None), Some(vec![cat]));
    }

    #[test]
    fn test_restart_restores_roster_and_hidden_tags() {
        let mut h = PhotoTagTestHarness::with_files(&["a.jpg", "b.jpg"]);
        let a = h.image("a.jpg");
        h.lib().add_tag(a, "keep").unwrap();
        h.lib().register_tag("spare").unwrap();
        h.lib().register_tag("drop").unwrap();
        assert!(h.lib().retire_tag("drop"));
        h.reopen();

        assert_eq!(h.lib().visible_tags(), vec!["keep".to_string(), "spare".to_string()]);
        assert_eq!(h.lib().tag_visibility("drop"), TagVisibility::Absent);

        let store = fs::read_to_string(h.store_path()).unwrap();
        assert_eq!(store.lines().next(), Some("keep, spare"));
    }

    #[test]
    fn test_revert_round_trip() {
        let mut h = PhotoTagTestHarness::with_files(&["pic.jpg"]);
        let pic = h.image("pic.jpg");
        h.lib().add_tag(pic, "x").unwrap();
        h.lib().add_tag(pic, "y").unwrap();
        h.checkpoint();

        h.lib().revert_name(pic, "pic.jpg").unwrap();
        h.checkpoint();
        assert_eq!(h.files_on_disk(), vec!["pic.jpg"]);

        let history = h.lib().image_history(pic).unwrap().to_vec();
        assert_eq!(history.len(), 3);
        assert_eq!(history[2].old_name, "pic @x @y.jpg");
        assert_eq!(history[2].new_name, "pic.jpg");
        assert!(h.lib().image(pic).unwrap().tags().is_empty());

        // Revert forward again using the history
        let earlier = history[0].new_name.clone();
        h.lib().revert_name(pic, &earlier).unwrap();
        h.checkpoint();
        assert_eq!(h.files_on_disk(), vec!["pic @x.jpg"]);
        assert_eq!(h.lib().images_with_tag("x", None), Some(vec![pic]));
    }

    #[test]
    fn test_create_subdirectory_then_move() {
        let mut h = PhotoTagTestHarness::with_files(&["a.jpg"]);
        assert!(h.lib().create_subdirectory("sorted").unwrap());

        let sorted = h.path("sorted");
        let a = h.path("a.jpg");
        assert!(h.lib().move_image(&sorted, &a));
        let report = h.checkpoint();
        assert_eq!(report.renamed, 1);
        assert_eq!(h.files_on_disk(), vec!["sorted/a.jpg"]);
    }

    #[test]
    fn test_go_up_widens_root() {
        let h = PhotoTagTestHarness::new();
        fs::create_dir_all(h.path("library/albums")).unwrap();
        fs::write(h.path("library/loose.jpg"), b"l").unwrap();
        fs::write(h.path("library/albums/in.jpg"), b"i").unwrap();

        let mut library = PhotoTag::open(h.path("library/albums"), h.store_path()).unwrap();
        assert_eq!(library.mirror().image_count(), 1);

        assert!(library.go_up().unwrap());
        assert_eq!(library.mirror().image_count(), 2);
        assert_eq!(
            library.current_path(),
            fs::canonicalize(h.path("library")).unwrap()
        );
        assert_eq!(library.config().root_path, library.current_path());
        library.close().unwrap();
    }

    #[test]
    fn test_empty_harness_has_nothing() {
        let mut h = PhotoTagTestHarness::new();
        assert_eq!(h.lib().mirror().image_count(), 0);
        assert!(h.files_on_disk().is_empty());
    }
}
