//! Chaos testing for phototag
//!
//! Files and directories change behind the library's back: deleted between
//! runs, renamed by hand, occupied by other files. The library must converge
//! with disk at every checkpoint without losing history it can still place.

use ::phototag::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};

/// Chaos harness: a photo tree, a store location and helpers to break them
pub struct PhotoTagChaosTest {
    pub photos_dir: TempDir,
    pub state_dir: TempDir,
}

impl PhotoTagChaosTest {
    pub fn new(files: &[&str]) -> Self {
        let photos_dir = TempDir::new().unwrap();
        let state_dir = TempDir::new().unwrap();
        for file in files {
            let path = photos_dir.path().join(file);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(&path, file.as_bytes()).unwrap();
        }
        Self {
            photos_dir,
            state_dir,
        }
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir.path().join("config.txt")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.photos_dir.path().join(relative)
    }

    pub fn open(&self) -> PhotoTag {
        PhotoTag::open(self.photos_dir.path(), self.store_path()).unwrap()
    }

    /// Delete a file without telling the library
    pub fn delete_behind_back(&self, relative: &str) {
        warn!("Chaos: deleting {}", relative);
        fs::remove_file(self.path(relative)).unwrap();
    }

    /// Rename a file without telling the library
    pub fn rename_behind_back(&self, from: &str, to: &str) {
        warn!("Chaos: renaming {} -> {}", from, to);
        fs::rename(self.path(from), self.path(to)).unwrap();
    }
}

fn image(library: &PhotoTag, path: &Path) -> ImageId {
    library.image_at(path).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    #[traced_test]
    fn test_deleted_file_history_is_orphaned_then_reclaimed() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);

        let mut library = chaos.open();
        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "kept").unwrap();
        library.close().unwrap();

        chaos.delete_behind_back("a @kept.jpg");
        let mut library = chaos.open();
        assert_eq!(library.mirror().image_count(), 0);
        assert_eq!(library.store().unclaimed_count(), 1);

        // Orphans show up in the global view and survive another save
        let all = library.all_histories();
        assert_eq!(all.len(), 1);
        assert!(all[0].path.ends_with("a @kept.jpg"));
        library.save().unwrap();
        library.close().unwrap();

        info!("Restoring the deleted file");
        fs::write(chaos.path("a @kept.jpg"), b"back").unwrap();
        let library = chaos.open();
        let a = image(&library, &chaos.path("a @kept.jpg"));
        assert_eq!(library.image_history(a).unwrap().len(), 1);
        assert_eq!(library.store().unclaimed_count(), 0);
    }

    #[test]
    #[traced_test]
    fn test_rename_done_by_hand_counts_as_applied() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);
        let mut library = chaos.open();
        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "x").unwrap();

        chaos.rename_behind_back("a.jpg", "a @x.jpg");
        let report = library.flush();
        assert_eq!(report.renamed, 0);
        assert_eq!(report.already_applied, 1);
        assert!(report.is_clean());

        let record = library.image(a).unwrap();
        assert!(!record.is_pending_move());
        assert_eq!(record.physical_path(), chaos.path("a @x.jpg"));
        assert_eq!(library.mirror().image_count(), 1);
    }

    #[test]
    #[traced_test]
    fn test_occupied_target_is_retried() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg", "sub/a.jpg"]);
        let mut library = chaos.open();

        let sub = chaos.path("sub");
        assert!(library.move_image(&sub, &chaos.path("a.jpg")));

        let report = library.flush();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].to, chaos.path("sub/a.jpg"));
        assert!(chaos.path("a.jpg").exists());
        assert!(library.mirror().pending().contains(&report.failed[0].image));

        // Nothing changes while the target stays occupied
        let report = library.flush();
        assert_eq!(report.failed.len(), 1);

        chaos.delete_behind_back("sub/a.jpg");
        let report = library.flush();
        assert_eq!(report.renamed, 1);
        assert!(report.is_clean());
        assert!(!chaos.path("a.jpg").exists());
        assert!(chaos.path("sub/a.jpg").exists());

        // The stale record of the deleted file is gone, only the mover remains
        assert_eq!(library.mirror().image_count(), 1);
        let sub_id = library.directory_at(&sub).unwrap();
        assert_eq!(library.mirror().images_in(sub_id).len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_destination_deleted_while_move_pending() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg", "dest/.keep"]);
        let mut library = chaos.open();

        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "x").unwrap();
        assert!(library.move_image(&chaos.path("dest"), &chaos.path("a @x.jpg")));

        fs::remove_dir_all(chaos.path("dest")).unwrap();
        let report = library.flush();
        assert_eq!(report.failed.len(), 1);

        // The file never moved; it is rediscovered where it is and keeps its history
        assert!(library.mirror().pending().is_empty());
        assert!(library.image(a).is_none());
        let again = image(&library, &chaos.path("a.jpg"));
        assert!(library.image(again).unwrap().tags().is_empty());
        assert_eq!(library.image_history(again).unwrap().len(), 1);

        let report = library.flush();
        assert_eq!(report.total(), 0);
    }

    #[test]
    #[traced_test]
    fn test_source_deleted_while_rename_pending() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg", "b.jpg"]);
        let mut library = chaos.open();
        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "x").unwrap();

        chaos.delete_behind_back("a.jpg");
        let report = library.flush();
        assert_eq!(report.failed.len(), 1);
        assert!(library.image(a).is_none());
        assert_eq!(library.mirror().image_count(), 1);
        assert!(library.mirror().pending().is_empty());

        // Its history waits in the store under the last known path
        let orphaned: Vec<_> = library
            .all_histories()
            .into_iter()
            .filter(|r| r.path.ends_with("a.jpg"))
            .collect();
        assert_eq!(orphaned.len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_revert_onto_vanished_name_keeps_histories_apart() {
        let chaos = PhotoTagChaosTest::new(&["old.jpg", "new.jpg"]);
        let mut library = chaos.open();
        let old = image(&library, &chaos.path("old.jpg"));
        library.add_tag(old, "x").unwrap();
        library.close().unwrap();

        chaos.delete_behind_back("old @x.jpg");
        let mut library = chaos.open();
        assert_eq!(library.store().unclaimed_count(), 1);
        let new = image(&library, &chaos.path("new.jpg"));
        library.revert_name(new, "old @x.jpg").unwrap();
        library.close().unwrap();
        assert!(chaos.path("old @x.jpg").exists());

        let library = chaos.open();
        let occupant = image(&library, &chaos.path("old @x.jpg"));
        let history = library.image_history(occupant).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_name, "new.jpg");
        assert_eq!(library.store().unclaimed_count(), 1);
    }

    #[test]
    #[traced_test]
    fn test_moved_in_file_does_not_claim_foreign_history() {
        let chaos = PhotoTagChaosTest::new(&["old.jpg", "sub/old @x.jpg"]);
        let mut library = chaos.open();
        let old = image(&library, &chaos.path("old.jpg"));
        library.add_tag(old, "x").unwrap();
        library.close().unwrap();

        chaos.delete_behind_back("old @x.jpg");
        let mut library = chaos.open();
        let root = chaos.photos_dir.path().to_path_buf();
        assert!(library.move_image(&root, &chaos.path("sub/old @x.jpg")));
        library.close().unwrap();
        assert!(chaos.path("old @x.jpg").exists());

        for _ in 0..2 {
            let library = chaos.open();
            let occupant = image(&library, &chaos.path("old @x.jpg"));
            assert!(library.image_history(occupant).unwrap().is_empty());
            assert_eq!(library.store().unclaimed_count(), 1);
        }
    }

    #[test]
    #[traced_test]
    fn test_external_files_appear_on_reopen() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);
        let library = chaos.open();
        assert_eq!(library.mirror().image_count(), 1);
        drop(library);

        fs::create_dir_all(chaos.path("new/deeper")).unwrap();
        fs::write(chaos.path("new/deeper/b @found.png"), b"b").unwrap();

        let library = chaos.open();
        assert_eq!(library.mirror().image_count(), 2);
        assert_eq!(library.tag_visibility("found"), TagVisibility::Active);
    }

    #[test]
    #[traced_test]
    fn test_garbage_store_still_loads() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);
        fs::write(
            chaos.store_path(),
            "good, bad;tag, also good\n|||\nnot a line\n/gone/path|a;b\n/gone/p2|x;y;z|broken\n",
        )
        .unwrap();

        let mut library = chaos.open();
        assert_eq!(
            library.visible_tags(),
            vec!["also good".to_string(), "good".to_string()]
        );
        assert_eq!(library.store().unclaimed_count(), 1);

        // The rewrite keeps only what could be understood
        library.save().unwrap();
        let content = fs::read_to_string(chaos.store_path()).unwrap();
        assert_eq!(content, "also good, good\n/gone/p2|x;y;z\n");
    }

    #[test]
    #[traced_test]
    fn test_unwritable_store() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);
        fs::create_dir_all(chaos.store_path()).unwrap();

        // Opening only logs the failed checkpoint
        let mut library = chaos.open();
        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "x").unwrap();
        assert!(library.save().is_err());

        // The rename still happens, only persisting fails
        assert!(library.close().is_err());
        assert!(chaos.path("a @x.jpg").exists());
        assert!(chaos.store_path().is_dir());
    }

    #[test]
    #[traced_test]
    fn test_drop_with_unwritable_store_does_not_panic() {
        let chaos = PhotoTagChaosTest::new(&["a.jpg"]);
        fs::create_dir_all(chaos.store_path()).unwrap();

        let mut library = chaos.open();
        let a = image(&library, &chaos.path("a.jpg"));
        library.add_tag(a, "x").unwrap();
        drop(library);

        assert!(chaos.path("a @x.jpg").exists());
    }
}
