//! Main test module for phototag
//!
//! This module includes all test suites:
//! - Integration tests for multi-directory sessions and restarts
//! - Chaos tests for files changing behind the library's back
//! - Property-based tests for file name and index invariants

pub mod integration;
pub mod chaos;

#[cfg(test)]
mod edge_cases {
    use ::phototag::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn open(photos: &TempDir, state: &TempDir) -> PhotoTag {
        PhotoTagBuilder::new()
            .build(photos.path(), state.path().join("config.txt"))
            .unwrap()
    }

    #[test]
    fn test_empty_directory() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        let mut library = open(&photos, &state);
        assert_eq!(library.mirror().image_count(), 0);
        assert!(library.visible_tags().is_empty());
        assert!(library.all_histories().is_empty());

        let report = library.close().unwrap();
        assert_eq!(report.total(), 0);

        // Only the roster line is written
        let store = fs::read_to_string(state.path().join("config.txt")).unwrap();
        assert_eq!(store, "\n");
    }

    #[test]
    fn test_root_must_be_a_directory() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let file = photos.path().join("a.jpg");
        fs::write(&file, b"a").unwrap();

        let err = PhotoTag::open(&file, state.path().join("config.txt")).unwrap_err();
        assert!(matches!(err, PhotoTagError::RootNotFound(_)));

        let err = PhotoTag::open(photos.path().join("missing"), state.path().join("config.txt"))
            .unwrap_err();
        assert!(matches!(err, PhotoTagError::RootNotFound(_)));
    }

    #[test]
    fn test_special_filenames() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();

        let names = vec![
            "photo with spaces.jpg",
            "photo-with-dashes.png",
            "фото.jpg",
            "写真.jpeg",
            "emoji 🌅.gif",
            "me@home.bmp",
            "archive.tar.jpg",
        ];
        for name in &names {
            fs::write(photos.path().join(name), b"x").unwrap();
        }

        let mut library = open(&photos, &state);
        assert_eq!(library.mirror().image_count(), names.len());

        for name in &names {
            let image = library.image_at(Path::new(name)).unwrap();
            assert!(library.image(image).unwrap().tags().is_empty(), "{} has no tags", name);
            library.add_tag(image, "ok").unwrap();
        }
        library.close().unwrap();

        assert!(photos.path().join("фото @ok.jpg").exists());
        assert!(photos.path().join("me@home @ok.bmp").exists());
        assert!(photos.path().join("archive.tar @ok.jpg").exists());
    }

    #[test]
    fn test_non_images_are_ignored() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(photos.path().join("notes @todo.txt"), b"n").unwrap();
        fs::write(photos.path().join("README"), b"r").unwrap();
        fs::write(photos.path().join("pic.JPEG"), b"p").unwrap();

        let library = open(&photos, &state);
        assert_eq!(library.mirror().image_count(), 1);
        assert!(library.visible_tags().is_empty());
    }

    #[test]
    fn test_tag_with_dot_and_unicode() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(photos.path().join("shot.png"), b"s").unwrap();

        let mut library = open(&photos, &state);
        let image = library.image_at(Path::new("shot.png")).unwrap();
        library.add_tag(image, "v1.2").unwrap();
        library.add_tag(image, "été").unwrap();
        library.close().unwrap();

        let library = open(&photos, &state);
        let image = library.image_at(Path::new("shot @v1.2 @été.png")).unwrap();
        let tags: Vec<&str> = library.image(image).unwrap().tags().iter().map(String::as_str).collect();
        assert_eq!(tags, vec!["v1.2", "été"]);
    }

    #[test]
    fn test_messy_markers_are_parsed() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(photos.path().join("x @ a  @ @b @a.jpg"), b"x").unwrap();

        let mut library = open(&photos, &state);
        let image = library.image_at(Path::new("x @ a  @ @b @a.jpg")).unwrap();
        assert_eq!(library.image(image).unwrap().tags().len(), 2);

        // Removing "a" drops both of its markers and keeps the rest verbatim
        library.remove_tag(image, "a").unwrap();
        assert_eq!(library.image(image).unwrap().file_name(), "x @ @b.jpg");
    }

    #[test]
    fn test_rejected_tags() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(photos.path().join("a.jpg"), b"a").unwrap();

        let mut library = open(&photos, &state);
        let image = library.image_at(Path::new("a.jpg")).unwrap();
        for bad in ["", " x", "x ", "a*b", "a/b", "a\\b", "a:b", "a?b", "a\"b", "a<b", "a>b", "a|b", "a@b", "a;b", "a,b"] {
            assert!(library.register_tag(bad).is_err(), "{:?} registered", bad);
            assert!(library.add_tag(image, bad).is_err(), "{:?} applied", bad);
        }
        assert_eq!(library.image(image).unwrap().file_name(), "a.jpg");
        assert!(library.image_history(image).unwrap().is_empty());
    }

    #[test]
    fn test_unindexable_tags_in_existing_names() {
        let photos = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        fs::write(photos.path().join("odd @a,b @fine.jpg"), b"o").unwrap();

        let mut library = open(&photos, &state);
        assert_eq!(library.visible_tags(), vec!["fine".to_string()]);
        assert_eq!(library.tag_visibility("a,b"), TagVisibility::Absent);

        // The odd tag still belongs to the name and can be cleared away
        let image = library.image_at(Path::new("odd @a,b @fine.jpg")).unwrap();
        assert!(library.image(image).unwrap().has_tag("a,b"));
        assert!(library.clear_tags(image).unwrap());
        assert_eq!(library.image(image).unwrap().file_name(), "odd.jpg");
    }
}
