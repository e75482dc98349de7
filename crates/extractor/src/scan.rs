//! Input expansion
//!
//! Turns the paths given on the command line into the list of videos to
//! process. Directories are walked recursively for video files; anything else
//! is passed through so validation can report it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Video file extensions picked up from directories (case-insensitive)
pub const VIDEO_EXTENSIONS: &[&str] = &["mkv", "mp4", "avi", "mov", "m4v", "ts", "m2ts", "webm"];

/// Checks if a file has a video extension (case-insensitive).
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Video files under `root`, sorted, skipping hidden directories
pub fn scan_directory(root: &Path) -> Vec<PathBuf> {
    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        // Allow the root directory even if it starts with '.'
        !(entry.file_type().is_dir()
            && entry.depth() > 0
            && entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.')))
    });

    let mut videos: Vec<PathBuf> = walker
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file() && is_video_file(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    videos.sort();
    videos
}

/// Expand inputs in order: directories become their video files, every other
/// path is kept as given. Duplicates are dropped.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    let mut videos = Vec::new();

    for input in inputs {
        let expanded = if input.is_dir() {
            scan_directory(input)
        } else {
            vec![input.clone()]
        };
        for path in expanded {
            if seen.insert(path.clone()) {
                videos.push(path);
            }
        }
    }

    videos
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_video_file() {
        assert!(is_video_file(Path::new("/media/clip.mkv")));
        assert!(is_video_file(Path::new("/media/clip.MKV")));
        assert!(is_video_file(Path::new("/media/clip.webm")));
        assert!(!is_video_file(Path::new("/media/clip.txt")));
        assert!(!is_video_file(Path::new("/media/clip")));
    }

    #[test]
    fn test_directory_is_expanded_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("b")).unwrap();
        File::create(root.join("b/two.mp4")).unwrap();
        File::create(root.join("a.mov")).unwrap();
        File::create(root.join("notes.txt")).unwrap();

        let videos = expand_inputs(&[root.to_path_buf()]);
        assert_eq!(videos, vec![root.join("a.mov"), root.join("b/two.mp4")]);
    }

    #[test]
    fn test_files_and_missing_paths_pass_through() {
        let temp_dir = TempDir::new().unwrap();
        let explicit = temp_dir.path().join("recording.bin");
        File::create(&explicit).unwrap();
        let missing = temp_dir.path().join("missing.mp4");

        let videos = expand_inputs(&[explicit.clone(), missing.clone(), explicit.clone()]);
        assert_eq!(videos, vec![explicit, missing]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_hidden_directory_exclusion(
            visible_dir in "[a-zA-Z0-9]{1,10}",
            hidden_dir in "\\.[a-zA-Z0-9]{1,10}",
            filename in "[a-zA-Z0-9]{1,10}",
        ) {
            let temp_dir = TempDir::new().unwrap();
            let root = temp_dir.path();

            let visible_path = root.join(&visible_dir);
            fs::create_dir_all(&visible_path).unwrap();
            let visible_video = visible_path.join(format!("{}.mkv", filename));
            File::create(&visible_video).unwrap();

            let hidden_path = root.join(&hidden_dir);
            fs::create_dir_all(&hidden_path).unwrap();
            let hidden_video = hidden_path.join(format!("{}.mkv", filename));
            File::create(&hidden_video).unwrap();

            let videos = scan_directory(root);
            prop_assert!(videos.contains(&visible_video));
            prop_assert!(!videos.contains(&hidden_video));
        }

        #[test]
        fn prop_extension_filtering(
            basename in "[a-zA-Z0-9_-]{1,20}",
            ext in prop_oneof![
                Just("mkv"), Just("MP4"), Just("Mov"), Just("webm"), Just("m2ts"),
                Just("txt"), Just("jpg"), Just("png"), Just("srt"),
            ],
        ) {
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));
            let expected = matches!(
                ext.to_lowercase().as_str(),
                "mkv" | "mp4" | "mov" | "webm" | "m2ts"
            );
            prop_assert_eq!(is_video_file(&path), expected);
        }
    }
}
