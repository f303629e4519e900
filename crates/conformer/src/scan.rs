//! Input expansion.
//!
//! Turns the paths given on the command line into a list of media files:
//! files pass through, directories are walked recursively and filtered by
//! extension.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Media file extensions picked up from directories (case-insensitive matching).
pub const MEDIA_EXTENSIONS: &[&str] = &[
    ".mov", ".mp4", ".mxf", ".mkv", ".m4v", ".avi", ".ts", ".m2ts", ".mpg", ".mpeg", ".webm",
    ".wav", ".mp3", ".aac", ".m4a", ".flac",
];

/// Checks if a file has a media extension (case-insensitive).
pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext_lower = format!(".{}", ext.to_lowercase());
            MEDIA_EXTENSIONS.contains(&ext_lower.as_str())
        })
        .unwrap_or(false)
}

/// Expands `inputs` into media files.
///
/// Explicit file arguments are kept whatever their extension; the engine
/// decides whether it can read them. Directories are walked, skipping hidden
/// directories below the root. Missing paths are dropped. Output order is
/// input order, then walk order sorted by file name.
pub fn expand_inputs(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for input in inputs {
        if input.is_file() {
            files.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            continue;
        }

        let walker = WalkDir::new(input)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                // the root itself may be hidden
                !(entry.file_type().is_dir()
                    && entry.depth() > 0
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.starts_with('.')))
            });

        for entry in walker.filter_map(|e| e.ok()) {
            if entry.file_type().is_file() && is_media_file(entry.path()) {
                files.push(entry.into_path());
            }
        }
    }

    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn test_is_media_file() {
        assert!(is_media_file(Path::new("/media/clip.mov")));
        assert!(is_media_file(Path::new("/media/clip.MXF")));
        assert!(is_media_file(Path::new("/media/voice.wav")));
        assert!(!is_media_file(Path::new("/media/notes.txt")));
        assert!(!is_media_file(Path::new("/media/clip")));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_extension_matching_ignores_case(
            basename in "[a-zA-Z0-9_-]{1,20}",
            idx in 0usize..MEDIA_EXTENSIONS.len(),
            upper in any::<bool>(),
        ) {
            let ext = &MEDIA_EXTENSIONS[idx][1..];
            let ext = if upper { ext.to_uppercase() } else { ext.to_string() };
            let path = PathBuf::from(format!("/media/{}.{}", basename, ext));
            prop_assert!(is_media_file(&path));
        }
    }

    #[test]
    fn test_expand_walks_directories_and_skips_hidden() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("day1")).unwrap();
        fs::create_dir_all(root.join(".cache")).unwrap();
        File::create(root.join("b.mov")).unwrap();
        File::create(root.join("a.mxf")).unwrap();
        File::create(root.join("readme.txt")).unwrap();
        File::create(root.join("day1/c.mp4")).unwrap();
        File::create(root.join(".cache/d.mov")).unwrap();

        let files = expand_inputs(&[root.to_path_buf()]);
        assert_eq!(
            files,
            vec![root.join("a.mxf"), root.join("b.mov"), root.join("day1/c.mp4")]
        );
    }

    #[test]
    fn test_explicit_files_pass_through() {
        let dir = TempDir::new().unwrap();
        let odd = dir.path().join("capture.dv");
        File::create(&odd).unwrap();

        let files = expand_inputs(&[odd.clone(), dir.path().join("missing.mov")]);
        assert_eq!(files, vec![odd]);
    }
}
