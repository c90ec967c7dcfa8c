use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::item::is_video_file;

/// Result of scanning one input argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanResult {
    /// Video file to enqueue
    Candidate(PathBuf),
    /// Input that will not be enqueued (path, reason)
    Skipped(PathBuf, String),
}

/// Expand files and directories into the video files they name
///
/// Directories are walked recursively and their videos returned in sorted
/// order. Explicit file arguments are kept in the order given, so the queue
/// order follows the command line.
pub fn collect_videos<P: AsRef<Path>>(inputs: &[P]) -> Vec<ScanResult> {
    let mut results = Vec::new();

    for input in inputs {
        let input = input.as_ref();

        if input.is_file() {
            if is_video_file(input) {
                results.push(ScanResult::Candidate(input.to_path_buf()));
            } else {
                results.push(ScanResult::Skipped(
                    input.to_path_buf(),
                    "not a supported video file".to_string(),
                ));
            }
            continue;
        }

        if !input.is_dir() {
            warn!("Input does not exist: {}", input.display());
            results.push(ScanResult::Skipped(
                input.to_path_buf(),
                "does not exist".to_string(),
            ));
            continue;
        }

        info!("Scanning directory: {}", input.display());

        let mut found = Vec::new();
        for entry in WalkDir::new(input).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    warn!("Error reading directory entry: {}", e);
                    continue;
                }
            };

            let path = entry.path();
            if entry.file_type().is_file() && is_video_file(path) {
                debug!("Found video file: {}", path.display());
                found.push(path.to_path_buf());
            }
        }

        found.sort();
        info!("Found {} video files in {}", found.len(), input.display());
        results.extend(found.into_iter().map(ScanResult::Candidate));
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_directories_are_walked_recursively_and_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        fs::write(dir.path().join("a.MOV"), b"x").unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        fs::write(dir.path().join("nested").join("c.mkv"), b"x").unwrap();

        let results = collect_videos(&[dir.path()]);
        assert_eq!(
            results,
            vec![
                ScanResult::Candidate(dir.path().join("a.MOV")),
                ScanResult::Candidate(dir.path().join("b.mp4")),
                ScanResult::Candidate(dir.path().join("nested").join("c.mkv")),
            ]
        );
    }

    #[test]
    fn test_explicit_files_keep_their_order() {
        let dir = TempDir::new().unwrap();
        let second = dir.path().join("z.avi");
        let first = dir.path().join("y.webm");
        let text = dir.path().join("readme.md");
        fs::write(&second, b"x").unwrap();
        fs::write(&first, b"x").unwrap();
        fs::write(&text, b"x").unwrap();
        let missing = dir.path().join("gone.mp4");

        let results = collect_videos(&[&second, &first, &text, &missing]);
        assert_eq!(results[0], ScanResult::Candidate(second));
        assert_eq!(results[1], ScanResult::Candidate(first));
        assert!(matches!(&results[2], ScanResult::Skipped(p, _) if p == &text));
        assert!(matches!(&results[3], ScanResult::Skipped(p, reason) if p == &missing && reason == "does not exist"));
    }
}
