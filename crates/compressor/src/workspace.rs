use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::debug;

use crate::error::CompressError;
use crate::fs::FileSystem;

/// File-name prefix of ffmpeg's two-pass statistics logs
const PASS_LOG_PREFIX: &str = "ffmpeg2pass-";

/// Check whether a file name is a two-pass statistics artifact
/// (`ffmpeg2pass-0.log`, `ffmpeg2pass-0.log.mbtree`, ...)
pub fn is_pass_log(file_name: &str) -> bool {
    file_name.starts_with(PASS_LOG_PREFIX) && file_name.contains(".log")
}

/// Scratch directory holding outputs, pass logs and probe artifacts
///
/// Purged on startup and before each batch. Nothing is removed when the
/// workspace goes away: finished outputs stay available to whoever asked for
/// them.
#[derive(Clone)]
pub struct Workspace {
    scratch_dir: PathBuf,
    tool_dir: PathBuf,
    fs: Arc<dyn FileSystem>,
}

impl Workspace {
    pub fn new(scratch_dir: PathBuf, tool_dir: PathBuf, fs: Arc<dyn FileSystem>) -> Self {
        Workspace {
            scratch_dir,
            tool_dir,
            fs,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Working directory the encoder is started in
    pub fn tool_dir(&self) -> &Path {
        &self.tool_dir
    }

    /// Remove the scratch directory recursively and recreate it empty
    ///
    /// Returns how many files the previous contents held, nested ones included.
    pub fn reset(&self) -> Result<usize, CompressError> {
        let mut stale = 0;
        if self.fs.exists(&self.scratch_dir) {
            stale = self
                .fs
                .count_files(&self.scratch_dir)
                .unwrap_or(0);
            self.fs
                .remove_dir_all(&self.scratch_dir)
                .map_err(|source| self.workspace_error(source))?;
        }

        self.fs
            .create_dir_all(&self.scratch_dir)
            .map_err(|source| self.workspace_error(source))?;

        debug!("Scratch directory reset: {} ({} stale files)", self.scratch_dir.display(), stale);
        Ok(stale)
    }

    /// Pass-2 target for a source: `<scratch>/<stem>_compressed.<container>`
    pub fn output_path(&self, source: &Path, container: &str) -> PathBuf {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        self.scratch_dir.join(format!("{}_compressed.{}", stem, container))
    }

    /// Throwaway file written by a functional hardware-encoder test
    pub fn probe_artifact_path(&self, label: &str) -> PathBuf {
        self.scratch_dir.join(format!("test_{}_temp.mp4", label))
    }

    /// Delete a file if present; errors are logged, not returned
    pub fn remove_artifact(&self, path: &Path) {
        if self.fs.exists(path) {
            if let Err(e) = self.fs.remove_file(path) {
                debug!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// Remove two-pass statistics logs from the scratch and tool directories
    ///
    /// Returns the file names removed.
    pub fn purge_pass_logs(&self) -> Vec<String> {
        let mut removed = Vec::new();
        let mut dirs = vec![self.scratch_dir.as_path()];
        if self.tool_dir != self.scratch_dir {
            dirs.push(self.tool_dir.as_path());
        }

        for dir in dirs {
            let files = match self.fs.list_files(dir) {
                Ok(files) => files,
                Err(e) => {
                    debug!("Cannot list {} for pass logs: {}", dir.display(), e);
                    continue;
                }
            };

            for file in files {
                let name = match file.file_name().and_then(|n| n.to_str()) {
                    Some(name) if is_pass_log(name) => name.to_string(),
                    _ => continue,
                };
                match self.fs.remove_file(&file) {
                    Ok(()) => removed.push(name),
                    Err(e) => debug!("Failed to remove pass log {}: {}", file.display(), e),
                }
            }
        }

        removed
    }

    fn workspace_error(&self, source: std::io::Error) -> CompressError {
        CompressError::Workspace {
            path: self.scratch_dir.clone(),
            source,
        }
    }
}
