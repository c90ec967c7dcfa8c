use std::fmt;
use std::path::{Path, PathBuf};

use humansize::{format_size, WINDOWS};
use serde::{Deserialize, Serialize};

/// Video file extensions accepted into the queue
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v", "3gp", "ogv", "mpg", "mpeg", "ts",
    "m2ts", "asf", "rm", "rmvb",
];

/// Check whether a path carries one of the known video extensions (case-insensitive)
pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| VIDEO_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// One of the two encoder passes run for every transcoded item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    /// Analysis pass; output discarded to the null sink
    First,
    /// Real encode informed by the pass-1 statistics
    Second,
}

impl Pass {
    pub fn number(&self) -> u8 {
        match self {
            Pass::First => 1,
            Pass::Second => 2,
        }
    }

    /// Progress percentage at which this pass starts
    pub fn baseline(&self) -> u8 {
        match self {
            Pass::First => 0,
            Pass::Second => 50,
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pass {}", self.number())
    }
}

/// Lifecycle state of a queued item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "pass")]
pub enum ItemStatus {
    Ready,
    AlreadyOptimal,
    Compressing(Pass),
    Completed,
    Error,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::AlreadyOptimal | ItemStatus::Completed | ItemStatus::Error
        )
    }

    /// Terminal states whose output can be handed to collaborators
    pub fn has_output(&self) -> bool {
        matches!(self, ItemStatus::AlreadyOptimal | ItemStatus::Completed)
    }
}

/// One queued media file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    /// Source path; unique key within the queue
    pub source_path: PathBuf,
    pub display_name: String,
    pub original_bytes: u64,
    pub size_text: String,
    pub status: ItemStatus,
    pub status_text: String,
    /// 0-100; only reaches 100 once the output has been verified
    pub progress: u8,
    /// Set once a transcode target is chosen
    pub output_path: Option<PathBuf>,
    /// Seconds; `<= 0` means unknown
    pub duration_secs: f64,
}

impl Item {
    pub fn new(source_path: PathBuf, original_bytes: u64, duration_secs: f64) -> Self {
        let display_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source_path.display().to_string());

        Item {
            source_path,
            display_name,
            original_bytes,
            size_text: human_size(original_bytes),
            status: ItemStatus::Ready,
            status_text: "Ready".to_string(),
            progress: 0,
            output_path: None,
            duration_secs,
        }
    }

    pub fn has_known_duration(&self) -> bool {
        self.duration_secs > 0.0
    }

    /// Put the item back to the state it has at the start of a batch
    pub fn requeue(&mut self) {
        self.status = ItemStatus::Ready;
        self.status_text = "Queued".to_string();
        self.progress = 0;
        self.output_path = None;
    }
}

/// Human-readable byte count with 1024-based units ("12.5 MB")
pub fn human_size(bytes: u64) -> String {
    format_size(bytes, WINDOWS)
}
