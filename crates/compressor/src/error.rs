use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::item::Pass;

/// Errors surfaced by the batch compressor
#[derive(Debug, Error)]
pub enum CompressError {
    /// ffmpeg or ffprobe is missing or failed its `-version` self-test
    #[error("toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    /// A hardware encoder candidate failed its functional test (non-fatal)
    #[error("hardware encoder {encoder} unusable: {reason}")]
    CapabilityProbeFailure { encoder: String, reason: String },

    /// ffprobe could not produce a positive duration
    #[error("could not determine duration for {}", .0.display())]
    InvalidDuration(PathBuf),

    /// The encoder executable could not be launched
    #[error("failed to launch {} for {pass}: {source}", program.display())]
    ProcessSpawn {
        program: PathBuf,
        pass: Pass,
        #[source]
        source: io::Error,
    },

    /// A pass ended with a nonzero or abnormal exit
    #[error("{pass} failed for {} (exit code: {})", source_path.display(), exit_code_text(.code))]
    ProcessExit {
        source_path: PathBuf,
        pass: Pass,
        code: Option<i32>,
    },

    /// Pass 2 exited cleanly but left no output behind
    #[error("output file not created: {}", .0.display())]
    OutputMissing(PathBuf),

    #[error("a batch is already running")]
    BatchActive,

    #[error("no videos to compress")]
    EmptyQueue,

    #[error("not a video file or does not exist: {}", .0.display())]
    UnsupportedFile(PathBuf),

    #[error("already in list: {}", .0.display())]
    DuplicateItem(PathBuf),

    #[error("index {index} out of range (queue length {len})")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid target size: {0} MB")]
    InvalidTargetSize(u32),

    #[error("export directory does not exist: {}", .0.display())]
    ExportDirMissing(PathBuf),

    #[error("workspace error at {}: {source}", path.display())]
    Workspace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("compressor control task has stopped")]
    ControllerClosed,
}

impl CompressError {
    /// Short text shown in an item's status column when this error fails it
    pub fn item_status_text(&self) -> String {
        match self {
            CompressError::InvalidDuration(_) => "Invalid video duration".to_string(),
            CompressError::ProcessSpawn { pass, .. } => format!("{} failed to start", pass),
            CompressError::ProcessExit { pass, .. } => format!("{} failed", pass),
            CompressError::OutputMissing(_) => "Output file not created".to_string(),
            other => other.to_string(),
        }
    }
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "terminated by signal".to_string(),
    }
}
