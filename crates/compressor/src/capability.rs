use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::CompressorConfig;
use crate::error::CompressError;
use crate::tool::{run_bounded, ToolRun};
use crate::workspace::Workspace;

/// Software H.264 encoder used whenever no hardware path is active
pub const SOFTWARE_ENCODER: &str = "libx264";

/// Hardware encoder family selected by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareType {
    None,
    /// NVIDIA NVENC
    Cuda,
    /// Intel QuickSync
    QuickSync,
}

impl HardwareType {
    /// Candidates in the order they are tried; the first that works wins
    pub const CANDIDATES: [HardwareType; 2] = [HardwareType::Cuda, HardwareType::QuickSync];

    /// ffmpeg encoder name for this family
    pub fn encoder_name(&self) -> &'static str {
        match self {
            HardwareType::None => SOFTWARE_ENCODER,
            HardwareType::Cuda => "h264_nvenc",
            HardwareType::QuickSync => "h264_qsv",
        }
    }

    /// Value for `-hwaccel`, if any
    pub fn hwaccel_flag(&self) -> Option<&'static str> {
        match self {
            HardwareType::None => None,
            HardwareType::Cuda => Some("cuda"),
            HardwareType::QuickSync => Some("qsv"),
        }
    }

    fn artifact_label(&self) -> &'static str {
        match self {
            HardwareType::None => "software",
            HardwareType::Cuda => "cuda",
            HardwareType::QuickSync => "qsv",
        }
    }
}

impl fmt::Display for HardwareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HardwareType::None => "None",
            HardwareType::Cuda => "NVIDIA NVENC (CUDA)",
            HardwareType::QuickSync => "Intel QuickSync",
        };
        f.write_str(label)
    }
}

/// Derived toolchain and acceleration state
///
/// Recomputed only by an explicit probe; never cached across batches
/// without the pre-batch toolchain re-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub toolchain_available: bool,
    pub hw_available: bool,
    pub hw_type: HardwareType,
    /// User toggle; forced back to false while `hw_available` is false
    pub hw_enabled: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Capabilities {
            toolchain_available: false,
            hw_available: false,
            hw_type: HardwareType::None,
            hw_enabled: false,
        }
    }
}

impl Capabilities {
    /// Hardware family to encode with right now, if any
    pub fn active_hardware(&self) -> HardwareType {
        if self.hw_enabled && self.hw_available {
            self.hw_type
        } else {
            HardwareType::None
        }
    }

    pub fn encoder_name(&self) -> &'static str {
        self.active_hardware().encoder_name()
    }

    pub fn hwaccel_flag(&self) -> Option<&'static str> {
        self.active_hardware().hwaccel_flag()
    }

    /// Drop everything that depends on a working toolchain
    pub fn mark_unavailable(&mut self) {
        *self = Capabilities::default();
    }
}

/// Result of one `-version` self-test
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    /// Exited 0; carries the first line of the version banner
    Available(String),
    FailedToStart(String),
    NonZeroExit { code: Option<i32>, stderr: String },
    TimedOut,
}

impl ToolStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, ToolStatus::Available(_))
    }

    fn from_run(run: ToolRun) -> Self {
        match run {
            ToolRun::Finished(output) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let first_line = stdout.lines().next().unwrap_or_default().trim().to_string();
                ToolStatus::Available(first_line)
            }
            ToolRun::Finished(output) => ToolStatus::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
            ToolRun::FailedToStart(e) => ToolStatus::FailedToStart(e.to_string()),
            ToolRun::TimedOut => ToolStatus::TimedOut,
        }
    }
}

/// Availability of both external tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolchainReport {
    pub ffmpeg: ToolStatus,
    pub ffprobe: ToolStatus,
}

impl ToolchainReport {
    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_available() && self.ffprobe.is_available()
    }

    /// Human-readable reason for each failing tool, one per entry
    pub fn failures(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        for (name, status) in [("FFmpeg", &self.ffmpeg), ("FFprobe", &self.ffprobe)] {
            match status {
                ToolStatus::Available(_) => {}
                ToolStatus::FailedToStart(e) => {
                    reasons.push(format!("{} not found - process failed to start ({})", name, e))
                }
                ToolStatus::NonZeroExit { code, stderr } => reasons.push(format!(
                    "{} found but returned error code {}{}",
                    name,
                    code.map(|c| c.to_string()).unwrap_or_else(|| "(signal)".to_string()),
                    if stderr.is_empty() { String::new() } else { format!(": {}", stderr) }
                )),
                ToolStatus::TimedOut => reasons.push(format!("{} did not finish its version check", name)),
            }
        }
        reasons
    }

    pub fn into_error(self) -> CompressError {
        CompressError::ToolchainUnavailable(self.failures().join("; "))
    }
}

/// Outcome of probing every hardware candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareProbe {
    pub selected: HardwareType,
    /// Non-fatal failures of candidates tried before (or instead of) the winner
    pub rejected: Vec<(HardwareType, String)>,
}

/// Probes the external toolchain and hardware encoders
pub struct CapabilityProber {
    ffmpeg_bin: PathBuf,
    ffprobe_bin: PathBuf,
    version_timeout: Duration,
    encoder_list_timeout: Duration,
    hw_test_timeout: Duration,
}

impl CapabilityProber {
    pub fn new(config: &CompressorConfig) -> Self {
        CapabilityProber {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            version_timeout: config.version_timeout(),
            encoder_list_timeout: config.encoder_list_timeout(),
            hw_test_timeout: config.hw_test_timeout(),
        }
    }

    /// Run `-version` on both tools; both must exit 0 within the bound
    pub async fn check_toolchain(&self) -> ToolchainReport {
        let ffmpeg = ToolStatus::from_run(
            run_bounded(&self.ffmpeg_bin, ["-version"], self.version_timeout).await,
        );
        let ffprobe = ToolStatus::from_run(
            run_bounded(&self.ffprobe_bin, ["-version"], self.version_timeout).await,
        );

        debug!("Toolchain check: ffmpeg={:?} ffprobe={:?}", ffmpeg, ffprobe);
        ToolchainReport { ffmpeg, ffprobe }
    }

    /// List the encoders compiled into ffmpeg (`-hide_banner -encoders`)
    async fn encoder_listing(&self) -> Option<String> {
        let run = run_bounded(
            &self.ffmpeg_bin,
            ["-hide_banner", "-encoders"],
            self.encoder_list_timeout,
        )
        .await;

        match run {
            ToolRun::Finished(output) => Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            other => {
                debug!("Encoder listing unavailable: {}", other.stderr_tail());
                None
            }
        }
    }

    /// Encode one second of synthetic test pattern with `candidate`
    async fn functional_test(
        &self,
        candidate: HardwareType,
        workspace: &Workspace,
    ) -> Result<(), CompressError> {
        let artifact = workspace.probe_artifact_path(candidate.artifact_label());
        let args = functional_test_args(candidate, &artifact);

        let run = run_bounded(&self.ffmpeg_bin, &args, self.hw_test_timeout).await;
        workspace.remove_artifact(&artifact);

        if run.succeeded() {
            Ok(())
        } else {
            Err(CompressError::CapabilityProbeFailure {
                encoder: candidate.encoder_name().to_string(),
                reason: run.stderr_tail(),
            })
        }
    }

    /// Try each hardware candidate in priority order and keep the first that works
    ///
    /// A candidate missing from the encoder listing is rejected without a
    /// functional test.
    pub async fn probe_hardware(&self, workspace: &Workspace) -> HardwareProbe {
        let listing = self.encoder_listing().await.unwrap_or_default();
        let mut rejected = Vec::new();

        for candidate in HardwareType::CANDIDATES {
            let encoder = candidate.encoder_name();
            if !listing_contains(&listing, encoder) {
                rejected.push((candidate, format!("{} not found in FFmpeg build", encoder)));
                continue;
            }

            match self.functional_test(candidate, workspace).await {
                Ok(()) => {
                    info!("🎬 Hardware encoder verified: {} ({})", candidate, encoder);
                    return HardwareProbe { selected: candidate, rejected };
                }
                Err(e) => rejected.push((candidate, e.to_string())),
            }
        }

        HardwareProbe {
            selected: HardwareType::None,
            rejected,
        }
    }
}

/// Whether an `-encoders` listing advertises `encoder` as a whole word
pub fn listing_contains(listing: &str, encoder: &str) -> bool {
    listing
        .lines()
        .any(|line| line.split_whitespace().any(|word| word == encoder))
}

/// Arguments for a functional hardware test writing to `artifact`
pub fn functional_test_args(candidate: HardwareType, artifact: &std::path::Path) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-f".to_string(),
        "lavfi".to_string(),
        "-i".to_string(),
        "testsrc=duration=1:size=320x240:rate=1".to_string(),
        "-c:v".to_string(),
        candidate.encoder_name().to_string(),
        "-t".to_string(),
        "1".to_string(),
        artifact.to_string_lossy().to_string(),
    ]
}
