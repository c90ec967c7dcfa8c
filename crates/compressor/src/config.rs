use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the batch compressor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressorConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Scratch directory for outputs, pass logs and probe artifacts
    pub scratch_dir: PathBuf,
    /// Working directory for encoder runs; the current directory when unset
    pub tool_workdir: Option<PathBuf>,
    /// Output size every item is squeezed under, in MB
    pub target_size_mb: u32,
    /// Container used for pass 1 and for the output extension
    pub container: String,
    /// Pause between pass 1 exiting and pass 2 starting (tunable)
    pub settle_delay_ms: u64,
    /// Pause before moving on after a transcode finished or failed
    pub next_item_delay_ms: u64,
    /// Pause before moving on after an item was skipped or rejected up front
    pub skip_delay_ms: u64,
    /// Bound for `-version` self-tests
    pub version_timeout_ms: u64,
    /// Bound for the `-encoders` listing
    pub encoder_list_timeout_ms: u64,
    /// Bound for one functional hardware-encoder test
    pub hw_test_timeout_ms: u64,
    /// Bound for one ffprobe duration query
    pub probe_timeout_ms: u64,
}

impl Default for CompressorConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl CompressorConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            scratch_dir: std::env::temp_dir().join("VideoCompressor"),
            tool_workdir: None,
            target_size_mb: 10,
            container: "mp4".to_string(),
            settle_delay_ms: 500,
            next_item_delay_ms: 500,
            skip_delay_ms: 100,
            version_timeout_ms: 5_000,
            encoder_list_timeout_ms: 5_000,
            hw_test_timeout_ms: 10_000,
            probe_timeout_ms: 10_000,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Directory the encoder runs in (and may drop pass logs into)
    pub fn tool_dir(&self) -> PathBuf {
        self.tool_workdir
            .clone()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn next_item_delay(&self) -> Duration {
        Duration::from_millis(self.next_item_delay_ms)
    }

    pub fn skip_delay(&self) -> Duration {
        Duration::from_millis(self.skip_delay_ms)
    }

    pub fn version_timeout(&self) -> Duration {
        Duration::from_millis(self.version_timeout_ms)
    }

    pub fn encoder_list_timeout(&self) -> Duration {
        Duration::from_millis(self.encoder_list_timeout_ms)
    }

    pub fn hw_test_timeout(&self) -> Duration {
        Duration::from_millis(self.hw_test_timeout_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = CompressorConfig::load_config(Some(Path::new("/nonexistent/vcompress.toml"))).unwrap();
        assert_eq!(config.target_size_mb, 10);
        assert_eq!(config.container, "mp4");
        assert_eq!(config.settle_delay(), Duration::from_millis(500));

        let config = CompressorConfig::load_config(None).unwrap();
        assert_eq!(config.ffmpeg_bin, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vcompress.toml");
        fs::write(&path, "target_size_mb = 25\nffmpeg_bin = \"/opt/ffmpeg/bin/ffmpeg\"\n").unwrap();

        let config = CompressorConfig::load_config(Some(&path)).unwrap();
        assert_eq!(config.target_size_mb, 25);
        assert_eq!(config.ffmpeg_bin, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(config.ffprobe_bin, PathBuf::from("ffprobe"));
        assert_eq!(config.hw_test_timeout_ms, 10_000);
    }

    #[test]
    fn test_json_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vcompress.json");
        fs::write(&path, r#"{"scratch_dir": "/var/tmp/vc", "settle_delay_ms": 250}"#).unwrap();

        let config = CompressorConfig::load_config(Some(&path)).unwrap();
        assert_eq!(config.scratch_dir, PathBuf::from("/var/tmp/vc"));
        assert_eq!(config.settle_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "target_size_mb = \"lots\"").unwrap();

        let err = CompressorConfig::load_config(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse TOML config"));
    }

    #[test]
    fn test_explicit_tool_workdir() {
        let config = CompressorConfig {
            tool_workdir: Some(PathBuf::from("/srv/encodes")),
            ..Default::default()
        };
        assert_eq!(config.tool_dir(), PathBuf::from("/srv/encodes"));
    }
}
