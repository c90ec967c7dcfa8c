use std::path::Path;
use std::time::Duration;
use log::debug;

use crate::error::CompressError;
use crate::tool::{run_bounded, ToolRun};

/// Arguments for the duration query; the path is appended last
pub fn duration_args(file_path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "quiet".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "csv=p=0".to_string(),
        file_path.to_string_lossy().to_string(),
    ]
}

/// Parse ffprobe's single-token duration output; non-positive means unknown
pub fn parse_duration_output(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Query a media file's duration in seconds
pub async fn probe_duration(
    ffprobe_bin: &Path,
    file_path: &Path,
    bound: Duration,
) -> Result<f64, CompressError> {
    let invalid = || CompressError::InvalidDuration(file_path.to_path_buf());

    match run_bounded(ffprobe_bin, duration_args(file_path), bound).await {
        ToolRun::Finished(output) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            parse_duration_output(&stdout).ok_or_else(|| {
                debug!("Invalid duration value from ffprobe: '{}'", stdout.trim());
                invalid()
            })
        }
        run @ ToolRun::Finished(_) => {
            debug!("ffprobe failed for {}: {}", file_path.display(), run.stderr_tail());
            Err(invalid())
        }
        ToolRun::FailedToStart(e) => {
            debug!("Failed to start ffprobe at {}: {}", ffprobe_bin.display(), e);
            Err(invalid())
        }
        ToolRun::TimedOut => {
            debug!("ffprobe timed out for {}", file_path.display());
            Err(invalid())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_args_shape() {
        let args = duration_args(Path::new("/videos/clip.mp4"));
        assert_eq!(
            args,
            vec!["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0", "/videos/clip.mp4"]
        );
    }

    #[test]
    fn test_parse_duration_output() {
        assert_eq!(parse_duration_output("125.480000\n"), Some(125.48));
        assert_eq!(parse_duration_output("60"), Some(60.0));
        assert_eq!(parse_duration_output("N/A"), None);
        assert_eq!(parse_duration_output(""), None);
        assert_eq!(parse_duration_output("0.000000"), None);
        assert_eq!(parse_duration_output("-4.2"), None);
    }

    #[tokio::test]
    async fn test_missing_probe_tool_is_invalid_duration() {
        let err = probe_duration(
            Path::new("/nonexistent/ffprobe"),
            Path::new("clip.mp4"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CompressError::InvalidDuration(_)));
    }
}
