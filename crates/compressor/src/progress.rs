//! Progress extraction from ffmpeg's stderr.
//!
//! ffmpeg reports encode position as `time=HH:MM:SS.ff` inside its status
//! lines. That text is not a stable interface, so everything that depends on
//! its shape lives here and the rest of the crate only sees seconds and
//! percentages.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::item::Pass;

/// Live parsing never reports more than this; 100 is reserved for a verified output
pub const LIVE_PROGRESS_CAP: u8 = 95;

/// Lines this short are never forwarded as notifications
const MIN_FORWARD_LEN: usize = 11;

static TIME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+\.\d+)").expect("time pattern is a valid regex")
});

/// Extract the encode position in seconds from a diagnostic line
pub fn parse_time_seconds(line: &str) -> Option<f64> {
    let caps = TIME_PATTERN.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Fraction of the current pass that is done, in `0.0..=1.0`
pub fn pass_fraction(position_secs: f64, duration_secs: f64) -> f64 {
    if duration_secs <= 0.0 {
        return 0.0;
    }
    (position_secs / duration_secs).clamp(0.0, 1.0)
}

/// Overall item progress for a position reached within `pass`
///
/// Each pass covers 50 points starting at its baseline; the result is capped
/// at [`LIVE_PROGRESS_CAP`].
pub fn overall_progress(pass: Pass, position_secs: f64, duration_secs: f64) -> u8 {
    let weight = (pass_fraction(position_secs, duration_secs) * 50.0) as u8;
    (pass.baseline() + weight).min(LIVE_PROGRESS_CAP)
}

/// Status line shown while a pass runs, e.g. `Pass 1/2: 40%`
pub fn pass_status_text(pass: Pass, position_secs: f64, duration_secs: f64) -> String {
    let percent = (pass_fraction(position_secs, duration_secs) * 100.0) as u8;
    format!("Pass {}/2: {}%", pass.number(), percent)
}

/// Whether a non-progress diagnostic line is worth surfacing to the user
///
/// Short lines and per-frame statistics are noise.
pub fn should_forward(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.len() >= MIN_FORWARD_LEN
        && !trimmed.starts_with("frame=")
        && !trimmed.starts_with("fps=")
        && !trimmed.starts_with("size=")
        && !trimmed.contains("time=")
}

/// Splits a byte stream into lines on `\n` or `\r`
///
/// ffmpeg rewrites its status line in place with carriage returns, so
/// splitting on newlines alone would hold every progress update back until
/// the pass ends.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and collect the lines it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                self.take_line(&mut lines);
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Flush whatever is left once the stream closes
    pub fn finish(&mut self) -> Option<String> {
        let mut lines = Vec::new();
        self.take_line(&mut lines);
        lines.pop()
    }

    fn take_line(&mut self, lines: &mut Vec<String>) {
        if self.pending.is_empty() {
            return;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        lines.push(line);
    }
}
