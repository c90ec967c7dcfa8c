use std::path::{Path, PathBuf};
use std::process::Stdio;
use log::debug;
use tokio::io::AsyncReadExt;
use tokio::process::{ChildStderr, Command};
use tokio::sync::mpsc::UnboundedSender;

use crate::error::CompressError;
use crate::item::Pass;
use crate::progress::LineSplitter;

/// Audio settings shared by both passes
const AUDIO_CODEC: &str = "aac";
const AUDIO_BITRATE: &str = "128k";

/// Where pass-1 output is discarded
pub fn null_sink() -> &'static str {
    if cfg!(windows) {
        "NUL"
    } else {
        "/dev/null"
    }
}

/// Everything needed to build both pass command lines for one item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodePlan {
    pub input: PathBuf,
    pub output: PathBuf,
    pub encoder: String,
    /// `-hwaccel` value; applied to pass 2 only
    pub hwaccel: Option<String>,
    pub video_kbps: u32,
    pub container: String,
}

impl EncodePlan {
    /// Build the ffmpeg arguments for `pass`
    ///
    /// Pass 1 analyses only and writes to the null sink. Pass 2 is the real
    /// encode, with `+faststart` so the result plays while downloading.
    pub fn pass_args(&self, pass: Pass) -> Vec<String> {
        let mut args = Vec::new();

        if pass == Pass::Second {
            if let Some(flag) = &self.hwaccel {
                args.push("-hwaccel".to_string());
                args.push(flag.clone());
            }
        }

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().to_string());
        args.push("-c:v".to_string());
        args.push(self.encoder.clone());
        args.push("-b:v".to_string());
        args.push(format!("{}k", self.video_kbps));
        args.push("-c:a".to_string());
        args.push(AUDIO_CODEC.to_string());
        args.push("-b:a".to_string());
        args.push(AUDIO_BITRATE.to_string());

        match pass {
            Pass::First => {
                args.push("-pass".to_string());
                args.push("1".to_string());
                args.push("-f".to_string());
                args.push(self.container.clone());
                args.push("-y".to_string());
                args.push(null_sink().to_string());
            }
            Pass::Second => {
                args.push("-pass".to_string());
                args.push("2".to_string());
                args.push("-movflags".to_string());
                args.push("+faststart".to_string());
                args.push("-y".to_string());
                args.push(self.output.to_string_lossy().to_string());
            }
        }

        args
    }
}

/// How a pass process ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassExit {
    Success,
    /// Nonzero exit code, or `None` when killed by a signal
    Failed(Option<i32>),
    /// The process could not be waited on
    Lost(String),
}

/// Something observed on a running pass
#[derive(Debug, Clone, PartialEq)]
pub enum PassEvent {
    /// One line of stderr
    Diagnostic { index: usize, pass: Pass, line: String },
    /// The process ended; always the last event of a pass
    Exited { index: usize, pass: Pass, exit: PassExit },
}

/// Start one ffmpeg pass for item `index`
///
/// stderr lines and the final exit are delivered on `events`, in that order.
/// There is no timeout: a pass ends only when ffmpeg exits.
pub fn spawn_pass<E>(
    ffmpeg_bin: &Path,
    workdir: &Path,
    args: &[String],
    index: usize,
    pass: Pass,
    events: UnboundedSender<E>,
) -> Result<(), CompressError>
where
    E: From<PassEvent> + Send + 'static,
{
    let mut cmd = Command::new(ffmpeg_bin);
    cmd.args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let spawn_error = |source: std::io::Error| CompressError::ProcessSpawn {
        program: ffmpeg_bin.to_path_buf(),
        pass,
        source,
    };

    let mut child = cmd.spawn().map_err(spawn_error)?;
    let stderr = child.stderr.take().ok_or_else(|| {
        spawn_error(std::io::Error::new(
            std::io::ErrorKind::Other,
            "stderr was not captured",
        ))
    })?;

    tokio::spawn(async move {
        pump_stderr(stderr, index, pass, &events).await;

        let exit = match child.wait().await {
            Ok(status) if status.success() => PassExit::Success,
            Ok(status) => PassExit::Failed(status.code()),
            Err(e) => PassExit::Lost(e.to_string()),
        };
        let _ = events.send(PassEvent::Exited { index, pass, exit }.into());
    });

    Ok(())
}

async fn pump_stderr<E>(mut stderr: ChildStderr, index: usize, pass: Pass, events: &UnboundedSender<E>)
where
    E: From<PassEvent>,
{
    let mut splitter = LineSplitter::new();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!("Stopped reading FFmpeg stderr: {}", e);
                break;
            }
        };
        for line in splitter.push(&buf[..n]) {
            let _ = events.send(PassEvent::Diagnostic { index, pass, line }.into());
        }
    }

    if let Some(line) = splitter.finish() {
        let _ = events.send(PassEvent::Diagnostic { index, pass, line }.into());
    }
}
