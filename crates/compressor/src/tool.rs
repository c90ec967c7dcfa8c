use std::ffi::OsStr;
use std::io;
use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use log::debug;
use tokio::process::Command;
use tokio::time::timeout;

/// Outcome of a short, bounded helper-process run
#[derive(Debug)]
pub enum ToolRun {
    /// The process exited (successfully or not) within the bound
    Finished(Output),
    /// The executable could not be launched at all
    FailedToStart(io::Error),
    /// The bound elapsed; the process has been killed
    TimedOut,
}

impl ToolRun {
    pub fn succeeded(&self) -> bool {
        matches!(self, ToolRun::Finished(output) if output.status.success())
    }

    /// Last non-empty stderr line, for one-line diagnostics
    pub fn stderr_tail(&self) -> String {
        match self {
            ToolRun::Finished(output) => String::from_utf8_lossy(&output.stderr)
                .lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .unwrap_or_default()
                .to_string(),
            ToolRun::FailedToStart(e) => e.to_string(),
            ToolRun::TimedOut => "timed out".to_string(),
        }
    }
}

/// Run a helper process to completion, killing it if `bound` elapses
pub async fn run_bounded<I, S>(program: &Path, args: I, bound: Duration) -> ToolRun
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running helper: {:?}", cmd.as_std());

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return ToolRun::FailedToStart(e),
    };

    match timeout(bound, child.wait_with_output()).await {
        Ok(Ok(output)) => ToolRun::Finished(output),
        Ok(Err(e)) => ToolRun::FailedToStart(e),
        Err(_) => ToolRun::TimedOut,
    }
}
