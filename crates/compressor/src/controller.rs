//! Batch controller: owns the queue and drives one item at a time through
//! its two-pass lifecycle.
//!
//! All state lives in a single task. Commands from [`CompressorHandle`],
//! stderr lines and exits from the running ffmpeg pass, and deferred
//! continuations from the [`Scheduler`] all arrive on one channel and are
//! handled strictly in order, so no lock guards the queue.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, WeakUnboundedSender};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::capability::{Capabilities, CapabilityProber, HardwareType, ToolStatus};
use crate::config::CompressorConfig;
use crate::encode::{spawn_pass, EncodePlan, PassEvent, PassExit};
use crate::error::CompressError;
use crate::events::{BatchCounts, CompressorEvent};
use crate::fs::{FileSystem, LocalFs};
use crate::item::{human_size, is_video_file, Item, ItemStatus, Pass};
use crate::notify::{LogSink, NotificationSink, Notifier};
use crate::planner::plan_video_bitrate;
use crate::probe::probe_duration;
use crate::progress::{overall_progress, parse_time_seconds, pass_status_text, should_forward};
use crate::scheduler::{Scheduler, TokioScheduler};
use crate::workspace::Workspace;

const EVENT_CAPACITY: usize = 4096;
const BYTES_PER_MB: u64 = 1_048_576;

/// Host-provided capabilities the controller depends on
#[derive(Clone)]
pub struct Collaborators {
    pub fs: Arc<dyn FileSystem>,
    pub scheduler: Arc<dyn Scheduler>,
    pub sink: Arc<dyn NotificationSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Collaborators {
            fs: Arc::new(LocalFs),
            scheduler: Arc::new(TokioScheduler),
            sink: Arc::new(LogSink),
        }
    }
}

enum Command {
    Enqueue {
        path: PathBuf,
        reply: oneshot::Sender<Result<usize, CompressError>>,
    },
    Remove {
        index: usize,
        reply: oneshot::Sender<Result<Item, CompressError>>,
    },
    Clear {
        reply: oneshot::Sender<Result<(), CompressError>>,
    },
    StartBatch {
        reply: oneshot::Sender<Result<Uuid, CompressError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Vec<Item>>,
    },
    Counts {
        reply: oneshot::Sender<BatchCounts>,
    },
    Capabilities {
        reply: oneshot::Sender<Capabilities>,
    },
    ProbeCapabilities {
        reply: oneshot::Sender<Capabilities>,
    },
    SetHardwareAcceleration {
        enabled: bool,
        reply: oneshot::Sender<bool>,
    },
    SetTargetSize {
        target_size_mb: u32,
        reply: oneshot::Sender<Result<(), CompressError>>,
    },
    ExportOutputs {
        dir: PathBuf,
        reply: oneshot::Sender<Result<usize, CompressError>>,
    },
    Shutdown,
}

enum ControlEvent {
    Command(Command),
    Pass(PassEvent),
    /// Settle delay after pass 1 has elapsed
    BeginSecondPass { index: usize },
    /// Post-item delay has elapsed
    NextItem,
}

impl From<PassEvent> for ControlEvent {
    fn from(event: PassEvent) -> Self {
        ControlEvent::Pass(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// A pass process is running
    Running(Pass),
    /// Pass 1 finished; waiting out the settle delay
    Settling,
    /// Item finished; waiting to move on
    Advancing,
}

struct BatchRun {
    id: Uuid,
    started_at: DateTime<Utc>,
    current: usize,
    stage: Stage,
    plan: Option<EncodePlan>,
}

struct BatchController {
    config: CompressorConfig,
    items: Vec<Item>,
    target_size_mb: u32,
    capabilities: Capabilities,
    prober: CapabilityProber,
    workspace: Workspace,
    fs: Arc<dyn FileSystem>,
    scheduler: Arc<dyn Scheduler>,
    notifier: Notifier,
    run: Option<BatchRun>,
    completed: usize,
    tx: WeakUnboundedSender<ControlEvent>,
}

impl BatchController {
    fn new(
        config: CompressorConfig,
        collaborators: Collaborators,
        tx: WeakUnboundedSender<ControlEvent>,
        events: broadcast::Sender<CompressorEvent>,
    ) -> Self {
        let workspace = Workspace::new(
            config.scratch_dir.clone(),
            config.tool_dir(),
            collaborators.fs.clone(),
        );

        BatchController {
            target_size_mb: config.target_size_mb,
            prober: CapabilityProber::new(&config),
            workspace,
            fs: collaborators.fs,
            scheduler: collaborators.scheduler,
            notifier: Notifier::new(collaborators.sink, events),
            items: Vec::new(),
            capabilities: Capabilities::default(),
            run: None,
            completed: 0,
            tx,
            config,
        }
    }

    async fn startup(&mut self) -> Result<(), CompressError> {
        let stale = self.workspace.reset()?;
        if stale > 0 {
            self.notifier
                .info(format!("Cleaned up {} temporary files from a previous session", stale));
        }
        self.probe_capabilities().await;
        Ok(())
    }

    async fn run(mut self, mut rx: UnboundedReceiver<ControlEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ControlEvent::Command(Command::Shutdown) => break,
                ControlEvent::Command(command) => self.handle_command(command).await,
                ControlEvent::Pass(PassEvent::Diagnostic { index, pass, line }) => {
                    self.on_diagnostic(index, pass, &line)
                }
                ControlEvent::Pass(PassEvent::Exited { index, pass, exit }) => {
                    self.on_pass_exit(index, pass, exit)
                }
                ControlEvent::BeginSecondPass { index } => self.on_settled(index),
                ControlEvent::NextItem => self.on_next_item(),
            }
        }

        if self.run.is_some() {
            debug!("Compressor control task stopping with a batch in flight");
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { path, reply } => {
                let _ = reply.send(self.enqueue(path).await);
            }
            Command::Remove { index, reply } => {
                let _ = reply.send(self.remove(index));
            }
            Command::Clear { reply } => {
                let _ = reply.send(self.clear());
            }
            Command::StartBatch { reply } => {
                let _ = reply.send(self.start_batch().await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.items.clone());
            }
            Command::Counts { reply } => {
                let _ = reply.send(self.counts());
            }
            Command::Capabilities { reply } => {
                let _ = reply.send(self.capabilities);
            }
            Command::ProbeCapabilities { reply } => {
                let _ = reply.send(self.probe_capabilities().await);
            }
            Command::SetHardwareAcceleration { enabled, reply } => {
                let _ = reply.send(self.set_hardware_acceleration(enabled));
            }
            Command::SetTargetSize { target_size_mb, reply } => {
                let _ = reply.send(self.set_target_size(target_size_mb));
            }
            Command::ExportOutputs { dir, reply } => {
                let _ = reply.send(self.export_outputs(&dir));
            }
            Command::Shutdown => {}
        }
    }

    // ── Queue ────────────────────────────────────────────────────────────

    async fn enqueue(&mut self, path: PathBuf) -> Result<usize, CompressError> {
        if self.run.is_some() {
            self.notifier.warning("Cannot add videos while compression is running");
            return Err(CompressError::BatchActive);
        }

        if !is_video_file(&path) || !self.fs.exists(&path) {
            self.notifier.warning(format!(
                "Rejected file (not video or doesn't exist): {}",
                path.display()
            ));
            return Err(CompressError::UnsupportedFile(path));
        }

        if self.items.iter().any(|item| item.source_path == path) {
            let err = CompressError::DuplicateItem(path);
            self.notifier.warning(err.to_string());
            return Err(err);
        }

        let original_bytes = match self.fs.size(&path) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.notifier
                    .warning(format!("Cannot read size of {}: {}", path.display(), e));
                return Err(CompressError::UnsupportedFile(path));
            }
        };
        let duration_secs = self.resolve_duration(&path).await;
        let item = Item::new(path, original_bytes, duration_secs);

        let duration_text = if item.has_known_duration() {
            format!(" - {:.1} min", item.duration_secs / 60.0)
        } else {
            String::new()
        };
        self.notifier.success(format!(
            "Added video: {} ({}{})",
            item.display_name, item.size_text, duration_text
        ));

        self.items.push(item);
        let index = self.items.len() - 1;
        self.publish_item(index);
        self.publish_counts();
        Ok(index)
    }

    async fn resolve_duration(&self, path: &Path) -> f64 {
        if !self.capabilities.toolchain_available {
            self.notifier
                .error("Cannot get video duration: FFmpeg/FFprobe not available");
            return 0.0;
        }

        match probe_duration(&self.config.ffprobe_bin, path, self.config.probe_timeout()).await {
            Ok(duration) => {
                debug!("Duration detected: {:.1} seconds for {}", duration, path.display());
                duration
            }
            Err(e) => {
                self.notifier.error(e.to_string());
                0.0
            }
        }
    }

    fn remove(&mut self, index: usize) -> Result<Item, CompressError> {
        if self.run.is_some() {
            return Err(CompressError::BatchActive);
        }
        if index >= self.items.len() {
            return Err(CompressError::IndexOutOfRange {
                index,
                len: self.items.len(),
            });
        }

        let item = self.items.remove(index);
        // Everything after the removed item moved down one slot
        for shifted in index..self.items.len() {
            self.publish_item(shifted);
        }
        self.publish_counts();
        Ok(item)
    }

    fn clear(&mut self) -> Result<(), CompressError> {
        if self.run.is_some() {
            return Err(CompressError::BatchActive);
        }

        self.items.clear();
        self.completed = 0;
        self.publish_counts();
        Ok(())
    }

    fn counts(&self) -> BatchCounts {
        BatchCounts {
            completed: self.completed,
            total: self.items.len(),
            active: self.run.is_some(),
        }
    }

    fn set_target_size(&mut self, target_size_mb: u32) -> Result<(), CompressError> {
        if target_size_mb == 0 {
            return Err(CompressError::InvalidTargetSize(target_size_mb));
        }
        if self.run.is_some() {
            return Err(CompressError::BatchActive);
        }
        self.target_size_mb = target_size_mb;
        Ok(())
    }

    fn export_outputs(&self, dir: &Path) -> Result<usize, CompressError> {
        if self.run.is_some() {
            return Err(CompressError::BatchActive);
        }
        if !self.fs.exists(dir) {
            self.notifier.error("Target folder does not exist");
            return Err(CompressError::ExportDirMissing(dir.to_path_buf()));
        }

        let mut copied = 0;
        for item in self.items.iter().filter(|item| item.status.has_output()) {
            let Some(output) = item.output_path.as_deref() else {
                continue;
            };
            let Some(file_name) = output.file_name() else {
                continue;
            };
            match self.fs.copy(output, &dir.join(file_name)) {
                Ok(_) => copied += 1,
                Err(e) => self
                    .notifier
                    .warning(format!("Failed to copy {}: {}", output.display(), e)),
            }
        }

        if copied > 0 {
            self.notifier.success(format!(
                "Successfully saved {} videos to {}",
                copied,
                dir.display()
            ));
        } else {
            self.notifier.error("No videos were copied");
        }
        Ok(copied)
    }

    // ── Capabilities ─────────────────────────────────────────────────────

    async fn probe_capabilities(&mut self) -> Capabilities {
        self.notifier.info("Checking FFmpeg availability...");
        let report = self.prober.check_toolchain().await;

        if report.is_available() {
            self.capabilities.toolchain_available = true;
            for status in [&report.ffmpeg, &report.ffprobe] {
                if let ToolStatus::Available(banner) = status {
                    self.notifier.success(format!("Found: {}", banner));
                }
            }
            self.detect_hardware().await;
        } else {
            for reason in report.failures() {
                self.notifier.error(reason);
            }
            self.notifier
                .error("Both FFmpeg and FFprobe are required for video processing");
            self.capabilities.mark_unavailable();
        }

        self.notifier
            .publish(CompressorEvent::CapabilitiesChanged(self.capabilities));
        self.capabilities
    }

    async fn detect_hardware(&mut self) {
        self.notifier
            .info("Detecting hardware acceleration capabilities...");
        let probe = self.prober.probe_hardware(&self.workspace).await;

        for (candidate, reason) in &probe.rejected {
            self.notifier
                .info(format!("{} unavailable: {}", candidate, reason));
        }

        self.capabilities.hw_type = probe.selected;
        self.capabilities.hw_available = probe.selected != HardwareType::None;
        self.capabilities.hw_enabled = self.capabilities.hw_available;

        if self.capabilities.hw_available {
            self.notifier.success(format!(
                "{} hardware acceleration detected",
                probe.selected
            ));
        } else {
            self.notifier
                .warning("No hardware acceleration available - will use software encoding");
        }
    }

    fn set_hardware_acceleration(&mut self, enabled: bool) -> bool {
        if enabled == self.capabilities.hw_enabled {
            return enabled;
        }

        if !enabled {
            self.capabilities.hw_enabled = false;
            self.notifier.info("Hardware acceleration disabled");
        } else if self.capabilities.hw_available {
            self.capabilities.hw_enabled = true;
            self.notifier.success(format!(
                "Hardware acceleration enabled: {}",
                self.capabilities.hw_type
            ));
        } else {
            self.capabilities.hw_enabled = false;
            self.notifier
                .warning("Hardware acceleration requested but not available");
        }

        self.notifier
            .publish(CompressorEvent::CapabilitiesChanged(self.capabilities));
        self.capabilities.hw_enabled
    }

    // ── Batch lifecycle ──────────────────────────────────────────────────

    async fn start_batch(&mut self) -> Result<Uuid, CompressError> {
        if self.run.is_some() {
            self.notifier.warning("Compression already in progress");
            return Err(CompressError::BatchActive);
        }
        if self.items.is_empty() {
            self.notifier.warning("No videos to compress");
            return Err(CompressError::EmptyQueue);
        }

        self.notifier
            .info("Re-checking FFmpeg availability before compression...");
        let report = self.prober.check_toolchain().await;
        if !report.is_available() {
            self.notifier.error("FFmpeg check failed before compression");
            for reason in report.failures() {
                self.notifier.error(reason);
            }
            self.capabilities.mark_unavailable();
            self.notifier
                .publish(CompressorEvent::CapabilitiesChanged(self.capabilities));
            return Err(report.into_error());
        }
        self.capabilities.toolchain_available = true;

        self.notifier
            .info("Cleaning up old temporary files before compression...");
        if let Err(e) = self.workspace.reset() {
            self.notifier.error(e.to_string());
            return Err(e);
        }

        for index in 0..self.items.len() {
            self.items[index].requeue();
            self.publish_item(index);
        }
        self.completed = 0;

        let id = Uuid::new_v4();
        self.run = Some(BatchRun {
            id,
            started_at: Utc::now(),
            current: 0,
            stage: Stage::Advancing,
            plan: None,
        });

        self.notifier.info(format!(
            "Starting compression batch with {} videos",
            self.items.len()
        ));
        self.notifier
            .info(format!("Target size: {} MB", self.target_size_mb));
        self.notifier.publish(CompressorEvent::BatchStarted {
            run_id: id,
            total: self.items.len(),
        });
        self.publish_counts();

        self.process_current();
        Ok(id)
    }

    /// Evaluate the entry transitions for the item at the run's cursor
    fn process_current(&mut self) {
        let Some(index) = self.run.as_ref().map(|run| run.current) else {
            return;
        };
        if index >= self.items.len() {
            self.finish_batch();
            return;
        }

        self.notifier.info(format!(
            "Processing video {}/{}: {}",
            index + 1,
            self.items.len(),
            self.items[index].display_name
        ));

        let target_bytes = u64::from(self.target_size_mb) * BYTES_PER_MB;
        if self.items[index].original_bytes <= target_bytes {
            let item = &mut self.items[index];
            item.status = ItemStatus::AlreadyOptimal;
            item.status_text = "Already optimal size".to_string();
            item.progress = 100;
            item.output_path = Some(item.source_path.clone());
            let name = item.display_name.clone();

            self.completed += 1;
            self.publish_item(index);
            self.publish_counts();
            self.notifier
                .success(format!("Video already optimal: {}", name));
            self.advance_after(self.config.skip_delay());
            return;
        }

        if !self.items[index].has_known_duration() {
            let err = CompressError::InvalidDuration(self.items[index].source_path.clone());
            self.fail_item(index, err);
            self.advance_after(self.config.skip_delay());
            return;
        }

        let plan = self.plan_for(index);
        let item = &mut self.items[index];
        item.output_path = Some(plan.output.clone());
        item.status = ItemStatus::Compressing(Pass::First);
        item.status_text = "Starting compression (Pass 1/2)...".to_string();
        item.progress = 0;
        self.publish_item(index);

        if let Some(run) = self.run.as_mut() {
            run.plan = Some(plan);
        }
        self.launch_pass(index, Pass::First);
    }

    /// Fix the encoder, rate and paths for both passes of an item
    fn plan_for(&self, index: usize) -> EncodePlan {
        let item = &self.items[index];
        let video_kbps = plan_video_bitrate(item.duration_secs, self.target_size_mb);
        self.notifier.info(format!(
            "Calculated bitrate for {:.1} min video: {} kbps (target: {} MB, safety margin applied)",
            item.duration_secs / 60.0,
            video_kbps,
            self.target_size_mb
        ));

        EncodePlan {
            input: item.source_path.clone(),
            output: self
                .workspace
                .output_path(&item.source_path, &self.config.container),
            encoder: self.capabilities.encoder_name().to_string(),
            hwaccel: self.capabilities.hwaccel_flag().map(str::to_string),
            video_kbps,
            container: self.config.container.clone(),
        }
    }

    fn launch_pass(&mut self, index: usize, pass: Pass) {
        let Some(plan) = self.run.as_ref().and_then(|run| run.plan.clone()) else {
            return;
        };
        let Some(tx) = self.tx.upgrade() else {
            return;
        };

        let accel = match plan.hwaccel {
            Some(_) => format!(" (HW: {})", self.capabilities.hw_type),
            None => " (Software)".to_string(),
        };
        self.notifier.info(format!(
            "Starting {} for: {}{}",
            pass, self.items[index].display_name, accel
        ));

        let args = plan.pass_args(pass);
        debug!(
            "FFmpeg command: {} {}",
            self.config.ffmpeg_bin.display(),
            quote_args(&args)
        );

        match spawn_pass(
            &self.config.ffmpeg_bin,
            self.workspace.tool_dir(),
            &args,
            index,
            pass,
            tx,
        ) {
            Ok(()) => {
                if let Some(run) = self.run.as_mut() {
                    run.stage = Stage::Running(pass);
                }
            }
            Err(e) => self.finish_transcode_with_error(index, e),
        }
    }

    fn on_diagnostic(&mut self, index: usize, pass: Pass, line: &str) {
        if !self.is_running(index, pass) {
            debug!("Ignoring stale FFmpeg output for item {}: {}", index, line);
            return;
        }

        if let Some(position) = parse_time_seconds(line) {
            let item = &mut self.items[index];
            let progress = overall_progress(pass, position, item.duration_secs);
            item.progress = item.progress.max(progress);
            item.status_text = pass_status_text(pass, position, item.duration_secs);
            self.publish_item(index);
        } else if should_forward(line) {
            self.notifier.info(format!("FFmpeg: {}", line.trim()));
        } else {
            debug!("FFmpeg ({}): {}", pass, line);
        }
    }

    fn on_pass_exit(&mut self, index: usize, pass: Pass, exit: PassExit) {
        if !self.is_running(index, pass) {
            debug!("Ignoring stale exit of {} for item {}", pass, index);
            return;
        }

        match (exit, pass) {
            (PassExit::Success, Pass::First) => {
                let item = &mut self.items[index];
                item.status = ItemStatus::Compressing(Pass::Second);
                item.status_text = "Starting pass 2/2...".to_string();
                item.progress = Pass::Second.baseline();
                self.publish_item(index);

                if let Some(run) = self.run.as_mut() {
                    run.stage = Stage::Settling;
                }
                self.schedule(
                    self.config.settle_delay(),
                    ControlEvent::BeginSecondPass { index },
                );
            }
            (PassExit::Success, Pass::Second) => self.verify_output(index),
            (PassExit::Failed(code), pass) => {
                let err = CompressError::ProcessExit {
                    source_path: self.items[index].source_path.clone(),
                    pass,
                    code,
                };
                self.finish_transcode_with_error(index, err);
            }
            (PassExit::Lost(reason), pass) => {
                debug!("Lost track of {} for item {}: {}", pass, index, reason);
                let err = CompressError::ProcessExit {
                    source_path: self.items[index].source_path.clone(),
                    pass,
                    code: None,
                };
                self.finish_transcode_with_error(index, err);
            }
        }
    }

    fn on_settled(&mut self, index: usize) {
        let settling = self
            .run
            .as_ref()
            .map(|run| run.current == index && run.stage == Stage::Settling)
            .unwrap_or(false);
        if settling {
            self.launch_pass(index, Pass::Second);
        }
    }

    fn on_next_item(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.stage != Stage::Advancing {
            return;
        }
        run.current += 1;
        run.plan = None;
        self.process_current();
    }

    /// Pass 2 exited cleanly; trust it only if the output is really there
    fn verify_output(&mut self, index: usize) {
        let Some(output) = self.items[index].output_path.clone() else {
            return;
        };

        if !self.fs.exists(&output) {
            self.finish_transcode_with_error(index, CompressError::OutputMissing(output));
            return;
        }

        let output_size = match self.fs.size(&output) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                self.notifier.warning(format!(
                    "Cannot read size of {}: {}",
                    output.display(),
                    e
                ));
                None
            }
        };

        let item = &mut self.items[index];
        item.status = ItemStatus::Completed;
        item.progress = 100;
        let message = match output_size {
            Some(output_bytes) => {
                item.status_text = format!("Compressed to {}", human_size(output_bytes));
                let reduction = if item.original_bytes > 0 {
                    (1.0 - output_bytes as f64 / item.original_bytes as f64) * 100.0
                } else {
                    0.0
                };
                format!(
                    "Compression completed: {} ({} → {}, {:.1}% reduction)",
                    item.display_name,
                    item.size_text,
                    human_size(output_bytes),
                    reduction
                )
            }
            None => {
                item.status_text = "Compressed".to_string();
                format!("Compression completed: {}", item.display_name)
            }
        };

        self.completed += 1;
        self.publish_item(index);
        self.publish_counts();
        self.notifier.success(message);
        self.finish_transcode();
    }

    fn fail_item(&mut self, index: usize, err: CompressError) {
        let item = &mut self.items[index];
        item.status = ItemStatus::Error;
        item.status_text = err.item_status_text();
        item.progress = 0;
        self.publish_item(index);
        self.notifier.error(err.to_string());
    }

    fn finish_transcode_with_error(&mut self, index: usize, err: CompressError) {
        self.fail_item(index, err);
        self.finish_transcode();
    }

    /// Common tail of every item that reached the encoder
    fn finish_transcode(&mut self) {
        for name in self.workspace.purge_pass_logs() {
            self.notifier.info(format!("Cleaned up pass file: {}", name));
        }
        self.advance_after(self.config.next_item_delay());
    }

    fn advance_after(&mut self, delay: Duration) {
        if let Some(run) = self.run.as_mut() {
            run.stage = Stage::Advancing;
        }
        self.schedule(delay, ControlEvent::NextItem);
    }

    fn finish_batch(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let total = self.items.len();
        let elapsed = Utc::now().signed_duration_since(run.started_at);

        self.notifier.publish(CompressorEvent::BatchFinished {
            run_id: run.id,
            completed: self.completed,
            total,
        });
        self.publish_counts();
        self.notifier.success(format!(
            "All videos processed: {}/{} completed in {}s",
            self.completed,
            total,
            elapsed.num_seconds()
        ));
    }

    fn is_running(&self, index: usize, pass: Pass) -> bool {
        self.run
            .as_ref()
            .map(|run| run.current == index && run.stage == Stage::Running(pass))
            .unwrap_or(false)
    }

    fn schedule(&self, delay: Duration, event: ControlEvent) {
        let Some(tx) = self.tx.upgrade() else {
            return;
        };
        self.scheduler.defer(
            delay,
            Box::new(move || {
                let _ = tx.send(event);
            }),
        );
    }

    fn publish_item(&self, index: usize) {
        self.notifier.publish(CompressorEvent::ItemUpdated {
            index,
            item: self.items[index].clone(),
        });
    }

    fn publish_counts(&self) {
        self.notifier
            .publish(CompressorEvent::CountsChanged(self.counts()));
    }
}

/// Render arguments for a log line, quoting anything with spaces or separators
fn quote_args(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.contains(' ') || arg.contains('\\') || arg.contains('/') {
                format!("\"{}\"", arg)
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Entry point for hosts: starts the control task
pub struct Compressor;

impl Compressor {
    /// Reset the scratch directory, probe the toolchain and hardware, then
    /// start the control task
    pub async fn launch(
        config: CompressorConfig,
        collaborators: Collaborators,
    ) -> Result<CompressorHandle, CompressError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut controller =
            BatchController::new(config, collaborators, tx.downgrade(), events.clone());
        controller.startup().await?;
        tokio::spawn(controller.run(rx));

        Ok(CompressorHandle { tx, events })
    }
}

/// Cloneable handle to a running compressor
///
/// The control task stops after [`CompressorHandle::shutdown`] or once every
/// handle has been dropped.
#[derive(Clone)]
pub struct CompressorHandle {
    tx: UnboundedSender<ControlEvent>,
    events: broadcast::Sender<CompressorEvent>,
}

impl CompressorHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CompressError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ControlEvent::Command(make(reply)))
            .map_err(|_| CompressError::ControllerClosed)?;
        response.await.map_err(|_| CompressError::ControllerClosed)
    }

    /// Queue a video; returns its index
    pub async fn enqueue(&self, path: impl Into<PathBuf>) -> Result<usize, CompressError> {
        let path = path.into();
        self.request(|reply| Command::Enqueue { path, reply }).await?
    }

    pub async fn remove(&self, index: usize) -> Result<Item, CompressError> {
        self.request(|reply| Command::Remove { index, reply }).await?
    }

    pub async fn clear(&self) -> Result<(), CompressError> {
        self.request(|reply| Command::Clear { reply }).await?
    }

    /// Re-validate the toolchain and start processing the queue
    ///
    /// Returns as soon as the run has started; watch [`CompressorEvent::BatchFinished`]
    /// or use [`CompressorHandle::run_batch`] to wait for the end.
    pub async fn start_batch(&self) -> Result<Uuid, CompressError> {
        self.request(|reply| Command::StartBatch { reply }).await?
    }

    /// Start a batch and wait until its last item is terminal
    pub async fn run_batch(&self) -> Result<BatchCounts, CompressError> {
        let mut events = self.subscribe();
        let run_id = self.start_batch().await?;

        loop {
            match events.recv().await {
                Ok(CompressorEvent::BatchFinished {
                    run_id: finished,
                    completed,
                    total,
                }) if finished == run_id => {
                    return Ok(BatchCounts {
                        completed,
                        total,
                        active: false,
                    });
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CompressError::ControllerClosed)
                }
            }
        }
    }

    /// Read-only copy of every queued item
    pub async fn snapshot(&self) -> Result<Vec<Item>, CompressError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn counts(&self) -> Result<BatchCounts, CompressError> {
        self.request(|reply| Command::Counts { reply }).await
    }

    pub async fn capabilities(&self) -> Result<Capabilities, CompressError> {
        self.request(|reply| Command::Capabilities { reply }).await
    }

    /// Re-run the toolchain check and, if it passes, the hardware probe
    pub async fn probe_capabilities(&self) -> Result<Capabilities, CompressError> {
        self.request(|reply| Command::ProbeCapabilities { reply }).await
    }

    /// Toggle hardware encoding; returns the resulting state
    pub async fn set_hardware_acceleration(&self, enabled: bool) -> Result<bool, CompressError> {
        self.request(|reply| Command::SetHardwareAcceleration { enabled, reply })
            .await
    }

    pub async fn set_target_size_mb(&self, target_size_mb: u32) -> Result<(), CompressError> {
        self.request(|reply| Command::SetTargetSize {
            target_size_mb,
            reply,
        })
        .await?
    }

    /// Copy every finished output into `dir`; returns how many were copied
    pub async fn export_outputs(&self, dir: impl Into<PathBuf>) -> Result<usize, CompressError> {
        let dir = dir.into();
        self.request(|reply| Command::ExportOutputs { dir, reply })
            .await?
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompressorEvent> {
        self.events.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlEvent::Command(Command::Shutdown));
    }
}
