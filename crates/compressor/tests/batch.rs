//! End-to-end batch runs against stand-in ffmpeg/ffprobe shell scripts.
#![cfg(unix)]

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use compressor::{
    BatchCounts, Collaborators, CompressError, Compressor, CompressorConfig, CompressorEvent,
    CompressorHandle, FileSystem, HardwareType, ItemStatus, LocalFs, NotificationSink, Scheduler,
    Severity, TokioScheduler,
};
use tempfile::TempDir;
use tokio::sync::broadcast;

// Writing an executable while another thread forks can fail with ETXTBSY;
// every test in this binary holds this for its whole run.
static SCRIPT_LOCK: Mutex<()> = Mutex::new(());

const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

const FFMPEG_TEMPLATE: &str = r#"#!/bin/sh
echo "$*" >> "@CALLS@"
case "$1" in
  -version) echo "ffmpeg version 6.1-test"; exit 0 ;;
  -hide_banner) printf ' V....D libx264              H.264 / AVC\n@ENCODERS@'; exit 0 ;;
esac
if [ -f "@BROKEN@" ]; then exit 1; fi
pass=""
prev=""
encoder=""
lavfi=0
out=""
for arg in "$@"; do
  case "$prev" in
    -pass) pass="$arg" ;;
    -c:v) encoder="$arg" ;;
  esac
  if [ "$arg" = "lavfi" ]; then lavfi=1; fi
  prev="$arg"
  out="$arg"
done
if [ "$lavfi" = 1 ]; then
  echo probe > "$out"
  case "$encoder" in
    h264_nvenc) exit @NVENC_EXIT@ ;;
    h264_qsv) exit @QSV_EXIT@ ;;
  esac
  exit 1
fi
printf 'Input #0, mov,mp4,m4a,3gp, from clip\n' >&2
sleep @PASS_SLEEP@
printf 'frame=  10 fps=0.0 q=0.0 size=0kB time=00:00:15.00 bitrate=0.0kbits/s\r' >&2
printf 'frame=  20 fps=0.0 q=0.0 size=0kB time=00:00:30.00 bitrate=0.0kbits/s\r' >&2
if [ "$pass" = 1 ]; then
  echo stats > ffmpeg2pass-0.log
  echo tree > ffmpeg2pass-0.log.mbtree
  exit @PASS1_EXIT@
fi
@WRITE_OUTPUT@
exit @PASS2_EXIT@
"#;

const FFPROBE_TEMPLATE: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  if [ -f "@BROKEN@" ]; then echo "ffprobe: broken" >&2; exit 1; fi
  echo "ffprobe version 6.1-test"
  exit 0
fi
echo "@DURATION@"
"#;

/// Behavior of the stand-in tools
struct FakeTools {
    encoders: &'static str,
    nvenc_exit: i32,
    qsv_exit: i32,
    pass1_exit: i32,
    pass2_exit: i32,
    write_output: bool,
    pass_sleep: &'static str,
    duration: &'static str,
}

impl Default for FakeTools {
    fn default() -> Self {
        FakeTools {
            encoders: "",
            nvenc_exit: 1,
            qsv_exit: 1,
            pass1_exit: 0,
            pass2_exit: 0,
            write_output: true,
            pass_sleep: "0",
            duration: "60.000000",
        }
    }
}

struct Harness {
    dir: TempDir,
    config: CompressorConfig,
}

impl Harness {
    fn new(tools: FakeTools) -> Self {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("bin");
        let work = dir.path().join("work");
        let media = dir.path().join("media");
        for d in [&bin, &work, &media] {
            fs::create_dir_all(d).unwrap();
        }

        let broken = dir.path().join("toolchain-broken");
        let ffmpeg = FFMPEG_TEMPLATE
            .replace("@CALLS@", &dir.path().join("calls.log").to_string_lossy())
            .replace("@BROKEN@", &broken.to_string_lossy())
            .replace("@ENCODERS@", tools.encoders)
            .replace("@NVENC_EXIT@", &tools.nvenc_exit.to_string())
            .replace("@QSV_EXIT@", &tools.qsv_exit.to_string())
            .replace("@PASS1_EXIT@", &tools.pass1_exit.to_string())
            .replace("@PASS2_EXIT@", &tools.pass2_exit.to_string())
            .replace("@PASS_SLEEP@", tools.pass_sleep)
            .replace(
                "@WRITE_OUTPUT@",
                if tools.write_output {
                    "head -c 4096 /dev/zero > \"$out\""
                } else {
                    ":"
                },
            );
        let ffprobe = FFPROBE_TEMPLATE
            .replace("@BROKEN@", &broken.to_string_lossy())
            .replace("@DURATION@", tools.duration);

        let ffmpeg_bin = bin.join("ffmpeg");
        let ffprobe_bin = bin.join("ffprobe");
        write_script(&ffmpeg_bin, &ffmpeg);
        write_script(&ffprobe_bin, &ffprobe);

        let config = CompressorConfig {
            ffmpeg_bin,
            ffprobe_bin,
            scratch_dir: dir.path().join("scratch"),
            tool_workdir: Some(work),
            target_size_mb: 1,
            settle_delay_ms: 0,
            next_item_delay_ms: 0,
            skip_delay_ms: 0,
            ..CompressorConfig::default_config()
        };

        Harness { dir, config }
    }

    async fn launch(&self) -> CompressorHandle {
        self.launch_with(Collaborators::default()).await
    }

    async fn launch_with(&self, collaborators: Collaborators) -> CompressorHandle {
        Compressor::launch(self.config.clone(), collaborators)
            .await
            .unwrap()
    }

    fn calls_log(&self) -> PathBuf {
        self.dir.path().join("calls.log")
    }

    fn video(&self, name: &str, bytes: usize) -> PathBuf {
        let path = self.dir.path().join("media").join(name);
        fs::write(&path, vec![0u8; bytes]).unwrap();
        path
    }

    fn calls(&self) -> String {
        fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default()
    }

    fn break_toolchain(&self) {
        fs::write(self.dir.path().join("toolchain-broken"), b"").unwrap();
    }

    fn scratch(&self) -> &Path {
        &self.config.scratch_dir
    }

    fn work(&self) -> PathBuf {
        self.dir.path().join("work")
    }
}

/// Keeps every `(message, severity)` pair it is handed
#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<(String, Severity)>>,
}

impl RecordingSink {
    fn has(&self, severity: Severity, prefix: &str) -> bool {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .any(|(message, s)| *s == severity && message.starts_with(prefix))
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, message: &str, severity: Severity) {
        self.seen.lock().unwrap().push((message.to_string(), severity));
    }
}

/// Notes each requested delay together with the ffmpeg calls made so far,
/// then hands the callback to the tokio scheduler
struct RecordingScheduler {
    calls_log: PathBuf,
    deferred: Mutex<Vec<(Duration, String)>>,
}

impl Scheduler for RecordingScheduler {
    fn defer(&self, delay: Duration, task: Box<dyn FnOnce() + Send + 'static>) {
        let calls = fs::read_to_string(&self.calls_log).unwrap_or_default();
        self.deferred.lock().unwrap().push((delay, calls));
        TokioScheduler.defer(delay, task);
    }
}

/// Local file system whose compressed outputs cannot be measured
struct UnmeasurableOutputs;

impl FileSystem for UnmeasurableOutputs {
    fn exists(&self, path: &Path) -> bool {
        LocalFs.exists(path)
    }

    fn size(&self, path: &Path) -> io::Result<u64> {
        if path.to_string_lossy().contains("_compressed.") {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "metadata unavailable"));
        }
        LocalFs.size(path)
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        LocalFs.copy(from, to)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        LocalFs.create_dir_all(path)
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        LocalFs.remove_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        LocalFs.remove_file(path)
    }

    fn list_files(&self, dir: &Path) -> io::Result<Vec<PathBuf>> {
        LocalFs.list_files(dir)
    }

    fn count_files(&self, dir: &Path) -> io::Result<usize> {
        LocalFs.count_files(dir)
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

const TWO_MB: usize = 2 * 1024 * 1024;

async fn run(handle: &CompressorHandle) -> BatchCounts {
    tokio::time::timeout(BATCH_TIMEOUT, handle.run_batch())
        .await
        .expect("batch did not finish in time")
        .unwrap()
}

async fn wait_finished(events: &mut broadcast::Receiver<CompressorEvent>) {
    let wait = async {
        loop {
            if let CompressorEvent::BatchFinished { .. } = events.recv().await.unwrap() {
                return;
            }
        }
    };
    tokio::time::timeout(BATCH_TIMEOUT, wait)
        .await
        .expect("batch did not finish in time");
}

fn drain(events: &mut broadcast::Receiver<CompressorEvent>) -> Vec<CompressorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

#[tokio::test]
async fn small_file_is_already_optimal_without_encoding() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    let source = h.video("small.mp4", 1000);
    handle.enqueue(&source).await.unwrap();
    let counts = run(&handle).await;

    assert_eq!(counts.completed, 1);
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::AlreadyOptimal);
    assert_eq!(items[0].status_text, "Already optimal size");
    assert_eq!(items[0].progress, 100);
    assert_eq!(items[0].output_path.as_deref(), Some(source.as_path()));
    assert!(!h.calls().contains("-pass"));
}

#[tokio::test]
async fn two_pass_success_produces_output_and_purges_pass_logs() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;
    assert_eq!(handle.capabilities().await.unwrap().hw_type, HardwareType::None);

    handle.enqueue(h.video("holiday.mov", TWO_MB)).await.unwrap();
    let mut events = handle.subscribe();
    let counts = run(&handle).await;
    assert_eq!(counts, BatchCounts { completed: 1, total: 1, active: false });

    let items = handle.snapshot().await.unwrap();
    let item = &items[0];
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.progress, 100);
    assert!(item.status_text.starts_with("Compressed to"));
    let output = h.scratch().join("holiday_compressed.mp4");
    assert_eq!(item.output_path.as_deref(), Some(output.as_path()));
    assert!(output.exists());

    // 1 MB over 60 s leaves less than the floor, so the planned rate bottoms out
    let calls = h.calls();
    assert!(calls.contains("-c:v libx264 -b:v 95k -c:a aac -b:a 128k -pass 1 -f mp4 -y"));
    assert!(calls.contains("-pass 2 -movflags +faststart -y"));
    assert!(!calls.contains("-hwaccel"));

    let leftovers: Vec<_> = fs::read_dir(h.work())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("ffmpeg2pass-"))
        .collect();
    assert!(leftovers.is_empty());

    let seen = drain(&mut events);
    let progress: Vec<u8> = seen
        .iter()
        .filter_map(|e| match e {
            CompressorEvent::ItemUpdated { index: 0, item } => Some(item.progress),
            _ => None,
        })
        .collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress regressed: {:?}", progress);
    // 30 s of 60 s: 25% during pass 1, 75% during pass 2
    assert!(progress.contains(&25));
    assert!(progress.contains(&75));
    assert!(seen.iter().any(|e| matches!(
        e,
        CompressorEvent::Notification(n) if n.message.starts_with("FFmpeg: Input #0")
    )));
    assert!(!seen.iter().any(|e| matches!(
        e,
        CompressorEvent::Notification(n) if n.message.contains("frame=")
    )));
}

#[tokio::test]
async fn failed_pass_marks_item_and_batch_continues() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        pass1_exit: 1,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    handle.enqueue(h.video("big.mp4", TWO_MB)).await.unwrap();
    handle.enqueue(h.video("small.mp4", 100)).await.unwrap();
    let counts = run(&handle).await;

    assert_eq!(counts.completed, 1);
    assert_eq!(counts.total, 2);
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Error);
    assert_eq!(items[0].status_text, "Pass 1 failed");
    assert_eq!(items[1].status, ItemStatus::AlreadyOptimal);
    assert!(!h.calls().contains("-pass 2"));
    assert!(!h.work().join("ffmpeg2pass-0.log").exists());
}

#[tokio::test]
async fn failed_second_pass_is_not_counted_and_batch_continues() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        pass2_exit: 1,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    handle.enqueue(h.video("big.mp4", TWO_MB)).await.unwrap();
    handle.enqueue(h.video("small.mp4", 100)).await.unwrap();
    let counts = run(&handle).await;

    assert_eq!(counts, BatchCounts { completed: 1, total: 2, active: false });
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Error);
    assert_eq!(items[0].status_text, "Pass 2 failed");
    assert_eq!(items[0].progress, 0);
    assert_eq!(items[1].status, ItemStatus::AlreadyOptimal);
    assert!(h.calls().contains("-pass 2"));
    assert!(!h.work().join("ffmpeg2pass-0.log").exists());
    assert!(!h.work().join("ffmpeg2pass-0.log.mbtree").exists());
}

#[tokio::test]
async fn settle_delay_is_deferred_between_passes() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let mut h = Harness::new(FakeTools::default());
    h.config.settle_delay_ms = 250;
    h.config.next_item_delay_ms = 40;

    let sink = Arc::new(RecordingSink::default());
    let scheduler = Arc::new(RecordingScheduler {
        calls_log: h.calls_log(),
        deferred: Mutex::new(Vec::new()),
    });
    let handle = h
        .launch_with(Collaborators {
            fs: Arc::new(LocalFs),
            scheduler: scheduler.clone(),
            sink: sink.clone(),
        })
        .await;

    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    run(&handle).await;

    let deferred = scheduler.deferred.lock().unwrap().clone();
    let settle = deferred
        .iter()
        .position(|(delay, _)| *delay == Duration::from_millis(250))
        .expect("settle delay was never scheduled");
    let next = deferred
        .iter()
        .position(|(delay, _)| *delay == Duration::from_millis(40))
        .expect("next-item delay was never scheduled");
    assert!(settle < next);

    let (_, calls_at_settle) = &deferred[settle];
    assert!(calls_at_settle.contains("-pass 1"));
    assert!(!calls_at_settle.contains("-pass 2"));
    let (_, calls_at_next) = &deferred[next];
    assert!(calls_at_next.contains("-pass 2"));

    assert!(sink.has(Severity::Info, "FFmpeg: Input #0"));
    assert!(sink.has(Severity::Success, "Compression completed: clip.mp4"));
    assert!(sink.has(Severity::Success, "Added video: clip.mp4"));
    assert!(!sink.has(Severity::Error, ""));
}

#[tokio::test]
async fn unreadable_output_size_completes_without_reduction_figure() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let sink = Arc::new(RecordingSink::default());
    let handle = h
        .launch_with(Collaborators {
            fs: Arc::new(UnmeasurableOutputs),
            scheduler: Arc::new(TokioScheduler),
            sink: sink.clone(),
        })
        .await;

    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    let counts = run(&handle).await;

    assert_eq!(counts.completed, 1);
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Completed);
    assert_eq!(items[0].status_text, "Compressed");
    assert_eq!(items[0].progress, 100);
    assert!(sink.has(Severity::Warning, "Cannot read size of"));
    let seen = sink.seen.lock().unwrap();
    assert!(!seen.iter().any(|(message, _)| message.contains("reduction")));
}

#[tokio::test]
async fn removal_republishes_shifted_items() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    for name in ["a.mp4", "b.mp4", "c.mp4"] {
        handle.enqueue(h.video(name, 10)).await.unwrap();
    }
    let mut events = handle.subscribe();
    let removed = handle.remove(0).await.unwrap();
    assert_eq!(removed.display_name, "a.mp4");

    let updates: Vec<(usize, String)> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            CompressorEvent::ItemUpdated { index, item } => Some((index, item.display_name)),
            _ => None,
        })
        .collect();
    assert_eq!(
        updates,
        vec![(0, "b.mp4".to_string()), (1, "c.mp4".to_string())]
    );
    assert_eq!(handle.counts().await.unwrap().total, 2);
}

#[tokio::test]
async fn clean_exit_without_output_is_an_error() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        write_output: false,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    handle.enqueue(h.video("clip.mkv", TWO_MB)).await.unwrap();
    let counts = run(&handle).await;

    assert_eq!(counts.completed, 0);
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Error);
    assert_eq!(items[0].status_text, "Output file not created");
    assert_eq!(items[0].progress, 0);
}

#[tokio::test]
async fn unknown_duration_fails_without_encoding() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        duration: "N/A",
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    handle.enqueue(h.video("clip.avi", TWO_MB)).await.unwrap();
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].duration_secs, 0.0);

    run(&handle).await;
    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Error);
    assert_eq!(items[0].status_text, "Invalid video duration");
    assert!(!h.calls().contains("-pass"));
}

#[tokio::test]
async fn broken_toolchain_refuses_to_start_and_leaves_items_ready() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;
    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();

    h.break_toolchain();
    let err = handle.start_batch().await.unwrap_err();
    assert!(matches!(err, CompressError::ToolchainUnavailable(_)));

    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::Ready);
    assert!(!handle.capabilities().await.unwrap().toolchain_available);
    assert!(!handle.counts().await.unwrap().active);
}

#[tokio::test]
async fn missing_toolchain_at_launch_is_reported_not_fatal() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let mut config = h.config.clone();
    config.ffmpeg_bin = h.dir.path().join("bin").join("no-such-ffmpeg");
    let handle = Compressor::launch(config, Collaborators::default())
        .await
        .unwrap();

    let caps = handle.capabilities().await.unwrap();
    assert!(!caps.toolchain_available);
    assert!(!caps.hw_enabled);

    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    let items = handle.snapshot().await.unwrap();
    assert!(!items[0].has_known_duration());
}

#[tokio::test]
async fn cuda_is_preferred_and_used_for_both_passes() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        encoders: " V....D h264_nvenc           NVIDIA NVENC H.264\n V....D h264_qsv             H.264 (Intel Quick Sync)\n",
        nvenc_exit: 0,
        qsv_exit: 0,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    let caps = handle.capabilities().await.unwrap();
    assert_eq!(caps.hw_type, HardwareType::Cuda);
    assert!(caps.hw_available && caps.hw_enabled);
    assert!(!h.calls().contains("-c:v h264_qsv"));
    assert!(!h.scratch().join("test_cuda_temp.mp4").exists());

    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    run(&handle).await;
    let calls = h.calls();
    assert!(calls.contains("-c:v h264_nvenc -b:v 95k -c:a aac -b:a 128k -pass 1"));
    assert!(calls.contains("-hwaccel cuda -i"));
}

#[tokio::test]
async fn quicksync_is_used_when_nvenc_fails_its_test() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        encoders: " V....D h264_nvenc           NVIDIA NVENC H.264\n V....D h264_qsv             H.264 (Intel Quick Sync)\n",
        nvenc_exit: 1,
        qsv_exit: 0,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    let caps = handle.capabilities().await.unwrap();
    assert_eq!(caps.hw_type, HardwareType::QuickSync);
    assert!(caps.hw_enabled);
    let leftover_artifacts = fs::read_dir(h.scratch())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("test_"))
        .count();
    assert_eq!(leftover_artifacts, 0);

    assert!(!handle.set_hardware_acceleration(false).await.unwrap());
    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    run(&handle).await;
    let calls = h.calls();
    assert!(calls.contains("-c:v libx264 -b:v 95k"));
    assert!(!calls.contains("-hwaccel"));
}

#[tokio::test]
async fn unlisted_encoders_are_never_tested() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        nvenc_exit: 0,
        qsv_exit: 0,
        ..FakeTools::default()
    });
    let handle = h.launch().await;

    let caps = handle.capabilities().await.unwrap();
    assert_eq!(caps.hw_type, HardwareType::None);
    assert!(!caps.hw_available);
    assert!(!h.calls().contains("lavfi"));
    assert!(!handle.set_hardware_acceleration(true).await.unwrap());
}

#[tokio::test]
async fn batch_start_purges_stale_scratch_files() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    let stale = h.scratch().join("leftover_compressed.mp4");
    fs::write(&stale, b"old").unwrap();
    handle.enqueue(h.video("small.mp4", 10)).await.unwrap();
    run(&handle).await;

    assert!(!stale.exists());
    assert!(h.scratch().is_dir());
}

#[tokio::test]
async fn queue_is_locked_while_a_batch_runs() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools {
        pass_sleep: "1",
        ..FakeTools::default()
    });
    let handle = h.launch().await;
    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    let late = h.video("late.mp4", TWO_MB);

    let mut events = handle.subscribe();
    handle.start_batch().await.unwrap();
    assert!(handle.counts().await.unwrap().active);

    assert!(matches!(handle.start_batch().await, Err(CompressError::BatchActive)));
    assert!(matches!(handle.enqueue(&late).await, Err(CompressError::BatchActive)));
    assert!(matches!(handle.remove(0).await, Err(CompressError::BatchActive)));
    assert!(matches!(handle.clear().await, Err(CompressError::BatchActive)));
    assert!(matches!(handle.set_target_size_mb(5).await, Err(CompressError::BatchActive)));

    wait_finished(&mut events).await;
    let counts = handle.counts().await.unwrap();
    assert_eq!(counts, BatchCounts { completed: 1, total: 1, active: false });
    assert_eq!(handle.enqueue(&late).await.unwrap(), 1);
}

#[tokio::test]
async fn enqueue_validation() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    assert!(matches!(handle.start_batch().await, Err(CompressError::EmptyQueue)));

    let clip = h.video("clip.mp4", 10);
    assert_eq!(handle.enqueue(&clip).await.unwrap(), 0);
    assert!(matches!(handle.enqueue(&clip).await, Err(CompressError::DuplicateItem(_))));

    let notes = h.dir.path().join("media").join("notes.txt");
    fs::write(&notes, b"x").unwrap();
    assert!(matches!(handle.enqueue(&notes).await, Err(CompressError::UnsupportedFile(_))));
    let missing = h.dir.path().join("media").join("missing.mp4");
    assert!(matches!(handle.enqueue(&missing).await, Err(CompressError::UnsupportedFile(_))));

    assert!(matches!(handle.remove(3).await, Err(CompressError::IndexOutOfRange { index: 3, len: 1 })));
    assert!(matches!(handle.set_target_size_mb(0).await, Err(CompressError::InvalidTargetSize(0))));

    let removed = handle.remove(0).await.unwrap();
    assert_eq!(removed.source_path, clip);
    assert_eq!(handle.counts().await.unwrap().total, 0);
}

#[tokio::test]
async fn export_copies_finished_outputs() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    handle.enqueue(h.video("big.mp4", TWO_MB)).await.unwrap();
    handle.enqueue(h.video("tiny.webm", 10)).await.unwrap();
    run(&handle).await;

    let target = h.dir.path().join("export");
    assert!(matches!(
        handle.export_outputs(&target).await,
        Err(CompressError::ExportDirMissing(_))
    ));

    fs::create_dir_all(&target).unwrap();
    assert_eq!(handle.export_outputs(&target).await.unwrap(), 2);
    assert!(target.join("big_compressed.mp4").exists());
    assert!(target.join("tiny.webm").exists());
}

#[tokio::test]
async fn raised_target_size_makes_large_files_optimal() {
    let _guard = SCRIPT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let h = Harness::new(FakeTools::default());
    let handle = h.launch().await;

    handle.enqueue(h.video("clip.mp4", TWO_MB)).await.unwrap();
    handle.set_target_size_mb(2).await.unwrap();
    run(&handle).await;

    let items = handle.snapshot().await.unwrap();
    assert_eq!(items[0].status, ItemStatus::AlreadyOptimal);

    handle.shutdown();
}
